use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::gate::ConcurrencyGate;
use crate::lease::LeasePolicy;

/// Top-level configuration, deserializable from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LeasqConfig {
    pub consumer: ConsumerConfig,
    pub storage: StorageConfig,
}

/// Per-consumer lease and admission settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Maximum store calls in flight per consumer.
    pub max_parallelism: usize,
    /// Visibility timeout applied at claim and renew.
    pub default_message_lease_ms: u64,
    /// Deliveries after which a message is never handed out again.
    pub max_delivery_attempts: u32,
    /// Per-store-call timeout. `None` waits as long as the store does.
    pub store_timeout_ms: Option<u64>,
}

/// Local RocksDB location used by the CLI.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_parallelism: 20,
            default_message_lease_ms: 60_000,
            max_delivery_attempts: 5,
            store_timeout_ms: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
        }
    }
}

impl ConsumerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_parallelism == 0 {
            return Err(ConfigError::InvalidValue(
                "max_parallelism must be at least 1".to_string(),
            ));
        }
        if self.max_parallelism > ConcurrencyGate::MAX_CAPACITY {
            return Err(ConfigError::InvalidValue(format!(
                "max_parallelism must be at most {}",
                ConcurrencyGate::MAX_CAPACITY
            )));
        }
        if self.default_message_lease_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "default_message_lease_ms must be positive".to_string(),
            ));
        }
        if self.max_delivery_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "max_delivery_attempts must be at least 1".to_string(),
            ));
        }
        if self.store_timeout_ms == Some(0) {
            return Err(ConfigError::InvalidValue(
                "store_timeout_ms must be positive when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn lease(&self) -> Duration {
        Duration::from_millis(self.default_message_lease_ms)
    }

    pub fn store_timeout(&self) -> Option<Duration> {
        self.store_timeout_ms.map(Duration::from_millis)
    }

    pub fn lease_policy(&self) -> LeasePolicy {
        LeasePolicy::new(self.lease(), self.max_delivery_attempts)
    }
}

impl LeasqConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: LeasqConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.consumer.validate()?;
        if self.storage.data_dir.is_empty() {
            return Err(ConfigError::InvalidValue(
                "storage.data_dir must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
