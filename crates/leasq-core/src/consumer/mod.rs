mod claim;
mod lifecycle;

use std::future::Future;
use std::sync::Arc;

use tracing::{warn, Instrument};

use crate::clock::{SystemTimeProvider, TimeProvider};
use crate::config::ConsumerConfig;
use crate::document::QueueDocument;
use crate::error::{ConfigError, StoreError, StoreResult};
use crate::gate::ConcurrencyGate;
use crate::lease::LeasePolicy;
use crate::message::ReceivedMessage;
use crate::storage::DocumentStore;

/// A competing consumer for one queue.
///
/// Any number of consumers, in this process or others, may share a store and
/// a queue name. Each message is handed to at most one of them per lease
/// window; the store's atomic conditional update is the only coordination.
/// A `Consumer` is `Send + Sync` and can be shared behind an `Arc`.
pub struct Consumer {
    queue_name: String,
    store: Arc<dyn DocumentStore>,
    gate: ConcurrencyGate,
    policy: LeasePolicy,
    config: ConsumerConfig,
    clock: Arc<dyn TimeProvider>,
}

impl Consumer {
    pub fn new(
        config: ConsumerConfig,
        queue_name: impl Into<String>,
        store: Arc<dyn DocumentStore>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let queue_name = queue_name.into();
        if queue_name.is_empty() {
            return Err(ConfigError::InvalidValue(
                "queue name must not be empty".to_string(),
            ));
        }
        Ok(Self {
            queue_name,
            store,
            gate: ConcurrencyGate::new(config.max_parallelism),
            policy: config.lease_policy(),
            config,
            clock: Arc::new(SystemTimeProvider),
        })
    }

    /// Replace the wall clock used for lease arithmetic.
    pub fn with_time_provider(mut self, clock: Arc<dyn TimeProvider>) -> Self {
        self.clock = clock;
        self
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn lease_policy(&self) -> LeasePolicy {
        self.policy
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    fn now_ms(&self) -> u64 {
        self.clock.now_unix_ms()
    }

    /// Issue one store call through the gate, bounded by the configured
    /// per-call timeout.
    ///
    /// The call runs in its own task that owns the gate slot, so the slot is
    /// held until the store work has really finished, even when the caller
    /// times out or is dropped first. A timed-out write may still land; the
    /// lease makes such a claim claimable again once it expires.
    async fn gated<T, F, Fut>(&self, call: F) -> StoreResult<T>
    where
        F: FnOnce(Arc<dyn DocumentStore>) -> Fut,
        Fut: Future<Output = StoreResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let slot = self.gate.enter().await?;
        let work = call(Arc::clone(&self.store));
        let mut running = tokio::spawn(
            async move {
                let result = work.await;
                drop(slot);
                result
            }
            .in_current_span(),
        );

        match self.config.store_timeout() {
            None => running.await?,
            Some(limit) => match tokio::time::timeout(limit, &mut running).await {
                Ok(joined) => joined?,
                Err(_) => {
                    warn!(
                        timeout_ms = limit.as_millis() as u64,
                        "store call timed out, its slot stays held until it finishes"
                    );
                    Err(StoreError::Timeout(limit))
                }
            },
        }
    }

    fn bind(&self, document: QueueDocument, id: String) -> ReceivedMessage<'_> {
        ReceivedMessage::new(self, id, document)
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("queue_name", &self.queue_name)
            .field("policy", &self.policy)
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests;
