pub mod clock;
pub mod config;
pub mod consumer;
pub mod document;
pub mod error;
pub mod gate;
pub mod lease;
pub mod message;
pub mod storage;
pub mod telemetry;

pub use clock::{SimulatedTimeProvider, SystemTimeProvider, TimeProvider};
pub use config::{ConsumerConfig, LeasqConfig, StorageConfig};
pub use consumer::Consumer;
pub use document::{Document, QueueDocument};
pub use error::{
    AckError, ConfigError, DecodeError, ExistsError, LoadError, ReceiveError, StoreError,
    StoreResult,
};
pub use gate::ConcurrencyGate;
pub use lease::LeasePolicy;
pub use message::ReceivedMessage;
pub use storage::{DocumentStore, Filter, MemoryStore, RocksDbStore, Update};
