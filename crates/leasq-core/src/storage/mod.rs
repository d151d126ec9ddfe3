mod keys;
mod memory;
mod query;
mod rocksdb;
mod traits;

pub use self::rocksdb::RocksDbStore;
pub use memory::MemoryStore;
pub use query::{Condition, Filter, Update};
pub use traits::DocumentStore;
