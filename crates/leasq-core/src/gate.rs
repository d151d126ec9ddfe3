use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{StoreError, StoreResult};

/// Caps the number of store calls one consumer has in flight.
///
/// Callers hold a [`GateSlot`] for the duration of one store call. The slot
/// is returned when the guard drops, so it is released on success, on error,
/// and when the holder is cancelled. Slots are owned, so a slot can move into
/// a task that outlives the caller. Waiters suspend; wake-up order is not part
/// of the contract.
#[derive(Debug)]
pub struct ConcurrencyGate {
    permits: Arc<Semaphore>,
    capacity: usize,
}

/// One admitted store call. Dropping it frees the slot.
#[derive(Debug)]
pub struct GateSlot {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyGate {
    /// Largest capacity a gate can be built with.
    pub const MAX_CAPACITY: usize = Semaphore::MAX_PERMITS;

    /// Callers validate `capacity` against [`MAX_CAPACITY`](Self::MAX_CAPACITY)
    /// first; `ConsumerConfig::validate` does.
    pub fn new(capacity: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub async fn enter(&self) -> StoreResult<GateSlot> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| StoreError::Unavailable("concurrency gate closed".to_string()))?;
        Ok(GateSlot { _permit: permit })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots not currently held.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}
