use std::time::Duration;

use serde_json::Value;

use crate::document::{fields, QueueDocument, MIN_RECEIVE_TIME};
use crate::storage::{Filter, Update};

/// Lease duration and poison cutoff for one consumer.
///
/// A document is claimable iff `now - receive_time >= lease` and
/// `delivery_attempts < max_delivery_attempts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeasePolicy {
    pub lease: Duration,
    pub max_delivery_attempts: u32,
}

impl LeasePolicy {
    pub fn new(lease: Duration, max_delivery_attempts: u32) -> Self {
        Self {
            lease,
            max_delivery_attempts,
        }
    }

    fn lease_ms(&self) -> u64 {
        u64::try_from(self.lease.as_millis()).unwrap_or(u64::MAX)
    }

    /// Latest receive time that is still claimable at `now_ms`, `None` while
    /// the clock is younger than one lease and nothing can have expired.
    pub fn expiry_cutoff(&self, now_ms: u64) -> Option<u64> {
        now_ms.checked_sub(self.lease_ms())
    }

    pub fn is_lease_expired(&self, receive_time: u64, now_ms: u64) -> bool {
        self.expiry_cutoff(now_ms)
            .is_some_and(|cutoff| receive_time <= cutoff)
    }

    pub fn is_poisoned(&self, delivery_attempts: u32) -> bool {
        delivery_attempts >= self.max_delivery_attempts
    }

    pub fn is_claimable(&self, doc: &QueueDocument, now_ms: u64) -> bool {
        self.is_lease_expired(doc.receive_time, now_ms)
            && !self.is_poisoned(doc.delivery_attempts)
    }

    /// Store-side form of [`is_claimable`](Self::is_claimable), scoped to `queue`.
    pub fn claim_filter(&self, queue: &str, now_ms: u64) -> Filter {
        let filter = Filter::new()
            .eq(fields::DESTINATION_QUEUE_NAME, queue)
            .lt(fields::DELIVERY_ATTEMPTS, self.max_delivery_attempts);
        match self.expiry_cutoff(now_ms) {
            Some(cutoff) => filter.lte(fields::RECEIVE_TIME, cutoff),
            None => filter.lt(fields::RECEIVE_TIME, 0u64),
        }
    }
}

/// Claim: take the lease now and count one more delivery.
pub fn claim_update(now_ms: u64) -> Update {
    Update::new()
        .set(fields::RECEIVE_TIME, now_ms)
        .inc(fields::DELIVERY_ATTEMPTS, 1)
}

/// Renew: take the lease now, attempts untouched.
pub fn renew_update(now_ms: u64) -> Update {
    Update::new().set(fields::RECEIVE_TIME, now_ms)
}

/// Nack: push the receive time to the minimum so the lease is already expired.
pub fn release_update() -> Update {
    Update::new().set(fields::RECEIVE_TIME, Value::from(MIN_RECEIVE_TIME))
}
