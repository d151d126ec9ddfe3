use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Semaphore;

use super::*;
use crate::document::{fields, Document};
use crate::storage::{Filter, Update};

/// Fixed starting point for simulated clocks.
pub(super) const START_MS: u64 = 1_700_000_000_000;

pub(super) fn test_config(lease_ms: u64, max_delivery_attempts: u32) -> ConsumerConfig {
    ConsumerConfig {
        max_parallelism: 4,
        default_message_lease_ms: lease_ms,
        max_delivery_attempts,
        store_timeout_ms: None,
    }
}

/// Helper: a consumer on a fresh in-memory store with a simulated clock.
pub(super) fn test_setup(
    queue: &str,
    lease_ms: u64,
    max_delivery_attempts: u32,
) -> (Consumer, Arc<MemoryStore>, SimulatedTimeProvider) {
    let store = Arc::new(MemoryStore::new());
    let clock = SimulatedTimeProvider::new(START_MS);
    let consumer = consumer_on(&store, queue, test_config(lease_ms, max_delivery_attempts), &clock);
    (consumer, store, clock)
}

/// Helper: another consumer sharing an existing store and clock.
pub(super) fn consumer_on(
    store: &Arc<MemoryStore>,
    queue: &str,
    config: ConsumerConfig,
    clock: &SimulatedTimeProvider,
) -> Consumer {
    Consumer::new(config, queue, store.clone())
        .unwrap()
        .with_time_provider(Arc::new(clock.clone()))
}

/// Helper: insert a fresh message the way a producer would.
pub(super) async fn send(store: &dyn DocumentStore, queue: &str, body: &[u8]) -> String {
    send_with_headers(store, queue, vec![], body).await
}

pub(super) async fn send_with_headers(
    store: &dyn DocumentStore,
    queue: &str,
    headers: Vec<(&str, &str)>,
    body: &[u8],
) -> String {
    let doc = QueueDocument::new(
        queue,
        headers
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string())),
        body.to_vec(),
    );
    store.insert_one(doc.to_document().unwrap()).await.unwrap()
}

/// Helper: read the stored delivery counter bypassing the consumer.
pub(super) async fn stored_attempts(store: &MemoryStore, id: &str) -> u64 {
    store.get(id).await.unwrap()[fields::DELIVERY_ATTEMPTS]
        .as_u64()
        .unwrap()
}

pub(super) async fn stored_receive_time(store: &MemoryStore, id: &str) -> u64 {
    store.get(id).await.unwrap()[fields::RECEIVE_TIME]
        .as_u64()
        .unwrap()
}

pub(super) fn object(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        _ => panic!("not an object"),
    }
}

/// Poll `condition` until it holds, failing the test after one second.
pub(super) async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached within 1s");
}

/// Store whose `count` calls park until the test releases them.
///
/// Tracks how many calls started and how many are running, so tests can see
/// exactly when the gate lets a call through.
pub(super) struct HeldStore {
    inner: MemoryStore,
    release: Semaphore,
    started: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl HeldStore {
    pub(super) fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            release: Semaphore::new(0),
            started: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Let `n` parked calls finish.
    pub(super) fn release(&self, n: usize) {
        self.release.add_permits(n);
    }

    pub(super) fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub(super) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub(super) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub(super) fn inner(&self) -> &MemoryStore {
        &self.inner
    }
}

#[async_trait]
impl DocumentStore for HeldStore {
    async fn insert_one(&self, document: Document) -> StoreResult<String> {
        self.inner.insert_one(document).await
    }

    async fn find_one(&self, filter: &Filter) -> StoreResult<Option<Document>> {
        self.inner.find_one(filter).await
    }

    async fn find_one_and_update(
        &self,
        filter: &Filter,
        update: &Update,
    ) -> StoreResult<Option<Document>> {
        self.inner.find_one_and_update(filter, update).await
    }

    async fn update_one(&self, filter: &Filter, update: &Update) -> StoreResult<u64> {
        self.inner.update_one(filter, update).await
    }

    async fn delete_one(&self, filter: &Filter) -> StoreResult<u64> {
        self.inner.delete_one(filter).await
    }

    async fn count(&self, filter: &Filter) -> StoreResult<u64> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        let permit = self
            .release
            .acquire()
            .await
            .map_err(|_| StoreError::Unavailable("released".to_string()))?;
        permit.forget();
        self.inner.count(filter).await
    }
}

/// Store that does a fixed stretch of blocking work before each call.
///
/// The blocking part runs on the blocking pool and cannot be cancelled, like
/// a RocksDB call already handed to `spawn_blocking`. `max_in_flight` counts
/// how many of those stretches ever overlapped.
pub(super) struct SlowStore<S> {
    inner: S,
    delay: Duration,
    started: Arc<AtomicUsize>,
    finished: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl<S: DocumentStore> SlowStore<S> {
    pub(super) fn new(inner: S, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            started: Arc::new(AtomicUsize::new(0)),
            finished: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(super) fn inner(&self) -> &S {
        &self.inner
    }

    pub(super) fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub(super) fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }

    pub(super) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn work(&self) -> StoreResult<()> {
        let delay = self.delay;
        let started = Arc::clone(&self.started);
        let finished = Arc::clone(&self.finished);
        let in_flight = Arc::clone(&self.in_flight);
        let max_in_flight = Arc::clone(&self.max_in_flight);
        tokio::task::spawn_blocking(move || {
            started.fetch_add(1, Ordering::SeqCst);
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            max_in_flight.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(delay);
            in_flight.fetch_sub(1, Ordering::SeqCst);
            finished.fetch_add(1, Ordering::SeqCst);
        })
        .await?;
        Ok(())
    }
}

#[async_trait]
impl<S: DocumentStore> DocumentStore for SlowStore<S> {
    async fn insert_one(&self, document: Document) -> StoreResult<String> {
        self.work().await?;
        self.inner.insert_one(document).await
    }

    async fn find_one(&self, filter: &Filter) -> StoreResult<Option<Document>> {
        self.work().await?;
        self.inner.find_one(filter).await
    }

    async fn find_one_and_update(
        &self,
        filter: &Filter,
        update: &Update,
    ) -> StoreResult<Option<Document>> {
        self.work().await?;
        self.inner.find_one_and_update(filter, update).await
    }

    async fn update_one(&self, filter: &Filter, update: &Update) -> StoreResult<u64> {
        self.work().await?;
        self.inner.update_one(filter, update).await
    }

    async fn delete_one(&self, filter: &Filter) -> StoreResult<u64> {
        self.work().await?;
        self.inner.delete_one(filter).await
    }

    async fn count(&self, filter: &Filter) -> StoreResult<u64> {
        self.work().await?;
        self.inner.count(filter).await
    }
}
