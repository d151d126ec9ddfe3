use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, Direction, ErrorKind, IteratorMode, MultiThreaded,
    OptimisticTransactionDB, Options,
};
use serde_json::Value;
use tracing::{debug, warn};

use crate::document::{fields, Document};
use crate::error::{StoreError, StoreResult};
use crate::storage::keys;
use crate::storage::query::{Filter, Update};
use crate::storage::traits::{assign_id, DocumentStore};

type DB = OptimisticTransactionDB<MultiThreaded>;

const CF_DOCUMENTS: &str = "documents";
const CF_QUEUE_INDEX: &str = "queue_index";

const COLUMN_FAMILIES: &[&str] = &[CF_DOCUMENTS, CF_QUEUE_INDEX];

/// Write-conflict retries before a conditional write gives up.
const MAX_CONFLICT_RETRIES: u32 = 16;

/// RocksDB-backed document store.
///
/// Documents are stored as JSON keyed by id in `documents`. `queue_index`
/// holds one `{queue}:{id}` entry per document with a string
/// `destination_queue_name`, written in the same transaction as the document,
/// so a queue-scoped filter only visits that queue's documents.
///
/// Conditional writes run in an optimistic transaction: the candidate is
/// re-read with `get_for_update`, re-checked against the filter, written, and
/// committed. A commit that loses a race with another writer of the same key
/// is retried from the scan, so two concurrent claims can never both update
/// one document.
///
/// Scans skip (and log) values that are not valid JSON documents. A point
/// read of such a value fails with `StoreError::Serialization`.
pub struct RocksDbStore {
    db: Arc<DB>,
}

impl RocksDbStore {
    /// Open or create a database at the given path with all column families.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Run blocking RocksDB work off the async runtime.
    ///
    /// Dropping the returned future does not stop the work once it started.
    async fn blocking<T, F>(&self, work: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&DB) -> StoreResult<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || work(&db)).await?
    }
}

fn cf<'a>(db: &'a DB, name: &str) -> StoreResult<Arc<BoundColumnFamily<'a>>> {
    db.cf_handle(name)
        .ok_or_else(|| StoreError::RocksDb(format!("column family not found: {name}")))
}

fn decode(value: &[u8]) -> StoreResult<Document> {
    Ok(serde_json::from_slice(value)?)
}

fn encode(document: &Document) -> StoreResult<Vec<u8>> {
    Ok(serde_json::to_vec(document)?)
}

fn decode_or_skip(id: &[u8], value: &[u8]) -> Option<Document> {
    match decode(value) {
        Ok(document) => Some(document),
        Err(e) => {
            warn!(
                id = %String::from_utf8_lossy(id),
                error = %e,
                "skipping undecodable document"
            );
            None
        }
    }
}

fn queue_of(document: &Document) -> Option<&str> {
    document
        .get(fields::DESTINATION_QUEUE_NAME)
        .and_then(Value::as_str)
}

/// Visit documents matching `filter` in id order until `visit` returns false.
///
/// Uses a point read for id filters, the queue index for queue-scoped
/// filters, and a full scan otherwise.
fn scan<F>(db: &DB, filter: &Filter, mut visit: F) -> StoreResult<()>
where
    F: FnMut(&[u8], Document) -> bool,
{
    let documents = cf(db, CF_DOCUMENTS)?;

    if let Some(id) = filter.id_hint() {
        if let Some(value) = db.get_cf(&documents, id.as_bytes())? {
            let document = decode(&value)?;
            if filter.matches(&document) {
                visit(id.as_bytes(), document);
            }
        }
        return Ok(());
    }

    if let Some(queue) = filter.queue_hint() {
        let index = cf(db, CF_QUEUE_INDEX)?;
        let prefix = keys::queue_prefix(queue)?;
        let iter = db.iterator_cf(
            &index,
            IteratorMode::From(prefix.as_slice(), Direction::Forward),
        );
        for item in iter {
            let (key, _) = item?;
            let Some(id) = keys::id_from_index_key(&key, &prefix) else {
                break;
            };
            // Index entries are written with their document; a miss here is
            // a document deleted after the iterator was created.
            let Some(value) = db.get_cf(&documents, id)? else {
                continue;
            };
            let Some(document) = decode_or_skip(id, &value) else {
                continue;
            };
            if filter.matches(&document) && !visit(id, document) {
                break;
            }
        }
        return Ok(());
    }

    for item in db.iterator_cf(&documents, IteratorMode::Start) {
        let (key, value) = item?;
        let Some(document) = decode_or_skip(&key, &value) else {
            continue;
        };
        if filter.matches(&document) && !visit(&key, document) {
            break;
        }
    }
    Ok(())
}

/// Find the first matching document outside any transaction.
fn scan_first(db: &DB, filter: &Filter) -> StoreResult<Option<(Vec<u8>, Document)>> {
    let mut found = None;
    scan(db, filter, |id, document| {
        found = Some((id.to_vec(), document));
        false
    })?;
    Ok(found)
}

fn is_conflict(err: &rocksdb::Error) -> bool {
    matches!(err.kind(), ErrorKind::Busy | ErrorKind::TryAgain)
}

/// Optimistic read-check-write on the first matching document.
///
/// `mutate` edits the current image in place and returns `true` to write it
/// back or `false` to delete the document. The queue index follows the
/// document in the same transaction.
fn conditional_write<F>(db: &DB, filter: &Filter, mut mutate: F) -> StoreResult<WriteOutcome>
where
    F: FnMut(&mut Document) -> StoreResult<bool>,
{
    let documents = cf(db, CF_DOCUMENTS)?;
    let index = cf(db, CF_QUEUE_INDEX)?;

    let mut attempt = 0u32;
    loop {
        if attempt >= MAX_CONFLICT_RETRIES {
            return Err(StoreError::Unavailable(format!(
                "write conflict persisted after {attempt} attempts"
            )));
        }
        attempt += 1;

        let Some((key, _)) = scan_first(db, filter)? else {
            return Ok(WriteOutcome::NoMatch);
        };

        let txn = db.transaction();
        let Some(current) = txn.get_for_update_cf(&documents, &key, true)? else {
            // Deleted between scan and lock; rescan.
            continue;
        };
        let mut document = decode(&current)?;
        if !filter.matches(&document) {
            // Changed between scan and lock; rescan.
            continue;
        }

        let old_queue = queue_of(&document).map(str::to_owned);
        let keep = mutate(&mut document)?;
        let new_queue = if keep {
            queue_of(&document).map(str::to_owned)
        } else {
            None
        };

        if keep {
            txn.put_cf(&documents, &key, encode(&document)?)?;
        } else {
            txn.delete_cf(&documents, &key)?;
        }
        if old_queue != new_queue {
            if let Some(queue) = &old_queue {
                txn.delete_cf(&index, keys::queue_index_key(queue, &key)?)?;
            }
            if let Some(queue) = &new_queue {
                txn.put_cf(&index, keys::queue_index_key(queue, &key)?, b"")?;
            }
        }

        match txn.commit() {
            Ok(()) => {
                return Ok(if keep {
                    WriteOutcome::Updated(document)
                } else {
                    WriteOutcome::Deleted
                })
            }
            Err(e) if is_conflict(&e) => {
                debug!(attempt, "write conflict, retrying conditional update");
            }
            Err(e) => return Err(e.into()),
        }
    }
}

enum WriteOutcome {
    NoMatch,
    Updated(Document),
    Deleted,
}

/// Insert a new document with its index entry.
///
/// A conflicting commit is only a duplicate if the id is now taken; otherwise
/// (`TryAgain`, or a racing insert that was deleted again) the insert retries.
fn insert(db: &DB, id: &str, document: &Document) -> StoreResult<()> {
    let documents = cf(db, CF_DOCUMENTS)?;
    let index = cf(db, CF_QUEUE_INDEX)?;
    let value = encode(document)?;
    let index_key = queue_of(document)
        .map(|queue| keys::queue_index_key(queue, id.as_bytes()))
        .transpose()?;

    for attempt in 1..=MAX_CONFLICT_RETRIES {
        let txn = db.transaction();
        if txn.get_for_update_cf(&documents, id.as_bytes(), true)?.is_some() {
            return Err(StoreError::DuplicateId(id.to_string()));
        }
        txn.put_cf(&documents, id.as_bytes(), &value)?;
        if let Some(key) = &index_key {
            txn.put_cf(&index, key, b"")?;
        }
        match txn.commit() {
            Ok(()) => return Ok(()),
            Err(e) if is_conflict(&e) => {
                if db.get_cf(&documents, id.as_bytes())?.is_some() {
                    return Err(StoreError::DuplicateId(id.to_string()));
                }
                debug!(attempt, %id, "insert conflicted without a duplicate, retrying");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(StoreError::Unavailable(format!(
        "insert of {id} kept conflicting after {MAX_CONFLICT_RETRIES} attempts"
    )))
}

#[async_trait]
impl DocumentStore for RocksDbStore {
    async fn insert_one(&self, mut document: Document) -> StoreResult<String> {
        let id = assign_id(&mut document)?;
        self.blocking(move |db| {
            insert(db, &id, &document)?;
            Ok(id)
        })
        .await
    }

    async fn find_one(&self, filter: &Filter) -> StoreResult<Option<Document>> {
        let filter = filter.clone();
        self.blocking(move |db| Ok(scan_first(db, &filter)?.map(|(_, document)| document)))
            .await
    }

    async fn find_one_and_update(
        &self,
        filter: &Filter,
        update: &Update,
    ) -> StoreResult<Option<Document>> {
        let filter = filter.clone();
        let update = update.clone();
        self.blocking(move |db| {
            let outcome = conditional_write(db, &filter, |document| {
                update.apply(document).map_err(StoreError::Serialization)?;
                Ok(true)
            })?;
            Ok(match outcome {
                WriteOutcome::Updated(document) => Some(document),
                WriteOutcome::NoMatch | WriteOutcome::Deleted => None,
            })
        })
        .await
    }

    async fn update_one(&self, filter: &Filter, update: &Update) -> StoreResult<u64> {
        let post_image = self.find_one_and_update(filter, update).await?;
        Ok(u64::from(post_image.is_some()))
    }

    async fn delete_one(&self, filter: &Filter) -> StoreResult<u64> {
        let filter = filter.clone();
        self.blocking(move |db| {
            let outcome = conditional_write(db, &filter, |_| Ok(false))?;
            Ok(u64::from(matches!(outcome, WriteOutcome::Deleted)))
        })
        .await
    }

    async fn count(&self, filter: &Filter) -> StoreResult<u64> {
        let filter = filter.clone();
        self.blocking(move |db| {
            let mut count = 0u64;
            scan(db, &filter, |_, _| {
                count += 1;
                true
            })?;
            Ok(count)
        })
        .await
    }
}
