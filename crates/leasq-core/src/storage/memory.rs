use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::document::Document;
use crate::error::{StoreError, StoreResult};
use crate::storage::query::{Filter, Update};
use crate::storage::traits::{assign_id, DocumentStore};

/// In-process document store.
///
/// Every operation runs under one mutex, which makes each call atomic.
/// Documents are kept in id order and scans pick the lowest matching id.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: Mutex<BTreeMap<String, Document>>,
    injected_failures: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` calls fail with `StoreError::Unavailable`.
    pub fn fail_next(&self, count: u32) {
        self.injected_failures.store(count, Ordering::SeqCst);
    }

    /// Snapshot of a document by id, bypassing failure injection.
    pub async fn get(&self, id: &str) -> Option<Document> {
        self.documents.lock().await.get(id).cloned()
    }

    /// Overwrite (or create) a document by id, bypassing failure injection.
    pub async fn put(&self, id: &str, document: Document) {
        self.documents.lock().await.insert(id.to_string(), document);
    }

    pub async fn len(&self) -> usize {
        self.documents.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.lock().await.is_empty()
    }

    fn check_injected_failure(&self) -> StoreResult<()> {
        let consumed = self
            .injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match consumed {
            Ok(_) => Err(StoreError::Unavailable("injected failure".to_string())),
            Err(_) => Ok(()),
        }
    }
}

fn first_match<'a>(
    documents: &'a BTreeMap<String, Document>,
    filter: &Filter,
) -> Option<&'a String> {
    match filter.id_hint() {
        Some(id) => documents
            .get_key_value(id)
            .filter(|(_, doc)| filter.matches(doc))
            .map(|(key, _)| key),
        None => documents
            .iter()
            .find(|(_, doc)| filter.matches(doc))
            .map(|(key, _)| key),
    }
}

fn apply(document: &mut Document, update: &Update) -> StoreResult<()> {
    update.apply(document).map_err(StoreError::Serialization)
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert_one(&self, mut document: Document) -> StoreResult<String> {
        self.check_injected_failure()?;
        let id = assign_id(&mut document)?;
        let mut documents = self.documents.lock().await;
        if documents.contains_key(&id) {
            return Err(StoreError::DuplicateId(id));
        }
        documents.insert(id.clone(), document);
        Ok(id)
    }

    async fn find_one(&self, filter: &Filter) -> StoreResult<Option<Document>> {
        self.check_injected_failure()?;
        let documents = self.documents.lock().await;
        Ok(first_match(&documents, filter).and_then(|id| documents.get(id).cloned()))
    }

    async fn find_one_and_update(
        &self,
        filter: &Filter,
        update: &Update,
    ) -> StoreResult<Option<Document>> {
        self.check_injected_failure()?;
        let mut documents = self.documents.lock().await;
        let Some(id) = first_match(&documents, filter).cloned() else {
            return Ok(None);
        };
        let Some(document) = documents.get_mut(&id) else {
            return Ok(None);
        };
        apply(document, update)?;
        Ok(Some(document.clone()))
    }

    async fn update_one(&self, filter: &Filter, update: &Update) -> StoreResult<u64> {
        self.check_injected_failure()?;
        let mut documents = self.documents.lock().await;
        let Some(id) = first_match(&documents, filter).cloned() else {
            return Ok(0);
        };
        match documents.get_mut(&id) {
            Some(document) => {
                apply(document, update)?;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete_one(&self, filter: &Filter) -> StoreResult<u64> {
        self.check_injected_failure()?;
        let mut documents = self.documents.lock().await;
        let Some(id) = first_match(&documents, filter).cloned() else {
            return Ok(0);
        };
        Ok(u64::from(documents.remove(&id).is_some()))
    }

    async fn count(&self, filter: &Filter) -> StoreResult<u64> {
        self.check_injected_failure()?;
        let documents = self.documents.lock().await;
        let count = match filter.id_hint() {
            Some(id) => usize::from(documents.get(id).is_some_and(|doc| filter.matches(doc))),
            None => documents.values().filter(|doc| filter.matches(doc)).count(),
        };
        Ok(count as u64)
    }
}
