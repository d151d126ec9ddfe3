use async_trait::async_trait;

use crate::document::Document;
use crate::error::StoreResult;
use crate::storage::query::{Filter, Update};

/// Document store interface. Implementations must be thread-safe.
///
/// `find_one_and_update` and `update_one` must be atomic per document: no
/// other write to the chosen document may interleave between evaluating the
/// filter and applying the update. The claim protocol depends on nothing else.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a new document. Assigns a UUIDv7 id when the document has none.
    /// Returns the id.
    async fn insert_one(&self, document: Document) -> StoreResult<String>;

    /// Return one matching document, if any.
    async fn find_one(&self, filter: &Filter) -> StoreResult<Option<Document>>;

    /// Atomically select one matching document, apply `update`, and return
    /// the post-update image. Which document is picked among several
    /// matches is up to the store.
    async fn find_one_and_update(
        &self,
        filter: &Filter,
        update: &Update,
    ) -> StoreResult<Option<Document>>;

    /// Atomically apply `update` to at most one matching document.
    /// Returns the number of documents matched (0 or 1).
    async fn update_one(&self, filter: &Filter, update: &Update) -> StoreResult<u64>;

    /// Delete at most one matching document. Returns the number deleted.
    async fn delete_one(&self, filter: &Filter) -> StoreResult<u64>;

    /// Count matching documents.
    async fn count(&self, filter: &Filter) -> StoreResult<u64>;
}

#[async_trait]
impl<T: DocumentStore + ?Sized> DocumentStore for std::sync::Arc<T> {
    async fn insert_one(&self, document: Document) -> StoreResult<String> {
        (**self).insert_one(document).await
    }

    async fn find_one(&self, filter: &Filter) -> StoreResult<Option<Document>> {
        (**self).find_one(filter).await
    }

    async fn find_one_and_update(
        &self,
        filter: &Filter,
        update: &Update,
    ) -> StoreResult<Option<Document>> {
        (**self).find_one_and_update(filter, update).await
    }

    async fn update_one(&self, filter: &Filter, update: &Update) -> StoreResult<u64> {
        (**self).update_one(filter, update).await
    }

    async fn delete_one(&self, filter: &Filter) -> StoreResult<u64> {
        (**self).delete_one(filter).await
    }

    async fn count(&self, filter: &Filter) -> StoreResult<u64> {
        (**self).count(filter).await
    }
}

/// Ensure `document` carries a non-empty string id, assigning a UUIDv7 if not.
pub(crate) fn assign_id(document: &mut Document) -> StoreResult<String> {
    use crate::document::fields;
    use crate::error::StoreError;
    use serde_json::Value;

    match document.get(fields::ID) {
        Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
        None | Some(Value::Null) => {
            let id = uuid::Uuid::now_v7().to_string();
            document.insert(fields::ID.to_string(), Value::String(id.clone()));
            Ok(id)
        }
        Some(other) => Err(StoreError::Serialization(format!(
            "document id must be a non-empty string, got {other}"
        ))),
    }
}
