use tracing::{debug, warn};

use super::*;
use crate::error::{AckError, ExistsError, LoadError};
use crate::lease::{release_update, renew_update};
use crate::storage::{Filter, Update};

impl Consumer {
    /// Delete the message for good.
    ///
    /// Deleting an id that is already gone succeeds: the message may have been
    /// acked by an earlier delivery. Store failures are returned.
    #[tracing::instrument(skip_all, fields(queue = %self.queue_name, msg_id = %id))]
    pub async fn ack(&self, id: &str) -> Result<(), AckError> {
        if id.is_empty() {
            return Err(AckError::InvalidArgument(
                "message id must not be empty".to_string(),
            ));
        }
        let filter = Filter::by_id(id);
        let deleted = self
            .gated(move |store| async move { store.delete_one(&filter).await })
            .await?;
        debug!(deleted, "message acked");
        Ok(())
    }

    /// Hand the message back so any consumer can claim it right away.
    ///
    /// Best-effort: failures are logged and swallowed. If the update does not
    /// land, the lease still expires on its own and the message is redelivered
    /// then; only redelivery latency is affected.
    #[tracing::instrument(skip_all, fields(queue = %self.queue_name, msg_id = %id))]
    pub async fn nack(&self, id: &str) {
        self.best_effort_update(id, release_update(), "nack").await;
    }

    /// Restart the lease clock for a message still being processed.
    ///
    /// Leaves `delivery_attempts` alone. Best-effort like [`nack`](Self::nack):
    /// a lost renewal only risks a duplicate delivery once the lease runs out.
    #[tracing::instrument(skip_all, fields(queue = %self.queue_name, msg_id = %id))]
    pub async fn renew(&self, id: &str) {
        let update = renew_update(self.now_ms());
        self.best_effort_update(id, update, "renew").await;
    }

    /// Whether a document with this id is still stored.
    #[tracing::instrument(skip_all, fields(queue = %self.queue_name, msg_id = %id))]
    pub async fn exists(&self, id: &str) -> Result<bool, ExistsError> {
        if id.is_empty() {
            return Err(ExistsError::InvalidArgument(
                "message id must not be empty".to_string(),
            ));
        }
        let filter = Filter::by_id(id);
        let count = self
            .gated(move |store| async move { store.count(&filter).await })
            .await?;
        Ok(count > 0)
    }

    /// Fetch a message by id without claiming it.
    ///
    /// The returned handle is bound to the same ack/nack/renew operations as a
    /// claimed one and reports the stored delivery count.
    #[tracing::instrument(skip_all, fields(queue = %self.queue_name, msg_id = %id))]
    pub async fn load(&self, id: &str) -> Result<Option<ReceivedMessage<'_>>, LoadError> {
        if id.is_empty() {
            return Err(LoadError::InvalidArgument(
                "message id must not be empty".to_string(),
            ));
        }
        let filter = Filter::by_id(id);
        let found = self
            .gated(move |store| async move { store.find_one(&filter).await })
            .await?;
        let Some(raw) = found else {
            return Ok(None);
        };
        let (id, document) = QueueDocument::from_document(&raw)?;
        Ok(Some(self.bind(document, id)))
    }

    async fn best_effort_update(&self, id: &str, update: Update, operation: &'static str) {
        if id.is_empty() {
            warn!(operation, "ignoring request with empty message id");
            return;
        }
        let filter = Filter::by_id(id);
        match self
            .gated(move |store| async move { store.update_one(&filter, &update).await })
            .await
        {
            Ok(matched) => debug!(operation, matched, "lease updated"),
            Err(e) => warn!(
                operation,
                error = %e,
                "lease update failed, falling back to lease expiry"
            ),
        }
    }
}
