use tracing::debug;

use super::*;
use crate::error::ReceiveError;
use crate::lease::claim_update;

impl Consumer {
    /// Claim the next eligible message of this consumer's queue.
    ///
    /// Eligible means the lease has expired and the message has been
    /// delivered fewer than `max_delivery_attempts` times. The claim is one
    /// atomic `find_one_and_update` that stamps `receive_time = now` and
    /// increments `delivery_attempts`, so concurrent claimants can never both
    /// win the same message.
    ///
    /// `Ok(None)` means nothing is claimable right now. A [`DecodeError`]
    /// leaves the message claimed; it becomes claimable again when the lease
    /// runs out.
    ///
    /// [`DecodeError`]: crate::error::DecodeError
    #[tracing::instrument(skip_all, fields(queue = %self.queue_name))]
    pub async fn next_message(&self) -> Result<Option<ReceivedMessage<'_>>, ReceiveError> {
        let now = self.now_ms();
        let filter = self.policy.claim_filter(&self.queue_name, now);
        let update = claim_update(now);

        let Some(raw) = self
            .gated(move |store| async move { store.find_one_and_update(&filter, &update).await })
            .await?
        else {
            return Ok(None);
        };

        let (id, document) = QueueDocument::from_document(&raw)?;
        debug!(
            msg_id = %id,
            delivery_attempts = document.delivery_attempts,
            "message claimed"
        );
        Ok(Some(self.bind(document, id)))
    }
}
