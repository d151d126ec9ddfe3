use std::collections::HashMap;

use crate::consumer::Consumer;
use crate::document::QueueDocument;
use crate::error::AckError;

/// A message handed out by a [`Consumer`], bound to its id.
///
/// The handle borrows the consumer that produced it and owns no store
/// resources. Finish with exactly one of [`ack`](Self::ack) or
/// [`nack`](Self::nack); both consume the handle. Call
/// [`renew`](Self::renew) as often as needed before that.
#[derive(Debug)]
pub struct ReceivedMessage<'c> {
    consumer: &'c Consumer,
    id: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
    delivery_count: u32,
}

impl<'c> ReceivedMessage<'c> {
    pub(crate) fn new(consumer: &'c Consumer, id: String, document: QueueDocument) -> Self {
        Self {
            consumer,
            id,
            headers: document.header_map(),
            body: document.body,
            delivery_count: document.delivery_attempts,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn queue_name(&self) -> &str {
        self.consumer.queue_name()
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Take the body, giving up the handle without acking or nacking.
    /// The message is redelivered once its lease expires.
    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    /// How many times this message has been claimed, this delivery included.
    pub fn delivery_count(&self) -> u32 {
        self.delivery_count
    }

    /// Processing succeeded: delete the message.
    pub async fn ack(self) -> Result<(), AckError> {
        self.consumer.ack(&self.id).await
    }

    /// Processing failed: make the message claimable again immediately.
    pub async fn nack(self) {
        self.consumer.nack(&self.id).await
    }

    /// Still working: extend the lease.
    pub async fn renew(&self) {
        self.consumer.renew(&self.id).await
    }
}
