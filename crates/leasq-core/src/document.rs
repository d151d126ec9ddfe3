use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::DecodeError;

/// A raw document as the store sees it: a JSON object.
pub type Document = Map<String, Value>;

/// Persisted field names of a queue message document.
pub mod fields {
    pub const ID: &str = "id";
    pub const DESTINATION_QUEUE_NAME: &str = "destination_queue_name";
    pub const BODY: &str = "body";
    pub const HEADERS: &str = "headers";
    pub const KEY: &str = "key";
    pub const VALUE: &str = "value";
    pub const RECEIVE_TIME: &str = "receive_time";
    pub const DELIVERY_ATTEMPTS: &str = "delivery_attempts";
}

/// The smallest receive time a document can carry. A document at this value
/// is claimable as soon as the store's clock is past one lease duration.
pub const MIN_RECEIVE_TIME: u64 = 0;

/// One stored header entry. Keys are not unique at the storage level.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Header {
    pub key: String,
    pub value: String,
}

/// Typed view of a queue message document.
///
/// `receive_time` (Unix millis) doubles as the lease marker: recent means some
/// consumer holds the lease, older than the lease duration means claimable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub destination_queue_name: String,
    pub body: Vec<u8>,
    pub headers: Vec<Header>,
    pub receive_time: u64,
    pub delivery_attempts: u32,
}

impl QueueDocument {
    /// A fresh, unleased document for `queue`. The store assigns the id on insert.
    pub fn new(
        queue: impl Into<String>,
        headers: impl IntoIterator<Item = (String, String)>,
        body: Vec<u8>,
    ) -> Self {
        Self {
            id: None,
            destination_queue_name: queue.into(),
            body,
            headers: headers
                .into_iter()
                .map(|(key, value)| Header { key, value })
                .collect(),
            receive_time: MIN_RECEIVE_TIME,
            delivery_attempts: 0,
        }
    }

    pub fn to_document(&self) -> Result<Document, serde_json::Error> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(serde::ser::Error::custom(format!(
                "queue document serialized to non-object: {other}"
            ))),
        }
    }

    /// Decode a raw store document into its id and typed view. A missing or
    /// empty id is a schema violation here: anything read back from a store
    /// has one.
    pub fn from_document(document: &Document) -> Result<(String, Self), DecodeError> {
        let decoded: QueueDocument = serde_json::from_value(Value::Object(document.clone()))
            .map_err(|e| DecodeError {
                reason: e.to_string(),
                document: document.clone(),
            })?;
        match decoded.id.clone() {
            Some(id) if !id.is_empty() => Ok((id, decoded)),
            _ => Err(DecodeError {
                reason: format!("missing field `{}`", fields::ID),
                document: document.clone(),
            }),
        }
    }

    /// Headers as a map; later entries win over earlier ones with the same key.
    pub fn header_map(&self) -> HashMap<String, String> {
        self.headers
            .iter()
            .map(|h| (h.key.clone(), h.value.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn new_document_is_unleased() {
        let doc = QueueDocument::new("orders", vec![], b"x".to_vec());
        assert_eq!(doc.receive_time, MIN_RECEIVE_TIME);
        assert_eq!(doc.delivery_attempts, 0);
        assert!(doc.id.is_none());
    }

    #[test]
    fn to_document_uses_persisted_field_names() {
        let doc = QueueDocument::new(
            "orders",
            vec![("k".to_string(), "v".to_string())],
            vec![1, 2],
        );
        let map = doc.to_document().unwrap();
        assert_eq!(map[fields::DESTINATION_QUEUE_NAME], json!("orders"));
        assert_eq!(map[fields::BODY], json!([1, 2]));
        assert_eq!(map[fields::HEADERS], json!([{"key": "k", "value": "v"}]));
        assert_eq!(map[fields::RECEIVE_TIME], json!(0));
        assert_eq!(map[fields::DELIVERY_ATTEMPTS], json!(0));
        assert!(!map.contains_key(fields::ID), "id is left to the store");
    }

    #[test]
    fn header_map_last_write_wins() {
        let doc = QueueDocument::new(
            "q",
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string()),
                ("a".to_string(), "3".to_string()),
            ],
            vec![],
        );
        let headers = doc.header_map();
        assert_eq!(headers.len(), 2);
        assert_eq!(headers["a"], "3");
        assert_eq!(headers["b"], "2");
    }

    #[test]
    fn from_document_rejects_malformed_body() {
        let document = raw(json!({
            "id": "m1",
            "destination_queue_name": "q",
            "body": "not-bytes",
            "headers": [],
            "receive_time": 0,
            "delivery_attempts": 1,
        }));
        let err = QueueDocument::from_document(&document).unwrap_err();
        assert_eq!(err.document, document);
    }

    #[test]
    fn from_document_rejects_missing_attempts() {
        let document = raw(json!({
            "id": "m1",
            "destination_queue_name": "q",
            "body": [],
            "headers": [],
            "receive_time": 0,
        }));
        let err = QueueDocument::from_document(&document).unwrap_err();
        assert!(err.reason.contains("delivery_attempts"), "{}", err.reason);
    }

    #[test]
    fn from_document_rejects_missing_id() {
        let document = raw(json!({
            "destination_queue_name": "q",
            "body": [],
            "headers": [],
            "receive_time": 0,
            "delivery_attempts": 0,
        }));
        assert!(QueueDocument::from_document(&document).is_err());
    }

    #[test]
    fn from_document_rejects_empty_id() {
        let document = raw(json!({
            "id": "",
            "destination_queue_name": "q",
            "body": [],
            "headers": [],
            "receive_time": 0,
            "delivery_attempts": 0,
        }));
        let err = QueueDocument::from_document(&document).unwrap_err();
        assert!(err.reason.contains(fields::ID), "{}", err.reason);
    }

    #[test]
    fn from_document_accepts_well_formed() {
        let document = raw(json!({
            "id": "m1",
            "destination_queue_name": "q",
            "body": [104, 105],
            "headers": [{"key": "trace", "value": "abc"}],
            "receive_time": 42,
            "delivery_attempts": 3,
        }));
        let (id, doc) = QueueDocument::from_document(&document).unwrap();
        assert_eq!(id, "m1");
        assert_eq!(doc.id.as_deref(), Some("m1"));
        assert_eq!(doc.body, b"hi");
        assert_eq!(doc.delivery_attempts, 3);
        assert_eq!(doc.header_map()["trace"], "abc");
    }
}
