//! Key encoding for the RocksDB queue index.
//!
//! Composite keys use `:` (0x3A) as separator. Queue names are
//! length-prefixed with a big-endian u16, so one queue's prefix can never be
//! a prefix of another queue's keys.

use crate::error::{StoreError, StoreResult};

const SEPARATOR: u8 = b':';

fn encode_string(s: &str) -> StoreResult<Vec<u8>> {
    let len = u16::try_from(s.len()).map_err(|_| {
        StoreError::Serialization(format!("key string exceeds 64 KiB: {} bytes", s.len()))
    })?;
    let mut buf = Vec::with_capacity(2 + s.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
    Ok(buf)
}

/// Prefix shared by every index entry of `queue`.
pub fn queue_prefix(queue: &str) -> StoreResult<Vec<u8>> {
    let mut prefix = encode_string(queue)?;
    prefix.push(SEPARATOR);
    Ok(prefix)
}

/// Index entry `{queue}:{id}`. Entries of one queue sort by id.
pub fn queue_index_key(queue: &str, id: &[u8]) -> StoreResult<Vec<u8>> {
    let mut key = queue_prefix(queue)?;
    key.extend_from_slice(id);
    Ok(key)
}

/// The document id an index entry points at.
pub fn id_from_index_key<'a>(key: &'a [u8], prefix: &[u8]) -> Option<&'a [u8]> {
    key.strip_prefix(prefix)
}
