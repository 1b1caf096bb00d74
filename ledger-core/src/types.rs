//! Core types for the ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode rows, JSON documents)
//! - Replica-independent metadata (nothing here reads a local clock)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::{Error, Result};

/// Separator between namespace and key in the physical key space.
pub const KEY_SEPARATOR: u8 = 0;

/// Transaction identifier assigned by the ordering layer
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxId(String);

impl TxId {
    /// Create new transaction ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Consensus-agreed transaction timestamp, protobuf `Timestamp` layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxTimestamp {
    /// Seconds since Unix epoch
    pub seconds: i64,
    /// Sub-second nanoseconds, must be below 1e9
    pub nanos: i32,
}

impl TxTimestamp {
    /// Create timestamp from seconds and nanos
    pub fn new(seconds: i64, nanos: i32) -> Self {
        Self { seconds, nanos }
    }

    /// Whether the nanos field is within the protobuf range
    pub fn is_well_formed(&self) -> bool {
        (0..1_000_000_000).contains(&self.nanos)
    }
}

/// Metadata attached to a transaction envelope by the ordering layer.
///
/// Every replica executing the transaction sees the same metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxMetadata {
    /// Transaction ID
    pub tx_id: TxId,
    /// Agreed timestamp
    pub timestamp: TxTimestamp,
}

impl TxMetadata {
    /// Create new metadata
    pub fn new(tx_id: impl Into<String>, timestamp: TxTimestamp) -> Self {
        Self {
            tx_id: TxId::new(tx_id),
            timestamp,
        }
    }
}

/// Latest committed value of a key together with its version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedValue {
    /// Raw value bytes (a JSON document for contract records)
    pub value: Vec<u8>,
    /// Commit height that wrote this value
    pub version: u64,
}

/// One entry of a key's history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyModification {
    /// Transaction that wrote this version
    pub tx_id: TxId,
    /// Agreed timestamp of that transaction
    pub timestamp: TxTimestamp,
    /// Value written, `None` for a tombstone
    pub value: Option<Vec<u8>>,
    /// Whether this version is a delete
    pub is_delete: bool,
    /// Commit height of this version
    pub version: u64,
}

/// A key with its latest committed value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    /// Key within the namespace
    pub key: String,
    /// Value bytes
    pub value: Vec<u8>,
}

/// Half-open key range `[start, end)` within a namespace.
///
/// Bounds are compared bytewise; an empty start and a missing end cover the
/// whole namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyRange {
    start: Vec<u8>,
    end: Option<Vec<u8>>,
}

impl KeyRange {
    /// Range over the whole namespace
    pub fn all() -> Self {
        Self::default()
    }

    /// Create a range from string bounds, an empty bound is unbounded
    pub fn new(start: &str, end: &str) -> Self {
        Self {
            start: start.as_bytes().to_vec(),
            end: (!end.is_empty()).then(|| end.as_bytes().to_vec()),
        }
    }

    /// All keys that begin with `prefix`
    pub fn prefix(prefix: &str) -> Self {
        // 0xFF never occurs in UTF-8, so it sorts after every extension of the prefix.
        let mut end = prefix.as_bytes().to_vec();
        end.push(0xFF);
        Self {
            start: prefix.as_bytes().to_vec(),
            end: Some(end),
        }
    }

    /// Inclusive start bound
    pub fn start(&self) -> &[u8] {
        &self.start
    }

    /// Exclusive end bound, `None` when unbounded
    pub fn end(&self) -> Option<&[u8]> {
        self.end.as_deref()
    }

    /// Whether `key` sorts before the end bound
    pub fn before_end(&self, key: &[u8]) -> bool {
        self.end.as_deref().map_or(true, |end| key < end)
    }
}

/// Everything a commit needs: read versions to validate and writes to apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitBatch {
    /// Namespace the transaction is bound to
    pub namespace: String,
    /// Transaction metadata
    pub metadata: TxMetadata,
    /// Observed versions (`None` = key was absent)
    pub reads: BTreeMap<String, Option<u64>>,
    /// Buffered writes (`None` = delete)
    pub writes: BTreeMap<String, Option<Vec<u8>>>,
}

/// Receipt returned for each applied commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    /// Commit height (sequential, starting at 1)
    pub height: u64,
    /// Transaction ID
    pub tx_id: TxId,
    /// Agreed timestamp
    pub timestamp: TxTimestamp,
    /// Namespace written
    pub namespace: String,
    /// Number of keys written
    pub write_count: u32,
    /// Hash of the previous commit
    pub previous_hash: [u8; 32],
    /// Hash of this commit
    pub hash: [u8; 32],
}

/// Validate a key before it touches the physical key space.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::Validation("key must not be empty".to_string()));
    }
    if key.as_bytes().contains(&KEY_SEPARATOR) {
        return Err(Error::Validation(format!(
            "key {:?} contains the reserved NUL byte",
            key
        )));
    }
    Ok(())
}

/// Validate a namespace name
pub fn validate_namespace(namespace: &str) -> Result<()> {
    validate_key(namespace).map_err(|_| {
        Error::Validation(format!("invalid namespace {:?}", namespace))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_well_formed() {
        assert!(TxTimestamp::new(1_700_000_000, 0).is_well_formed());
        assert!(TxTimestamp::new(1_700_000_000, 999_999_999).is_well_formed());
        assert!(!TxTimestamp::new(1_700_000_000, 1_000_000_000).is_well_formed());
        assert!(!TxTimestamp::new(1_700_000_000, -1).is_well_formed());
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("P1").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("a\0b").is_err());
    }

    #[test]
    fn test_key_range_bounds() {
        let all = KeyRange::all();
        assert!(all.start().is_empty());
        assert!(all.before_end(b"anything"));

        let bounded = KeyRange::new("b", "d");
        assert_eq!(bounded.start(), b"b");
        assert!(bounded.before_end(b"c99"));
        assert!(!bounded.before_end(b"d"));

        let prefix = KeyRange::prefix("TXN_");
        assert_eq!(prefix.start(), b"TXN_");
        assert!(prefix.before_end(b"TXN_zzz"));
        assert!(!prefix.before_end(b"TXO"));
    }
}
