//! World state abstraction
//!
//! A [`WorldState`] is the versioned key-value store behind the ledger:
//! latest value per key, full per-key history, and a hash-chained commit log.
//! Two backends exist:
//!
//! - [`MemoryStore`] - in-process, for tests and ephemeral nodes
//! - [`crate::storage::RocksStore`] - RocksDB column families
//!
//! Reads are paged: callers ask for at most `limit` entries strictly after a
//! bookmark, so no cursor or lock outlives a single call.

use crate::{
    crypto::commit_hash,
    types::{CommitBatch, CommitRecord, KeyModification, KeyRange, TxId, VersionedValue},
    Error, Result,
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::ops::Bound;

/// Versioned key-value store with history
pub trait WorldState: Send + Sync + fmt::Debug {
    /// Latest committed value of a key
    fn get(&self, namespace: &str, key: &str) -> Result<Option<VersionedValue>>;

    /// Up to `limit` live entries in `range`, strictly after `after` when given
    fn scan(
        &self,
        namespace: &str,
        range: &KeyRange,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<(String, VersionedValue)>>;

    /// Up to `limit` history entries of a key, oldest first, strictly after version `after`
    fn history(
        &self,
        namespace: &str,
        key: &str,
        after: Option<u64>,
        limit: usize,
    ) -> Result<Vec<KeyModification>>;

    /// Validate the read set and apply the write set atomically
    fn apply(&self, batch: &CommitBatch) -> Result<CommitRecord>;

    /// Most recent commit, `None` before the first one
    fn latest_commit(&self) -> Result<Option<CommitRecord>>;
}

/// Check every observed version against the current one.
///
/// `current` returns the committed version of a key (`None` if absent).
pub(crate) fn validate_reads<F>(batch: &CommitBatch, mut current: F) -> Result<()>
where
    F: FnMut(&str) -> Result<Option<u64>>,
{
    for (key, observed) in &batch.reads {
        if current(key)? != *observed {
            return Err(Error::StaleWrite {
                namespace: batch.namespace.clone(),
                key: key.clone(),
            });
        }
    }
    Ok(())
}

/// Build the commit record that follows `previous`
pub(crate) fn next_commit(previous: Option<&CommitRecord>, batch: &CommitBatch) -> CommitRecord {
    let (height, previous_hash) = match previous {
        Some(prev) => (prev.height + 1, prev.hash),
        None => (1, [0u8; 32]),
    };

    CommitRecord {
        height,
        tx_id: batch.metadata.tx_id.clone(),
        timestamp: batch.metadata.timestamp,
        namespace: batch.namespace.clone(),
        write_count: batch.writes.len() as u32,
        previous_hash,
        hash: commit_hash(&previous_hash, height, batch),
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    /// namespace -> key -> latest value
    state: BTreeMap<String, BTreeMap<String, VersionedValue>>,
    /// namespace -> key -> versions, oldest first
    history: BTreeMap<String, BTreeMap<String, Vec<KeyModification>>>,
    commits: Vec<CommitRecord>,
    tx_ids: HashSet<TxId>,
}

/// In-memory world state
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorldState for MemoryStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<VersionedValue>> {
        let inner = self.inner.read();
        Ok(inner
            .state
            .get(namespace)
            .and_then(|keys| keys.get(key))
            .cloned())
    }

    fn scan(
        &self,
        namespace: &str,
        range: &KeyRange,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<(String, VersionedValue)>> {
        let inner = self.inner.read();
        let Some(keys) = inner.state.get(namespace) else {
            return Ok(Vec::new());
        };

        let start = String::from_utf8_lossy(range.start()).into_owned();
        let lower = match after {
            Some(after) if after.as_bytes() >= range.start() => Bound::Excluded(after),
            _ => Bound::Included(start.as_str()),
        };

        Ok(keys
            .range::<str, _>((lower, Bound::Unbounded))
            .take_while(|(key, _)| range.before_end(key.as_bytes()))
            .take(limit)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    fn history(
        &self,
        namespace: &str,
        key: &str,
        after: Option<u64>,
        limit: usize,
    ) -> Result<Vec<KeyModification>> {
        let inner = self.inner.read();
        let Some(versions) = inner.history.get(namespace).and_then(|keys| keys.get(key)) else {
            return Ok(Vec::new());
        };

        Ok(versions
            .iter()
            .filter(|m| after.map_or(true, |after| m.version > after))
            .take(limit)
            .cloned()
            .collect())
    }

    fn apply(&self, batch: &CommitBatch) -> Result<CommitRecord> {
        let mut inner = self.inner.write();

        if inner.tx_ids.contains(&batch.metadata.tx_id) {
            return Err(Error::DuplicateTransaction(batch.metadata.tx_id.to_string()));
        }

        {
            let keys = inner.state.get(&batch.namespace);
            validate_reads(batch, |key| {
                Ok(keys.and_then(|k| k.get(key)).map(|v| v.version))
            })?;
        }

        let record = next_commit(inner.commits.last(), batch);

        for (key, value) in &batch.writes {
            let modification = KeyModification {
                tx_id: batch.metadata.tx_id.clone(),
                timestamp: batch.metadata.timestamp,
                value: value.clone(),
                is_delete: value.is_none(),
                version: record.height,
            };

            let state = inner.state.entry(batch.namespace.clone()).or_default();
            match value {
                Some(bytes) => {
                    state.insert(
                        key.clone(),
                        VersionedValue {
                            value: bytes.clone(),
                            version: record.height,
                        },
                    );
                }
                None => {
                    state.remove(key);
                }
            }

            inner
                .history
                .entry(batch.namespace.clone())
                .or_default()
                .entry(key.clone())
                .or_default()
                .push(modification);
        }

        inner.tx_ids.insert(batch.metadata.tx_id.clone());
        inner.commits.push(record.clone());

        Ok(record)
    }

    fn latest_commit(&self) -> Result<Option<CommitRecord>> {
        Ok(self.inner.read().commits.last().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TxMetadata, TxTimestamp};

    fn batch(tx_id: &str, writes: &[(&str, Option<&str>)]) -> CommitBatch {
        CommitBatch {
            namespace: "escrow".to_string(),
            metadata: TxMetadata::new(tx_id, TxTimestamp::new(1_700_000_000, 0)),
            reads: BTreeMap::new(),
            writes: writes
                .iter()
                .map(|(k, v)| (k.to_string(), v.map(|v| v.as_bytes().to_vec())))
                .collect(),
        }
    }

    #[test]
    fn test_apply_and_get() {
        let store = MemoryStore::new();
        let record = store.apply(&batch("tx1", &[("E1", Some("a"))])).unwrap();
        assert_eq!(record.height, 1);
        assert_eq!(record.previous_hash, [0u8; 32]);

        let value = store.get("escrow", "E1").unwrap().unwrap();
        assert_eq!(value.value, b"a");
        assert_eq!(value.version, 1);
        assert!(store.get("offer", "E1").unwrap().is_none());
    }

    #[test]
    fn test_commit_chain() {
        let store = MemoryStore::new();
        let first = store.apply(&batch("tx1", &[("E1", Some("a"))])).unwrap();
        let second = store.apply(&batch("tx2", &[("E1", Some("b"))])).unwrap();
        assert_eq!(second.height, 2);
        assert_eq!(second.previous_hash, first.hash);
        assert_eq!(store.latest_commit().unwrap().unwrap(), second);
    }

    #[test]
    fn test_duplicate_tx_rejected() {
        let store = MemoryStore::new();
        store.apply(&batch("tx1", &[("E1", Some("a"))])).unwrap();
        let result = store.apply(&batch("tx1", &[("E2", Some("b"))]));
        assert!(matches!(result, Err(Error::DuplicateTransaction(_))));
        assert!(store.get("escrow", "E2").unwrap().is_none());
    }

    #[test]
    fn test_stale_read_rejected() {
        let store = MemoryStore::new();
        store.apply(&batch("tx1", &[("E1", Some("a"))])).unwrap();

        let mut stale = batch("tx2", &[("E1", Some("b"))]);
        stale.reads.insert("E1".to_string(), None);
        let result = store.apply(&stale);
        assert!(matches!(result, Err(Error::StaleWrite { .. })));
        assert_eq!(store.get("escrow", "E1").unwrap().unwrap().value, b"a");

        let mut fresh = batch("tx3", &[("E1", Some("c"))]);
        fresh.reads.insert("E1".to_string(), Some(1));
        store.apply(&fresh).unwrap();
        assert_eq!(store.get("escrow", "E1").unwrap().unwrap().value, b"c");
    }

    #[test]
    fn test_scan_pages() {
        let store = MemoryStore::new();
        store
            .apply(&batch(
                "tx1",
                &[("a", Some("1")), ("b", Some("2")), ("c", Some("3")), ("d", Some("4"))],
            ))
            .unwrap();

        let first = store.scan("escrow", &KeyRange::all(), None, 2).unwrap();
        let keys: Vec<_> = first.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);

        let second = store.scan("escrow", &KeyRange::all(), Some("b"), 2).unwrap();
        let keys: Vec<_> = second.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["c", "d"]);

        let bounded = store.scan("escrow", &KeyRange::new("b", "d"), None, 10).unwrap();
        assert_eq!(bounded.len(), 2);

        assert!(store.scan("offer", &KeyRange::all(), None, 10).unwrap().is_empty());
    }

    #[test]
    fn test_delete_leaves_tombstone() {
        let store = MemoryStore::new();
        store.apply(&batch("tx1", &[("E1", Some("a"))])).unwrap();
        store.apply(&batch("tx2", &[("E1", None)])).unwrap();

        assert!(store.get("escrow", "E1").unwrap().is_none());

        let history = store.history("escrow", "E1", None, 10).unwrap();
        assert_eq!(history.len(), 2);
        assert!(!history[0].is_delete);
        assert!(history[1].is_delete);
        assert!(history[1].value.is_none());

        let tail = store.history("escrow", "E1", Some(1), 10).unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].version, 2);
    }
}
