//! Per-transaction ledger access
//!
//! A [`Transaction`] is bound to one namespace. Point reads record the version
//! they observed; writes are buffered until [`crate::Ledger::commit`] hands
//! the resulting [`CommitBatch`] to the commit actor, which rejects the whole
//! transaction if any observed version has moved.

use crate::{
    query::{HistoryIter, QueryIter, RangeIter, Selector},
    store::WorldState,
    types::{validate_key, CommitBatch, KeyRange, TxMetadata},
    Error, Result,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Transaction handle passed to every contract operation
#[derive(Debug)]
pub struct Transaction {
    namespace: String,
    metadata: Option<TxMetadata>,
    store: Arc<dyn WorldState>,
    page_size: usize,
    reads: BTreeMap<String, Option<u64>>,
    writes: BTreeMap<String, Option<Vec<u8>>>,
}

impl Transaction {
    pub(crate) fn new(
        namespace: String,
        metadata: Option<TxMetadata>,
        store: Arc<dyn WorldState>,
        page_size: usize,
    ) -> Self {
        Self {
            namespace,
            metadata,
            store,
            page_size,
            reads: BTreeMap::new(),
            writes: BTreeMap::new(),
        }
    }

    /// Namespace this transaction reads and writes
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Agreed envelope metadata, `None` for read-only evaluation
    pub fn metadata(&self) -> Option<&TxMetadata> {
        self.metadata.as_ref()
    }

    /// Whether writes are refused
    pub fn is_read_only(&self) -> bool {
        self.metadata.is_none()
    }

    /// Read the latest value of a key.
    ///
    /// Buffered writes of this transaction win over committed state.
    pub fn get_state(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;

        if let Some(buffered) = self.writes.get(key) {
            return Ok(buffered.clone());
        }

        let current = self.store.get(&self.namespace, key)?;
        self.reads
            .entry(key.to_string())
            .or_insert_with(|| current.as_ref().map(|v| v.version));
        Ok(current.map(|v| v.value))
    }

    /// Whether a key currently holds a value
    pub fn exists(&mut self, key: &str) -> Result<bool> {
        Ok(self.get_state(key)?.is_some())
    }

    /// Buffer a full-value write
    pub fn put_state(&mut self, key: &str, value: Vec<u8>) -> Result<()> {
        self.check_writable(key)?;
        if value.is_empty() {
            return Err(Error::Validation(format!(
                "empty value for key {:?}, use delete_state",
                key
            )));
        }
        self.writes.insert(key.to_string(), Some(value));
        Ok(())
    }

    /// Buffer a tombstone
    pub fn delete_state(&mut self, key: &str) -> Result<()> {
        self.check_writable(key)?;
        self.writes.insert(key.to_string(), None);
        Ok(())
    }

    /// Lazy scan of `[start, end)`; empty bounds are open
    pub fn get_state_by_range(&self, start: &str, end: &str) -> Result<RangeIter> {
        Ok(self.range_iter(KeyRange::new(start, end)))
    }

    /// Lazy scan of every key with the given prefix
    pub fn get_state_by_prefix(&self, prefix: &str) -> Result<RangeIter> {
        Ok(self.range_iter(KeyRange::prefix(prefix)))
    }

    /// Lazy selector query; the selector is validated before anything is read
    pub fn get_query_result(&self, query: &str) -> Result<QueryIter> {
        let selector = Selector::parse(query)?;
        Ok(self.query(selector))
    }

    /// Lazy query with an already built selector
    pub fn query(&self, selector: Selector) -> QueryIter {
        QueryIter::new(self.range_iter(KeyRange::all()), selector)
    }

    /// Lazy history of a key, oldest version first
    pub fn get_history_for_key(&self, key: &str) -> Result<HistoryIter> {
        validate_key(key)?;
        Ok(HistoryIter::new(
            self.store.clone(),
            self.namespace.clone(),
            key.to_string(),
            self.page_size,
        ))
    }

    /// Turn the transaction into a commit batch
    pub fn into_batch(self) -> Result<CommitBatch> {
        let metadata = self.metadata.ok_or_else(|| {
            Error::Validation("read-only transaction cannot be committed".to_string())
        })?;

        Ok(CommitBatch {
            namespace: self.namespace,
            metadata,
            reads: self.reads,
            writes: self.writes,
        })
    }

    fn range_iter(&self, range: KeyRange) -> RangeIter {
        RangeIter::new(
            self.store.clone(),
            self.namespace.clone(),
            range,
            self.page_size,
        )
    }

    fn check_writable(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        if self.is_read_only() {
            return Err(Error::Validation(format!(
                "write to {:?} in a read-only transaction",
                key
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::TxTimestamp;

    fn meta(tx_id: &str) -> Option<TxMetadata> {
        Some(TxMetadata::new(tx_id, TxTimestamp::new(1_700_000_000, 0)))
    }

    #[test]
    fn test_read_your_writes() {
        let store: Arc<dyn WorldState> = Arc::new(MemoryStore::new());
        let mut tx = Transaction::new("escrow".to_string(), meta("tx1"), store, 10);

        assert!(!tx.exists("E1").unwrap());
        tx.put_state("E1", b"{}".to_vec()).unwrap();
        assert_eq!(tx.get_state("E1").unwrap(), Some(b"{}".to_vec()));

        tx.delete_state("E1").unwrap();
        assert!(!tx.exists("E1").unwrap());

        let batch = tx.into_batch().unwrap();
        // First read saw the key absent
        assert_eq!(batch.reads.get("E1"), Some(&None));
        assert_eq!(batch.writes.get("E1"), Some(&None));
    }

    #[test]
    fn test_read_only_refuses_writes() {
        let store: Arc<dyn WorldState> = Arc::new(MemoryStore::new());
        let mut tx = Transaction::new("escrow".to_string(), None, store, 10);

        assert!(tx.is_read_only());
        assert!(matches!(tx.put_state("E1", b"{}".to_vec()), Err(Error::Validation(_))));
        assert!(matches!(tx.delete_state("E1"), Err(Error::Validation(_))));
        assert!(matches!(tx.into_batch(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_key_validation() {
        let store: Arc<dyn WorldState> = Arc::new(MemoryStore::new());
        let mut tx = Transaction::new("escrow".to_string(), meta("tx1"), store, 10);

        assert!(matches!(tx.get_state(""), Err(Error::Validation(_))));
        assert!(matches!(tx.put_state("a\0b", b"x".to_vec()), Err(Error::Validation(_))));
        assert!(matches!(tx.put_state("E1", Vec::new()), Err(Error::Validation(_))));
        assert!(matches!(tx.get_history_for_key(""), Err(Error::Validation(_))));
    }

    #[test]
    fn test_bad_selector_fails_before_iteration() {
        let store: Arc<dyn WorldState> = Arc::new(MemoryStore::new());
        let tx = Transaction::new("offer".to_string(), None, store, 10);

        assert!(matches!(
            tx.get_query_result(r#"{"selector":{"amount":{"$gt":1}}}"#),
            Err(Error::Query(_))
        ));
        assert_eq!(tx.get_query_result(r#"{"selector":{"status":"X"}}"#).unwrap().count(), 0);
    }
}
