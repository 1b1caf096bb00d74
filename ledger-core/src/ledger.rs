//! Main ledger orchestration layer
//!
//! This module ties together the world state, the commit actor and the
//! transaction adapter into the API contracts are written against.
//!
//! # Example
//!
//! ```no_run
//! use ledger_core::{Config, Ledger, TxMetadata, TxTimestamp};
//!
//! #[tokio::main]
//! async fn main() -> ledger_core::Result<()> {
//!     let ledger = Ledger::open(Config::default()).await?;
//!
//!     let meta = TxMetadata::new("tx-1", TxTimestamp::new(1_700_000_000, 0));
//!     let (_, receipt) = ledger
//!         .submit("escrow", meta, |tx| tx.put_state("E1", b"{}".to_vec()))
//!         .await?;
//!     println!("committed at height {}", receipt.height);
//!
//!     Ok(())
//! }
//! ```

use crate::{
    actor::{spawn_commit_actor, CommitHandle},
    config::Backend,
    metrics::Metrics,
    storage::RocksStore,
    store::{MemoryStore, WorldState},
    transaction::Transaction,
    types::{validate_namespace, CommitRecord, TxMetadata},
    Config, Error, Result,
};
use std::sync::Arc;

/// Errors that may be resolved by re-running the operation from a fresh read
pub trait Retryable {
    /// Whether a retry can succeed
    fn is_retryable(&self) -> bool;
}

impl Retryable for Error {
    fn is_retryable(&self) -> bool {
        Error::is_retryable(self)
    }
}

/// Main ledger interface
#[derive(Clone, Debug)]
pub struct Ledger {
    /// Actor handle for the write path
    handle: CommitHandle,

    /// Direct world state access (for reads)
    store: Arc<dyn WorldState>,

    /// Metrics
    metrics: Metrics,

    /// Configuration
    config: Config,
}

impl Ledger {
    /// Open ledger with configuration
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let store: Arc<dyn WorldState> = match config.backend {
            Backend::Memory => Arc::new(MemoryStore::new()),
            Backend::Rocksdb => Arc::new(RocksStore::open(&config)?),
        };

        Self::with_store(store, config)
    }

    /// Open an empty in-memory ledger
    pub async fn in_memory() -> Result<Self> {
        Self::open(Config::memory()).await
    }

    /// Build a ledger over an existing world state
    pub fn with_store(store: Arc<dyn WorldState>, config: Config) -> Result<Self> {
        let metrics = Metrics::new()
            .map_err(|e| Error::Config(format!("Failed to create metrics: {}", e)))?;

        if let Some(latest) = store.latest_commit()? {
            metrics.commit_height.set(latest.height as i64);
        }

        let handle = spawn_commit_actor(
            store.clone(),
            config.actor.mailbox_capacity,
            metrics.clone(),
        );

        tracing::info!(
            backend = ?config.backend,
            page_size = config.query.page_size,
            "Ledger opened"
        );

        Ok(Self {
            handle,
            store,
            metrics,
            config,
        })
    }

    /// Start a writable transaction in `namespace`
    pub fn begin(&self, namespace: &str, metadata: TxMetadata) -> Result<Transaction> {
        validate_namespace(namespace)?;
        Ok(Transaction::new(
            namespace.to_string(),
            Some(metadata),
            self.store.clone(),
            self.config.query.page_size,
        ))
    }

    /// Start a read-only transaction in `namespace`
    pub fn read_only(&self, namespace: &str) -> Result<Transaction> {
        validate_namespace(namespace)?;
        Ok(Transaction::new(
            namespace.to_string(),
            None,
            self.store.clone(),
            self.config.query.page_size,
        ))
    }

    /// Validate and apply a transaction through the commit actor
    pub async fn commit(&self, tx: Transaction) -> Result<CommitRecord> {
        let batch = tx.into_batch()?;
        let record = self.handle.commit(batch).await?;

        tracing::debug!(
            height = record.height,
            tx_id = %record.tx_id,
            namespace = %record.namespace,
            "Transaction committed"
        );

        Ok(record)
    }

    /// Run `op` in a fresh transaction and commit it.
    ///
    /// Nothing is written if `op` fails.
    pub async fn submit<T, E, F>(
        &self,
        namespace: &str,
        metadata: TxMetadata,
        op: F,
    ) -> std::result::Result<(T, CommitRecord), E>
    where
        F: FnOnce(&mut Transaction) -> std::result::Result<T, E>,
        E: From<Error>,
    {
        let mut tx = self.begin(namespace, metadata)?;
        let output = op(&mut tx)?;
        let record = self.commit(tx).await?;
        Ok((output, record))
    }

    /// Like [`Ledger::submit`], re-running the whole operation on retryable errors.
    ///
    /// `metadata` is called with the attempt number (starting at 0) so each
    /// attempt can carry its own transaction id. At most
    /// `retry.max_attempts` attempts are made.
    pub async fn submit_with_retry<T, E, F, M>(
        &self,
        namespace: &str,
        mut metadata: M,
        mut op: F,
    ) -> std::result::Result<(T, CommitRecord), E>
    where
        F: FnMut(&mut Transaction) -> std::result::Result<T, E>,
        M: FnMut(u32) -> TxMetadata,
        E: From<Error> + Retryable + std::fmt::Display,
    {
        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match self.submit(namespace, metadata(attempt), &mut op).await {
                Err(e) if e.is_retryable() && attempt + 1 < max_attempts => {
                    tracing::debug!(attempt, namespace, error = %e, "Retrying after conflict");
                    attempt += 1;
                    tokio::task::yield_now().await;
                }
                result => return result,
            }
        }
    }

    /// Run `op` against a read-only transaction; nothing is committed
    pub fn evaluate<T, E, F>(&self, namespace: &str, op: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut Transaction) -> std::result::Result<T, E>,
        E: From<Error>,
    {
        let mut tx = self.read_only(namespace)?;
        op(&mut tx)
    }

    /// Most recent commit
    pub fn latest_commit(&self) -> Result<Option<CommitRecord>> {
        self.store.latest_commit()
    }

    /// Metrics of this ledger
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Configuration of this ledger
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shutdown ledger
    pub async fn shutdown(self) -> Result<()> {
        self.handle.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TxTimestamp;

    fn meta(tx_id: &str) -> TxMetadata {
        TxMetadata::new(tx_id, TxTimestamp::new(1_700_000_000, 0))
    }

    async fn create_test_ledger() -> (Ledger, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();

        (Ledger::open(config).await.unwrap(), temp_dir)
    }

    #[tokio::test]
    async fn test_ledger_open() {
        let (ledger, _temp) = create_test_ledger().await;
        assert!(ledger.latest_commit().unwrap().is_none());
        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_submit_and_read() {
        let (ledger, _temp) = create_test_ledger().await;

        let (_, record) = ledger
            .submit("escrow", meta("tx1"), |tx| tx.put_state("E1", b"{\"a\":1}".to_vec()))
            .await
            .unwrap();
        assert_eq!(record.height, 1);
        assert_eq!(record.write_count, 1);

        let value = ledger
            .evaluate("escrow", |tx| tx.get_state("E1"))
            .unwrap();
        assert_eq!(value, Some(b"{\"a\":1}".to_vec()));

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_operation_writes_nothing() {
        let ledger = Ledger::in_memory().await.unwrap();

        let result: Result<((), CommitRecord)> = ledger
            .submit("property", meta("tx1"), |tx| {
                tx.put_state("P1", b"{}".to_vec())?;
                Err(Error::Validation("injected".to_string()))
            })
            .await;
        assert!(result.is_err());

        assert!(!ledger.evaluate("property", |tx| tx.exists("P1")).unwrap());
        assert!(ledger.latest_commit().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_conflicting_transactions() {
        let ledger = Ledger::in_memory().await.unwrap();
        ledger
            .submit("property", meta("tx0"), |tx| tx.put_state("P1", b"0".to_vec()))
            .await
            .unwrap();

        let mut first = ledger.begin("property", meta("tx1")).unwrap();
        let mut second = ledger.begin("property", meta("tx2")).unwrap();
        first.get_state("P1").unwrap();
        second.get_state("P1").unwrap();
        first.put_state("P1", b"1".to_vec()).unwrap();
        second.put_state("P1", b"2".to_vec()).unwrap();

        ledger.commit(first).await.unwrap();
        let err = ledger.commit(second).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(ledger.metrics().stale_writes_total.get(), 1);

        let value = ledger.evaluate("property", |tx| tx.get_state("P1")).unwrap();
        assert_eq!(value, Some(b"1".to_vec()));
    }

    #[tokio::test]
    async fn test_duplicate_tx_id_is_terminal() {
        let ledger = Ledger::in_memory().await.unwrap();
        ledger
            .submit("user", meta("tx1"), |tx| tx.put_state("U1", b"{}".to_vec()))
            .await
            .unwrap();

        let mut calls = 0;
        let result: Result<((), CommitRecord)> = ledger
            .submit_with_retry(
                "user",
                |_| meta("tx1"),
                |tx| {
                    calls += 1;
                    tx.put_state("U2", b"{}".to_vec())
                },
            )
            .await;
        assert!(matches!(result, Err(Error::DuplicateTransaction(_))));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_read_only_rejects_writes() {
        let ledger = Ledger::in_memory().await.unwrap();
        let result = ledger.evaluate("escrow", |tx| tx.put_state("E1", b"{}".to_vec()));
        assert!(matches!(result, Err(Error::Validation(_))));
        assert!(matches!(ledger.begin("", meta("tx1")), Err(Error::Validation(_))));
    }
}
