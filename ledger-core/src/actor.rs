//! Single-writer commit actor
//!
//! Every commit on a ledger goes through one Tokio task:
//! - Read-set validation and write application never interleave
//! - Commit heights are assigned in mailbox order
//! - The bounded mailbox gives submitters backpressure
//!
//! Reads bypass the actor and go straight to the [`WorldState`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │        Ledger::commit / Ledger::submit (many)        │
//! └─────────────────────┬────────────────────────────────┘
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │               CommitActor (single task)              │
//! │    validate reads → apply writes → chain commit      │
//! └─────────────────────┬────────────────────────────────┘
//!                       ▼
//!                WorldState::apply()
//! ```

use crate::metrics::Metrics;
use crate::store::WorldState;
use crate::types::{CommitBatch, CommitRecord};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};

/// Message sent to the commit actor
#[derive(Debug)]
pub enum CommitMessage {
    /// Validate and apply a transaction
    Commit {
        /// Reads and writes of the transaction
        batch: CommitBatch,
        /// Receipt or rejection
        response: oneshot::Sender<Result<CommitRecord>>,
    },

    /// Shutdown actor
    Shutdown {
        /// Fired once the actor has released the world state
        done: oneshot::Sender<()>,
    },
}

/// Actor that owns the write path of a world state
#[derive(Debug)]
pub struct CommitActor {
    store: Arc<dyn WorldState>,
    mailbox: mpsc::Receiver<CommitMessage>,
    metrics: Metrics,
}

impl CommitActor {
    /// Create new actor
    pub fn new(
        store: Arc<dyn WorldState>,
        mailbox: mpsc::Receiver<CommitMessage>,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            mailbox,
            metrics,
        }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        let mut done = None;

        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                CommitMessage::Commit { batch, response } => {
                    let result = self.commit(&batch);
                    let _ = response.send(result);
                }
                CommitMessage::Shutdown { done: ack } => {
                    done = Some(ack);
                    break;
                }
            }
        }

        // Release the store before acknowledging so it can be reopened
        drop(self);
        tracing::debug!("Commit actor stopped");

        if let Some(ack) = done {
            let _ = ack.send(());
        }
    }

    fn commit(&self, batch: &CommitBatch) -> Result<CommitRecord> {
        let started = Instant::now();

        match self.store.apply(batch) {
            Ok(record) => {
                self.metrics
                    .record_commit(record.height, started.elapsed().as_secs_f64());
                Ok(record)
            }
            Err(e) => {
                self.metrics.record_rejection(&e);
                tracing::debug!(
                    tx_id = %batch.metadata.tx_id,
                    namespace = %batch.namespace,
                    error = %e,
                    "Commit rejected"
                );
                Err(e)
            }
        }
    }
}

/// Handle for sending messages to the actor
#[derive(Clone, Debug)]
pub struct CommitHandle {
    sender: mpsc::Sender<CommitMessage>,
}

impl CommitHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<CommitMessage>) -> Self {
        Self { sender }
    }

    /// Submit a batch and wait for its receipt
    pub async fn commit(&self, batch: CommitBatch) -> Result<CommitRecord> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CommitMessage::Commit {
                batch,
                response: tx,
            })
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Shutdown actor and wait until it has stopped
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CommitMessage::Shutdown { done: tx })
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))
    }
}

/// Spawn the commit actor on the current Tokio runtime
pub fn spawn_commit_actor(
    store: Arc<dyn WorldState>,
    mailbox_capacity: usize,
    metrics: Metrics,
) -> CommitHandle {
    let (tx, rx) = mpsc::channel(mailbox_capacity);
    let actor = CommitActor::new(store, rx, metrics);

    tokio::spawn(async move {
        actor.run().await;
    });

    CommitHandle::new(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{TxMetadata, TxTimestamp};
    use std::collections::BTreeMap;

    fn batch(tx_id: &str) -> CommitBatch {
        let mut writes = BTreeMap::new();
        writes.insert("E1".to_string(), Some(b"{}".to_vec()));
        CommitBatch {
            namespace: "escrow".to_string(),
            metadata: TxMetadata::new(tx_id, TxTimestamp::new(1_700_000_000, 0)),
            reads: BTreeMap::new(),
            writes,
        }
    }

    #[tokio::test]
    async fn test_actor_spawn_and_shutdown() {
        let store: Arc<dyn WorldState> = Arc::new(MemoryStore::new());
        let handle = spawn_commit_actor(store, 8, Metrics::new().unwrap());

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_actor_commits_in_order() {
        let store: Arc<dyn WorldState> = Arc::new(MemoryStore::new());
        let metrics = Metrics::new().unwrap();
        let handle = spawn_commit_actor(store.clone(), 8, metrics.clone());

        let first = handle.commit(batch("tx1")).await.unwrap();
        let second = handle.commit(batch("tx2")).await.unwrap();
        assert_eq!(first.height, 1);
        assert_eq!(second.height, 2);
        assert_eq!(second.previous_hash, first.hash);

        let duplicate = handle.commit(batch("tx2")).await;
        assert!(matches!(duplicate, Err(Error::DuplicateTransaction(_))));

        assert_eq!(metrics.commits_total.get(), 2);
        assert_eq!(metrics.duplicate_transactions_total.get(), 1);
        assert_eq!(store.latest_commit().unwrap().unwrap().height, 2);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_commit_after_shutdown_fails() {
        let store: Arc<dyn WorldState> = Arc::new(MemoryStore::new());
        let handle = spawn_commit_actor(store, 8, Metrics::new().unwrap());
        handle.shutdown().await.unwrap();

        let result = handle.commit(batch("tx1")).await;
        assert!(matches!(result, Err(Error::Concurrency(_))));
    }
}
