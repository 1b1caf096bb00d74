//! Land Registry Ledger Core
//!
//! Versioned key-value ledger with per-key history, optimistic concurrency
//! control and a hash-chained commit log.
//!
//! # Architecture
//!
//! - **World State**: latest value + full history per key (memory or RocksDB)
//! - **Transactions**: point reads record versions, writes are buffered
//! - **Single Writer**: one commit actor validates read sets and applies write sets
//! - **Lazy Reads**: range scans, selector queries and history are paged iterators
//!
//! # Invariants
//!
//! - Deterministic replay: same transactions in the same order → same state and head hash
//! - Atomic commits: a write set is applied entirely or not at all
//! - Serializable per key: a stale read rejects the whole transaction
//! - Exactly once: a transaction id commits at most once

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod actor;
pub mod config;
pub mod crypto;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod query;
pub mod storage;
pub mod store;
pub mod transaction;
pub mod types;

// Re-exports
pub use config::{Backend, Config};
pub use error::{Error, Result};
pub use ledger::{Ledger, Retryable};
pub use metrics::Metrics;
pub use query::{HistoryIter, QueryIter, RangeIter, Selector};
pub use storage::RocksStore;
pub use store::{MemoryStore, WorldState};
pub use transaction::Transaction;
pub use types::{
    CommitRecord, KeyModification, KeyRange, KeyValue, TxId, TxMetadata, TxTimestamp,
};
