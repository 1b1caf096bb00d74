//! Error types for the ledger

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Record or row failed to encode/decode
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A key read by the transaction changed before commit
    #[error("Stale write: key {key} in {namespace} changed since it was read")]
    StaleWrite {
        /// Namespace of the conflicting key
        namespace: String,
        /// Conflicting key
        key: String,
    },

    /// Transaction id already committed
    #[error("Duplicate transaction: {0}")]
    DuplicateTransaction(String),

    /// Malformed key, envelope or write attempt
    #[error("Validation error: {0}")]
    Validation(String),

    /// Malformed or unsupported selector
    #[error("Query error: {0}")]
    Query(String),

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the caller may retry the whole read-validate-write sequence.
    ///
    /// Only optimistic concurrency conflicts qualify.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::StaleWrite { .. })
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
