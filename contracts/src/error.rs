//! Error types for contracts

use ledger_core::Retryable;
use thiserror::Error;

/// Result type for contract operations
pub type Result<T> = std::result::Result<T, Error>;

/// Contract errors
#[derive(Error, Debug)]
pub enum Error {
    /// Lookup of a key that holds no record
    #[error("{entity} {id} does not exist")]
    NotFound {
        /// Entity kind
        entity: &'static str,
        /// Record id
        id: String,
    },

    /// Create on a key that already holds a record
    #[error("{entity} {id} already exists")]
    AlreadyExists {
        /// Entity kind
        entity: &'static str,
        /// Record id
        id: String,
    },

    /// Operation not legal for the record's current status
    #[error("cannot {operation} {entity} {id} in status {status}")]
    InvalidTransition {
        /// Entity kind
        entity: &'static str,
        /// Record id
        id: String,
        /// Rejected operation
        operation: String,
        /// Status at the time of the attempt
        status: String,
    },

    /// Malformed input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Ledger error
    #[error("Ledger error: {0}")]
    Ledger(#[from] ledger_core::Error),
}

impl Error {
    /// Stable error kind reported to callers
    pub fn kind(&self) -> &'static str {
        use ledger_core::Error as L;

        match self {
            Error::NotFound { .. } => "NotFound",
            Error::AlreadyExists { .. } => "AlreadyExists",
            Error::InvalidTransition { .. } => "InvalidTransition",
            Error::Validation(_) => "ValidationError",
            Error::Ledger(inner) => match inner {
                L::Validation(_) | L::Query(_) => "ValidationError",
                L::StaleWrite { .. } => "StaleWrite",
                L::Serialization(_) => "SerializationError",
                L::DuplicateTransaction(_) => "DuplicateTransaction",
                L::Storage(_) | L::Io(_) => "StorageError",
                L::Concurrency(_) => "ConcurrencyError",
                L::Config(_) => "ConfigError",
            },
        }
    }

    /// Whether re-running the operation from a fresh read can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Ledger(inner) if inner.is_retryable())
    }
}

impl Retryable for Error {
    fn is_retryable(&self) -> bool {
        Error::is_retryable(self)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Ledger(ledger_core::Error::from(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_stale_write_is_retryable() {
        let stale = Error::from(ledger_core::Error::StaleWrite {
            namespace: "property".to_string(),
            key: "P1".to_string(),
        });
        assert!(stale.is_retryable());
        assert_eq!(stale.kind(), "StaleWrite");

        let rejected = Error::InvalidTransition {
            entity: "escrow",
            id: "E1".to_string(),
            operation: "release".to_string(),
            status: "CREATED".to_string(),
        };
        assert!(!rejected.is_retryable());
        assert_eq!(rejected.to_string(), "cannot release escrow E1 in status CREATED");
    }

    #[test]
    fn test_query_errors_are_validation_class() {
        let err = Error::from(ledger_core::Error::Query("bad selector".to_string()));
        assert_eq!(err.kind(), "ValidationError");
        assert!(!err.is_retryable());
    }
}
