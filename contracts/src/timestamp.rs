//! Deterministic timestamps
//!
//! Record timestamps come from the transaction envelope, which every replica
//! sees identically. Nothing in this crate reads the local clock.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use ledger_core::{Transaction, TxTimestamp};

/// Logical timestamp of the transaction `tx` belongs to
pub fn resolve(tx: &Transaction) -> Result<DateTime<Utc>> {
    let metadata = tx.metadata().ok_or_else(|| {
        Error::Validation("read-only transaction carries no timestamp".to_string())
    })?;
    to_datetime(metadata.timestamp)
}

/// Convert an envelope timestamp, rejecting out-of-range values
pub fn to_datetime(timestamp: TxTimestamp) -> Result<DateTime<Utc>> {
    if !timestamp.is_well_formed() {
        return Err(Error::Validation(format!(
            "timestamp nanos {} out of range",
            timestamp.nanos
        )));
    }

    DateTime::from_timestamp(timestamp.seconds, timestamp.nanos as u32).ok_or_else(|| {
        Error::Validation(format!(
            "timestamp {}s is not representable",
            timestamp.seconds
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::{Ledger, TxMetadata};

    #[test]
    fn test_to_datetime() {
        let ts = to_datetime(TxTimestamp::new(1_700_000_000, 123_000_000)).unwrap();
        assert_eq!(ts.timestamp(), 1_700_000_000);
        assert_eq!(ts.timestamp_subsec_nanos(), 123_000_000);
        assert_eq!(ts.to_rfc3339(), "2023-11-14T22:13:20.123+00:00");
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(matches!(
            to_datetime(TxTimestamp::new(1_700_000_000, 1_000_000_000)),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            to_datetime(TxTimestamp::new(i64::MAX, 0)),
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_uses_envelope_only() {
        let ledger = Ledger::in_memory().await.unwrap();
        let meta = TxMetadata::new("tx1", TxTimestamp::new(1_700_000_000, 5));

        let first = resolve(&ledger.begin("escrow", meta.clone()).unwrap()).unwrap();
        let second = resolve(&ledger.begin("escrow", meta).unwrap()).unwrap();
        assert_eq!(first, second);

        let read_only = ledger.read_only("escrow").unwrap();
        assert!(matches!(resolve(&read_only), Err(Error::Validation(_))));
    }
}
