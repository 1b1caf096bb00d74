//! Hashing for the commit chain
//!
//! Every commit is chained to its predecessor:
//! `hash = SHA-256(previous_hash || height || tx_id || timestamp || namespace || writes)`.
//! Two replicas that applied the same transactions in the same order end up
//! with the same head hash.

use crate::types::{CommitBatch, TxTimestamp};
use sha2::{Digest, Sha256};

/// Compute the chained hash of a commit
pub fn commit_hash(previous_hash: &[u8; 32], height: u64, batch: &CommitBatch) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(previous_hash);
    hasher.update(height.to_be_bytes());
    update_field(&mut hasher, batch.metadata.tx_id.as_str().as_bytes());
    update_timestamp(&mut hasher, &batch.metadata.timestamp);
    update_field(&mut hasher, batch.namespace.as_bytes());

    // BTreeMap iteration order is the same on every replica
    for (key, value) in &batch.writes {
        update_field(&mut hasher, key.as_bytes());
        match value {
            Some(bytes) => {
                hasher.update([1u8]);
                update_field(&mut hasher, bytes);
            }
            None => hasher.update([0u8]),
        }
    }

    hasher.finalize().into()
}

/// Render a hash as lowercase hex
pub fn to_hex(hash: &[u8; 32]) -> String {
    hash.iter().map(|b| format!("{:02x}", b)).collect()
}

fn update_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

fn update_timestamp(hasher: &mut Sha256, timestamp: &TxTimestamp) {
    hasher.update(timestamp.seconds.to_be_bytes());
    hasher.update(timestamp.nanos.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TxMetadata;
    use std::collections::BTreeMap;

    fn batch(tx_id: &str, value: &[u8]) -> CommitBatch {
        let mut writes = BTreeMap::new();
        writes.insert("E1".to_string(), Some(value.to_vec()));
        CommitBatch {
            namespace: "escrow".to_string(),
            metadata: TxMetadata::new(tx_id, TxTimestamp::new(1_700_000_000, 0)),
            reads: BTreeMap::new(),
            writes,
        }
    }

    #[test]
    fn test_commit_hash_deterministic() {
        let prev = [7u8; 32];
        assert_eq!(
            commit_hash(&prev, 1, &batch("tx1", b"{}")),
            commit_hash(&prev, 1, &batch("tx1", b"{}"))
        );
    }

    #[test]
    fn test_commit_hash_covers_inputs() {
        let prev = [0u8; 32];
        let base = commit_hash(&prev, 1, &batch("tx1", b"{}"));

        assert_ne!(base, commit_hash(&[1u8; 32], 1, &batch("tx1", b"{}")));
        assert_ne!(base, commit_hash(&prev, 2, &batch("tx1", b"{}")));
        assert_ne!(base, commit_hash(&prev, 1, &batch("tx2", b"{}")));
        assert_ne!(base, commit_hash(&prev, 1, &batch("tx1", b"{\"a\":1}")));
    }

    #[test]
    fn test_to_hex() {
        let hex = to_hex(&[0xabu8; 32]);
        assert_eq!(hex.len(), 64);
        assert!(hex.starts_with("abab"));
    }
}
