//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `state` - Latest value per key (key: namespace || 0x00 || key)
//! - `history` - Every version of every key (key: namespace || 0x00 || key || 0x00 || height)
//! - `commits` - Hash-chained commit log (key: height)
//! - `txids` - Committed transaction ids (key: tx_id, value: height)
//!
//! Heights are encoded big-endian so iteration order is commit order.

use crate::{
    error::{Error, Result},
    store::{next_commit, validate_reads, WorldState},
    types::{
        CommitBatch, CommitRecord, KeyModification, KeyRange, VersionedValue, KEY_SEPARATOR,
    },
    Config,
};
use parking_lot::Mutex;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, Direction, IteratorMode,
    Options, WriteBatch, DB,
};
use std::fmt;
use std::sync::Arc;

/// Column family names
const CF_STATE: &str = "state";
const CF_HISTORY: &str = "history";
const CF_COMMITS: &str = "commits";
const CF_TXIDS: &str = "txids";

/// World state backed by RocksDB
pub struct RocksStore {
    db: Arc<DB>,
    /// Serializes validate-then-write so no commit observes a half-applied one
    commit_lock: Mutex<()>,
}

impl fmt::Debug for RocksStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RocksStore")
            .field("path", &self.db.path())
            .finish()
    }
}

impl RocksStore {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);
        db_opts.set_compaction_style(DBCompactionStyle::Level);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_STATE, Self::cf_options_state(config)),
            ColumnFamilyDescriptor::new(CF_HISTORY, Self::cf_options_history()),
            ColumnFamilyDescriptor::new(CF_COMMITS, Self::cf_options_history()),
            ColumnFamilyDescriptor::new(CF_TXIDS, Self::cf_options_state(config)),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened RocksDB world state");

        Ok(Self {
            db: Arc::new(db),
            commit_lock: Mutex::new(()),
        })
    }

    // Column family options

    fn cf_options_state(config: &Config) -> Options {
        let mut opts = Options::default();
        // Point reads dominate, use LZ4 and bloom filters
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(config.rocksdb.bloom_bits_per_key, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_options_history() -> Options {
        let mut opts = Options::default();
        // Append-mostly, read rarely
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    // Key helpers

    fn namespace_prefix(namespace: &str) -> Vec<u8> {
        let mut prefix = namespace.as_bytes().to_vec();
        prefix.push(KEY_SEPARATOR);
        prefix
    }

    fn state_key(namespace: &str, key: &str) -> Vec<u8> {
        let mut composite = Self::namespace_prefix(namespace);
        composite.extend_from_slice(key.as_bytes());
        composite
    }

    fn history_prefix(namespace: &str, key: &str) -> Vec<u8> {
        let mut prefix = Self::state_key(namespace, key);
        prefix.push(KEY_SEPARATOR);
        prefix
    }

    fn decode_key(prefix: &[u8], composite: &[u8]) -> Result<String> {
        String::from_utf8(composite[prefix.len()..].to_vec())
            .map_err(|e| Error::Storage(format!("non UTF-8 key in state: {}", e)))
    }

    fn current_version(&self, namespace: &str, key: &str) -> Result<Option<u64>> {
        Ok(self.get(namespace, key)?.map(|v| v.version))
    }
}

impl WorldState for RocksStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<VersionedValue>> {
        let cf = self.cf_handle(CF_STATE)?;
        match self.db.get_cf(&cf, Self::state_key(namespace, key))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan(
        &self,
        namespace: &str,
        range: &KeyRange,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<(String, VersionedValue)>> {
        let cf = self.cf_handle(CF_STATE)?;
        let prefix = Self::namespace_prefix(namespace);

        let seek_from = match after {
            Some(after) if after.as_bytes() >= range.start() => after.as_bytes(),
            _ => range.start(),
        };
        let mut seek = prefix.clone();
        seek.extend_from_slice(seek_from);

        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(seek.as_slice(), Direction::Forward));

        let mut entries = Vec::new();
        for item in iter {
            let (composite, value) = item?;
            if !composite.starts_with(&prefix) {
                break;
            }

            let key_bytes = &composite[prefix.len()..];
            if !range.before_end(key_bytes) {
                break;
            }
            if after.map_or(false, |after| key_bytes <= after.as_bytes()) {
                continue;
            }

            let key = Self::decode_key(&prefix, &composite)?;
            entries.push((key, bincode::deserialize(&value)?));
            if entries.len() >= limit {
                break;
            }
        }

        Ok(entries)
    }

    fn history(
        &self,
        namespace: &str,
        key: &str,
        after: Option<u64>,
        limit: usize,
    ) -> Result<Vec<KeyModification>> {
        let cf = self.cf_handle(CF_HISTORY)?;
        let prefix = Self::history_prefix(namespace, key);

        let mut seek = prefix.clone();
        let first = after.map_or(0, |after| after.saturating_add(1));
        seek.extend_from_slice(&first.to_be_bytes());

        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(seek.as_slice(), Direction::Forward));

        let mut entries = Vec::new();
        for item in iter {
            let (composite, value) = item?;
            if !composite.starts_with(&prefix) {
                break;
            }
            entries.push(bincode::deserialize(&value)?);
            if entries.len() >= limit {
                break;
            }
        }

        Ok(entries)
    }

    fn apply(&self, batch: &CommitBatch) -> Result<CommitRecord> {
        let _guard = self.commit_lock.lock();

        let cf_txids = self.cf_handle(CF_TXIDS)?;
        let tx_key = batch.metadata.tx_id.as_str().as_bytes();
        if self.db.get_cf(&cf_txids, tx_key)?.is_some() {
            return Err(Error::DuplicateTransaction(batch.metadata.tx_id.to_string()));
        }

        validate_reads(batch, |key| self.current_version(&batch.namespace, key))?;

        let record = next_commit(self.latest_commit()?.as_ref(), batch);
        let height_key = record.height.to_be_bytes();

        let cf_state = self.cf_handle(CF_STATE)?;
        let cf_history = self.cf_handle(CF_HISTORY)?;
        let cf_commits = self.cf_handle(CF_COMMITS)?;

        let mut write_batch = WriteBatch::default();

        for (key, value) in &batch.writes {
            let state_key = Self::state_key(&batch.namespace, key);
            match value {
                Some(bytes) => {
                    let row = VersionedValue {
                        value: bytes.clone(),
                        version: record.height,
                    };
                    write_batch.put_cf(&cf_state, &state_key, bincode::serialize(&row)?);
                }
                None => write_batch.delete_cf(&cf_state, &state_key),
            }

            let modification = KeyModification {
                tx_id: batch.metadata.tx_id.clone(),
                timestamp: batch.metadata.timestamp,
                value: value.clone(),
                is_delete: value.is_none(),
                version: record.height,
            };
            let mut history_key = Self::history_prefix(&batch.namespace, key);
            history_key.extend_from_slice(&height_key);
            write_batch.put_cf(&cf_history, &history_key, bincode::serialize(&modification)?);
        }

        write_batch.put_cf(&cf_commits, height_key, bincode::serialize(&record)?);
        write_batch.put_cf(&cf_txids, tx_key, height_key);

        // Atomic commit
        self.db.write(write_batch)?;

        tracing::debug!(
            height = record.height,
            tx_id = %record.tx_id,
            namespace = %record.namespace,
            writes = record.write_count,
            "Commit applied"
        );

        Ok(record)
    }

    fn latest_commit(&self) -> Result<Option<CommitRecord>> {
        let cf = self.cf_handle(CF_COMMITS)?;

        if let Some(item) = self.db.iterator_cf(&cf, IteratorMode::End).next() {
            let (_, value) = item?;
            return Ok(Some(bincode::deserialize(&value)?));
        }

        Ok(None)
    }
}
