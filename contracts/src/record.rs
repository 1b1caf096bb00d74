//! Typed record access on top of a ledger transaction
//!
//! Records are stored as JSON documents tagged with a `docType` field so
//! selector queries can be scoped to one entity and several record kinds can
//! share a namespace. Point reads surface decode failures; bulk reads skip
//! them with a warning.

use crate::guard::{self, Lifecycle};
use crate::{timestamp, Error, Result};
use chrono::{DateTime, Utc};
use ledger_core::{HistoryIter, KeyValue, QueryIter, RangeIter, Selector, Transaction};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::marker::PhantomData;

/// Field carrying the record kind in every stored document
pub const DOC_TYPE_FIELD: &str = "docType";

/// A document stored in the ledger
pub trait Record: Serialize + DeserializeOwned {
    /// Value of the `docType` field
    const DOC_TYPE: &'static str;
    /// Entity kind in error messages
    const ENTITY: &'static str;
}

/// A record with a guarded lifecycle
pub trait Stateful: Record {
    /// Status enum
    type Status: Lifecycle;

    /// Current status
    fn status(&self) -> Self::Status;
}

#[derive(Serialize)]
struct Tagged<'a, R> {
    #[serde(rename = "docType")]
    doc_type: &'static str,
    #[serde(flatten)]
    record: &'a R,
}

/// Serialize a record into its stored document
pub fn encode<R: Record>(record: &R) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&Tagged {
        doc_type: R::DOC_TYPE,
        record,
    })?)
}

/// Decode a stored document, `None` if it holds another record kind
pub fn decode<R: Record>(bytes: &[u8]) -> Result<Option<R>> {
    let value: Value = serde_json::from_slice(bytes)?;
    if value.get(DOC_TYPE_FIELD).and_then(Value::as_str) != Some(R::DOC_TYPE) {
        return Ok(None);
    }
    Ok(Some(serde_json::from_value(value)?))
}

/// Load the record stored under `id`
pub fn load<R: Record>(tx: &mut Transaction, id: &str) -> Result<R> {
    let not_found = || Error::NotFound {
        entity: R::ENTITY,
        id: id.to_string(),
    };

    let bytes = tx.get_state(id)?.ok_or_else(not_found)?;
    decode(&bytes)?.ok_or_else(not_found)
}

/// Whether a record of this kind is stored under `id`
pub fn exists<R: Record>(tx: &mut Transaction, id: &str) -> Result<bool> {
    match tx.get_state(id)? {
        Some(bytes) => Ok(decode::<R>(&bytes)?.is_some()),
        None => Ok(false),
    }
}

/// Fail with `AlreadyExists` if anything is stored under `id`
pub fn ensure_absent<R: Record>(tx: &mut Transaction, id: &str) -> Result<()> {
    if tx.exists(id)? {
        return Err(Error::AlreadyExists {
            entity: R::ENTITY,
            id: id.to_string(),
        });
    }
    Ok(())
}

/// Buffer a full-record write under `id`
pub fn store<R: Record>(tx: &mut Transaction, id: &str, record: &R) -> Result<()> {
    tx.put_state(id, encode(record)?)?;
    Ok(())
}

/// Guarded read-modify-write.
///
/// Loads the record, checks `op` against its status, then lets `mutate` update
/// it with the transaction's logical timestamp and writes it back.
pub fn transition<R, F>(
    tx: &mut Transaction,
    id: &str,
    op: <R::Status as Lifecycle>::Op,
    mutate: F,
) -> Result<R>
where
    R: Stateful,
    F: FnOnce(&mut R, DateTime<Utc>) -> Result<()>,
{
    let mut record = load::<R>(tx, id)?;
    guard::check(id, record.status(), op)?;

    let now = timestamp::resolve(tx)?;
    mutate(&mut record, now)?;
    store(tx, id, &record)?;

    tracing::debug!(entity = R::ENTITY, id, operation = %op, "Record updated");
    Ok(record)
}

/// Every record of this kind in the namespace, in key order
pub fn all<R: Record>(tx: &Transaction) -> Result<Records<RangeIter, R>> {
    Ok(Records::new(tx.get_state_by_range("", "")?))
}

/// Records of this kind whose key starts with `prefix`
pub fn with_prefix<R: Record>(tx: &Transaction, prefix: &str) -> Result<Records<RangeIter, R>> {
    Ok(Records::new(tx.get_state_by_prefix(prefix)?))
}

/// Records of this kind matching `selector`
pub fn query<R: Record>(tx: &Transaction, selector: Selector) -> Result<Records<QueryIter, R>> {
    let selector = selector.and(DOC_TYPE_FIELD, R::DOC_TYPE)?;
    Ok(Records::new(tx.query(selector)))
}

/// Records of this kind whose `field` equals `value`
pub fn find_by<R: Record>(
    tx: &Transaction,
    field: &str,
    value: impl Into<Value>,
) -> Result<Records<QueryIter, R>> {
    query(tx, Selector::new().and(field, value)?)
}

/// Version history of `id`, oldest first
pub fn history<R: Record>(tx: &Transaction, id: &str) -> Result<History<R>> {
    Ok(History {
        inner: tx.get_history_for_key(id)?,
        _record: PhantomData,
    })
}

/// Lazy sequence of decoded records.
///
/// Documents of another kind are passed over; documents that fail to decode
/// are logged and skipped.
#[derive(Debug)]
pub struct Records<I, R> {
    inner: I,
    _record: PhantomData<fn() -> R>,
}

impl<I, R> Records<I, R> {
    fn new(inner: I) -> Self {
        Self {
            inner,
            _record: PhantomData,
        }
    }
}

impl<R> Records<RangeIter, R> {
    /// Restart from the first key
    pub fn rewind(&mut self) {
        self.inner.rewind();
    }
}

impl<R> Records<QueryIter, R> {
    /// Restart from the first key
    pub fn rewind(&mut self) {
        self.inner.rewind();
    }
}

impl<I, R> Iterator for Records<I, R>
where
    I: Iterator<Item = ledger_core::Result<KeyValue>>,
    R: Record,
{
    type Item = Result<R>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let kv = match self.inner.next()? {
                Ok(kv) => kv,
                Err(e) => return Some(Err(e.into())),
            };

            match decode::<R>(&kv.value) {
                Ok(Some(record)) => return Some(Ok(record)),
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(
                        entity = R::ENTITY,
                        key = %kv.key,
                        error = %e,
                        "Skipping undecodable record"
                    );
                }
            }
        }
    }
}

/// One version of a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry<R> {
    /// Transaction that wrote this version
    pub tx_id: String,
    /// Logical timestamp of that transaction
    pub timestamp: DateTime<Utc>,
    /// Snapshot at this version, `None` for a tombstone
    pub record: Option<R>,
    /// Whether this version is a delete
    pub is_delete: bool,
}

/// Lazy sequence of a key's versions
#[derive(Debug)]
pub struct History<R> {
    inner: HistoryIter,
    _record: PhantomData<fn() -> R>,
}

impl<R> History<R> {
    /// Restart from the oldest version
    pub fn rewind(&mut self) {
        self.inner.rewind();
    }
}

impl<R: Record> Iterator for History<R> {
    type Item = Result<HistoryEntry<R>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let modification = match self.inner.next()? {
                Ok(m) => m,
                Err(e) => return Some(Err(e.into())),
            };

            let timestamp = match timestamp::to_datetime(modification.timestamp) {
                Ok(ts) => ts,
                Err(e) => return Some(Err(e)),
            };

            let record = match modification.value.as_deref().map(decode::<R>) {
                None => None,
                Some(Ok(Some(record))) => Some(record),
                Some(Ok(None)) => continue,
                Some(Err(e)) => {
                    tracing::warn!(
                        entity = R::ENTITY,
                        version = modification.version,
                        error = %e,
                        "Skipping undecodable history entry"
                    );
                    continue;
                }
            };

            return Some(Ok(HistoryEntry {
                tx_id: modification.tx_id.to_string(),
                timestamp,
                record,
                is_delete: modification.is_delete,
            }));
        }
    }
}

/// Reject an empty identifier
pub fn require_id(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Validation(format!("{} must not be empty", field)));
    }
    Ok(())
}

/// Reject a non-positive amount
pub fn require_positive(field: &str, value: rust_decimal::Decimal) -> Result<()> {
    if value <= rust_decimal::Decimal::ZERO {
        return Err(Error::Validation(format!(
            "{} must be positive, got {}",
            field, value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::{Ledger, TxMetadata, TxTimestamp};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Note {
        note_id: String,
        text: String,
    }

    impl Record for Note {
        const DOC_TYPE: &'static str = "note";
        const ENTITY: &'static str = "note";
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Other {
        text: String,
    }

    impl Record for Other {
        const DOC_TYPE: &'static str = "other";
        const ENTITY: &'static str = "other";
    }

    fn note(id: &str, text: &str) -> Note {
        Note {
            note_id: id.to_string(),
            text: text.to_string(),
        }
    }

    fn meta(tx_id: &str) -> TxMetadata {
        TxMetadata::new(tx_id, TxTimestamp::new(1_700_000_000, 0))
    }

    #[test]
    fn test_encode_tags_doc_type() {
        let bytes = encode(&note("N1", "hello")).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["docType"], "note");
        assert_eq!(value["noteId"], "N1");

        assert_eq!(decode::<Note>(&bytes).unwrap(), Some(note("N1", "hello")));
        assert_eq!(decode::<Other>(&bytes).unwrap(), None);
        assert!(decode::<Note>(b"not json").is_err());
    }

    #[tokio::test]
    async fn test_load_and_ensure_absent() {
        let ledger = Ledger::in_memory().await.unwrap();
        ledger
            .submit("notes", meta("tx1"), |tx| {
                ensure_absent::<Note>(tx, "N1")?;
                store(tx, "N1", &note("N1", "hello"))
            })
            .await
            .unwrap();

        let loaded = ledger
            .evaluate("notes", |tx| load::<Note>(tx, "N1"))
            .unwrap();
        assert_eq!(loaded.text, "hello");

        let missing = ledger.evaluate("notes", |tx| load::<Note>(tx, "N2"));
        assert!(matches!(missing, Err(Error::NotFound { .. })));

        let wrong_kind = ledger.evaluate("notes", |tx| load::<Other>(tx, "N1"));
        assert!(matches!(wrong_kind, Err(Error::NotFound { .. })));

        let again = ledger
            .submit("notes", meta("tx2"), |tx| ensure_absent::<Note>(tx, "N1"))
            .await;
        assert!(matches!(again, Err(Error::AlreadyExists { .. })));
    }

    #[tokio::test]
    async fn test_bulk_reads_skip_foreign_and_corrupt_documents() {
        let ledger = Ledger::in_memory().await.unwrap();
        ledger
            .submit("notes", meta("tx1"), |tx| {
                store(tx, "N1", &note("N1", "a"))?;
                store(tx, "N2", &note("N2", "b"))?;
                store(tx, "O1", &Other { text: "a".to_string() })?;
                tx.put_state("N3", br#"{"docType":"note","noteId":7}"#.to_vec())?;
                Ok::<_, Error>(())
            })
            .await
            .unwrap();

        let notes: Vec<Note> = ledger
            .evaluate("notes", |tx| all::<Note>(tx)?.collect::<Result<Vec<_>>>())
            .unwrap();
        assert_eq!(notes, vec![note("N1", "a"), note("N2", "b")]);

        let matching: Vec<Note> = ledger
            .evaluate("notes", |tx| {
                find_by::<Note>(tx, "text", "a")?.collect::<Result<Vec<_>>>()
            })
            .unwrap();
        assert_eq!(matching, vec![note("N1", "a")]);

        let prefixed: Vec<Note> = ledger
            .evaluate("notes", |tx| {
                with_prefix::<Note>(tx, "N")?.collect::<Result<Vec<_>>>()
            })
            .unwrap();
        assert_eq!(prefixed, vec![note("N1", "a"), note("N2", "b")]);

        let none: Vec<Note> = ledger
            .evaluate("notes", |tx| {
                find_by::<Note>(tx, "text", "zzz")?.collect::<Result<Vec<_>>>()
            })
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_history_tombstones() {
        let ledger = Ledger::in_memory().await.unwrap();
        ledger
            .submit("notes", meta("tx1"), |tx| store(tx, "N1", &note("N1", "a")))
            .await
            .unwrap();
        ledger
            .submit("notes", meta("tx2"), |tx| {
                tx.delete_state("N1").map_err(Error::from)
            })
            .await
            .unwrap();

        let mut history = ledger
            .evaluate("notes", |tx| history::<Note>(tx, "N1"))
            .unwrap();
        let entries: Vec<_> = history.by_ref().collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].tx_id, "tx1");
        assert_eq!(entries[0].record, Some(note("N1", "a")));
        assert!(entries[1].is_delete);
        assert_eq!(entries[1].record, None);

        history.rewind();
        assert_eq!(history.count(), 2);
    }
}
