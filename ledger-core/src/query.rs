//! Read-path queries: equality selectors and lazy paged iterators
//!
//! Iterators fetch `page_size` entries at a time from the [`WorldState`] and
//! remember only a bookmark between pages, so dropping one early releases
//! everything and no store lock is held while the caller works.
//! All of them read committed state; writes buffered in the current
//! transaction are not visible.

use crate::{
    store::WorldState,
    types::{KeyModification, KeyRange, KeyValue, VersionedValue},
    Error, Result,
};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::Arc;

/// Equality selector: every field must equal its value (logical AND).
///
/// Accepted JSON shape is `{"selector": {"field": scalar, ...}}`. Operators
/// (`$gt`, `$or`, ...) and nested objects or arrays are rejected.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selector {
    fields: Map<String, Value>,
}

impl Selector {
    /// Selector matching every JSON document
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a query string
    pub fn parse(query: &str) -> Result<Self> {
        let root: Value = serde_json::from_str(query)
            .map_err(|e| Error::Query(format!("selector is not valid JSON: {}", e)))?;

        let Value::Object(mut root) = root else {
            return Err(Error::Query("query must be a JSON object".to_string()));
        };

        if let Some(extra) = root.keys().find(|k| k.as_str() != "selector") {
            return Err(Error::Query(format!("unsupported query field {:?}", extra)));
        }

        let Some(Value::Object(fields)) = root.remove("selector") else {
            return Err(Error::Query(
                "query must contain a \"selector\" object".to_string(),
            ));
        };

        let mut selector = Self::new();
        for (field, value) in fields {
            selector = selector.and(field, value)?;
        }
        Ok(selector)
    }

    /// Add an equality condition
    pub fn and(mut self, field: impl Into<String>, value: impl Into<Value>) -> Result<Self> {
        let field = field.into();
        let value = value.into();

        if field.is_empty() || field.starts_with('$') {
            return Err(Error::Query(format!("unsupported selector field {:?}", field)));
        }
        if value.is_object() || value.is_array() {
            return Err(Error::Query(format!(
                "selector value for {:?} must be a scalar",
                field
            )));
        }

        self.fields.insert(field, value);
        Ok(self)
    }

    /// Whether a document satisfies every condition
    pub fn matches(&self, document: &Value) -> bool {
        let Value::Object(document) = document else {
            return false;
        };
        self.fields
            .iter()
            .all(|(field, expected)| document.get(field) == Some(expected))
    }

    /// Number of conditions
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the selector has no conditions
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Lazy, restartable iterator over a key range
#[derive(Debug)]
pub struct RangeIter {
    store: Arc<dyn WorldState>,
    namespace: String,
    range: KeyRange,
    page_size: usize,
    buffer: VecDeque<(String, VersionedValue)>,
    bookmark: Option<String>,
    exhausted: bool,
}

impl RangeIter {
    pub(crate) fn new(
        store: Arc<dyn WorldState>,
        namespace: String,
        range: KeyRange,
        page_size: usize,
    ) -> Self {
        Self {
            store,
            namespace,
            range,
            page_size: page_size.max(1),
            buffer: VecDeque::new(),
            bookmark: None,
            exhausted: false,
        }
    }

    /// Restart from the beginning of the range
    pub fn rewind(&mut self) {
        self.buffer.clear();
        self.bookmark = None;
        self.exhausted = false;
    }

    fn fill(&mut self) -> Result<()> {
        let page = self.store.scan(
            &self.namespace,
            &self.range,
            self.bookmark.as_deref(),
            self.page_size,
        )?;

        if page.len() < self.page_size {
            self.exhausted = true;
        }
        if let Some((last, _)) = page.last() {
            self.bookmark = Some(last.clone());
        }
        self.buffer.extend(page);
        Ok(())
    }
}

impl Iterator for RangeIter {
    type Item = Result<KeyValue>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fill() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }

        self.buffer
            .pop_front()
            .map(|(key, versioned)| Ok(KeyValue { key, value: versioned.value }))
    }
}

/// Lazy, restartable iterator over the documents matching a [`Selector`]
#[derive(Debug)]
pub struct QueryIter {
    inner: RangeIter,
    selector: Selector,
}

impl QueryIter {
    pub(crate) fn new(inner: RangeIter, selector: Selector) -> Self {
        Self { inner, selector }
    }

    /// Restart from the first document
    pub fn rewind(&mut self) {
        self.inner.rewind();
    }
}

impl Iterator for QueryIter {
    type Item = Result<KeyValue>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let kv = match self.inner.next()? {
                Ok(kv) => kv,
                Err(e) => return Some(Err(e)),
            };

            // Only JSON documents are indexable
            match serde_json::from_slice::<Value>(&kv.value) {
                Ok(document) if self.selector.matches(&document) => return Some(Ok(kv)),
                Ok(_) => continue,
                Err(_) => {
                    tracing::debug!(
                        namespace = %self.inner.namespace,
                        key = %kv.key,
                        "Skipping non-JSON value in selector query"
                    );
                    continue;
                }
            }
        }
    }
}

/// Lazy, restartable iterator over the versions of one key, oldest first
#[derive(Debug)]
pub struct HistoryIter {
    store: Arc<dyn WorldState>,
    namespace: String,
    key: String,
    page_size: usize,
    buffer: VecDeque<KeyModification>,
    after: Option<u64>,
    exhausted: bool,
}

impl HistoryIter {
    pub(crate) fn new(
        store: Arc<dyn WorldState>,
        namespace: String,
        key: String,
        page_size: usize,
    ) -> Self {
        Self {
            store,
            namespace,
            key,
            page_size: page_size.max(1),
            buffer: VecDeque::new(),
            after: None,
            exhausted: false,
        }
    }

    /// Restart from the oldest version
    pub fn rewind(&mut self) {
        self.buffer.clear();
        self.after = None;
        self.exhausted = false;
    }

    fn fill(&mut self) -> Result<()> {
        let page = self
            .store
            .history(&self.namespace, &self.key, self.after, self.page_size)?;

        if page.len() < self.page_size {
            self.exhausted = true;
        }
        if let Some(last) = page.last() {
            self.after = Some(last.version);
        }
        self.buffer.extend(page);
        Ok(())
    }
}

impl Iterator for HistoryIter {
    type Item = Result<KeyModification>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fill() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }

        self.buffer.pop_front().map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{CommitBatch, TxMetadata, TxTimestamp};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn seeded_store(entries: &[(&str, Value)]) -> Arc<dyn WorldState> {
        let store = MemoryStore::new();
        let writes = entries
            .iter()
            .map(|(k, v)| (k.to_string(), Some(serde_json::to_vec(v).unwrap())))
            .collect();
        store
            .apply(&CommitBatch {
                namespace: "offer".to_string(),
                metadata: TxMetadata::new("seed", TxTimestamp::new(1, 0)),
                reads: BTreeMap::new(),
                writes,
            })
            .unwrap();
        Arc::new(store)
    }

    #[test]
    fn test_selector_parse() {
        let selector =
            Selector::parse(r#"{"selector":{"docType":"offer","status":"ACCEPTED"}}"#).unwrap();
        assert_eq!(selector.len(), 2);
        assert!(selector.matches(&json!({"docType":"offer","status":"ACCEPTED","x":1})));
        assert!(!selector.matches(&json!({"docType":"offer","status":"PENDING"})));
        assert!(!selector.matches(&json!({"status":"ACCEPTED"})));
        assert!(!selector.matches(&json!([1, 2])));
    }

    #[test]
    fn test_selector_rejects_unsupported() {
        for query in [
            "not json",
            r#"[1]"#,
            r#"{"status":"ACCEPTED"}"#,
            r#"{"selector":"ACCEPTED"}"#,
            r#"{"selector":{"amount":{"$gt":5}}}"#,
            r#"{"selector":{"$or":[{"a":1}]}}"#,
            r#"{"selector":{"tags":["a"]}}"#,
            r#"{"selector":{},"sort":["a"]}"#,
        ] {
            assert!(
                matches!(Selector::parse(query), Err(Error::Query(_))),
                "accepted {}",
                query
            );
        }
    }

    #[test]
    fn test_empty_selector_matches_objects() {
        let selector = Selector::parse(r#"{"selector":{}}"#).unwrap();
        assert!(selector.is_empty());
        assert!(selector.matches(&json!({"anything": true})));
    }

    #[test]
    fn test_range_iter_pages_and_rewinds() {
        let entries: Vec<(String, Value)> =
            (0..7).map(|i| (format!("O{}", i), json!({"n": i}))).collect();
        let refs: Vec<(&str, Value)> = entries
            .iter()
            .map(|(k, v)| (k.as_str(), v.clone()))
            .collect();
        let store = seeded_store(&refs);

        let mut iter = RangeIter::new(store, "offer".to_string(), KeyRange::all(), 3);
        let keys: Vec<String> = iter.by_ref().map(|kv| kv.unwrap().key).collect();
        assert_eq!(keys.len(), 7);
        assert_eq!(keys[0], "O0");
        assert_eq!(keys[6], "O6");
        assert!(iter.next().is_none());

        iter.rewind();
        assert_eq!(iter.next().unwrap().unwrap().key, "O0");
    }

    #[test]
    fn test_query_iter_skips_non_json() {
        let store = MemoryStore::new();
        let mut writes = BTreeMap::new();
        writes.insert("O1".to_string(), Some(br#"{"status":"ACCEPTED"}"#.to_vec()));
        writes.insert("O2".to_string(), Some(b"\xff\x00garbage".to_vec()));
        writes.insert("O3".to_string(), Some(br#"{"status":"PENDING"}"#.to_vec()));
        writes.insert("O4".to_string(), Some(br#"{"status":"ACCEPTED"}"#.to_vec()));
        store
            .apply(&CommitBatch {
                namespace: "offer".to_string(),
                metadata: TxMetadata::new("seed", TxTimestamp::new(1, 0)),
                reads: BTreeMap::new(),
                writes,
            })
            .unwrap();
        let store: Arc<dyn WorldState> = Arc::new(store);

        let selector = Selector::new().and("status", "ACCEPTED").unwrap();
        let inner = RangeIter::new(store.clone(), "offer".to_string(), KeyRange::all(), 2);
        let keys: Vec<String> = QueryIter::new(inner, selector)
            .map(|kv| kv.unwrap().key)
            .collect();
        assert_eq!(keys, vec!["O1", "O4"]);

        let none = Selector::new().and("status", "COMPLETED").unwrap();
        let inner = RangeIter::new(store, "offer".to_string(), KeyRange::all(), 2);
        assert_eq!(QueryIter::new(inner, none).count(), 0);
    }

    #[test]
    fn test_history_iter_pages() {
        let store = MemoryStore::new();
        for i in 1..=5 {
            let mut writes = BTreeMap::new();
            writes.insert("O1".to_string(), Some(format!("{{\"v\":{}}}", i).into_bytes()));
            store
                .apply(&CommitBatch {
                    namespace: "offer".to_string(),
                    metadata: TxMetadata::new(format!("tx{}", i), TxTimestamp::new(i, 0)),
                    reads: BTreeMap::new(),
                    writes,
                })
                .unwrap();
        }
        let store: Arc<dyn WorldState> = Arc::new(store);

        let mut iter = HistoryIter::new(store, "offer".to_string(), "O1".to_string(), 2);
        let versions: Vec<u64> = iter.by_ref().map(|m| m.unwrap().version).collect();
        assert_eq!(versions, vec![1, 2, 3, 4, 5]);

        iter.rewind();
        assert_eq!(iter.next().unwrap().unwrap().tx_id.as_str(), "tx1");
    }
}
