//! Core data model types shared by the pipeline stages.
//!
//! A decoded input document is a [`Value`] tree. Flattening turns it into a [`FlatRecord`], and
//! schema discovery freezes the union of flat keys into a [`ColumnList`].

use std::ops::Deref;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One decoded document (or a node inside it).
///
/// Besides the JSON shapes this carries the special scalar kinds that binary documents and
/// extended JSON can express, so the flattening engine can render each of them canonically.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Explicit `null`.
    Null,
    /// Absent / `undefined` value.
    Undefined,
    /// Boolean.
    Bool(bool),
    /// Plain integer (JSON integers, 32-bit binary integers).
    Int(i64),
    /// Plain floating point number. May be non-finite when decoded from binary input.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Ordered sequence.
    Array(Vec<Value>),
    /// Ordered map. Duplicate keys are allowed; flattening keeps the last one.
    Object(Vec<(String, Value)>),
    /// 12-byte document identifier.
    ObjectId([u8; 12]),
    /// Milliseconds since the Unix epoch.
    DateTime(i64),
    /// High-precision decimal, already in canonical decimal text.
    Decimal(String),
    /// Explicit 64-bit integer kind.
    Int64(i64),
    /// Binary blob with its subtype byte.
    Binary { subtype: u8, bytes: Vec<u8> },
    /// Regular expression.
    Regex { pattern: String, flags: String },
    /// Replication timestamp; only the seconds component is rendered.
    Timestamp { seconds: u32, increment: u32 },
}

impl Value {
    /// Returns `true` for anything that is not an array or an object.
    pub fn is_scalarish(&self) -> bool {
        !matches!(self, Value::Array(_) | Value::Object(_))
    }

    /// Convenience constructor for object nodes.
    pub fn object<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Flattened record: path → rendered string value.
///
/// Insertion order follows the order leaves were visited, which drives first-seen column order.
pub type FlatRecord = IndexMap<String, String>;

/// Finalized, immutable, ordered list of output columns.
///
/// Cloning is cheap; every clone shares the same backing slice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnList(Arc<[String]>);

impl ColumnList {
    /// Freeze a list of column names.
    pub fn new(columns: Vec<String>) -> Self {
        Self(columns.into())
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` when no column was discovered.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the index of a column by name, if present.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|c| c == name)
    }
}

impl Deref for ColumnList {
    type Target = [String];

    fn deref(&self) -> &[String] {
        &self.0
    }
}

/// Schema report sent to the host at the end of discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaPayload {
    /// Finalized column list.
    pub columns: ColumnList,
    /// First flattened record seen, for previews.
    pub sample: FlatRecord,
}

#[cfg(test)]
mod tests {
    use super::{ColumnList, Value};

    #[test]
    fn scalarish_excludes_containers_only() {
        assert!(Value::Null.is_scalarish());
        assert!(Value::ObjectId([0; 12]).is_scalarish());
        assert!(Value::Timestamp { seconds: 1, increment: 0 }.is_scalarish());
        assert!(!Value::Array(vec![]).is_scalarish());
        assert!(!Value::object([("a", Value::Int(1))]).is_scalarish());
    }

    #[test]
    fn column_list_clones_share_storage() {
        let cols = ColumnList::new(vec!["a".to_string(), "b".to_string()]);
        let other = cols.clone();
        assert_eq!(other.len(), 2);
        assert_eq!(other.index_of("b"), Some(1));
        assert!(std::ptr::eq(cols.as_ptr(), other.as_ptr()));
    }
}
