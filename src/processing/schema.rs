//! Schema accumulator: the union of flattened keys across records.
//!
//! Alphabetical ordering compares paths segment by segment rather than as raw strings: array
//! indices compare numerically and sort before named children of the same parent, so `c[2]`
//! precedes `c[10]` and both precede `c.__truncated`.

use std::cmp::Ordering;

use indexmap::IndexSet;

use crate::options::KeyOrder;
use crate::types::{ColumnList, FlatRecord};

/// Collects distinct keys in encounter order during discovery.
///
/// Finalizing consumes the accumulator, so nothing can be merged into a frozen column list.
#[derive(Debug, Default, Clone)]
pub struct SchemaAccumulator {
    keys: IndexSet<String>,
}

impl SchemaAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add every key of `record` not seen yet. Returns how many were new.
    pub fn add_keys(&mut self, record: &FlatRecord) -> usize {
        let before = self.keys.len();
        for key in record.keys() {
            if !self.keys.contains(key) {
                self.keys.insert(key.clone());
            }
        }
        self.keys.len() - before
    }

    /// Number of distinct keys seen so far.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Freeze into a column list. `Custom` currently behaves like `FirstSeen`.
    pub fn finalize(self, order: KeyOrder) -> ColumnList {
        let mut columns: Vec<String> = self.keys.into_iter().collect();
        if order == KeyOrder::Alpha {
            columns.sort_by(|a, b| compare_paths(a, b));
        }
        ColumnList::new(columns)
    }
}

/// Total order over flattened paths used for [`KeyOrder::Alpha`].
pub fn compare_paths(a: &str, b: &str) -> Ordering {
    PathSegments { rest: a }
        .cmp(PathSegments { rest: b })
        .then_with(|| a.cmp(b))
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Segment<'a> {
    Index(u64),
    Key(&'a str),
}

struct PathSegments<'a> {
    rest: &'a str,
}

/// Parses a leading `[digits]`, returning the index and the remainder after `]`.
fn leading_index(s: &str) -> Option<(u64, &str)> {
    let inner = s.strip_prefix('[')?;
    let close = inner.find(']')?;
    let digits = &inner[..close];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((digits.parse().ok()?, &inner[close + 1..]))
}

impl<'a> Iterator for PathSegments<'a> {
    type Item = Segment<'a>;

    fn next(&mut self) -> Option<Segment<'a>> {
        if self.rest.is_empty() {
            return None;
        }
        if let Some((index, rest)) = leading_index(self.rest) {
            self.rest = rest.strip_prefix('.').unwrap_or(rest);
            return Some(Segment::Index(index));
        }

        let bytes = self.rest.as_bytes();
        let mut end = 0;
        while end < bytes.len() {
            match bytes[end] {
                b'\\' => end += 2,
                b'.' => break,
                b'[' if leading_index(&self.rest[end..]).is_some() => break,
                _ => end += 1,
            }
        }
        let end = end.min(bytes.len());
        let key = &self.rest[..end];
        let rest = &self.rest[end..];
        self.rest = rest.strip_prefix('.').unwrap_or(rest);
        Some(Segment::Key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::{SchemaAccumulator, compare_paths};
    use crate::options::KeyOrder;
    use crate::types::FlatRecord;

    fn record(keys: &[&str]) -> FlatRecord {
        keys.iter().map(|k| (k.to_string(), String::new())).collect()
    }

    fn accumulate() -> SchemaAccumulator {
        let mut acc = SchemaAccumulator::new();
        assert_eq!(acc.add_keys(&record(&["b", "a"])), 2);
        assert_eq!(acc.add_keys(&record(&["a", "c[0]", "b"])), 1);
        assert_eq!(acc.add_keys(&record(&[])), 0);
        acc
    }

    #[test]
    fn first_seen_and_custom_keep_encounter_order() {
        assert_eq!(&*accumulate().finalize(KeyOrder::FirstSeen), ["b", "a", "c[0]"]);
        assert_eq!(&*accumulate().finalize(KeyOrder::Custom), ["b", "a", "c[0]"]);
    }

    #[test]
    fn alpha_sorts_lexicographically() {
        let acc = accumulate();
        assert_eq!(acc.len(), 3);
        assert_eq!(&*acc.finalize(KeyOrder::Alpha), ["a", "b", "c[0]"]);
    }

    #[test]
    fn alpha_orders_indices_numerically_before_truncation_marker() {
        let mut acc = SchemaAccumulator::new();
        acc.add_keys(&record(&["c.__truncated", "c[10]", "b", "c[2]", "a\\.x", "a.y", "a"]));
        assert_eq!(
            &*acc.finalize(KeyOrder::Alpha),
            ["a", "a.y", "a\\.x", "b", "c[2]", "c[10]", "c.__truncated"]
        );
    }

    #[test]
    fn path_comparison_is_a_total_order_on_distinct_strings() {
        use std::cmp::Ordering;
        assert_eq!(compare_paths("x[0]", "x[0]"), Ordering::Equal);
        assert_ne!(compare_paths("x[01]", "x[1]"), Ordering::Equal);
        assert_eq!(compare_paths("[1]", "[0].a"), Ordering::Greater);
    }
}
