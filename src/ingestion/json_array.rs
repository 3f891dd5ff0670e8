//! Streaming reader for a top-level JSON array of objects: `[{"a":1}, {"a":2}]`.
//!
//! The enclosing brackets and separating commas are skipped; each complete top-level object is
//! decoded on its own, so the array is never materialized.

use std::collections::VecDeque;
use std::io::Read;

use super::ReaderOptions;
use super::scanner::{Framed, Framing, ObjectCapture, ScanRecords};

/// Records of a JSON array input.
pub(crate) type JsonArrayRecords<R> = ScanRecords<R, ArrayFraming>;

/// Create a JSON-array record iterator over `reader`.
pub(crate) fn json_array_records<R: Read + Send>(reader: R, opts: &ReaderOptions) -> JsonArrayRecords<R> {
    ScanRecords::new(
        reader,
        ArrayFraming::new(opts.max_record_bytes),
        opts.read_chunk_bytes,
        opts.extended_json,
    )
}

#[derive(Debug)]
pub(crate) struct ArrayFraming {
    capture: ObjectCapture,
    opened: bool,
    closed: bool,
    stray: Option<u64>,
    stray_in_string: bool,
    stray_escape: bool,
    /// Bracket nesting inside a non-object item.
    stray_depth: usize,
}

impl ArrayFraming {
    fn new(max_record_bytes: usize) -> Self {
        Self {
            capture: ObjectCapture::new(max_record_bytes),
            opened: false,
            closed: false,
            stray: None,
            stray_in_string: false,
            stray_escape: false,
            stray_depth: 0,
        }
    }

    fn end_stray(&mut self, out: &mut VecDeque<Framed>) {
        if let Some(start) = self.stray.take() {
            out.push_back(Framed::Skipped {
                start,
                reason: "array item is not an object",
            });
        }
    }

    /// Track a non-object item so commas and brackets nested inside it, or inside its string
    /// literals, are not taken as array structure.
    fn feed_stray(&mut self, byte: u8, offset: u64) -> bool {
        if self.stray_in_string {
            if self.stray_escape {
                self.stray_escape = false;
            } else if byte == b'\\' {
                self.stray_escape = true;
            } else if byte == b'"' {
                self.stray_in_string = false;
            }
            return true;
        }
        match byte {
            b'"' => {
                self.stray_in_string = true;
                self.stray.get_or_insert(offset);
                true
            }
            b'[' => {
                self.stray.get_or_insert(offset);
                self.stray_depth += 1;
                true
            }
            b'{' if self.stray.is_some() => {
                self.stray_depth += 1;
                true
            }
            b']' | b'}' if self.stray_depth > 0 => {
                self.stray_depth -= 1;
                true
            }
            b',' => self.stray_depth > 0,
            _ => false,
        }
    }
}

impl Framing for ArrayFraming {
    fn feed(&mut self, byte: u8, offset: u64, out: &mut VecDeque<Framed>) {
        if self.closed {
            return;
        }
        if !self.opened {
            if byte == b'[' {
                self.opened = true;
            }
            return;
        }
        if self.capture.is_active() {
            if let Some(framed) = self.capture.push(byte) {
                out.push_back(framed);
            }
            return;
        }
        if self.feed_stray(byte, offset) {
            return;
        }

        match byte {
            b'{' if self.stray.is_none() => self.capture.begin(offset),
            b',' => self.end_stray(out),
            b']' => {
                self.end_stray(out);
                self.closed = true;
            }
            b if b.is_ascii_whitespace() => {}
            _ => {
                self.stray.get_or_insert(offset);
            }
        }
    }

    fn finish(&mut self, _offset: u64, out: &mut VecDeque<Framed>) {
        if let Some(framed) = self.capture.abandon() {
            out.push_back(framed);
        }
        self.end_stray(out);
    }
}

#[cfg(test)]
mod tests {
    use super::json_array_records;
    use crate::ingestion::{RecordReader, ReaderOptions};
    use crate::types::Value;

    fn opts(chunk: usize) -> ReaderOptions {
        ReaderOptions {
            read_chunk_bytes: chunk,
            max_record_bytes: 1024,
            extended_json: true,
        }
    }

    #[test]
    fn yields_each_object_across_tiny_chunks() {
        let input = br#"  [ {"a": 1}, {"b": {"c": "x]y"}} ,{"a":3} ]  trailing"#;
        let mut it = json_array_records(&input[..], &opts(3));
        let values: Vec<Value> = it.by_ref().map(|r| r.unwrap()).collect();
        assert_eq!(values.len(), 3);
        assert_eq!(values[0], Value::object([("a", Value::Int(1))]));
        assert_eq!(
            values[1],
            Value::object([("b", Value::object([("c", Value::from("x]y"))]))])
        );
        assert_eq!(it.bytes_read(), input.len() as u64);
    }

    #[test]
    fn non_object_items_and_bad_objects_are_recoverable() {
        let input = br#"[1, "a,b", {"ok": true}, {"bad": }, {"ok": false}]"#;
        let results: Vec<_> = json_array_records(&input[..], &opts(64)).collect();
        assert_eq!(results.len(), 5);
        assert!(results[0].as_ref().unwrap_err().is_recoverable());
        assert!(results[1].as_ref().unwrap_err().is_recoverable());
        assert!(results[2].is_ok());
        assert!(results[3].as_ref().unwrap_err().is_recoverable());
        assert!(results[4].is_ok());
    }

    #[test]
    fn nested_non_object_items_do_not_end_the_array() {
        let input = br#"[[{"x":1}, [2, "]"]], {"b":2}, [], {"c":3}]"#;
        let results: Vec<_> = json_array_records(&input[..], &opts(4)).collect();
        assert_eq!(results.len(), 4);
        assert!(results[0].as_ref().unwrap_err().is_recoverable());
        assert_eq!(results[1].as_ref().unwrap(), &Value::object([("b", Value::Int(2))]));
        assert!(results[2].as_ref().unwrap_err().is_recoverable());
        assert_eq!(results[3].as_ref().unwrap(), &Value::object([("c", Value::Int(3))]));
    }

    #[test]
    fn truncated_array_reports_unterminated_item() {
        let input = br#"[{"a": 1}, {"a": "#;
        let results: Vec<_> = json_array_records(&input[..], &opts(64)).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        let msg = results[1].as_ref().unwrap_err().to_string();
        assert!(msg.contains("unterminated"));
    }
}
