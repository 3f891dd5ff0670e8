//! Byte-level framing shared by the JSON-array and shell-text iterators.
//!
//! Both formats locate top-level objects by tracking string/escape state and brace depth. The
//! scan runs on raw bytes: every structural character is ASCII and never appears inside a
//! multi-byte UTF-8 sequence, so decoding is deferred to each captured record.

use std::collections::VecDeque;
use std::io::{self, Read};

use crate::error::{ConversionError, ConversionResult};
use crate::types::Value;

use super::RecordReader;
use super::convert::parse_text_record;
use super::source::CountingReader;

/// A unit produced by a framing state machine.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Framed {
    /// Raw bytes of one complete top-level object, starting at `start`.
    Object { start: u64, bytes: Vec<u8> },
    /// Something at `start` was skipped; the reason becomes a recoverable warning.
    Skipped { start: u64, reason: &'static str },
}

/// Format-specific framing: decides where objects start and what is ignored between them.
pub(crate) trait Framing: Send {
    fn feed(&mut self, byte: u8, offset: u64, out: &mut VecDeque<Framed>);
    fn finish(&mut self, offset: u64, out: &mut VecDeque<Framed>);
}

/// Captures one brace-delimited object, honoring string literals and escapes.
#[derive(Debug)]
pub(crate) struct ObjectCapture {
    buf: Vec<u8>,
    start: u64,
    depth: usize,
    in_string: bool,
    escape: bool,
    oversized: bool,
    max_bytes: usize,
}

impl ObjectCapture {
    pub(crate) fn new(max_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            start: 0,
            depth: 0,
            in_string: false,
            escape: false,
            oversized: false,
            max_bytes,
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.depth > 0
    }

    pub(crate) fn in_string(&self) -> bool {
        self.in_string
    }

    /// Start capturing at an opening brace located at `offset`.
    pub(crate) fn begin(&mut self, offset: u64) {
        self.buf.clear();
        self.buf.push(b'{');
        self.start = offset;
        self.depth = 1;
        self.in_string = false;
        self.escape = false;
        self.oversized = false;
    }

    /// Push the next byte of an active capture. Returns the framed result once the object closes.
    pub(crate) fn push(&mut self, byte: u8) -> Option<Framed> {
        if !self.oversized {
            if self.buf.len() >= self.max_bytes {
                self.oversized = true;
                self.buf = Vec::new();
            } else {
                self.buf.push(byte);
            }
        }

        if self.in_string {
            if self.escape {
                self.escape = false;
            } else if byte == b'\\' {
                self.escape = true;
            } else if byte == b'"' {
                self.in_string = false;
            }
            return None;
        }

        match byte {
            b'"' => self.in_string = true,
            b'{' => self.depth += 1,
            b'}' => {
                self.depth -= 1;
                if self.depth == 0 {
                    return Some(self.take());
                }
            }
            _ => {}
        }
        None
    }

    /// Abandon an unterminated capture at end of input.
    pub(crate) fn abandon(&mut self) -> Option<Framed> {
        if !self.is_active() {
            return None;
        }
        self.depth = 0;
        self.buf.clear();
        Some(Framed::Skipped {
            start: self.start,
            reason: "unterminated document at end of input",
        })
    }

    fn take(&mut self) -> Framed {
        if self.oversized {
            self.oversized = false;
            Framed::Skipped {
                start: self.start,
                reason: "document exceeds max_record_bytes",
            }
        } else {
            Framed::Object {
                start: self.start,
                bytes: std::mem::take(&mut self.buf),
            }
        }
    }
}

/// Generic chunked reader driving a [`Framing`] and decoding each framed object.
pub(crate) struct ScanRecords<R, F> {
    reader: CountingReader<R>,
    framing: F,
    chunk: Vec<u8>,
    offset: u64,
    pending: VecDeque<Framed>,
    extended_json: bool,
    eof: bool,
}

impl<R: Read, F: Framing> ScanRecords<R, F> {
    pub(crate) fn new(reader: R, framing: F, read_chunk_bytes: usize, extended_json: bool) -> Self {
        Self {
            reader: CountingReader::new(reader),
            framing,
            chunk: vec![0; read_chunk_bytes.max(1)],
            offset: 0,
            pending: VecDeque::new(),
            extended_json,
            eof: false,
        }
    }

    fn decode(&self, framed: Framed) -> ConversionResult<Value> {
        match framed {
            Framed::Object { start, bytes } => parse_text_record(&bytes, start, self.extended_json),
            Framed::Skipped { start, reason } => Err(ConversionError::malformed(start, reason)),
        }
    }
}

impl<R: Read, F: Framing> Iterator for ScanRecords<R, F> {
    type Item = ConversionResult<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(framed) = self.pending.pop_front() {
                return Some(self.decode(framed));
            }
            if self.eof {
                return None;
            }

            match self.reader.read(&mut self.chunk) {
                Ok(0) => {
                    self.eof = true;
                    self.framing.finish(self.offset, &mut self.pending);
                }
                Ok(n) => {
                    for (i, &byte) in self.chunk[..n].iter().enumerate() {
                        self.framing
                            .feed(byte, self.offset + i as u64, &mut self.pending);
                    }
                    self.offset += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.eof = true;
                    self.pending.clear();
                    return Some(Err(e.into()));
                }
            }
        }
    }
}

impl<R: Read + Send, F: Framing> RecordReader for ScanRecords<R, F> {
    fn bytes_read(&self) -> u64 {
        self.reader.count()
    }
}

#[cfg(test)]
mod tests {
    use super::{Framed, ObjectCapture};

    fn capture_all(input: &[u8], max: usize) -> Option<Framed> {
        let mut cap = ObjectCapture::new(max);
        cap.begin(0);
        let mut result = None;
        for &b in &input[1..] {
            if let Some(f) = cap.push(b) {
                result = Some(f);
            }
        }
        result
    }

    #[test]
    fn braces_inside_strings_do_not_close_the_object() {
        let input = br#"{"a":"}{","b":{"c":"\"}"}}"#;
        let framed = capture_all(input, 1024).unwrap();
        assert_eq!(
            framed,
            Framed::Object {
                start: 0,
                bytes: input.to_vec()
            }
        );
    }

    #[test]
    fn oversized_object_is_reported_as_skipped() {
        let framed = capture_all(br#"{"a":"0123456789"}"#, 8).unwrap();
        assert!(matches!(framed, Framed::Skipped { start: 0, .. }));
    }

    #[test]
    fn unterminated_capture_is_abandoned() {
        let mut cap = ObjectCapture::new(64);
        cap.begin(5);
        assert!(cap.push(b'"').is_none());
        assert!(matches!(cap.abandon(), Some(Framed::Skipped { start: 5, .. })));
        assert!(!cap.is_active());
    }
}
