//! Streaming reader for newline-delimited JSON.
//!
//! Lines end at CR, LF or CRLF (a CRLF split across two reads is still one terminator). Blank
//! lines are skipped and an unterminated final line is still decoded.

use std::io::{self, BufRead, BufReader, Read};

use crate::error::{ConversionError, ConversionResult};
use crate::types::Value;

use super::convert::parse_text_record;
use super::source::CountingReader;
use super::{ReaderOptions, RecordReader};

/// Records of an NDJSON input.
pub struct NdjsonRecords<R> {
    reader: BufReader<CountingReader<R>>,
    line: Vec<u8>,
    line_start: u64,
    offset: u64,
    skip_lf: bool,
    oversized: bool,
    max_record_bytes: usize,
    extended_json: bool,
    done: bool,
}

/// Create an NDJSON record iterator over `reader`.
pub fn ndjson_records<R: Read + Send>(reader: R, opts: &ReaderOptions) -> NdjsonRecords<R> {
    NdjsonRecords {
        reader: BufReader::with_capacity(opts.read_chunk_bytes.max(1), CountingReader::new(reader)),
        line: Vec::new(),
        line_start: 0,
        offset: 0,
        skip_lf: false,
        oversized: false,
        max_record_bytes: opts.max_record_bytes,
        extended_json: opts.extended_json,
        done: false,
    }
}

impl<R: Read> NdjsonRecords<R> {
    /// Decode the accumulated line; `None` for blank lines.
    fn take_line(&mut self) -> Option<ConversionResult<Value>> {
        let start = self.line_start;
        self.line_start = self.offset;

        if std::mem::take(&mut self.oversized) {
            self.line.clear();
            return Some(Err(ConversionError::malformed(
                start,
                "line exceeds max_record_bytes",
            )));
        }
        if self.line.iter().all(u8::is_ascii_whitespace) {
            self.line.clear();
            return None;
        }

        let result = parse_text_record(&self.line, start, self.extended_json);
        self.line.clear();
        Some(result)
    }
}

impl<R: Read> Iterator for NdjsonRecords<R> {
    type Item = ConversionResult<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let (consumed, terminated, skipped_lf) = {
                let buf = match self.reader.fill_buf() {
                    Ok(buf) => buf,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        self.done = true;
                        return Some(Err(e.into()));
                    }
                };

                if buf.is_empty() {
                    self.done = true;
                    (0, true, false)
                } else if self.skip_lf {
                    self.skip_lf = false;
                    if buf[0] == b'\n' { (1, false, true) } else { (0, false, false) }
                } else {
                    let found = buf.iter().position(|&b| b == b'\n' || b == b'\r');
                    let end = found.unwrap_or(buf.len());
                    if !self.oversized {
                        if self.line.len() + end > self.max_record_bytes {
                            self.oversized = true;
                            self.line.clear();
                        } else {
                            self.line.extend_from_slice(&buf[..end]);
                        }
                    }
                    match found {
                        Some(idx) => {
                            self.skip_lf = buf[idx] == b'\r';
                            (idx + 1, true, false)
                        }
                        None => (buf.len(), false, false),
                    }
                }
            };

            self.reader.consume(consumed);
            self.offset += consumed as u64;
            if skipped_lf {
                self.line_start = self.offset;
            }
            if terminated {
                if let Some(result) = self.take_line() {
                    return Some(result);
                }
            }
        }
        None
    }
}

impl<R: Read + Send> RecordReader for NdjsonRecords<R> {
    fn bytes_read(&self) -> u64 {
        self.reader.get_ref().count()
    }
}
