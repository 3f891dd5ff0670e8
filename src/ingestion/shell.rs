//! Streaming reader for multi-document shell dumps:
//!
//! ```text
//! /* 1 */
//! {
//!     "_id" : ObjectId("65a1f0c2e4b0a1b2c3d4e5f6"),
//!     "createdAt" : ISODate("2024-01-01T00:00:00Z")
//! }
//!
//! /* 2 */
//! { ... }
//! ```
//!
//! Block comments are skipped outside string literals, anything between documents is ignored,
//! and every complete top-level object is one record.

use std::collections::VecDeque;
use std::io::Read;

use super::ReaderOptions;
use super::scanner::{Framed, Framing, ObjectCapture, ScanRecords};

/// Records of a shell dump input.
pub(crate) type ShellRecords<R> = ScanRecords<R, ShellFraming>;

/// Create a shell-dump record iterator over `reader`.
pub(crate) fn shell_records<R: Read + Send>(reader: R, opts: &ReaderOptions) -> ShellRecords<R> {
    ScanRecords::new(
        reader,
        ShellFraming::new(opts.max_record_bytes),
        opts.read_chunk_bytes,
        opts.extended_json,
    )
}

#[derive(Debug)]
pub(crate) struct ShellFraming {
    capture: ObjectCapture,
    in_comment: bool,
    pending_slash: Option<u64>,
    pending_star: bool,
}

impl ShellFraming {
    fn new(max_record_bytes: usize) -> Self {
        Self {
            capture: ObjectCapture::new(max_record_bytes),
            in_comment: false,
            pending_slash: None,
            pending_star: false,
        }
    }

    fn content(&mut self, byte: u8, offset: u64, out: &mut VecDeque<Framed>) {
        if self.capture.is_active() {
            if let Some(framed) = self.capture.push(byte) {
                out.push_back(framed);
            }
        } else if byte == b'{' {
            self.capture.begin(offset);
        }
    }
}

impl Framing for ShellFraming {
    fn feed(&mut self, byte: u8, offset: u64, out: &mut VecDeque<Framed>) {
        if self.in_comment {
            if self.pending_star && byte == b'/' {
                self.in_comment = false;
                self.pending_star = false;
            } else {
                self.pending_star = byte == b'*';
            }
            return;
        }

        if let Some(slash_at) = self.pending_slash.take() {
            if byte == b'*' {
                self.in_comment = true;
                self.pending_star = false;
                return;
            }
            self.content(b'/', slash_at, out);
        }

        if byte == b'/' && !self.capture.in_string() {
            self.pending_slash = Some(offset);
            return;
        }
        self.content(byte, offset, out);
    }

    fn finish(&mut self, _offset: u64, out: &mut VecDeque<Framed>) {
        if let Some(slash_at) = self.pending_slash.take() {
            self.content(b'/', slash_at, out);
        }
        if let Some(framed) = self.capture.abandon() {
            out.push_back(framed);
        }
    }
}
