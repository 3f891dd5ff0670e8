//! Streaming reader for concatenated length-prefixed binary documents (`mongodump` style).
//!
//! Each document starts with its total size as a little-endian `i32`. Only one document is
//! buffered at a time; the codec itself is the `bson` crate.

use std::io::{self, Cursor, Read};

use bson::Document;

use crate::error::{ConversionError, ConversionResult};
use crate::types::Value;

use super::convert::from_bson_document;
use super::source::{CountingReader, read_full};
use super::{ReaderOptions, RecordReader};

/// Smallest valid document: 4-byte length plus the terminating NUL.
pub const MIN_DOCUMENT_LEN: i32 = 5;

/// Records of a binary document stream.
pub struct BsonRecords<R> {
    reader: CountingReader<R>,
    offset: u64,
    max_record_bytes: usize,
    done: bool,
}

/// Create a binary document iterator over `reader`.
pub fn bson_records<R: Read + Send>(reader: R, opts: &ReaderOptions) -> BsonRecords<R> {
    BsonRecords {
        reader: CountingReader::new(reader),
        offset: 0,
        max_record_bytes: opts.max_record_bytes,
        done: false,
    }
}

impl<R: Read> BsonRecords<R> {
    fn stop(&mut self, err: ConversionError) -> Option<ConversionResult<Value>> {
        self.done = true;
        Some(Err(err))
    }

    fn next_document(&mut self) -> Option<ConversionResult<Value>> {
        let start = self.offset;
        let mut len_buf = [0u8; 4];
        let got = match read_full(&mut self.reader, &mut len_buf) {
            Ok(n) => n,
            Err(e) => return self.stop(e.into()),
        };
        if got == 0 {
            self.done = true;
            return None;
        }
        if got < len_buf.len() {
            return self.stop(ConversionError::malformed(start, "truncated length prefix"));
        }

        let declared = i32::from_le_bytes(len_buf);
        if declared < MIN_DOCUMENT_LEN {
            // Without a trustworthy length there is no way to find the next document.
            return self.stop(ConversionError::malformed(
                start,
                format!("invalid document length {declared}"),
            ));
        }
        let len = declared as usize;
        let body_len = (len - len_buf.len()) as u64;

        if len > self.max_record_bytes {
            let skipped = match io::copy(&mut (&mut self.reader).take(body_len), &mut io::sink()) {
                Ok(n) => n,
                Err(e) => return self.stop(e.into()),
            };
            if skipped < body_len {
                return self.stop(ConversionError::malformed(start, "truncated trailing document"));
            }
            self.offset += len as u64;
            return Some(Err(ConversionError::malformed(
                start,
                "document exceeds max_record_bytes",
            )));
        }

        let mut doc = vec![0u8; len];
        doc[..4].copy_from_slice(&len_buf);
        match read_full(&mut self.reader, &mut doc[4..]) {
            Ok(n) if (n as u64) < body_len => {
                return self.stop(ConversionError::malformed(start, "truncated trailing document"));
            }
            Ok(_) => {}
            Err(e) => return self.stop(e.into()),
        }
        self.offset += len as u64;

        let mut cursor = Cursor::new(doc.as_slice());
        Some(
            Document::from_reader(&mut cursor)
                .map(from_bson_document)
                .map_err(|e| ConversionError::malformed(start, e.to_string())),
        )
    }
}

impl<R: Read> Iterator for BsonRecords<R> {
    type Item = ConversionResult<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        self.next_document()
    }
}

impl<R: Read + Send> RecordReader for BsonRecords<R> {
    fn bytes_read(&self) -> u64 {
        self.reader.count()
    }
}
