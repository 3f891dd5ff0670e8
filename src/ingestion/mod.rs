//! Input side of the pipeline: byte sources, format sniffing and streaming record iterators.
//!
//! Most callers go through [`open_records`], which picks the iterator for a [`RecordFormat`]
//! (usually obtained from [`detect_format`]). Every iterator:
//!
//! - reads the source linearly in bounded chunks and holds at most one record in memory
//! - yields `Err` for a malformed record and keeps going (the error is recoverable)
//! - yields one non-recoverable `Err` on an I/O failure and then ends
//!
//! Format-specific iterators live in [`ndjson`] and [`binary`]; the JSON-array and shell-dump
//! framings share the byte scanner in `scanner`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConversionResult;
use crate::options::ConversionOptions;
use crate::types::Value;

pub mod binary;
pub mod convert;
pub mod fixup;
mod json_array;
pub mod ndjson;
mod scanner;
mod shell;
pub mod sniff;
pub mod source;

pub use convert::{from_bson, from_bson_document, from_json};
pub use sniff::{SNIFF_BYTES, detect_format, sniff_format};
pub use source::{BytesSource, FileSource, InputSource, ReaderSource};

/// Concrete record format of an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordFormat {
    /// Concatenated length-prefixed binary documents.
    Bson,
    /// One JSON object per line.
    Ndjson,
    /// A single top-level JSON array of objects.
    JsonArray,
    /// Shell dump: `/* n */` separated documents with constructor literals.
    ShellText,
}

impl fmt::Display for RecordFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RecordFormat::Bson => "bson",
            RecordFormat::Ndjson => "ndjson",
            RecordFormat::JsonArray => "json-array",
            RecordFormat::ShellText => "shell-text",
        })
    }
}

/// A streaming record iterator that also reports how much of the input it has consumed.
pub trait RecordReader: Iterator<Item = ConversionResult<Value>> + Send {
    /// Bytes pulled from the underlying reader so far.
    fn bytes_read(&self) -> u64;
}

/// Knobs shared by all record iterators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderOptions {
    pub read_chunk_bytes: usize,
    pub max_record_bytes: usize,
    pub extended_json: bool,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self::from(&ConversionOptions::default())
    }
}

impl From<&ConversionOptions> for ReaderOptions {
    fn from(options: &ConversionOptions) -> Self {
        Self {
            read_chunk_bytes: options.performance.read_chunk_bytes,
            max_record_bytes: options.performance.max_record_bytes,
            extended_json: options.extended_json,
        }
    }
}

/// Open a fresh pass over `source` as records of `format`.
pub fn open_records(
    source: &dyn InputSource,
    format: RecordFormat,
    opts: &ReaderOptions,
) -> ConversionResult<Box<dyn RecordReader>> {
    let reader = source.open()?;
    tracing::debug!(source = source.name(), %format, "opened record stream");
    Ok(match format {
        RecordFormat::Bson => Box::new(binary::bson_records(reader, opts)),
        RecordFormat::Ndjson => Box::new(ndjson::ndjson_records(reader, opts)),
        RecordFormat::JsonArray => Box::new(json_array::json_array_records(reader, opts)),
        RecordFormat::ShellText => Box::new(shell::shell_records(reader, opts)),
    })
}
