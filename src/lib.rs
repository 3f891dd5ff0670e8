//! `doc-tabulate` converts streams of schemaless documents into delimiter-separated tables.
//!
//! Nested records are flattened into `path → string` maps, the union of all keys becomes the
//! column list, and every record is written as one row against that list. Inputs are read in
//! bounded chunks, so memory does not grow with input size.
//!
//! ## What you can convert
//!
//! **Input formats (sniffed from the first bytes, or forced via [`options::InputFormat`]):**
//!
//! - **BSON**: concatenated length-prefixed binary documents (e.g. `mongodump` output)
//! - **NDJSON**: one JSON object per line
//! - **JSON array**: a single top-level array of objects
//! - **Shell text**: `/* n */`-separated documents with `ISODate(...)`, `ObjectId(...)`, ... literals
//!
//! **Output:** CSV/TSV (or any single-byte delimiter), optionally split into parts every `N`
//! rows, optionally with a `schema.json` describing the column list.
//!
//! ## How a run works
//!
//! 1. **Discovery**: one linear pass flattens every record and accumulates the column list.
//! 2. **Conversion**: a second, independent pass writes every record against that list.
//!
//! Single-pass mode samples only the first records for the schema and keeps reading the same
//! stream for conversion; it is best-effort but works on single-use streams.
//!
//! ## Quick example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use doc_tabulate::execution::ConversionEngine;
//! use doc_tabulate::ingestion::BytesSource;
//! use doc_tabulate::options::ConversionOptions;
//! use doc_tabulate::output::CollectingSink;
//!
//! let input = b"{\"a\":1}\n{\"b\":2}\n{\"a\":3,\"c\":[1,2,3]}\n".to_vec();
//! let mut options = ConversionOptions::default();
//! options.flatten.max_array_length = 2;
//!
//! let sink = CollectingSink::new();
//! ConversionEngine::new()
//!     .run_to_completion(Arc::new(BytesSource::new("mem", input)), options, &sink)
//!     .unwrap();
//!
//! let csv = String::from_utf8(sink.part_bytes()[&0].clone()).unwrap();
//! assert_eq!(csv, "a,b,c[0],c[1],c.__truncated\n1,,,,\n,2,,,\n3,,1,2,3\n");
//! ```
//!
//! ## Modules
//!
//! - [`ingestion`]: input sources, format sniffing and record iterators
//! - [`processing`]: flattening, schema accumulation and row encoding
//! - [`output`]: part writer and event sinks
//! - [`execution`]: the run state machine, metrics and the message-driven worker
//! - [`batch`]: multi-file conversion
//! - [`options`], [`types`], [`error`], [`logging`]

pub mod batch;
pub mod error;
pub mod execution;
pub mod ingestion;
pub mod logging;
pub mod options;
pub mod output;
pub mod processing;
pub mod types;

pub use error::{ConversionError, ConversionResult, Severity};
