//! Per-record transformations between decoding and output.
//!
//! - [`flatten()`]: nested [`crate::types::Value`] → [`crate::types::FlatRecord`]
//! - [`SchemaAccumulator`]: union of flat keys, frozen into a [`crate::types::ColumnList`]
//! - [`RowEncoder`]: flat record + column list → one delimited line
//!
//! ## Example: flatten → accumulate → encode
//!
//! ```rust
//! use doc_tabulate::options::{ConversionOptions, KeyOrder};
//! use doc_tabulate::processing::{FlattenConfig, RowEncoder, SchemaAccumulator, flatten};
//! use doc_tabulate::types::Value;
//!
//! let options = ConversionOptions::default();
//! let config = FlattenConfig::from(&options);
//! let records = vec![
//!     Value::object([("b", Value::Int(2))]),
//!     Value::object([("a", Value::from("x,y"))]),
//! ];
//!
//! let flat: Vec<_> = records.iter().map(|r| flatten(r, &config).unwrap()).collect();
//! let mut acc = SchemaAccumulator::new();
//! for f in &flat {
//!     acc.add_keys(f);
//! }
//! let columns = acc.finalize(KeyOrder::Alpha);
//!
//! let mut encoder = RowEncoder::new(&options.csv).unwrap();
//! let mut out = Vec::new();
//! encoder.encode_header(&columns, &mut out).unwrap();
//! for f in &flat {
//!     encoder.encode_row(&columns, f, &mut out).unwrap();
//! }
//! assert_eq!(String::from_utf8(out).unwrap(), "a,b\n,2\n\"x,y\",\n");
//! ```

pub mod encode;
pub mod flatten;
pub mod schema;

pub use encode::{BOM, RowEncoder};
pub use flatten::{FlattenConfig, TRUNCATED_SUFFIX, flatten, normalize_key};
pub use schema::{SchemaAccumulator, compare_paths};
