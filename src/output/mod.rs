//! Output side of the pipeline.
//!
//! The [`PartWriter`] turns encoded rows into chunked, optionally split output parts and reports
//! them as [`crate::execution::ConversionEvent`]s. Sinks decide where those events end up:
//!
//! - [`CollectingSink`]: keeps everything in memory
//! - [`DirectorySink`]: assembles parts into files in a directory
//! - [`TracingSink`]: mirrors the run to `tracing`
//! - [`CompositeSink`]: fans out to several sinks

pub mod part_writer;
pub mod sink;

pub use part_writer::{PartWriter, SCHEMA_FILENAME};
pub use sink::{CollectingSink, CompositeSink, DirectorySink, TracingSink};
