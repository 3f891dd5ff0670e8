//! Part writer: buffers encoded rows into chunks and splits output into named parts.

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::error::ConversionResult;
use crate::execution::{ConversionEvent, EventSink, OutputPart};
use crate::options::{ConversionOptions, KeyOrder};
use crate::processing::RowEncoder;
use crate::types::{ColumnList, FlatRecord};

/// File name of the persisted schema part.
pub const SCHEMA_FILENAME: &str = "schema.json";
const SCHEMA_MIME: &str = "application/json";

#[derive(Debug)]
struct OpenPart {
    index: usize,
    next_chunk: usize,
    rows: u64,
    size_bytes: u64,
}

/// Streams rows into output parts through an [`EventSink`].
///
/// A part is opened lazily by its first row, so `M` rows split every `N` produce exactly
/// `ceil(M / N)` parts. Every part starts with the header when headers are enabled.
#[derive(Debug)]
pub struct PartWriter {
    columns: ColumnList,
    encoder: RowEncoder,
    include_header: bool,
    split_every: Option<u64>,
    flush_threshold: usize,
    file_stem: String,
    extension: &'static str,
    mime_type: &'static str,
    chunk: Vec<u8>,
    current: Option<OpenPart>,
    next_index: usize,
    outputs: Vec<OutputPart>,
}

impl PartWriter {
    pub fn new(options: &ConversionOptions, columns: ColumnList) -> ConversionResult<Self> {
        Ok(Self {
            columns,
            encoder: RowEncoder::new(&options.csv)?,
            include_header: options.csv.include_header,
            split_every: options.output.split_every.map(|n| n as u64),
            flush_threshold: options.performance.flush_threshold_bytes.max(1),
            file_stem: options.output.file_stem.clone(),
            extension: options.csv.extension(),
            mime_type: options.csv.mime_type(),
            chunk: Vec::new(),
            current: None,
            next_index: 0,
            outputs: Vec::new(),
        })
    }

    /// Parts sealed so far.
    pub fn outputs(&self) -> &[OutputPart] {
        &self.outputs
    }

    /// Rows in the part currently open.
    pub fn open_rows(&self) -> u64 {
        self.current.as_ref().map_or(0, |p| p.rows)
    }

    /// Encode and buffer one row, flushing and sealing as thresholds are crossed.
    pub fn write_row(&mut self, record: &FlatRecord, sink: &dyn EventSink) -> ConversionResult<()> {
        if self.current.is_none() {
            self.begin_part()?;
        }
        self.encoder.encode_row(&self.columns, record, &mut self.chunk)?;

        let rows = match self.current.as_mut() {
            Some(part) => {
                part.rows += 1;
                part.rows
            }
            None => 0,
        };
        if self.chunk.len() >= self.flush_threshold {
            self.flush_chunk(sink);
        }
        if self.split_every.is_some_and(|n| rows >= n) {
            self.seal(sink);
        }
        Ok(())
    }

    /// Flush and seal the open part, if any.
    pub fn seal(&mut self, sink: &dyn EventSink) {
        self.flush_chunk(sink);
        let Some(part) = self.current.take() else {
            return;
        };
        let done = OutputPart {
            part_index: part.index,
            filename: self.part_filename(part.index),
            rows: part.rows,
            size_bytes: part.size_bytes,
            mime_type: self.mime_type,
        };
        tracing::debug!(part = part.index, rows = part.rows, file = %done.filename, "sealed part");
        self.outputs.push(done.clone());
        sink.on_event(ConversionEvent::PartDone(done));
    }

    /// Seal the last part. An unsplit run with no rows still gets its (header-only) file.
    pub fn finish(&mut self, sink: &dyn EventSink) -> ConversionResult<()> {
        self.seal(sink);
        if self.outputs.is_empty() && self.split_every.is_none() {
            self.begin_part()?;
            self.seal(sink);
        }
        Ok(())
    }

    /// Emit `schema.json` as one extra part, independent of the split threshold.
    pub fn write_schema(&mut self, key_order: KeyOrder, sink: &dyn EventSink) -> ConversionResult<()> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct SchemaFile<'a> {
            columns: &'a ColumnList,
            key_order: KeyOrder,
            generated_at: String,
        }

        self.seal(sink);
        let buffer = serde_json::to_vec_pretty(&SchemaFile {
            columns: &self.columns,
            key_order,
            generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        })?;

        let index = self.next_index;
        self.next_index += 1;
        let done = OutputPart {
            part_index: index,
            filename: SCHEMA_FILENAME.to_string(),
            rows: 0,
            size_bytes: buffer.len() as u64,
            mime_type: SCHEMA_MIME,
        };
        sink.on_event(ConversionEvent::PartReady {
            part_index: index,
            chunk_index: 0,
            buffer,
            mime_type: SCHEMA_MIME,
        });
        self.outputs.push(done.clone());
        sink.on_event(ConversionEvent::PartDone(done));
        Ok(())
    }

    fn begin_part(&mut self) -> ConversionResult<()> {
        let index = self.next_index;
        self.next_index += 1;
        self.current = Some(OpenPart {
            index,
            next_chunk: 0,
            rows: 0,
            size_bytes: 0,
        });
        if self.include_header {
            self.encoder.encode_header(&self.columns, &mut self.chunk)?;
        }
        Ok(())
    }

    /// Hand the buffered chunk to the sink; ownership moves with the event.
    fn flush_chunk(&mut self, sink: &dyn EventSink) {
        let Some(part) = self.current.as_mut() else {
            return;
        };
        if self.chunk.is_empty() {
            return;
        }
        let buffer = std::mem::replace(&mut self.chunk, Vec::with_capacity(self.flush_threshold.min(1 << 20)));
        part.size_bytes += buffer.len() as u64;
        let chunk_index = part.next_chunk;
        part.next_chunk += 1;
        sink.on_event(ConversionEvent::PartReady {
            part_index: part.index,
            chunk_index,
            buffer,
            mime_type: self.mime_type,
        });
    }

    fn part_filename(&self, index: usize) -> String {
        match self.split_every {
            Some(_) => format!("{}_part_{:03}.{}", self.file_stem, index + 1, self.extension),
            None => format!("{}.{}", self.file_stem, self.extension),
        }
    }
}
