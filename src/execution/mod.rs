//! Conversion orchestration: the run state machine, progress metrics and the host worker.
//!
//! This module sits "above" [`crate::ingestion`], [`crate::processing`] and [`crate::output`] and
//! provides:
//!
//! - [`ConversionEngine`]: drives discovery and conversion over one input
//! - [`RunControl`]: shared phase, pause and cancel state, checked between records
//! - [`ConversionMetrics`] + [`EventSink`]: real-time counters and the event stream to the host
//! - [`worker`]: the message-driven host protocol (`START`, `CONTINUE`, `PAUSE`, ...)
//!
//! A run is strictly sequential: records are processed in input order, and discovery always
//! completes (or is cancelled) before any row is written.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use doc_tabulate::execution::{ConversionEngine, ConversionEvent};
//! use doc_tabulate::ingestion::BytesSource;
//! use doc_tabulate::options::ConversionOptions;
//! use doc_tabulate::output::CollectingSink;
//!
//! let source = Arc::new(BytesSource::new("mem", b"{\"a\":1}\n{\"b\":\"x\"}\n".to_vec()));
//! let sink = CollectingSink::new();
//! let summary = ConversionEngine::new()
//!     .run_to_completion(source, ConversionOptions::default(), &sink)
//!     .unwrap();
//!
//! assert_eq!(summary.stats.rows_written, 2);
//! assert_eq!(sink.part_bytes()[&0], b"a,b\n1,\n,x\n");
//! assert!(matches!(sink.events().last(), Some(ConversionEvent::Done(_))));
//! ```

mod control;
mod observer;
pub mod worker;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub use control::{Phase, RunControl};
pub use observer::{
    ConversionEvent, ConversionMetrics, ConversionStats, EventSink, LOG_CAPACITY, LogEntry, OutputPart,
    ProgressSnapshot, RunLog, RunSummary,
};
pub use worker::{ConversionWorker, Request, Response, WorkerHandle};

use crate::error::{ConversionError, ConversionResult, Severity};
use crate::ingestion::{InputSource, ReaderOptions, RecordFormat, RecordReader, detect_format, open_records};
use crate::options::{ConversionOptions, FlattenStrategy, SchemaMode};
use crate::output::PartWriter;
use crate::processing::{FlattenConfig, SchemaAccumulator, flatten};
use crate::types::{ColumnList, FlatRecord, SchemaPayload};

/// How a call into the engine ended.
#[derive(Debug)]
pub enum RunOutcome {
    Completed(Box<RunSummary>),
    /// Discovery finished with `auto_continue` off; hand the run back to
    /// [`ConversionEngine::continue_run`] to write the rows.
    AwaitingSchema(PendingRun),
    Cancelled,
    Failed(ConversionError),
}

/// Immutable snapshot of everything one run needs, owned by the engine call driving it.
struct RunContext {
    source: Arc<dyn InputSource>,
    options: ConversionOptions,
    format: RecordFormat,
    reader_opts: ReaderOptions,
    flatten: FlattenConfig,
    log: RunLog,
}

/// Single-pass state kept between discovery and conversion.
struct Carry {
    reader: Box<dyn RecordReader>,
    buffered: Vec<FlatRecord>,
}

/// A run parked in `awaiting-schema`.
pub struct PendingRun {
    ctx: RunContext,
    schema: SchemaPayload,
    carry: Option<Carry>,
}

impl PendingRun {
    /// The finalized schema the conversion pass will write against.
    pub fn schema(&self) -> &SchemaPayload {
        &self.schema
    }

    pub fn format(&self) -> RecordFormat {
        self.ctx.format
    }
}

impl fmt::Debug for PendingRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRun")
            .field("source", &self.ctx.source.name())
            .field("format", &self.ctx.format)
            .field("columns", &self.schema.columns.len())
            .field("buffered", &self.carry.as_ref().map_or(0, |c| c.buffered.len()))
            .finish()
    }
}

/// Time-based progress cadence.
struct Pulse {
    interval: Duration,
    last: Instant,
}

impl Pulse {
    fn new(interval_ms: u64) -> Self {
        Self {
            interval: Duration::from_millis(interval_ms),
            last: Instant::now(),
        }
    }

    fn due(&mut self) -> bool {
        if self.last.elapsed() < self.interval {
            return false;
        }
        self.last = Instant::now();
        true
    }
}

/// Drives conversion runs through the phase state machine.
///
/// One engine runs one conversion at a time. Its [`RunControl`] can be shared with another thread
/// to pause, resume or cancel the run in flight.
#[derive(Debug, Default)]
pub struct ConversionEngine {
    control: Arc<RunControl>,
    metrics: Arc<ConversionMetrics>,
}

impl ConversionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine driven by an externally owned control handle.
    pub fn with_control(control: Arc<RunControl>) -> Self {
        Self {
            control,
            metrics: Arc::new(ConversionMetrics::new()),
        }
    }

    pub fn control(&self) -> Arc<RunControl> {
        Arc::clone(&self.control)
    }

    /// Get a handle to real-time run metrics.
    pub fn metrics(&self) -> Arc<ConversionMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Start a run: discovery, then conversion unless `auto_continue` is off.
    ///
    /// Every outcome is also reported to `sink`; a failed run ends with
    /// [`ConversionEvent::Failed`], a completed one with [`ConversionEvent::Done`].
    pub fn start(
        &self,
        source: Arc<dyn InputSource>,
        options: ConversionOptions,
        sink: &dyn EventSink,
    ) -> RunOutcome {
        if self.control.begin() {
            sink.on_event(ConversionEvent::Phase(Phase::Discovery));
        } else if !matches!(self.control.phase(), Phase::Discovery | Phase::Paused) {
            let err = ConversionError::InvalidTransition {
                from: self.control.phase(),
                to: Phase::Discovery,
            };
            tracing::warn!(source = source.name(), %err, "rejected start");
            return RunOutcome::Failed(err);
        }

        let mut log = RunLog::default();
        let mut ctx = match self.prepare(source, options, &mut log, sink) {
            Ok(ctx) => ctx,
            Err(err) => return self.terminate(&mut log, err, sink),
        };

        let (schema, carry) = match self.discover(&mut ctx, sink) {
            Ok(found) => found,
            Err(err) => return self.terminate(&mut ctx.log, err, sink),
        };
        let mut pending = PendingRun { ctx, schema, carry };

        if pending.ctx.options.general.auto_continue {
            return self.continue_run(pending, sink);
        }
        match self.control.advance(Phase::AwaitingSchema) {
            Ok(changed) => {
                if let Some(phase) = changed {
                    sink.on_event(ConversionEvent::Phase(phase));
                }
                RunOutcome::AwaitingSchema(pending)
            }
            Err(err) => self.terminate(&mut pending.ctx.log, err, sink),
        }
    }

    /// Run the conversion pass of a run that finished discovery.
    pub fn continue_run(&self, pending: PendingRun, sink: &dyn EventSink) -> RunOutcome {
        let PendingRun {
            mut ctx,
            schema,
            carry,
        } = pending;

        match self.control.advance(Phase::Conversion) {
            Ok(Some(phase)) => sink.on_event(ConversionEvent::Phase(phase)),
            Ok(None) => {}
            Err(err) => return self.terminate(&mut ctx.log, err, sink),
        }

        let outputs = match self.convert(&mut ctx, &schema.columns, carry, sink) {
            Ok(outputs) => outputs,
            Err(err) => return self.terminate(&mut ctx.log, err, sink),
        };
        if let Err(err) = self.control.advance(Phase::Completed) {
            return self.terminate(&mut ctx.log, err, sink);
        }

        let stats = self.metrics.stats();
        ctx.log.push(
            Severity::Info,
            format!(
                "converted {} rows into {} parts ({} skipped)",
                stats.rows_written,
                outputs.len(),
                stats.errors
            ),
            sink,
        );
        let summary = Box::new(RunSummary {
            stats,
            schema,
            outputs,
            log: ctx.log.to_vec(),
        });
        sink.on_event(ConversionEvent::Phase(Phase::Completed));
        sink.on_event(ConversionEvent::Done(summary.clone()));
        RunOutcome::Completed(summary)
    }

    /// Start a run and continue it straight through, whatever `auto_continue` says.
    pub fn run_to_completion(
        &self,
        source: Arc<dyn InputSource>,
        options: ConversionOptions,
        sink: &dyn EventSink,
    ) -> ConversionResult<RunSummary> {
        let mut outcome = self.start(source, options, sink);
        if let RunOutcome::AwaitingSchema(pending) = outcome {
            outcome = self.continue_run(pending, sink);
        }
        match outcome {
            RunOutcome::Completed(summary) => Ok(*summary),
            RunOutcome::Cancelled => Err(ConversionError::Cancelled),
            RunOutcome::Failed(err) => Err(err),
            RunOutcome::AwaitingSchema(_) => Err(ConversionError::internal(
                "run still awaiting schema after continue",
            )),
        }
    }

    fn prepare(
        &self,
        source: Arc<dyn InputSource>,
        options: ConversionOptions,
        log: &mut RunLog,
        sink: &dyn EventSink,
    ) -> ConversionResult<RunContext> {
        options.validate()?;
        self.metrics.begin_run(source.len());
        let format = detect_format(source.as_ref(), options.format)?;
        log.push(
            Severity::Info,
            format!("reading '{}' as {format} ({:?})", source.name(), options.schema_mode),
            sink,
        );
        if options.flatten.strategy == FlattenStrategy::Explode {
            log.push(
                Severity::Info,
                "explode strategy flattens arrays by index; rows are not multiplied",
                sink,
            );
        }

        Ok(RunContext {
            reader_opts: ReaderOptions::from(&options),
            flatten: FlattenConfig::from(&options),
            source,
            options,
            format,
            log: std::mem::take(log),
        })
    }

    /// Discovery pass. The schema is finalized and reported even when the pass is cancelled.
    fn discover(
        &self,
        ctx: &mut RunContext,
        sink: &dyn EventSink,
    ) -> ConversionResult<(SchemaPayload, Option<Carry>)> {
        let single_pass = ctx.options.schema_mode == SchemaMode::SinglePass;
        let sample_rows = ctx.options.performance.discovery_sample_rows;
        let mut reader = open_records(ctx.source.as_ref(), ctx.format, &ctx.reader_opts)?;
        let mut acc = SchemaAccumulator::new();
        let mut sample: Option<FlatRecord> = None;
        let mut buffered = Vec::new();
        let mut seen = 0usize;
        let mut pulse = Pulse::new(ctx.options.performance.progress_interval_ms);

        let stopped = loop {
            if let Err(err) = self.control.checkpoint() {
                break Err(err);
            }
            if single_pass && seen >= sample_rows {
                break Ok(());
            }
            let Some(item) = reader.next() else {
                break Ok(());
            };
            seen += 1;
            self.metrics.set_bytes_read(reader.bytes_read());

            match item.and_then(|value| flatten(&value, &ctx.flatten)) {
                Ok(flat) => {
                    self.metrics.on_row_parsed();
                    if acc.add_keys(&flat) > 0 {
                        self.metrics.set_cols_discovered(acc.len());
                    }
                    if sample.is_none() {
                        sample = Some(flat.clone());
                    }
                    if single_pass {
                        buffered.push(flat);
                    }
                }
                // Records dropped here are counted by the conversion pass.
                Err(err) if err.is_recoverable() && !single_pass => {
                    tracing::debug!(%err, "discovery skipped a record");
                }
                Err(err) => {
                    if let Err(err) = self.record_error(ctx, err, sink) {
                        break Err(err);
                    }
                }
            }
            if pulse.due() {
                self.progress(Phase::Discovery, sink);
            }
        };

        let stopped = match stopped {
            Err(err) if !matches!(err, ConversionError::Cancelled) => return Err(err),
            other => other,
        };

        let columns = acc.finalize(ctx.options.key_order);
        self.metrics.set_cols_discovered(columns.len());
        self.progress(Phase::Discovery, sink);
        ctx.log.push(
            Severity::Info,
            format!("schema: {} columns from {seen} records", columns.len()),
            sink,
        );
        let schema = SchemaPayload {
            columns,
            sample: sample.unwrap_or_default(),
        };
        sink.on_event(ConversionEvent::Schema(schema.clone()));
        stopped?;

        let carry = single_pass.then_some(Carry { reader, buffered });
        Ok((schema, carry))
    }

    /// Conversion pass. On failure or cancellation the open part is still sealed, so every
    /// reported part matches its content.
    fn convert(
        &self,
        ctx: &mut RunContext,
        columns: &ColumnList,
        carry: Option<Carry>,
        sink: &dyn EventSink,
    ) -> ConversionResult<Vec<OutputPart>> {
        let mut writer = PartWriter::new(&ctx.options, columns.clone())?;
        if let Err(err) = self.write_rows(ctx, &mut writer, carry, sink) {
            writer.seal(sink);
            return Err(err);
        }
        writer.finish(sink)?;
        if ctx.options.general.persist_schema {
            writer.write_schema(ctx.options.key_order, sink)?;
        }
        Ok(writer.outputs().to_vec())
    }

    fn write_rows(
        &self,
        ctx: &mut RunContext,
        writer: &mut PartWriter,
        carry: Option<Carry>,
        sink: &dyn EventSink,
    ) -> ConversionResult<()> {
        let mut pulse = Pulse::new(ctx.options.performance.progress_interval_ms);
        let mut reader = match carry {
            Some(Carry { reader, buffered }) => {
                for flat in &buffered {
                    self.control.checkpoint()?;
                    writer.write_row(flat, sink)?;
                    self.metrics.on_row_written();
                    if pulse.due() {
                        self.progress(Phase::Conversion, sink);
                    }
                }
                reader
            }
            None => {
                self.metrics.begin_pass();
                open_records(ctx.source.as_ref(), ctx.format, &ctx.reader_opts)?
            }
        };

        loop {
            self.control.checkpoint()?;
            let Some(item) = reader.next() else {
                break;
            };
            self.metrics.set_bytes_read(reader.bytes_read());

            match item.and_then(|value| flatten(&value, &ctx.flatten)) {
                Ok(flat) => {
                    self.metrics.on_row_parsed();
                    writer.write_row(&flat, sink)?;
                    self.metrics.on_row_written();
                }
                Err(err) => self.record_error(ctx, err, sink)?,
            }
            if pulse.due() {
                self.progress(Phase::Conversion, sink);
            }
        }
        self.progress(Phase::Conversion, sink);
        Ok(())
    }

    /// Count and log a per-record failure. Fatal errors, and every error under `stop_on_error`,
    /// are handed back to end the run.
    fn record_error(
        &self,
        ctx: &mut RunContext,
        err: ConversionError,
        sink: &dyn EventSink,
    ) -> ConversionResult<()> {
        if !err.is_recoverable() {
            return Err(err);
        }
        self.metrics.on_error();
        if ctx.options.general.stop_on_error {
            return Err(err);
        }
        ctx.log.push(Severity::Warning, format!("skipped record: {err}"), sink);
        Ok(())
    }

    fn progress(&self, phase: Phase, sink: &dyn EventSink) {
        sink.on_event(ConversionEvent::Progress(self.metrics.snapshot(phase)));
    }

    fn terminate(&self, log: &mut RunLog, err: ConversionError, sink: &dyn EventSink) -> RunOutcome {
        if let ConversionError::Cancelled = err {
            if self.control.settle(Phase::Cancelled) {
                sink.on_event(ConversionEvent::Phase(Phase::Cancelled));
            }
            log.push(Severity::Info, "conversion cancelled", sink);
            return RunOutcome::Cancelled;
        }

        log.push(
            err.severity().max(Severity::Error),
            format!("conversion failed: {err}"),
            sink,
        );
        if self.control.settle(Phase::Failed) {
            sink.on_event(ConversionEvent::Phase(Phase::Failed));
        }
        sink.on_event(ConversionEvent::Failed {
            error: err.to_string(),
        });
        RunOutcome::Failed(err)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{ConversionEngine, ConversionEvent, Phase, RunOutcome};
    use crate::ingestion::{BytesSource, ReaderSource};
    use crate::options::{ConversionOptions, SchemaMode};
    use crate::output::CollectingSink;

    fn source(text: &str) -> Arc<BytesSource> {
        Arc::new(BytesSource::new("mem", text.as_bytes().to_vec()))
    }

    fn phases(sink: &CollectingSink) -> Vec<Phase> {
        sink.events()
            .into_iter()
            .filter_map(|e| match e {
                ConversionEvent::Phase(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn two_pass_run_reports_phases_in_order() {
        let engine = ConversionEngine::new();
        let sink = CollectingSink::new();
        let summary = engine
            .run_to_completion(source("{\"a\":1}\n{\"b\":2}\n"), ConversionOptions::default(), &sink)
            .unwrap();

        assert_eq!(phases(&sink), vec![Phase::Discovery, Phase::Conversion, Phase::Completed]);
        assert_eq!(summary.stats.rows_parsed, 2);
        assert_eq!(summary.stats.cols_discovered, 2);
        assert_eq!(summary.outputs.len(), 1);
        assert_eq!(engine.control().phase(), Phase::Completed);
    }

    #[test]
    fn malformed_records_are_counted_once_and_skipped() {
        let sink = CollectingSink::new();
        let summary = ConversionEngine::new()
            .run_to_completion(source("{\"a\":1}\n{oops\n{\"a\":2}\n"), ConversionOptions::default(), &sink)
            .unwrap();
        assert_eq!(summary.stats.errors, 1);
        assert_eq!(summary.stats.rows_written, 2);
        assert_eq!(sink.part_bytes()[&0], b"a\n1\n2\n");
    }

    #[test]
    fn stop_on_error_fails_the_run() {
        let mut opts = ConversionOptions::default();
        opts.general.stop_on_error = true;
        let sink = CollectingSink::new();
        let engine = ConversionEngine::new();
        let outcome = engine.start(source("{\"a\":1}\n{oops\n"), opts, &sink);

        assert!(matches!(outcome, RunOutcome::Failed(_)));
        assert_eq!(engine.control().phase(), Phase::Failed);
        assert!(matches!(sink.events().last(), Some(ConversionEvent::Failed { .. })));
        // The row written before the failure stays in a sealed part.
        assert!(sink.events().iter().any(|e| matches!(e, ConversionEvent::PartDone(p) if p.rows == 1)));
    }

    #[test]
    fn awaiting_schema_parks_the_run_until_continued() {
        let mut opts = ConversionOptions::default();
        opts.general.auto_continue = false;
        let engine = ConversionEngine::new();
        let sink = CollectingSink::new();

        let RunOutcome::AwaitingSchema(pending) = engine.start(source("{\"x\":true}\n"), opts, &sink)
        else {
            panic!("expected the run to wait for a continue");
        };
        assert_eq!(pending.schema().columns.to_vec(), vec!["x".to_string()]);
        assert_eq!(engine.control().phase(), Phase::AwaitingSchema);
        assert!(sink.part_bytes().is_empty());

        assert!(matches!(engine.continue_run(pending, &sink), RunOutcome::Completed(_)));
        assert_eq!(sink.part_bytes()[&0], b"x\ntrue\n");
    }

    #[test]
    fn single_pass_reads_a_single_use_stream_once() {
        let mut opts = ConversionOptions::default();
        opts.schema_mode = SchemaMode::SinglePass;
        opts.performance.discovery_sample_rows = 1;
        let stream = ReaderSource::new("stdin", std::io::Cursor::new(b"{\"a\":1}\n{\"a\":2,\"late\":3}\n".to_vec()));
        let sink = CollectingSink::new();
        let summary = ConversionEngine::new()
            .run_to_completion(Arc::new(stream), opts, &sink)
            .unwrap();

        // Keys first seen after the sample are not part of the schema.
        assert_eq!(summary.schema.columns.to_vec(), vec!["a".to_string()]);
        assert_eq!(summary.stats.rows_written, 2);
        assert_eq!(sink.part_bytes()[&0], b"a\n1\n2\n");
    }

    #[test]
    fn two_pass_over_a_single_use_stream_fails() {
        let stream = ReaderSource::new("stdin", std::io::Cursor::new(b"{\"a\":1}\n".to_vec()));
        let err = ConversionEngine::new()
            .run_to_completion(Arc::new(stream), ConversionOptions::default(), &CollectingSink::new())
            .unwrap_err();
        assert!(err.to_string().contains("cannot be re-read"));
    }

    #[test]
    fn invalid_options_fail_before_discovery() {
        let mut opts = ConversionOptions::default();
        opts.output.split_every = Some(0);
        let sink = CollectingSink::new();
        let outcome = ConversionEngine::new().start(source("{}"), opts, &sink);
        assert!(matches!(outcome, RunOutcome::Failed(_)));
        assert!(!sink.events().iter().any(|e| matches!(e, ConversionEvent::Schema(_))));
    }
}
