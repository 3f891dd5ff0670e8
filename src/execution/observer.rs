use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::Severity;
use crate::types::SchemaPayload;

use super::control::Phase;

/// Events a run reports to its host, in order.
///
/// Chunk buffers are moved into the event: the pipeline keeps no reference to a chunk once it
/// has been handed off.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversionEvent {
    /// Phase change (or acknowledgement of a pause/resume/cancel request).
    Phase(Phase),
    Progress(ProgressSnapshot),
    /// Finalized column list, sent once at the end of discovery.
    Schema(SchemaPayload),
    Log(LogEntry),
    /// One chunk of an output part.
    PartReady {
        part_index: usize,
        chunk_index: usize,
        buffer: Vec<u8>,
        mime_type: &'static str,
    },
    /// An output part was sealed.
    PartDone(OutputPart),
    /// The run completed.
    Done(Box<RunSummary>),
    /// The run failed; already sealed parts stay valid.
    Failed { error: String },
    /// Answer to a warmup probe.
    Ready,
}

/// Receives the events of a run.
///
/// Implementations must be cheap: they run inline on the pipeline thread.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: ConversionEvent);
}

impl<S: EventSink + ?Sized> EventSink for std::sync::Arc<S> {
    fn on_event(&self, event: ConversionEvent) {
        (**self).on_event(event)
    }
}

/// A sealed output part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputPart {
    pub part_index: usize,
    pub filename: String,
    pub rows: u64,
    pub size_bytes: u64,
    pub mime_type: &'static str,
}

/// One structured log line kept for the `Done` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub level: Severity,
    pub message: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// Final counters of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionStats {
    pub bytes_read: u64,
    pub rows_parsed: u64,
    pub rows_written: u64,
    pub cols_discovered: u64,
    pub elapsed_ms: u64,
    pub errors: u64,
}

/// Progress pushed to the host at a bounded cadence.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub phase: Phase,
    pub bytes_read: u64,
    pub total_bytes: Option<u64>,
    pub rows_parsed: u64,
    pub rows_written: u64,
    pub cols_discovered: u64,
    pub elapsed_ms: u64,
    pub errors: u64,
    pub rate_rows_per_sec: f64,
    #[serde(rename = "rateMBPerSec")]
    pub rate_mb_per_sec: f64,
    pub eta_seconds: Option<f64>,
}

impl fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "phase={}, rows={}/{}, cols={}, errors={}, bytes={}, rate={:.0} rows/s",
            self.phase,
            self.rows_written,
            self.rows_parsed,
            self.cols_discovered,
            self.errors,
            self.bytes_read,
            self.rate_rows_per_sec
        )
    }
}

/// Everything reported in `Done`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub stats: ConversionStats,
    pub schema: SchemaPayload,
    pub outputs: Vec<OutputPart>,
    pub log: Vec<LogEntry>,
}

/// Real-time counters of a run.
///
/// The pipeline updates them per record; any thread may snapshot them.
#[derive(Debug, Default)]
pub struct ConversionMetrics {
    clock: Mutex<RunClock>,
    bytes_read: AtomicU64,
    rows_parsed: AtomicU64,
    rows_written: AtomicU64,
    cols_discovered: AtomicU64,
    errors: AtomicU64,
}

#[derive(Debug, Default, Clone, Copy)]
struct RunClock {
    started_at: Option<Instant>,
    pass_started_at: Option<Instant>,
    total_bytes: Option<u64>,
}

impl ConversionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn clock(&self) -> RunClock {
        *self.clock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reset everything for a new run over an input of `total_bytes` (if known).
    pub fn begin_run(&self, total_bytes: Option<u64>) {
        let now = Instant::now();
        *self.clock.lock().unwrap_or_else(PoisonError::into_inner) = RunClock {
            started_at: Some(now),
            pass_started_at: Some(now),
            total_bytes,
        };
        self.cols_discovered.store(0, Ordering::SeqCst);
        self.reset_pass_counters();
    }

    /// Start a new linear pass: per-pass counters restart, the discovered column count is kept.
    pub fn begin_pass(&self) {
        self.clock.lock().unwrap_or_else(PoisonError::into_inner).pass_started_at =
            Some(Instant::now());
        self.reset_pass_counters();
    }

    fn reset_pass_counters(&self) {
        self.bytes_read.store(0, Ordering::SeqCst);
        self.rows_parsed.store(0, Ordering::SeqCst);
        self.rows_written.store(0, Ordering::SeqCst);
        self.errors.store(0, Ordering::SeqCst);
    }

    pub fn set_bytes_read(&self, n: u64) {
        self.bytes_read.store(n, Ordering::SeqCst);
    }

    pub fn on_row_parsed(&self) {
        let _ = self.rows_parsed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn on_row_written(&self) {
        let _ = self.rows_written.fetch_add(1, Ordering::SeqCst);
    }

    pub fn on_error(&self) {
        let _ = self.errors.fetch_add(1, Ordering::SeqCst);
    }

    pub fn set_cols_discovered(&self, n: usize) {
        self.cols_discovered.store(n as u64, Ordering::SeqCst);
    }

    pub fn stats(&self) -> ConversionStats {
        let clock = self.clock();
        ConversionStats {
            bytes_read: self.bytes_read.load(Ordering::SeqCst),
            rows_parsed: self.rows_parsed.load(Ordering::SeqCst),
            rows_written: self.rows_written.load(Ordering::SeqCst),
            cols_discovered: self.cols_discovered.load(Ordering::SeqCst),
            elapsed_ms: millis(clock.started_at.map(|t| t.elapsed())),
            errors: self.errors.load(Ordering::SeqCst),
        }
    }

    /// Progress with rates derived from the current pass.
    pub fn snapshot(&self, phase: Phase) -> ProgressSnapshot {
        let clock = self.clock();
        let stats = self.stats();
        let pass_secs = clock
            .pass_started_at
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or_default();

        let (rate_rows, rate_bytes) = if pass_secs > 0.0 {
            (
                stats.rows_parsed as f64 / pass_secs,
                stats.bytes_read as f64 / pass_secs,
            )
        } else {
            (0.0, 0.0)
        };
        let eta_seconds = clock.total_bytes.and_then(|total| {
            (rate_bytes > 0.0).then(|| total.saturating_sub(stats.bytes_read) as f64 / rate_bytes)
        });

        ProgressSnapshot {
            phase,
            bytes_read: stats.bytes_read,
            total_bytes: clock.total_bytes,
            rows_parsed: stats.rows_parsed,
            rows_written: stats.rows_written,
            cols_discovered: stats.cols_discovered,
            elapsed_ms: stats.elapsed_ms,
            errors: stats.errors,
            rate_rows_per_sec: rate_rows,
            rate_mb_per_sec: rate_bytes / (1024.0 * 1024.0),
            eta_seconds,
        }
    }
}

fn millis(d: Option<Duration>) -> u64 {
    d.map(|d| d.as_millis().min(u64::MAX as u128) as u64)
        .unwrap_or_default()
}

/// Bounded per-run log: the newest `capacity` entries are kept for the `Done` payload.
///
/// Every entry is also streamed as a [`ConversionEvent::Log`] and mirrored to `tracing`.
#[derive(Debug)]
pub struct RunLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

/// Entries kept per run.
pub const LOG_CAPACITY: usize = 500;

impl Default for RunLog {
    fn default() -> Self {
        Self::with_capacity(LOG_CAPACITY)
    }
}

impl RunLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
        }
    }

    pub fn push(&mut self, level: Severity, message: impl Into<String>, sink: &dyn EventSink) {
        let message = message.into();
        match level {
            Severity::Info => tracing::info!("{message}"),
            Severity::Warning => tracing::warn!("{message}"),
            Severity::Error | Severity::Critical => tracing::error!(severity = ?level, "{message}"),
        }

        let entry = LogEntry {
            level,
            message,
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        if self.capacity > 0 {
            if self.entries.len() == self.capacity {
                self.entries.pop_front();
            }
            self.entries.push_back(entry.clone());
        }
        sink.on_event(ConversionEvent::Log(entry));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_vec(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }
}
