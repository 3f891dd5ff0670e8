use thiserror::Error;

use crate::execution::Phase;

/// Convenience result type for conversion operations.
pub type ConversionResult<T> = Result<T, ConversionError>;

/// Severity classification used for log entries, observer callbacks and alerting thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational event.
    Info,
    /// Warning-level event (non-fatal, the run continues).
    Warning,
    /// Error-level event (the run failed).
    Error,
    /// Critical error (typically I/O or other infrastructure failures).
    Critical,
}

/// Error type returned by every stage of the conversion pipeline.
///
/// This is a single error enum shared across the record iterators, the flattening engine, the
/// row encoder and the orchestrator.
#[derive(Debug, Error)]
pub enum ConversionError {
    /// Underlying I/O error (e.g. file not found, permission denied, read failure mid-stream).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Row encoding error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON (de)serialization error outside of record decoding (options, schema file).
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A single record could not be decoded. Recoverable: the iterator skips it.
    #[error("malformed record at byte {position}: {message}")]
    MalformedRecord { position: u64, message: String },

    /// A value inside a decoded record could not be rendered (e.g. an out-of-range date).
    #[error("invalid value at '{path}': {message}")]
    InvalidValue { path: String, message: String },

    /// The supplied [`crate::options::ConversionOptions`] are inconsistent.
    #[error("invalid options: {message}")]
    InvalidOptions { message: String },

    /// A control request asked for a phase change the state machine does not allow.
    #[error("invalid phase transition from {from} to {to}")]
    InvalidTransition { from: Phase, to: Phase },

    /// A single-use input was opened a second time.
    #[error("input source '{name}' cannot be re-read")]
    SourceExhausted { name: String },

    /// The run was cancelled by the host.
    #[error("conversion cancelled")]
    Cancelled,

    /// An internal invariant was violated.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl ConversionError {
    /// Severity used when the error is logged or reported to observers.
    pub fn severity(&self) -> Severity {
        match self {
            ConversionError::Io(_) | ConversionError::SourceExhausted { .. } => Severity::Critical,
            ConversionError::Csv(err) => match err.kind() {
                ::csv::ErrorKind::Io(_) => Severity::Critical,
                _ => Severity::Error,
            },
            ConversionError::MalformedRecord { .. } | ConversionError::InvalidValue { .. } => {
                Severity::Warning
            }
            ConversionError::Cancelled => Severity::Info,
            ConversionError::Json(_)
            | ConversionError::InvalidOptions { .. }
            | ConversionError::InvalidTransition { .. }
            | ConversionError::Internal { .. } => Severity::Error,
        }
    }

    /// Per-record problems that are logged and skipped unless `stop_on_error` is set.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ConversionError::MalformedRecord { .. } | ConversionError::InvalidValue { .. }
        )
    }

    pub(crate) fn malformed(position: u64, message: impl Into<String>) -> Self {
        ConversionError::MalformedRecord {
            position,
            message: message.into(),
        }
    }

    pub(crate) fn invalid_options(message: impl Into<String>) -> Self {
        ConversionError::InvalidOptions {
            message: message.into(),
        }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        ConversionError::Internal {
            message: message.into(),
        }
    }
}
