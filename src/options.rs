//! Conversion options.
//!
//! [`ConversionOptions`] is the immutable configuration snapshot a run captures at start. Every
//! group implements [`Default`] and is `#[serde(default)]`, so a partial JSON document is a valid
//! configuration:
//!
//! ```rust
//! use doc_tabulate::options::{ConversionOptions, KeyOrder};
//!
//! let opts = ConversionOptions::from_json_str(r#"{ "key_order": "first-seen", "csv": { "delimiter": ";" } }"#)
//!     .unwrap();
//! assert_eq!(opts.key_order, KeyOrder::FirstSeen);
//! assert_eq!(opts.csv.delimiter, ';');
//! assert_eq!(opts.flatten.max_array_length, 50);
//! ```

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConversionError, ConversionResult};

/// Input format selection. `Auto` lets the sniffer decide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InputFormat {
    #[default]
    Auto,
    Bson,
    Ndjson,
    JsonArray,
    ShellText,
}

/// How arrays are flattened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlattenStrategy {
    /// One column per element: `path[0]`, `path[1]`, ...
    #[default]
    Index,
    /// Scalar arrays become one delimiter-joined value; structured arrays fall back to `Index`.
    Join,
    /// Accepted for compatibility; flattens exactly like `Index`.
    Explode,
}

/// Schema discovery mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchemaMode {
    /// Full discovery pass followed by a full conversion pass.
    #[default]
    TwoPass,
    /// Schema from the first `discovery_sample_rows` records only; best-effort.
    SinglePass,
}

/// Column ordering applied when the schema is finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyOrder {
    #[default]
    Alpha,
    FirstSeen,
    /// Currently identical to `FirstSeen`.
    Custom,
}

impl fmt::Display for KeyOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KeyOrder::Alpha => "alpha",
            KeyOrder::FirstSeen => "first-seen",
            KeyOrder::Custom => "custom",
        };
        f.write_str(s)
    }
}

/// Rendering of `null` / absent leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NullPolicy {
    /// Empty string.
    #[default]
    Empty,
    /// The words `null` / `undefined`.
    LiteralNull,
}

/// Output line terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Newline {
    #[default]
    Lf,
    Crlf,
}

impl Newline {
    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            Newline::Lf => b"\n",
            Newline::Crlf => b"\r\n",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlattenOptions {
    pub strategy: FlattenStrategy,
    /// Separator used by [`FlattenStrategy::Join`].
    pub join_delimiter: String,
    /// Maximum number of array elements kept per array; `0` means unlimited.
    pub max_array_length: usize,
}

impl Default for FlattenOptions {
    fn default() -> Self {
        Self {
            strategy: FlattenStrategy::Index,
            join_delimiter: ";".to_string(),
            max_array_length: 50,
        }
    }
}

/// Delimiter dialect, fixed for the whole run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvDialect {
    /// Field delimiter; must be a single ASCII character.
    pub delimiter: char,
    /// Quote character; must be a single ASCII character.
    pub quote: char,
    pub newline: Newline,
    pub include_header: bool,
    /// Prefix the header of every part with a UTF-8 byte-order mark.
    pub include_bom: bool,
}

impl Default for CsvDialect {
    fn default() -> Self {
        Self {
            delimiter: ',',
            quote: '"',
            newline: Newline::Lf,
            include_header: true,
            include_bom: false,
        }
    }
}

impl CsvDialect {
    /// File extension matching the delimiter.
    pub fn extension(&self) -> &'static str {
        match self.delimiter {
            ',' => "csv",
            '\t' => "tsv",
            _ => "txt",
        }
    }

    /// MIME type matching the delimiter.
    pub fn mime_type(&self) -> &'static str {
        match self.delimiter {
            ',' => "text/csv",
            '\t' => "text/tab-separated-values",
            _ => "text/plain",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NumericOptions {
    /// Render 64-bit integers exactly; when off they go through a lossy `f64`.
    pub stringify_integers: bool,
    /// Emit `NaN` / `Infinity` / `-Infinity`; when off non-finite floats render empty.
    pub stringify_floats: bool,
}

impl Default for NumericOptions {
    fn default() -> Self {
        Self {
            stringify_integers: true,
            stringify_floats: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputOptions {
    /// Seal a part every `n` rows. `None` writes a single part.
    pub split_every: Option<usize>,
    /// Base name of output parts.
    pub file_stem: String,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            split_every: None,
            file_stem: "output".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceOptions {
    /// Size of each read from the input.
    pub read_chunk_bytes: usize,
    /// Upper bound for one record's encoded size; larger records are skipped.
    pub max_record_bytes: usize,
    /// Records sampled for the schema in single-pass mode.
    pub discovery_sample_rows: usize,
    /// Output chunk size handed to the host.
    pub flush_threshold_bytes: usize,
    /// Minimum interval between progress snapshots.
    pub progress_interval_ms: u64,
}

impl Default for PerformanceOptions {
    fn default() -> Self {
        Self {
            read_chunk_bytes: 1024 * 1024,
            max_record_bytes: 64 * 1024 * 1024,
            discovery_sample_rows: 10_000,
            flush_threshold_bytes: 1024 * 1024,
            progress_interval_ms: 250,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralOptions {
    /// Promote per-record failures to a fatal run failure.
    pub stop_on_error: bool,
    /// Emit a `schema.json` part after the data parts.
    pub persist_schema: bool,
    /// Start conversion right after discovery; otherwise wait for `CONTINUE`.
    pub auto_continue: bool,
}

impl Default for GeneralOptions {
    fn default() -> Self {
        Self {
            stop_on_error: false,
            persist_schema: false,
            auto_continue: true,
        }
    }
}

/// Options controlling one conversion run.
///
/// Use [`Default`] for common cases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionOptions {
    /// Forced input format; `Auto` sniffs the input.
    pub format: InputFormat,
    /// Recognize extended JSON wrappers (`{"$oid": ...}`, `{"$date": ...}`, ...) in text input.
    pub extended_json: bool,
    pub flatten: FlattenOptions,
    pub schema_mode: SchemaMode,
    pub key_order: KeyOrder,
    pub null_policy: NullPolicy,
    pub csv: CsvDialect,
    pub numerics: NumericOptions,
    pub output: OutputOptions,
    pub performance: PerformanceOptions,
    pub general: GeneralOptions,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            format: InputFormat::Auto,
            extended_json: true,
            flatten: FlattenOptions::default(),
            schema_mode: SchemaMode::TwoPass,
            key_order: KeyOrder::Alpha,
            null_policy: NullPolicy::Empty,
            csv: CsvDialect::default(),
            numerics: NumericOptions::default(),
            output: OutputOptions::default(),
            performance: PerformanceOptions::default(),
            general: GeneralOptions::default(),
        }
    }
}

impl ConversionOptions {
    /// Parse options from a (possibly partial) JSON document and validate them.
    pub fn from_json_str(json: &str) -> ConversionResult<Self> {
        let opts: Self = serde_json::from_str(json)?;
        opts.validate()?;
        Ok(opts)
    }

    /// Read options from a JSON file and validate them.
    pub fn from_json_path(path: impl AsRef<Path>) -> ConversionResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Reject combinations the pipeline cannot honor.
    pub fn validate(&self) -> ConversionResult<()> {
        let csv = &self.csv;
        if !csv.delimiter.is_ascii() || !csv.quote.is_ascii() {
            return Err(ConversionError::invalid_options(
                "delimiter and quote must be single ASCII characters",
            ));
        }
        if csv.delimiter == csv.quote {
            return Err(ConversionError::invalid_options(
                "delimiter and quote must differ",
            ));
        }
        if matches!(csv.delimiter, '\r' | '\n') || matches!(csv.quote, '\r' | '\n') {
            return Err(ConversionError::invalid_options(
                "delimiter and quote cannot be line terminators",
            ));
        }
        if self.output.split_every == Some(0) {
            return Err(ConversionError::invalid_options(
                "split_every must be > 0 when set",
            ));
        }
        if self.output.file_stem.is_empty() {
            return Err(ConversionError::invalid_options("file_stem must not be empty"));
        }
        let perf = &self.performance;
        if perf.read_chunk_bytes == 0 || perf.flush_threshold_bytes == 0 || perf.max_record_bytes == 0
        {
            return Err(ConversionError::invalid_options(
                "read_chunk_bytes, flush_threshold_bytes and max_record_bytes must be > 0",
            ));
        }
        if self.schema_mode == SchemaMode::SinglePass && perf.discovery_sample_rows == 0 {
            return Err(ConversionError::invalid_options(
                "single-pass mode needs discovery_sample_rows > 0",
            ));
        }
        Ok(())
    }
}
