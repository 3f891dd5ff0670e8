//! `tracing` subscriber setup for the `doc-tabulate` binary.
//!
//! The library itself only emits through the `tracing` macros; installing a subscriber is up to
//! the host. Configuration comes from flags or the environment:
//!
//! - `DOC_TABULATE_LOG`: level (`trace`, `debug`, `info`, `warn`, `error`) or a full
//!   `EnvFilter` directive list such as `doc_tabulate=debug,warn`
//! - `DOC_TABULATE_LOG_FORMAT`: `text` (default) or `json`
//!
//! ```no_run
//! use doc_tabulate::logging::{LogConfig, init_logging};
//!
//! let config = LogConfig::from_env().unwrap_or_default();
//! init_logging(&config).unwrap();
//! tracing::info!("ready");
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::error::{ConversionError, ConversionResult};

pub const LOG_ENV: &str = "DOC_TABULATE_LOG";
pub const LOG_FORMAT_ENV: &str = "DOC_TABULATE_LOG_FORMAT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(ConversionError::invalid_options(format!(
                "invalid log format '{other}'"
            ))),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// `EnvFilter` directives; a bare level applies to everything.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl LogConfig {
    /// Defaults overridden by `DOC_TABULATE_LOG` and `DOC_TABULATE_LOG_FORMAT`.
    pub fn from_env() -> ConversionResult<Self> {
        let mut config = Self::default();
        match std::env::var(LOG_ENV) {
            Ok(level) if !level.trim().is_empty() => config.level = level,
            _ => {}
        }
        if let Ok(format) = std::env::var(LOG_FORMAT_ENV) {
            config.format = format.parse()?;
        }
        Ok(config)
    }

    fn filter(&self) -> ConversionResult<EnvFilter> {
        EnvFilter::try_new(self.level.trim()).map_err(|err| {
            ConversionError::invalid_options(format!("invalid log filter '{}': {err}", self.level))
        })
    }
}

/// Install the global subscriber, writing to stderr. Calling it twice is an error.
pub fn init_logging(config: &LogConfig) -> ConversionResult<()> {
    let filter = config.filter()?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    let installed = match config.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|err| ConversionError::internal(format!("failed to install logger: {err}")))
}
