//! `doc-tabulate` command-line host.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use serde::de::DeserializeOwned;
use tracing::error;

use doc_tabulate::batch::{convert_files, expand_inputs};
use doc_tabulate::error::{ConversionError, ConversionResult};
use doc_tabulate::logging::{LogConfig, LogFormat, init_logging};
use doc_tabulate::options::{
    ConversionOptions, FlattenStrategy, InputFormat, KeyOrder, Newline, NullPolicy, SchemaMode,
};

/// Convert BSON, NDJSON, JSON-array and shell-dump documents into CSV/TSV tables.
#[derive(Parser, Debug)]
#[command(name = "doc-tabulate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input files, directories or glob patterns
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Output directory; each input gets its own subdirectory
    #[arg(short, long, default_value = "out")]
    out_dir: PathBuf,

    /// JSON options file; the flags below override it
    #[arg(short, long, env = "DOC_TABULATE_CONFIG")]
    config: Option<PathBuf>,

    /// auto, bson, ndjson, json-array or shell-text
    #[arg(long, value_parser = parse_kebab::<InputFormat>)]
    format: Option<InputFormat>,

    /// two-pass or single-pass
    #[arg(long, value_parser = parse_kebab::<SchemaMode>)]
    schema_mode: Option<SchemaMode>,

    /// alpha, first-seen or custom
    #[arg(long, value_parser = parse_kebab::<KeyOrder>)]
    key_order: Option<KeyOrder>,

    /// Array strategy: index, join or explode
    #[arg(long, value_parser = parse_kebab::<FlattenStrategy>)]
    flatten: Option<FlattenStrategy>,

    /// Elements kept per array (0 = unlimited)
    #[arg(long)]
    max_array_length: Option<usize>,

    /// Field delimiter; `tab` or `\t` for tab-separated output
    #[arg(short, long, value_parser = parse_delimiter)]
    delimiter: Option<char>,

    /// Terminate lines with CRLF
    #[arg(long)]
    crlf: bool,

    /// Prefix every part with a UTF-8 byte-order mark
    #[arg(long)]
    bom: bool,

    /// Omit the header line
    #[arg(long)]
    no_header: bool,

    /// Render null/undefined as the words `null`/`undefined`
    #[arg(long)]
    literal_null: bool,

    /// Seal a new part every N rows
    #[arg(long)]
    split_every: Option<usize>,

    /// Also write schema.json next to the parts
    #[arg(long)]
    persist_schema: bool,

    /// Fail a file on its first bad record instead of skipping it
    #[arg(long)]
    stop_on_error: bool,

    /// Files converted in parallel (defaults to the number of CPUs)
    #[arg(short = 'j', long)]
    threads: Option<usize>,

    /// Log level or filter directives
    #[arg(long, env = "DOC_TABULATE_LOG")]
    log_level: Option<String>,

    /// Log as JSON lines
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    fn options(&self) -> ConversionResult<ConversionOptions> {
        let mut opts = match &self.config {
            Some(path) => ConversionOptions::from_json_path(path)?,
            None => ConversionOptions::default(),
        };
        if let Some(format) = self.format {
            opts.format = format;
        }
        if let Some(mode) = self.schema_mode {
            opts.schema_mode = mode;
        }
        if let Some(order) = self.key_order {
            opts.key_order = order;
        }
        if let Some(strategy) = self.flatten {
            opts.flatten.strategy = strategy;
        }
        if let Some(n) = self.max_array_length {
            opts.flatten.max_array_length = n;
        }
        if let Some(delimiter) = self.delimiter {
            opts.csv.delimiter = delimiter;
        }
        if self.crlf {
            opts.csv.newline = Newline::Crlf;
        }
        if self.bom {
            opts.csv.include_bom = true;
        }
        if self.no_header {
            opts.csv.include_header = false;
        }
        if self.literal_null {
            opts.null_policy = NullPolicy::LiteralNull;
        }
        if self.split_every.is_some() {
            opts.output.split_every = self.split_every;
        }
        if self.persist_schema {
            opts.general.persist_schema = true;
        }
        if self.stop_on_error {
            opts.general.stop_on_error = true;
        }
        // No host to send CONTINUE; a batch run always converts straight through.
        opts.general.auto_continue = true;
        opts.validate()?;
        Ok(opts)
    }
}

/// Parse a kebab-case option value through its serde representation.
fn parse_kebab<T: DeserializeOwned>(s: &str) -> Result<T, String> {
    serde_json::from_value(serde_json::Value::String(s.to_string())).map_err(|e| e.to_string())
}

fn parse_delimiter(s: &str) -> Result<char, String> {
    match s {
        "tab" | "\\t" | "\t" => Ok('\t'),
        _ => {
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(c),
                _ => Err(format!("delimiter must be a single character, got '{s}'")),
            }
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env().unwrap_or_default();
    if let Some(level) = &cli.log_level {
        log_config.level = level.clone();
    }
    if cli.log_json {
        log_config.format = LogFormat::Json;
    }
    if let Err(err) = init_logging(&log_config) {
        eprintln!("warning: {err}");
    }

    match run(&cli) {
        Ok(code) => code,
        Err(err) => {
            error!(error = %err, "command failed");
            eprintln!("error: {err}");
            ExitCode::from(2)
        }
    }
}

fn run(cli: &Cli) -> ConversionResult<ExitCode> {
    let options = cli.options()?;
    let inputs = expand_inputs(&cli.inputs)?;
    if inputs.is_empty() {
        return Err(ConversionError::InvalidOptions {
            message: "no input files matched".to_string(),
        });
    }

    let reports = convert_files(&inputs, &options, &cli.out_dir, cli.threads)?;
    let mut failed = 0usize;
    for report in &reports {
        match &report.outcome {
            Ok(done) => {
                let stats = &done.summary.stats;
                println!(
                    "{} -> {} ({} rows, {} columns, {} parts, {} skipped)",
                    report.input.display(),
                    report.output_dir.display(),
                    stats.rows_written,
                    stats.cols_discovered,
                    done.written.len(),
                    stats.errors
                );
            }
            Err(err) => {
                failed += 1;
                eprintln!("{}: {err}", report.input.display());
            }
        }
    }

    if failed == 0 {
        Ok(ExitCode::SUCCESS)
    } else {
        error!(failed, total = reports.len(), "some inputs failed");
        Ok(ExitCode::FAILURE)
    }
}
