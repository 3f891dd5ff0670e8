//! Multi-file conversion.
//!
//! Inputs are expanded from file paths, directories and glob patterns, then converted one file
//! per task on a `rayon` pool. Records inside a file are never processed in parallel; each file is
//! an ordinary sequential run with its own engine.
//!
//! ```no_run
//! use doc_tabulate::batch::{convert_files, expand_inputs};
//! use doc_tabulate::options::ConversionOptions;
//!
//! let inputs = expand_inputs(&["dumps/*.bson", "exports/"]).unwrap();
//! for report in convert_files(&inputs, &ConversionOptions::default(), "out", Some(4)).unwrap() {
//!     match &report.outcome {
//!         Ok(done) => println!("{}: {} rows", report.input.display(), done.summary.stats.rows_written),
//!         Err(err) => eprintln!("{}: {err}", report.input.display()),
//!     }
//! }
//! ```

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use walkdir::WalkDir;

use crate::error::{ConversionError, ConversionResult};
use crate::execution::{ConversionEngine, EventSink, RunSummary};
use crate::ingestion::FileSource;
use crate::options::ConversionOptions;
use crate::output::{CompositeSink, DirectorySink, TracingSink};

/// File extensions picked up when a directory is given as input.
pub const INPUT_EXTENSIONS: &[&str] = &["bson", "json", "ndjson", "jsonl", "txt", "js"];

/// A converted file.
#[derive(Debug)]
pub struct ConvertedFile {
    pub summary: RunSummary,
    /// Files written into the output directory, in part order.
    pub written: Vec<PathBuf>,
}

/// Result of converting one input.
#[derive(Debug)]
pub struct FileReport {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub outcome: ConversionResult<ConvertedFile>,
}

/// Resolve paths, directories and glob patterns into a sorted, de-duplicated list of files.
///
/// A pattern that matches nothing contributes nothing; an invalid pattern is an error.
pub fn expand_inputs<S: AsRef<str>>(patterns: &[S]) -> ConversionResult<Vec<PathBuf>> {
    let mut files = BTreeSet::new();
    for pattern in patterns {
        let pattern = pattern.as_ref();
        let path = Path::new(pattern);
        if path.is_file() {
            files.insert(path.to_path_buf());
        } else if path.is_dir() {
            files.extend(walk_dir(path)?);
        } else {
            let matches = glob::glob(pattern).map_err(|err| {
                ConversionError::invalid_options(format!("invalid glob pattern '{pattern}': {err}"))
            })?;
            for entry in matches {
                let found = entry.map_err(|err| ConversionError::Io(err.into_error()))?;
                if found.is_file() {
                    files.insert(found);
                } else if found.is_dir() {
                    files.extend(walk_dir(&found)?);
                }
            }
        }
    }
    tracing::debug!(count = files.len(), "expanded inputs");
    Ok(files.into_iter().collect())
}

fn walk_dir(dir: &Path) -> ConversionResult<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true) {
        let entry = entry.map_err(|err| ConversionError::Io(err.into()))?;
        if entry.file_type().is_file() && has_input_extension(entry.path()) {
            out.push(entry.into_path());
        }
    }
    Ok(out)
}

fn has_input_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| INPUT_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
}

/// Output directory name per input: the file stem, or the full file name when stems collide.
fn output_dirs(inputs: &[PathBuf], out_dir: &Path) -> Vec<PathBuf> {
    let stem = |p: &PathBuf| {
        p.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "input".to_string())
    };
    let mut seen: HashMap<String, usize> = HashMap::new();
    for input in inputs {
        *seen.entry(stem(input)).or_default() += 1;
    }
    inputs
        .iter()
        .map(|input| {
            let s = stem(input);
            if seen.get(&s).copied().unwrap_or(0) > 1 {
                let name = input
                    .file_name()
                    .map(|n| n.to_string_lossy().replace('.', "_"))
                    .unwrap_or(s);
                out_dir.join(name)
            } else {
                out_dir.join(s)
            }
        })
        .collect()
}

/// Convert every input into `out_dir/<input stem>/`, `threads` files at a time
/// (`None` uses the available parallelism).
///
/// Per-file failures are reported in the returned list; only a pool setup failure is an `Err`.
pub fn convert_files(
    inputs: &[PathBuf],
    options: &ConversionOptions,
    out_dir: impl AsRef<Path>,
    threads: Option<usize>,
) -> ConversionResult<Vec<FileReport>> {
    options.validate()?;
    let n_threads = threads
        .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1))
        .max(1);
    let pool = ThreadPoolBuilder::new()
        .num_threads(n_threads)
        .thread_name(|i| format!("doc-tabulate-batch-{i}"))
        .build()
        .map_err(|err| ConversionError::internal(format!("failed to build thread pool: {err}")))?;

    let dirs = output_dirs(inputs, out_dir.as_ref());
    let reports = pool.install(|| {
        inputs
            .par_iter()
            .zip(dirs.into_par_iter())
            .map(|(input, output_dir)| {
                let outcome = convert_one(input, &output_dir, options);
                if let Err(err) = &outcome {
                    tracing::error!(input = %input.display(), %err, "conversion failed");
                }
                FileReport {
                    input: input.clone(),
                    output_dir,
                    outcome,
                }
            })
            .collect()
    });
    Ok(reports)
}

fn convert_one(input: &Path, output_dir: &Path, options: &ConversionOptions) -> ConversionResult<ConvertedFile> {
    let _span = tracing::info_span!("convert", input = %input.display()).entered();
    let files = Arc::new(DirectorySink::new(output_dir)?);
    // Last, so chunk buffers are moved into the file sink rather than cloned.
    let sink = CompositeSink::new(vec![
        Arc::new(TracingSink::new(input.display().to_string())) as Arc<dyn EventSink>,
        Arc::clone(&files) as Arc<dyn EventSink>,
    ]);

    let source = Arc::new(FileSource::new(input));
    let summary = ConversionEngine::new().run_to_completion(source, options.clone(), &sink)?;
    let written = files.finish()?;
    Ok(ConvertedFile { summary, written })
}
