use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::execution::{ConversionEvent, EventSink};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Keeps every event in memory. Mostly useful in tests and for small inputs.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<ConversionEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the events received so far.
    pub fn events(&self) -> Vec<ConversionEvent> {
        lock(&self.events).clone()
    }

    pub fn into_events(self) -> Vec<ConversionEvent> {
        self.events.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    /// Concatenated chunk bytes per part index.
    pub fn part_bytes(&self) -> BTreeMap<usize, Vec<u8>> {
        let mut parts: BTreeMap<usize, Vec<u8>> = BTreeMap::new();
        for event in lock(&self.events).iter() {
            if let ConversionEvent::PartReady { part_index, buffer, .. } = event {
                parts.entry(*part_index).or_default().extend_from_slice(buffer);
            }
        }
        parts
    }
}

impl EventSink for CollectingSink {
    fn on_event(&self, event: ConversionEvent) {
        lock(&self.events).push(event);
    }
}

/// Fans every event out to a list of sinks. Chunk buffers are cloned for all but the last sink.
#[derive(Default)]
pub struct CompositeSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl CompositeSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

impl fmt::Debug for CompositeSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeSink")
            .field("sinks_len", &self.sinks.len())
            .finish()
    }
}

impl EventSink for CompositeSink {
    fn on_event(&self, event: ConversionEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.on_event(event.clone());
            }
            last.on_event(event);
        }
    }
}

/// Mirrors run events to `tracing`; chunk traffic goes to `trace`, the rest to `debug`/`info`.
#[derive(Debug, Default)]
pub struct TracingSink {
    source: String,
}

impl TracingSink {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

impl EventSink for TracingSink {
    fn on_event(&self, event: ConversionEvent) {
        let source = self.source.as_str();
        match event {
            ConversionEvent::Phase(phase) => tracing::info!(source, %phase, "phase"),
            ConversionEvent::Progress(p) => tracing::debug!(source, "{p}"),
            ConversionEvent::Schema(schema) => {
                tracing::info!(source, columns = schema.columns.len(), "schema discovered")
            }
            ConversionEvent::PartReady { part_index, chunk_index, buffer, .. } => {
                tracing::trace!(source, part = part_index, chunk = chunk_index, bytes = buffer.len(), "chunk")
            }
            ConversionEvent::PartDone(part) => {
                tracing::info!(source, part = part.part_index, rows = part.rows, file = %part.filename, "part done")
            }
            ConversionEvent::Done(summary) => tracing::info!(
                source,
                rows = summary.stats.rows_written,
                errors = summary.stats.errors,
                elapsed_ms = summary.stats.elapsed_ms,
                "conversion done"
            ),
            ConversionEvent::Failed { error } => tracing::error!(source, %error, "conversion failed"),
            // Already mirrored by the run log.
            ConversionEvent::Log(_) | ConversionEvent::Ready => {}
        }
    }
}

#[derive(Default)]
struct DirectoryState {
    open: HashMap<usize, (PathBuf, File)>,
    written: Vec<PathBuf>,
    error: Option<io::Error>,
}

/// Writes output parts as files into a directory.
///
/// Chunks are appended to a temporary `.part-<n>.tmp` file that is renamed once the part is
/// sealed and its final name is known. Write failures are remembered and returned by
/// [`DirectorySink::finish`]; later events for the failing part are dropped.
pub struct DirectorySink {
    dir: PathBuf,
    state: Mutex<DirectoryState>,
}

impl fmt::Debug for DirectorySink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectorySink").field("dir", &self.dir).finish()
    }
}

impl DirectorySink {
    /// Create the directory (and parents) if needed.
    pub fn new(dir: impl AsRef<Path>) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            state: Mutex::new(DirectoryState::default()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Files completed so far, or the first write error.
    pub fn finish(&self) -> io::Result<Vec<PathBuf>> {
        let mut st = lock(&self.state);
        if let Some(err) = st.error.take() {
            return Err(err);
        }
        // Parts left open by a cancelled or failed run stay under their temporary name.
        Ok(st.written.clone())
    }

    fn append(&self, st: &mut DirectoryState, part_index: usize, buffer: &[u8]) -> io::Result<()> {
        if !st.open.contains_key(&part_index) {
            let tmp = self.dir.join(format!(".part-{part_index}.tmp"));
            let file = File::create(&tmp)?;
            st.open.insert(part_index, (tmp, file));
        }
        match st.open.get_mut(&part_index) {
            Some((_, file)) => file.write_all(buffer),
            None => Ok(()),
        }
    }

    fn seal(&self, st: &mut DirectoryState, part_index: usize, filename: &str) -> io::Result<()> {
        let target = self.dir.join(filename);
        match st.open.remove(&part_index) {
            Some((tmp, mut file)) => {
                file.flush()?;
                drop(file);
                fs::rename(&tmp, &target)?;
            }
            // A part without chunks (header disabled, no rows) is still an empty file.
            None => {
                File::create(&target)?;
            }
        }
        st.written.push(target);
        Ok(())
    }
}

impl EventSink for DirectorySink {
    fn on_event(&self, event: ConversionEvent) {
        let mut st = lock(&self.state);
        let result = match &event {
            ConversionEvent::PartReady { part_index, buffer, .. } => {
                self.append(&mut st, *part_index, buffer)
            }
            ConversionEvent::PartDone(part) => self.seal(&mut st, part.part_index, &part.filename),
            _ => Ok(()),
        };
        if let Err(err) = result {
            tracing::error!(dir = %self.dir.display(), %err, "failed to write output part");
            if st.error.is_none() {
                st.error = Some(err);
            }
        }
    }
}
