//! Byte sources the record iterators read from.
//!
//! Discovery and conversion each call [`InputSource::open`] for their own linear pass, so a
//! source must be re-openable for two-pass mode. [`ReaderSource`] wraps a single-use stream and
//! only supports one pass.

use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::{ConversionError, ConversionResult};

/// A readable input that the pipeline can (re-)open for each linear pass.
pub trait InputSource: Send + Sync {
    /// Human-readable name used in logs.
    fn name(&self) -> &str;

    /// Total length in bytes, when known.
    fn len(&self) -> Option<u64>;

    /// Open a fresh read handle positioned at the start of the input.
    fn open(&self) -> ConversionResult<Box<dyn Read + Send>>;

    /// Read up to `n` leading bytes for format sniffing.
    fn prefix(&self, n: usize) -> ConversionResult<Vec<u8>> {
        let mut out = Vec::with_capacity(n);
        self.open()?.take(n as u64).read_to_end(&mut out)?;
        Ok(out)
    }
}

/// A file on disk.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    name: String,
}

impl FileSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let name = path.display().to_string();
        Self { path, name }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl InputSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> Option<u64> {
        std::fs::metadata(&self.path).ok().map(|m| m.len())
    }

    fn open(&self) -> ConversionResult<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(&self.path)?))
    }
}

/// An in-memory buffer, shared between passes without copying.
#[derive(Debug, Clone)]
pub struct BytesSource {
    name: String,
    data: Arc<[u8]>,
}

impl BytesSource {
    pub fn new(name: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

impl InputSource for BytesSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn open(&self) -> ConversionResult<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(Arc::clone(&self.data))))
    }
}

/// A single-use stream (pipe, socket, decompressor).
///
/// Sniffing buffers the prefix it inspects so the one real pass still sees every byte. A second
/// `open` fails with [`ConversionError::SourceExhausted`]; use single-pass mode with this source.
pub struct ReaderSource {
    name: String,
    len: Option<u64>,
    state: Mutex<ReaderState>,
}

struct ReaderState {
    prefix: Vec<u8>,
    reader: Option<Box<dyn Read + Send>>,
}

impl ReaderSource {
    pub fn new(name: impl Into<String>, reader: impl Read + Send + 'static) -> Self {
        Self {
            name: name.into(),
            len: None,
            state: Mutex::new(ReaderState {
                prefix: Vec::new(),
                reader: Some(Box::new(reader)),
            }),
        }
    }

    /// Declare the total length, enabling ETA reporting and binary length checks.
    pub fn with_len(mut self, len: u64) -> Self {
        self.len = Some(len);
        self
    }

    fn exhausted(&self) -> ConversionError {
        ConversionError::SourceExhausted {
            name: self.name.clone(),
        }
    }
}

impl fmt::Debug for ReaderSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderSource")
            .field("name", &self.name)
            .field("len", &self.len)
            .finish()
    }
}

impl InputSource for ReaderSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> Option<u64> {
        self.len
    }

    fn open(&self) -> ConversionResult<Box<dyn Read + Send>> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| ConversionError::internal("reader source lock poisoned"))?;
        let reader = state.reader.take().ok_or_else(|| self.exhausted())?;
        let prefix = std::mem::take(&mut state.prefix);
        Ok(Box::new(Cursor::new(prefix).chain(reader)))
    }

    fn prefix(&self, n: usize) -> ConversionResult<Vec<u8>> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| ConversionError::internal("reader source lock poisoned"))?;
        let ReaderState { prefix, reader } = &mut *state;
        let reader = reader.as_mut().ok_or_else(|| self.exhausted())?;
        if prefix.len() < n {
            let missing = (n - prefix.len()) as u64;
            reader.take(missing).read_to_end(prefix)?;
        }
        Ok(prefix[..prefix.len().min(n)].to_vec())
    }
}

/// `Read` adapter that counts the bytes pulled from the inner reader.
pub(crate) struct CountingReader<R> {
    inner: R,
    count: u64,
}

impl<R: Read> CountingReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self { inner, count: 0 }
    }

    pub(crate) fn count(&self) -> u64 {
        self.count
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

/// Fill `buf` as far as possible; returns the number of bytes read (short only at EOF).
pub(crate) fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
