//! Platform I/O abstraction the page store reads and writes through.
//!
//! Abstracting the filesystem behind [`PersistenceBackend`] lets the store be
//! exercised against an in-memory backend in tests without touching a real
//! filesystem, and keeps the core portable to hosts without POSIX file
//! semantics.

use common::{DbError, DbResult};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// A seekable, readable byte stream a page can be loaded from.
pub trait ReadSeek: Read + Seek + Send {}
impl<T: Read + Seek + Send> ReadSeek for T {}

/// A seekable, writable byte stream a page can be written to.
pub trait WriteSeek: Write + Seek + Send {}
impl<T: Write + Seek + Send> WriteSeek for T {}

/// Minimal filesystem capability set the page store needs.
///
/// Implementations must make `open_for_read` safely callable concurrently
/// with `open_for_append_or_open` from other threads; the store relies on
/// being able to hand out independent reader handles.
pub trait PersistenceBackend: Send + Sync {
    /// Returns whether a file exists at `path`.
    fn file_exists(&self, path: &Path) -> bool;

    /// Creates an empty file at `path` if one does not already exist.
    fn create_file(&self, path: &Path) -> DbResult<()>;

    /// Opens `path` for positional reads.
    fn open_for_read(&self, path: &Path) -> DbResult<Box<dyn ReadSeek>>;

    /// Opens `path` for positional writes, creating it if absent.
    ///
    /// Despite the name, this does not use OS append-mode: the store always
    /// seeks explicitly before writing, since pages may be written out of
    /// id order.
    fn open_for_append_or_open(&self, path: &Path) -> DbResult<Box<dyn WriteSeek>>;
}

/// [`PersistenceBackend`] backed by `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeBackend;

impl NativeBackend {
    pub fn new() -> Self {
        Self
    }
}

impl PersistenceBackend for NativeBackend {
    fn file_exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn create_file(&self, path: &Path) -> DbResult<()> {
        if self.file_exists(path) {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        tracing::debug!(path = %path.display(), "created page file");
        Ok(())
    }

    fn open_for_read(&self, path: &Path) -> DbResult<Box<dyn ReadSeek>> {
        let file = OpenOptions::new().read(true).open(path)?;
        Ok(Box::new(file))
    }

    fn open_for_append_or_open(&self, path: &Path) -> DbResult<Box<dyn WriteSeek>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Box::new(file))
    }
}

/// In-memory [`PersistenceBackend`] for deterministic, filesystem-free tests.
///
/// Files are named byte buffers shared behind a single lock; writes are
/// visible to subsequent reads immediately (there is no OS page cache to
/// reason about).
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    files: Arc<Mutex<HashMap<PathBuf, Vec<u8>>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistenceBackend for InMemoryBackend {
    fn file_exists(&self, path: &Path) -> bool {
        self.files.lock().unwrap().contains_key(path)
    }

    fn create_file(&self, path: &Path) -> DbResult<()> {
        self.files.lock().unwrap().entry(path.to_path_buf()).or_default();
        Ok(())
    }

    fn open_for_read(&self, path: &Path) -> DbResult<Box<dyn ReadSeek>> {
        let files = self.files.lock().unwrap();
        let bytes = files
            .get(path)
            .cloned()
            .ok_or_else(|| DbError::Io(io::Error::new(io::ErrorKind::NotFound, "no such file")))?;
        Ok(Box::new(Cursor::new(bytes)))
    }

    fn open_for_append_or_open(&self, path: &Path) -> DbResult<Box<dyn WriteSeek>> {
        self.files.lock().unwrap().entry(path.to_path_buf()).or_default();
        Ok(Box::new(InMemoryWriter {
            files: self.files.clone(),
            path: path.to_path_buf(),
            pos: 0,
        }))
    }
}

struct InMemoryWriter {
    files: Arc<Mutex<HashMap<PathBuf, Vec<u8>>>>,
    path: PathBuf,
    pos: u64,
}

impl Write for InMemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut files = self.files.lock().unwrap();
        let data = files.entry(self.path.clone()).or_default();
        let start = self.pos as usize;
        let end = start + buf.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(buf);
        self.pos += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for InMemoryWriter {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let files = self.files.lock().unwrap();
        let len = files.get(&self.path).map(|d| d.len() as u64).unwrap_or(0);
        self.pos = match pos {
            SeekFrom::Start(n) => n,
            SeekFrom::End(delta) => (len as i64 + delta) as u64,
            SeekFrom::Current(delta) => (self.pos as i64 + delta) as u64,
        };
        Ok(self.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_backend_round_trips_bytes() {
        let backend = InMemoryBackend::new();
        let path = PathBuf::from("/virtual/pages.db");
        backend.create_file(&path).unwrap();

        {
            let mut writer = backend.open_for_append_or_open(&path).unwrap();
            writer.seek(SeekFrom::Start(0)).unwrap();
            writer.write_all(&[1, 2, 3, 4]).unwrap();
        }

        let mut reader = backend.open_for_read(&path).unwrap();
        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn in_memory_backend_reports_missing_files() {
        let backend = InMemoryBackend::new();
        assert!(!backend.file_exists(Path::new("/nope")));
        assert!(backend.open_for_read(Path::new("/nope")).is_err());
    }

    #[test]
    fn native_backend_creates_file_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.db");
        let backend = NativeBackend::new();
        assert!(!backend.file_exists(&path));
        backend.create_file(&path).unwrap();
        assert!(backend.file_exists(&path));
        // Creating again must not truncate existing content.
        let mut writer = backend.open_for_append_or_open(&path).unwrap();
        writer.write_all(&[9, 9, 9]).unwrap();
        drop(writer);
        backend.create_file(&path).unwrap();
        let mut reader = backend.open_for_read(&path).unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, vec![9, 9, 9]);
    }
}
