//! Fixed-size pages and the platform I/O they are read from and written to.
//!
//! A page file is the concatenation of fixed-size pages; page `n` (1-based)
//! occupies bytes `[(n-1)*page_size, n*page_size)`. There is no header,
//! footer, or inter-page metadata — page content is opaque to this layer.

pub mod backend;

pub use backend::{InMemoryBackend, NativeBackend, PersistenceBackend, ReadSeek, WriteSeek};

use common::{DbError, DbResult};
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;

/// Smallest legal page size; all page sizes must be a positive multiple of this.
pub const MIN_PAGE_SIZE: u32 = 4096;

/// Validates a page size against the 4096-byte alignment constraint.
pub fn validate_page_size(page_size: u32) -> DbResult<()> {
    if page_size == 0 || page_size % MIN_PAGE_SIZE != 0 {
        return Err(DbError::Configuration(format!(
            "page_size must be a positive multiple of {MIN_PAGE_SIZE}, got {page_size}"
        )));
    }
    Ok(())
}

/// A fixed-size page, identified by a 1-based id.
///
/// A page is either *loaded* (read from disk, immutable by convention) or
/// *new* (allocated by a store, mutable until commit). The distinction lives
/// in the owning store, not in this type: `Page` itself only tracks whether
/// its bytes have been mutated since the last write (`dirty`) and which
/// transaction last wrote it (`committed_transaction`).
///
/// `data` is guarded by a lock rather than exposed as a plain field because
/// a page can be shared, via `Arc<Page>`, between the store thread mutating
/// it and the background writer thread flushing it to disk.
#[derive(Debug)]
pub struct Page {
    id: u64,
    page_size: u32,
    data: RwLock<Vec<u8>>,
    dirty: AtomicBool,
    committed_transaction: AtomicU64,
}

impl Page {
    /// Allocates a new zero-filled page. Not yet dirty: nothing has written
    /// to it since allocation.
    pub fn new_empty(id: u64, page_size: u32) -> Self {
        Self {
            id,
            page_size,
            data: RwLock::new(vec![0u8; page_size as usize]),
            dirty: AtomicBool::new(false),
            committed_transaction: AtomicU64::new(0),
        }
    }

    /// Reads exactly `page_size` bytes from `source` at offset
    /// `(id-1)*page_size`, producing a loaded (clean) page.
    pub fn new_loaded(source: &mut dyn ReadSeek, id: u64, page_size: u32) -> DbResult<Self> {
        let offset = (id - 1) * page_size as u64;
        source.seek(SeekFrom::Start(offset))?;
        let mut data = vec![0u8; page_size as usize];
        source.read_exact(&mut data)?;
        Ok(Self {
            id,
            page_size,
            data: RwLock::new(data),
            dirty: AtomicBool::new(false),
            committed_transaction: AtomicU64::new(0),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn committed_transaction(&self) -> u64 {
        self.committed_transaction.load(Ordering::Acquire)
    }

    /// Byte offset this page occupies in its file.
    pub fn file_offset(&self) -> u64 {
        (self.id - 1) * self.page_size as u64
    }

    /// Returns a clone of the page's current bytes.
    pub fn data(&self) -> Vec<u8> {
        self.data.read().unwrap().clone()
    }

    /// Copies `src[src_offset..src_offset+len]` into the page at
    /// `page_offset` and marks the page dirty.
    ///
    /// `len = None` means "copy from `src_offset` to the end of `src`" —
    /// the idiomatic stand-in for the `-1` sentinel used by non-Rust ports
    /// of this store.
    pub fn set_data(
        &self,
        src: &[u8],
        src_offset: usize,
        page_offset: usize,
        len: Option<usize>,
    ) -> DbResult<()> {
        let len = len.unwrap_or_else(|| src.len() - src_offset);
        let src_end = src_offset + len;
        let page_end = page_offset + len;
        if src_end > src.len() {
            return Err(DbError::InvalidOperation(format!(
                "set_data source range [{src_offset}, {src_end}) exceeds source length {}",
                src.len()
            )));
        }
        if page_end > self.page_size as usize {
            return Err(DbError::InvalidOperation(format!(
                "set_data destination range [{page_offset}, {page_end}) exceeds page size {}",
                self.page_size
            )));
        }
        let mut data = self.data.write().unwrap();
        data[page_offset..page_end].copy_from_slice(&src[src_offset..src_end]);
        drop(data);
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    /// Writes the page's current bytes to `sink` at its file offset and
    /// records `txn_id` as the committing transaction. Clears `dirty`.
    ///
    /// Positional: seeks before writing, since pages may be written out of
    /// id order by a pipelined writer.
    pub fn write(&self, sink: &mut dyn WriteSeek, txn_id: u64) -> DbResult<()> {
        let snapshot = self.data.read().unwrap().clone();
        sink.seek(SeekFrom::Start(self.file_offset()))?;
        sink.write_all(&snapshot)?;
        self.committed_transaction.store(txn_id, Ordering::Release);
        self.dirty.store(false, Ordering::Release);
        tracing::trace!(page_id = self.id, txn_id, "wrote page to sink");
        Ok(())
    }
}

#[cfg(test)]
mod tests;
