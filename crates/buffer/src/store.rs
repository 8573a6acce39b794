//! Append-only page store built on the shared [`PageCache`].
//!
//! A store owns one file (its *partition*) and hands out pages read from it.
//! New pages live in a private buffer until [`AppendOnlyPageStore::commit`]
//! atomically publishes them: afterwards they are indistinguishable from
//! pages loaded at open time. The store participates in the shared cache's
//! eviction protocol so its pages can be reclaimed under memory pressure
//! without losing data that has not yet reached disk.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};

use common::{DbError, DbResult, PageStoreConfig};
use storage::{validate_page_size, Page, PersistenceBackend, WriteSeek};

use crate::page_cache::{EvictDecision, EvictHandler, PageCache};
use crate::writer::BackgroundPageWriter;

const WRITER_QUEUE_CAPACITY: usize = 256;

/// Mutable bookkeeping for a store's uncommitted append region.
struct StoreState {
    /// One past the highest id ever assigned to a loaded page at open time
    /// (or at the last commit); also the lowest id a newly created page can
    /// take. Pages with `id >= new_page_offset` are, until commit, visible
    /// only through `new_pages` and never through the shared cache's
    /// `retrieve`-facing lookup path.
    new_page_offset: u64,
    /// Next id `create`/`get_writable_page` will assign.
    next_page_id: u64,
    /// Pages created since the last commit, in creation order. Indexed by
    /// `id - new_page_offset`.
    new_pages: Vec<Arc<Page>>,
    disposed: bool,
}

/// Append-only store over one file, backed by a shared process-wide
/// [`PageCache`].
pub struct AppendOnlyPageStore {
    partition: PathBuf,
    backend: Arc<dyn PersistenceBackend>,
    cache: Arc<PageCache>,
    config: PageStoreConfig,
    state: Mutex<StoreState>,
    writer: Mutex<Option<BackgroundPageWriter>>,
}

impl AppendOnlyPageStore {
    /// Opens (creating it if absent and writable) the page file at `path`,
    /// registers with `cache` for the eviction protocol, and derives
    /// `next_page_id` from the file's length.
    ///
    /// Returns the store wrapped in `Arc` because the shared cache holds a
    /// weak back-reference to it as its [`EvictHandler`] for this partition.
    #[tracing::instrument(skip(backend, cache), fields(partition = %path.as_ref().display()))]
    pub fn open(
        path: impl AsRef<Path>,
        backend: Arc<dyn PersistenceBackend>,
        cache: Arc<PageCache>,
        config: PageStoreConfig,
    ) -> DbResult<Arc<Self>> {
        validate_page_size(config.page_size)?;
        let raw_path = path.as_ref().to_path_buf();

        if !backend.file_exists(&raw_path) {
            if config.readonly {
                return Err(DbError::Configuration(format!(
                    "page file {} does not exist and store is readonly",
                    raw_path.display()
                )));
            }
            backend.create_file(&raw_path)?;
        }

        // The partition key must identify the same underlying file
        // regardless of which path spelling (relative vs. absolute, through
        // a symlink or not) a caller used to open it, so two stores opened
        // on the same file share one cache partition and one eviction
        // subscription. Canonicalization only works against a real
        // filesystem entry, so fall back to the given path for backends
        // (e.g. an in-memory test double) where that lookup can't succeed.
        let partition = std::fs::canonicalize(&raw_path).unwrap_or(raw_path);

        let file_len = {
            let mut reader = backend.open_for_read(&partition)?;
            std::io::Seek::seek(&mut reader, std::io::SeekFrom::End(0))?
        };
        if file_len % config.page_size as u64 != 0 {
            return Err(DbError::Configuration(format!(
                "page file {} length {file_len} is not a multiple of page_size {}",
                partition.display(),
                config.page_size
            )));
        }
        let page_count = file_len / config.page_size as u64;
        let new_page_offset = page_count + 1;

        let store = Arc::new(Self {
            partition: partition.clone(),
            backend,
            cache,
            config,
            state: Mutex::new(StoreState {
                new_page_offset,
                next_page_id: new_page_offset,
                new_pages: Vec::new(),
                disposed: false,
            }),
            writer: Mutex::new(None),
        });

        if store.background_writes_enabled() {
            *store.writer.lock().unwrap() = store.spawn_writer()?;
        }

        let handler: Weak<dyn EvictHandler> = Arc::downgrade(&store);
        store.cache.register_evict_handler(&store.partition, handler);

        tracing::info!(pages = page_count, "opened page store");
        Ok(store)
    }

    pub fn partition(&self) -> &Path {
        &self.partition
    }

    pub fn page_size(&self) -> u32 {
        self.config.page_size
    }

    pub fn can_read(&self) -> bool {
        !self.state.lock().unwrap().disposed
    }

    pub fn can_write(&self) -> bool {
        !self.config.readonly && self.can_read()
    }

    /// Number of committed pages, i.e. the highest committed id (0 if none).
    pub fn committed_page_count(&self) -> u64 {
        self.state.lock().unwrap().new_page_offset - 1
    }

    /// `true` if `page` falls in the current uncommitted range, i.e. it can
    /// be mutated directly via [`write`](Self::write) without going through
    /// [`get_writable_page`](Self::get_writable_page) first.
    pub fn is_writable(&self, page: &Page) -> bool {
        page.id() >= self.state.lock().unwrap().new_page_offset
    }

    /// Retrieves a page by id, whether committed or part of the current
    /// uncommitted buffer. Uncommitted pages always come from the store's
    /// own buffer, bypassing the shared cache's lookup path entirely.
    pub fn retrieve(&self, page_id: u64) -> DbResult<Arc<Page>> {
        self.ensure_not_disposed()?;

        let new_page_offset = {
            let state = self.state.lock().unwrap();
            if page_id >= state.new_page_offset {
                let idx = (page_id - state.new_page_offset) as usize;
                return state
                    .new_pages
                    .get(idx)
                    .cloned()
                    .ok_or_else(|| DbError::InvalidOperation(format!("no such page {page_id}")));
            }
            state.new_page_offset
        };
        if page_id == 0 || page_id >= new_page_offset {
            return Err(DbError::InvalidOperation(format!("no such page {page_id}")));
        }

        if let Some(page) = self.cache.lookup(&self.partition, page_id) {
            return Ok(page);
        }

        tracing::debug!(page_id, "loading page from backend");
        let mut reader = self.backend.open_for_read(&self.partition)?;
        let page = Arc::new(Page::new_loaded(
            reader.as_mut(),
            page_id,
            self.config.page_size,
        )?);
        self.cache.insert_or_update(&self.partition, Arc::clone(&page));
        Ok(page)
    }

    /// Allocates and returns a new, empty, mutable page. The page is
    /// exclusively owned by this store until [`commit`](Self::commit) —
    /// other stores can never observe it, and the shared cache only ever
    /// asks this store's own eviction handler about it, never serves it to
    /// another caller.
    ///
    /// `commit_id` is accepted for symmetry with `write`/`commit`; this
    /// append-only allocation does not need it.
    pub fn create(&self, _commit_id: u64) -> DbResult<Arc<Page>> {
        self.ensure_writable()?;
        let page = self.allocate_page();
        tracing::debug!(page_id = page.id(), "created page");
        // Inserted into the shared cache immediately so the eviction
        // protocol can account for and, if needed, reclaim memory used by
        // not-yet-committed pages; `retrieve` never depends on this for
        // correctness since it always consults `new_pages` first for ids at
        // or past `new_page_offset`.
        self.cache.insert_or_update(&self.partition, page.clone());
        Ok(page)
    }

    fn allocate_page(&self) -> Arc<Page> {
        let mut state = self.state.lock().unwrap();
        let id = state.next_page_id;
        state.next_page_id += 1;
        let page = Arc::new(Page::new_empty(id, self.config.page_size));
        state.new_pages.push(Arc::clone(&page));
        page
    }

    /// Mutates the in-buffer page at `page_id`. Fails if `page_id` refers to
    /// an already-committed page ("write to fixed page") or to an id that
    /// has not yet been allocated by `create` ("write to unreserved page").
    ///
    /// If background writing is enabled, the page is queued to the writer
    /// under `commit_id` after the mutation — this only pipelines the I/O
    /// ahead of `commit`; the write is not durable until `commit`/`flush`.
    pub fn write(
        &self,
        commit_id: u64,
        page_id: u64,
        data: &[u8],
        src_offset: usize,
        page_offset: usize,
        len: Option<usize>,
    ) -> DbResult<()> {
        self.ensure_writable()?;

        let page = {
            let state = self.state.lock().unwrap();
            if page_id < state.new_page_offset {
                return Err(DbError::InvalidOperation(format!(
                    "write to fixed page {page_id}"
                )));
            }
            if page_id >= state.next_page_id {
                return Err(DbError::InvalidOperation(format!(
                    "write to unreserved page {page_id}"
                )));
            }
            let idx = (page_id - state.new_page_offset) as usize;
            state.new_pages[idx].clone()
        };

        page.set_data(data, src_offset, page_offset, len)?;

        if let Some(writer) = self.writer.lock().unwrap().as_ref() {
            writer.enqueue(page, commit_id);
        }
        Ok(())
    }

    /// The copy-on-write entry point higher layers use to mutate a
    /// committed page: if `page` already falls in the writable range,
    /// returns it unchanged; otherwise allocates a fresh page (a new id,
    /// never reusing `page`'s), copies `page`'s bytes into it, and returns
    /// that copy. `page`'s own id remains immutable forever.
    pub fn get_writable_page(&self, _commit_id: u64, page: &Arc<Page>) -> DbResult<Arc<Page>> {
        self.ensure_writable()?;
        if self.is_writable(page) {
            return Ok(Arc::clone(page));
        }

        let copy = self.allocate_page();
        copy.set_data(&page.data(), 0, 0, None)?;
        self.cache.insert_or_update(&self.partition, Arc::clone(&copy));
        Ok(copy)
    }

    /// Atomically publishes every page allocated since the last commit
    /// under transaction id `commit_id`: writes each to disk (synchronously,
    /// or via the background writer followed by a flush barrier if
    /// background writing is enabled), inserts them into the shared cache as
    /// committed pages, then advances `new_page_offset` so they become
    /// visible to future `retrieve` calls as ordinary committed pages.
    ///
    /// A no-op, leaving the file, cache, and offsets unchanged, if there are
    /// no pages to commit.
    #[tracing::instrument(skip(self))]
    pub fn commit(&self, commit_id: u64) -> DbResult<()> {
        self.ensure_writable()?;

        let pages = {
            let state = self.state.lock().unwrap();
            state.new_pages.clone()
        };
        if pages.is_empty() {
            return Ok(());
        }

        let used_writer = self.writer.lock().unwrap().is_some();

        if used_writer {
            let failed = {
                let writer_guard = self.writer.lock().unwrap();
                let writer = writer_guard.as_ref().expect("checked Some above");
                for page in &pages {
                    writer.enqueue(Arc::clone(page), commit_id);
                }
                writer.flush();
                writer.has_failed()
            };
            if failed {
                tracing::error!(
                    commit_id,
                    "background writer failed before flush; restarting writer and leaving commit pending for retry"
                );
                // The writer's `failed` latch never resets itself, so a
                // retried commit against the same writer would fail forever
                // even after the underlying I/O problem clears. Restart it
                // here too, not just on the success path, so the caller's
                // retry has a live writer to retry against.
                self.restart_writer()?;
                return Err(DbError::Storage(format!(
                    "background write failed during commit {commit_id}; transaction left pending"
                )));
            }
        } else {
            let mut sink = self.backend.open_for_append_or_open(&self.partition)?;
            for page in &pages {
                page.write(sink.as_mut(), commit_id)?;
            }
        }

        for page in &pages {
            self.cache.insert_or_update(&self.partition, Arc::clone(page));
        }

        let mut state = self.state.lock().unwrap();
        state.new_page_offset = state.next_page_id;
        state.new_pages.clear();
        drop(state);

        if used_writer {
            // Bound the writer's retained memory to a single commit's worth
            // of pages by restarting it around each commit boundary.
            self.restart_writer()?;
        }

        tracing::info!(pages = pages.len(), commit_id, "committed pages");
        Ok(())
    }

    /// Blocks until any writes already queued to the background writer have
    /// reached the backend. A no-op if background writes are disabled.
    pub fn flush(&self) {
        if let Some(writer) = self.writer.lock().unwrap().as_ref() {
            writer.flush();
        }
    }

    /// Closes the store: equivalent to [`dispose`](Self::dispose). This
    /// store keeps no persistent read handle between calls (each `retrieve`
    /// opens its own via `PersistenceBackend::open_for_read`), so there is
    /// no separate "close the reader" step.
    pub fn close(&self) {
        self.dispose();
    }

    /// Unregisters from the shared cache and shuts down the background
    /// writer, if any. Further operations return [`DbError::Disposed`].
    /// Idempotent.
    pub fn dispose(&self) {
        let mut state = self.state.lock().unwrap();
        if state.disposed {
            return;
        }
        state.disposed = true;
        drop(state);

        self.cache.unregister(&self.partition);
        if let Some(writer) = self.writer.lock().unwrap().take() {
            writer.shutdown();
        }
    }

    fn background_writes_enabled(&self) -> bool {
        !self.config.disable_background_writes && !self.config.readonly
    }

    fn spawn_writer(&self) -> DbResult<Option<BackgroundPageWriter>> {
        if !self.background_writes_enabled() {
            return Ok(None);
        }
        let backend = Arc::clone(&self.backend);
        let partition = self.partition.clone();
        let writer = BackgroundPageWriter::spawn(WRITER_QUEUE_CAPACITY, move || {
            open_write_sink(backend, partition)
        })
        .map_err(|err| DbError::Configuration(format!("failed to start background writer: {err}")))?;
        Ok(Some(writer))
    }

    /// Shuts down and replaces the background writer, if one is installed.
    /// Called both after a successful commit (to bound the writer's retained
    /// memory to one commit's worth of pages) and after a failed one (to
    /// clear the writer's latched failure so a retried commit isn't doomed
    /// to fail against the same broken writer forever).
    fn restart_writer(&self) -> DbResult<()> {
        let mut writer_guard = self.writer.lock().unwrap();
        if let Some(old) = writer_guard.take() {
            old.shutdown();
        }
        *writer_guard = self.spawn_writer()?;
        Ok(())
    }

    fn ensure_not_disposed(&self) -> DbResult<()> {
        if self.state.lock().unwrap().disposed {
            return Err(DbError::Disposed);
        }
        Ok(())
    }

    fn ensure_writable(&self) -> DbResult<()> {
        self.ensure_not_disposed()?;
        if self.config.readonly {
            return Err(DbError::InvalidOperation("store is readonly".to_string()));
        }
        Ok(())
    }
}

fn open_write_sink(
    backend: Arc<dyn PersistenceBackend>,
    partition: PathBuf,
) -> std::io::Result<Box<dyn WriteSeek>> {
    backend
        .open_for_append_or_open(&partition)
        .map_err(|err| std::io::Error::other(err.to_string()))
}

impl Drop for AppendOnlyPageStore {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl EvictHandler for AppendOnlyPageStore {
    /// Consulted by the shared cache before dropping one of this store's
    /// pages.
    ///
    /// Committed pages (`page_id < new_page_offset`) can always be
    /// reclaimed — `retrieve` will simply reload them from disk. An
    /// uncommitted, writable page is only safe to drop if a live background
    /// writer can take over its durability; `queue_write(page, 0)` transfers
    /// that responsibility (transaction id 0 is sentinel here — eviction
    /// writes are not part of any particular commit). With no writer, the
    /// page is dirty and has nowhere else to live, so eviction is cancelled.
    fn before_evict(&self, page_id: u64) -> EvictDecision {
        let (new_page_offset, page) = {
            let state = self.state.lock().unwrap();
            let page = if page_id >= state.new_page_offset {
                let idx = (page_id - state.new_page_offset) as usize;
                state.new_pages.get(idx).cloned()
            } else {
                None
            };
            (state.new_page_offset, page)
        };

        if page_id < new_page_offset {
            return EvictDecision::Proceed;
        }
        let Some(page) = page else {
            return EvictDecision::Proceed;
        };

        let writer_guard = self.writer.lock().unwrap();
        match writer_guard.as_ref() {
            Some(writer) => {
                writer.enqueue(page, 0);
                EvictDecision::Proceed
            }
            None => {
                tracing::warn!(page_id, "cancelling eviction of uncommitted page");
                EvictDecision::Cancel
            }
        }
    }
}
