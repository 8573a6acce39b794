//! Process-wide page cache with a before-evict cooperation protocol.
//!
//! The cache is shared by every open [`crate::store::AppendOnlyPageStore`] in
//! the process. Entries are keyed by `(partition, page_id)`, where a
//! partition is, in practice, a store's file path. Capacity is enforced with
//! approximate LRU: before physically dropping an entry, the cache gives the
//! partition's registered handler (if any) a chance to cancel the eviction
//! or take over durability and let it proceed.

use hashbrown::HashMap;
use lru::LruCache;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use storage::Page;

/// A partition's answer to "may this page be dropped from cache right now?"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictDecision {
    /// The page may be dropped; the handler has either confirmed it is
    /// immutable/committed, or has taken responsibility for durability
    /// (e.g. queued it to a background writer).
    Proceed,
    /// The page must stay cached; it is dirty and has nowhere else to live.
    Cancel,
}

/// Registered by a store to participate in the cache's eviction protocol for
/// its own partition.
pub trait EvictHandler: Send + Sync {
    fn before_evict(&self, page_id: u64) -> EvictDecision;
}

type CacheKey = (PathBuf, u64);

struct Inner {
    entries: LruCache<CacheKey, Arc<Page>>,
    handlers: HashMap<PathBuf, Weak<dyn EvictHandler>>,
}

/// Bounded, shared cache keyed by `(partition, page_id)`.
///
/// `capacity` is a soft cap: `insert_or_update` always succeeds even if
/// every eviction candidate cancels, and the cache may transiently exceed
/// its capacity as a result.
pub struct PageCache {
    capacity: usize,
    inner: Mutex<Inner>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PageCache {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                handlers: HashMap::new(),
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Looks up a page, recording a hit or miss and refreshing recency on a hit.
    pub fn lookup(&self, partition: &Path, page_id: u64) -> Option<Arc<Page>> {
        let key = (partition.to_path_buf(), page_id);
        let hit = {
            let mut inner = self.inner.lock().unwrap();
            inner.entries.get(&key).cloned()
        };
        if hit.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        hit
    }

    /// Inserts a fresh entry or refreshes an existing one's recency and
    /// value, evicting least-recently-used entries (subject to the
    /// before-evict protocol) if the cache is at capacity.
    pub fn insert_or_update(&self, partition: &Path, page: Arc<Page>) {
        let key = (partition.to_path_buf(), page.id());

        {
            let mut inner = self.inner.lock().unwrap();
            if inner.entries.contains(&key) {
                inner.entries.put(key, page);
                return;
            }
        }

        while self.len() >= self.capacity {
            if !self.try_evict_one() {
                tracing::warn!(
                    partition = %partition.display(),
                    "page cache at capacity but no candidate could be evicted; exceeding soft cap"
                );
                break;
            }
        }

        let mut inner = self.inner.lock().unwrap();
        inner.entries.put(key, page);
    }

    /// Registers `handler` to be consulted before any page in `partition` is
    /// evicted. Replaces any previously registered handler for the same
    /// partition.
    pub fn register_evict_handler(&self, partition: &Path, handler: Weak<dyn EvictHandler>) {
        self.inner
            .lock()
            .unwrap()
            .handlers
            .insert(partition.to_path_buf(), handler);
    }

    /// Removes the registered handler for `partition`, if any.
    pub fn unregister(&self, partition: &Path) {
        self.inner.lock().unwrap().handlers.remove(partition);
    }

    /// Tries to evict the least-recently-used candidate; returns whether it
    /// succeeded. Candidates are tried in LRU-first order, each exactly
    /// once, so this terminates even if every candidate cancels.
    fn try_evict_one(&self) -> bool {
        let candidates: Vec<CacheKey> = {
            let inner = self.inner.lock().unwrap();
            inner.entries.iter().rev().map(|(k, _)| k.clone()).collect()
        };

        for key in candidates {
            // The handler lookup and invocation happen without holding the
            // cache's own lock: a handler may legitimately need to call back
            // into this store (e.g. to queue a background write), and must
            // never be able to re-enter this cache's lock from within the
            // callback.
            let handler = {
                let inner = self.inner.lock().unwrap();
                inner.handlers.get(&key.0).and_then(Weak::upgrade)
            };
            let decision = match &handler {
                Some(h) => h.before_evict(key.1),
                None => EvictDecision::Proceed,
            };
            if decision == EvictDecision::Proceed {
                let mut inner = self.inner.lock().unwrap();
                if inner.entries.pop(&key).is_some() {
                    return true;
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests;
