//! Shared page cache and append-only page store.
//!
//! A single process-wide [`PageCache`] is handed to every open
//! [`AppendOnlyPageStore`]. The cache enforces a soft capacity with LRU
//! eviction, cooperating with each store through the [`EvictHandler`]
//! protocol so a dirty, not-yet-durable page is never silently dropped.
//! Durability for evicted or committed pages can be offloaded to a
//! [`BackgroundPageWriter`] so callers are not blocked on disk I/O.
//!
//! # Example
//!
//! ```no_run
//! use buffer::{AppendOnlyPageStore, PageCache};
//! use common::PageStoreConfig;
//! use std::sync::Arc;
//! use storage::NativeBackend;
//!
//! let cache = PageCache::new(256);
//! let store = AppendOnlyPageStore::open(
//!     "/tmp/db/table_1.pages",
//!     Arc::new(NativeBackend::new()),
//!     cache,
//!     PageStoreConfig::default(),
//! )
//! .unwrap();
//!
//! let page = store.create(0).unwrap();
//! page.set_data(&[1, 2, 3], 0, 0, None).unwrap();
//! store.commit(1).unwrap();
//! ```

pub mod page_cache;
pub mod store;
pub mod writer;

pub use page_cache::{EvictDecision, EvictHandler, PageCache};
pub use store::AppendOnlyPageStore;
pub use writer::BackgroundPageWriter;
