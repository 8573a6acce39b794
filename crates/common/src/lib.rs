#[cfg(test)]
mod tests;

use std::io;
use thiserror::Error;

/// Canonical error type shared across the workspace.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("storage: {0}")]
    Storage(String),
    #[error("configuration: {0}")]
    Configuration(String),
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error("operation on disposed resource")]
    Disposed,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result alias that carries a `DbError`.
pub type DbResult<T> = Result<T, DbError>;

/// Configuration for one append-only page store.
///
/// # Example
/// ```
/// use common::PageStoreConfig;
///
/// let config = PageStoreConfig::builder()
///     .page_size(8192)
///     .cache_capacity_pages(1024)
///     .build();
/// ```
#[derive(Clone, Debug, bon::Builder)]
pub struct PageStoreConfig {
    /// Fixed page size in bytes. Must be a positive multiple of 4096.
    #[builder(default = 4096)]
    pub page_size: u32,
    /// Disables `create`/`write`/`commit` on the store.
    #[builder(default = false)]
    pub readonly: bool,
    /// Forces synchronous writes at commit time and cancels (rather than
    /// queues) eviction of uncommitted pages.
    #[builder(default = false)]
    pub disable_background_writes: bool,
    /// Soft capacity, in pages, of the process-wide page cache.
    #[builder(default = 256)]
    pub cache_capacity_pages: usize,
}

impl Default for PageStoreConfig {
    fn default() -> Self {
        Self {
            page_size: 4096,
            readonly: false,
            disable_background_writes: false,
            cache_capacity_pages: 256,
        }
    }
}

/// Convenient re-exports for downstream crates.
pub mod prelude {
    pub use crate::{DbError, DbResult, PageStoreConfig};
}
