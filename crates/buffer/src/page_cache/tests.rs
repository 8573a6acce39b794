use super::*;
use std::path::PathBuf;
use std::sync::Arc;

struct AlwaysProceed;
impl EvictHandler for AlwaysProceed {
    fn before_evict(&self, _page_id: u64) -> EvictDecision {
        EvictDecision::Proceed
    }
}

struct AlwaysCancel;
impl EvictHandler for AlwaysCancel {
    fn before_evict(&self, _page_id: u64) -> EvictDecision {
        EvictDecision::Cancel
    }
}

fn part(name: &str) -> PathBuf {
    PathBuf::from(format!("/partitions/{name}"))
}

#[test]
fn lookup_records_hits_and_misses() {
    let cache = PageCache::new(8);
    let p = part("a");
    assert!(cache.lookup(&p, 1).is_none());
    cache.insert_or_update(&p, Arc::new(Page::new_empty(1, 4096)));
    assert!(cache.lookup(&p, 1).is_some());
    assert_eq!(cache.hits(), 1);
    assert_eq!(cache.misses(), 1);
}

#[test]
fn insert_or_update_refreshes_existing_entry_without_growing() {
    let cache = PageCache::new(8);
    let p = part("a");
    cache.insert_or_update(&p, Arc::new(Page::new_empty(1, 4096)));
    cache.insert_or_update(&p, Arc::new(Page::new_empty(1, 4096)));
    assert_eq!(cache.len(), 1);
}

#[test]
fn evicts_lru_entry_when_handler_proceeds() {
    let cache = PageCache::new(2);
    let p = part("a");
    let handler: Arc<dyn EvictHandler> = Arc::new(AlwaysProceed);
    cache.register_evict_handler(&p, Arc::downgrade(&handler));

    cache.insert_or_update(&p, Arc::new(Page::new_empty(1, 4096)));
    cache.insert_or_update(&p, Arc::new(Page::new_empty(2, 4096)));
    // Touch page 1 so page 2 becomes the LRU victim.
    cache.lookup(&p, 1);
    cache.insert_or_update(&p, Arc::new(Page::new_empty(3, 4096)));

    assert_eq!(cache.len(), 2);
    assert!(cache.lookup(&p, 2).is_none());
    assert!(cache.lookup(&p, 1).is_some());
    assert!(cache.lookup(&p, 3).is_some());
}

#[test]
fn cancelling_handler_keeps_cache_over_capacity() {
    let cache = PageCache::new(1);
    let p = part("a");
    let handler: Arc<dyn EvictHandler> = Arc::new(AlwaysCancel);
    cache.register_evict_handler(&p, Arc::downgrade(&handler));

    cache.insert_or_update(&p, Arc::new(Page::new_empty(1, 4096)));
    cache.insert_or_update(&p, Arc::new(Page::new_empty(2, 4096)));

    assert_eq!(cache.len(), 2);
    assert!(cache.lookup(&p, 1).is_some());
    assert!(cache.lookup(&p, 2).is_some());
}

#[test]
fn unregister_stops_consultation() {
    let cache = PageCache::new(1);
    let p = part("a");
    let handler: Arc<dyn EvictHandler> = Arc::new(AlwaysCancel);
    cache.register_evict_handler(&p, Arc::downgrade(&handler));
    cache.unregister(&p);

    cache.insert_or_update(&p, Arc::new(Page::new_empty(1, 4096)));
    cache.insert_or_update(&p, Arc::new(Page::new_empty(2, 4096)));

    assert_eq!(cache.len(), 1);
    assert!(cache.lookup(&p, 1).is_none());
}

#[test]
fn dropped_handler_is_treated_as_absent() {
    let cache = PageCache::new(1);
    let p = part("a");
    {
        let handler: Arc<dyn EvictHandler> = Arc::new(AlwaysCancel);
        cache.register_evict_handler(&p, Arc::downgrade(&handler));
    } // handler dropped, Weak can no longer upgrade

    cache.insert_or_update(&p, Arc::new(Page::new_empty(1, 4096)));
    cache.insert_or_update(&p, Arc::new(Page::new_empty(2, 4096)));

    assert_eq!(cache.len(), 1);
    assert!(cache.lookup(&p, 1).is_none());
    assert!(cache.lookup(&p, 2).is_some());
}

#[test]
fn partitions_are_independent() {
    let cache = PageCache::new(8);
    let a = part("a");
    let b = part("b");
    cache.insert_or_update(&a, Arc::new(Page::new_empty(1, 4096)));
    cache.insert_or_update(&b, Arc::new(Page::new_empty(1, 4096)));
    assert_eq!(cache.len(), 2);
    assert!(cache.lookup(&a, 1).is_some());
    assert!(cache.lookup(&b, 1).is_some());
}
