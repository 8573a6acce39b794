use super::*;
use std::io;

#[test]
fn page_store_config_defaults_are_sane() {
    let cfg = PageStoreConfig::default();
    assert_eq!(cfg.page_size, 4096);
    assert!(!cfg.readonly);
    assert!(!cfg.disable_background_writes);
    assert_eq!(cfg.cache_capacity_pages, 256);
}

#[test]
fn page_store_config_builder_overrides_defaults() {
    let cfg = PageStoreConfig::builder()
        .page_size(8192)
        .readonly(true)
        .cache_capacity_pages(64)
        .build();
    assert_eq!(cfg.page_size, 8192);
    assert!(cfg.readonly);
    assert_eq!(cfg.cache_capacity_pages, 64);
}

#[test]
fn disposed_error_has_stable_message() {
    let err = DbError::Disposed;
    assert_eq!(err.to_string(), "operation on disposed resource");
}

#[test]
fn db_error_formats_cleanly() {
    let err = DbError::Storage("corruption".into());
    assert!(format!("{err}").contains("storage"));
}

#[test]
fn io_error_converts() {
    let e = io::Error::other("oops");
    let db_err: DbError = e.into();
    assert!(matches!(db_err, DbError::Io(_)));
}
