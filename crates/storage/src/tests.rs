use super::*;
use std::io::Read;

#[test]
fn validate_page_size_rejects_non_multiples() {
    assert!(validate_page_size(0).is_err());
    assert!(validate_page_size(100).is_err());
    assert!(validate_page_size(4096).is_ok());
    assert!(validate_page_size(8192).is_ok());
    assert!(validate_page_size(4096 * 3).is_ok());
}

#[test]
fn new_empty_page_is_zeroed_and_clean() {
    let page = Page::new_empty(1, 4096);
    assert_eq!(page.id(), 1);
    assert!(!page.is_dirty());
    assert_eq!(page.committed_transaction(), 0);
    assert_eq!(page.data(), vec![0u8; 4096]);
}

#[test]
fn set_data_marks_dirty_and_copies_bytes() {
    let page = Page::new_empty(1, 4096);
    page.set_data(&[1, 2, 3, 4], 0, 10, None).unwrap();
    assert!(page.is_dirty());
    let data = page.data();
    assert_eq!(&data[10..14], &[1, 2, 3, 4]);
}

#[test]
fn set_data_with_explicit_len_copies_prefix_only() {
    let page = Page::new_empty(1, 4096);
    page.set_data(&[9, 9, 9, 9], 0, 0, Some(2)).unwrap();
    let data = page.data();
    assert_eq!(&data[0..4], &[9, 9, 0, 0]);
}

#[test]
fn set_data_rejects_out_of_bounds_destination() {
    let page = Page::new_empty(1, 4096);
    let err = page.set_data(&[1, 2, 3], 0, 4095, None).unwrap_err();
    assert!(matches!(err, DbError::InvalidOperation(_)));
}

#[test]
fn write_clears_dirty_and_records_transaction() {
    let backend = InMemoryBackend::new();
    let path = std::path::PathBuf::from("/pages/one.db");
    backend.create_file(&path).unwrap();

    let page = Page::new_empty(1, 4096);
    page.set_data(&[0xAA; 4096], 0, 0, None).unwrap();
    assert!(page.is_dirty());

    let mut sink = backend.open_for_append_or_open(&path).unwrap();
    page.write(sink.as_mut(), 7).unwrap();

    assert!(!page.is_dirty());
    assert_eq!(page.committed_transaction(), 7);

    let mut reader = backend.open_for_read(&path).unwrap();
    let mut buf = vec![0u8; 4096];
    reader.read_exact(&mut buf).unwrap();
    assert_eq!(buf, vec![0xAA; 4096]);
}

#[test]
fn write_is_positional_for_non_first_pages() {
    let backend = InMemoryBackend::new();
    let path = std::path::PathBuf::from("/pages/two.db");
    backend.create_file(&path).unwrap();

    // Write page 2 first; page 1's region must remain untouched (zeroed).
    let page2 = Page::new_empty(2, 4096);
    page2.set_data(&[0xBB; 4096], 0, 0, None).unwrap();
    let mut sink = backend.open_for_append_or_open(&path).unwrap();
    page2.write(sink.as_mut(), 1).unwrap();
    drop(sink);

    let mut reader = backend.open_for_read(&path).unwrap();
    let mut buf = vec![0u8; 8192];
    reader.read_exact(&mut buf).unwrap();
    assert_eq!(&buf[0..4096], &vec![0u8; 4096][..]);
    assert_eq!(&buf[4096..8192], &vec![0xBBu8; 4096][..]);
}

#[test]
fn new_loaded_reads_back_written_bytes() {
    let backend = InMemoryBackend::new();
    let path = std::path::PathBuf::from("/pages/three.db");
    backend.create_file(&path).unwrap();

    let page = Page::new_empty(1, 4096);
    page.set_data(&[0x42; 4096], 0, 0, None).unwrap();
    let mut sink = backend.open_for_append_or_open(&path).unwrap();
    page.write(sink.as_mut(), 1).unwrap();
    drop(sink);

    let mut reader = backend.open_for_read(&path).unwrap();
    let loaded = Page::new_loaded(reader.as_mut(), 1, 4096).unwrap();
    assert_eq!(loaded.id(), 1);
    assert!(!loaded.is_dirty());
    assert_eq!(loaded.data(), vec![0x42u8; 4096]);
}

proptest::proptest! {
    #[test]
    fn set_data_then_write_then_reload_preserves_arbitrary_bytes(
        chunk in proptest::collection::vec(proptest::prelude::any::<u8>(), 1..256),
        offset in 0usize..3840,
    ) {
        let backend = InMemoryBackend::new();
        let path = std::path::PathBuf::from("/pages/prop.db");
        backend.create_file(&path).unwrap();

        let page = Page::new_empty(1, 4096);
        page.set_data(&chunk, 0, offset, None).unwrap();
        let before = page.data();

        let mut sink = backend.open_for_append_or_open(&path).unwrap();
        page.write(sink.as_mut(), 1).unwrap();
        drop(sink);

        let mut reader = backend.open_for_read(&path).unwrap();
        let loaded = Page::new_loaded(reader.as_mut(), 1, 4096).unwrap();
        proptest::prop_assert_eq!(loaded.data(), before);
    }
}
