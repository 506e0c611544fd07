//! Index recovery and degraded mode: an incompatible index is rebuilt
//! once; when rebuilding also fails indexing is disabled, searches come
//! back empty and the reason is visible in the service status.

use std::sync::atomic::{AtomicU32, Ordering};

use pretty_assertions::assert_eq;
use tantivy::schema::{Schema, STORED, TEXT};
use tantivy::{doc, Index};

use e2e_tests::{text_doc, TestHarness};
use search_index::{
    open_index_manager, open_index_manager_with, IndexError, IndexManager, TantivyIndexManager,
};

/// Write an index whose schema lacks every field the searcher expects.
fn write_foreign_index(path: &std::path::Path) {
    std::fs::create_dir_all(path).unwrap();
    let mut schema = Schema::builder();
    let legacy = schema.add_text_field("legacy_text", TEXT | STORED);
    let index = Index::create_in_dir(path, schema.build()).unwrap();
    let mut writer = index.writer(15_000_000).unwrap();
    writer.add_document(doc!(legacy => "left over")).unwrap();
    writer.commit().unwrap();
}

#[test]
fn test_incompatible_index_rebuilt_once() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let config = TestHarness::index_config_in(&temp_dir);
    write_foreign_index(&config.index_path);

    let opened = open_index_manager(&config);
    assert_eq!(opened.configuration_error, None);
    assert!(opened.manager.is_real());

    let harness = TestHarness::with_opened(temp_dir, opened);
    harness.add(text_doc("fresh", "c1", "rebuilt index works"));
    harness.settle();
    assert_eq!(harness.search_ids("rebuilt"), vec!["mem:fresh".to_string()]);
    assert!(harness.search_ids("left").is_empty());
}

#[test]
fn test_failed_rebuild_disables_indexing() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let config = TestHarness::index_config_in(&temp_dir);
    let attempts = AtomicU32::new(0);
    let opened = open_index_manager_with(&config, |_| {
        attempts.fetch_add(1, Ordering::SeqCst);
        Err::<TantivyIndexManager, _>(IndexError::SchemaMismatch("written by an older release".into()))
    });
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert!(opened.configuration_error.is_some());

    let harness = TestHarness::with_opened(temp_dir, opened);
    harness.add(text_doc("ignored", "c1", "never searchable"));
    harness.settle();

    // No error surfaces to searchers, there are just no results
    assert!(harness.search_ids("searchable").is_empty());
    // Nothing was written, so nothing is stamped as indexed
    let state = harness.storage.document_state("mem:ignored").unwrap();
    assert!(state.map_or(true, |s| s.last_indexed.is_none()));

    let status = harness.service.status();
    assert!(!status.index_available);
    assert!(status
        .configuration_error
        .unwrap()
        .contains("written by an older release"));
}

#[test]
fn test_reinitialize_recovers_from_disabled_index() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let config = TestHarness::index_config_in(&temp_dir);
    let opened = open_index_manager_with(&config, |_| {
        Err::<TantivyIndexManager, _>(IndexError::SchemaMismatch("broken".into()))
    });
    let harness = TestHarness::with_opened(temp_dir, opened);
    assert!(harness.service.status().configuration_error.is_some());

    harness.service.reinitialize(&config);
    let status = harness.service.status();
    assert!(status.index_available);
    assert_eq!(status.configuration_error, None);

    harness.add(text_doc("back", "c1", "indexing restored"));
    harness.settle();
    assert_eq!(harness.search_ids("restored"), vec!["mem:back".to_string()]);
}
