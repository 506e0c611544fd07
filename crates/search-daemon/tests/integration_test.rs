//! Command-level workflow over a real directory: crawl, search, status,
//! clear and reindex, each opening storage and index afresh.

use std::fs;

use tempfile::TempDir;

use search_daemon::{clear_index, crawl_once, reindex, search_index, status_report};
use search_index::SearchRequest;
use search_types::Settings;

struct Harness {
    tmp: TempDir,
}

impl Harness {
    fn new() -> Self {
        let tmp = TempDir::new().expect("Failed to create temp dir");
        let files = tmp.path().join("files");
        fs::create_dir_all(files.join("reports")).unwrap();
        fs::create_dir_all(files.join(".git")).unwrap();
        fs::write(files.join("notes.txt"), "The quick brown fox is running home").unwrap();
        fs::write(
            files.join("reports").join("q3.html"),
            "<html><head><title>Quarterly Report</title></head><body>Revenue grew</body></html>",
        )
        .unwrap();
        fs::write(files.join(".git").join("HEAD"), "ref: refs/heads/main fox").unwrap();
        Self { tmp }
    }

    fn settings(&self) -> Settings {
        let path = |name: &str| self.tmp.path().join(name).to_string_lossy().to_string();
        Settings {
            db_path: path("db"),
            index_path: path("index"),
            crawl_root: Some(path("files")),
            ..Default::default()
        }
    }

    fn hits(&self, query: &str) -> Vec<String> {
        search_index(&self.settings(), &SearchRequest::new(query))
            .unwrap()
            .hits
            .into_iter()
            .map(|h| h.identifier)
            .collect()
    }
}

#[test]
fn test_crawl_then_search() {
    let harness = Harness::new();

    let progress = crawl_once(harness.settings(), false).unwrap().unwrap();
    assert_eq!(progress.indexed, 2);
    assert_eq!(progress.failed, 0);

    assert_eq!(harness.hits("running"), vec!["file:/notes.txt".to_string()]);
    assert_eq!(harness.hits("quarterly"), vec!["file:/reports/q3.html".to_string()]);
    // .git is never crawled
    assert_eq!(harness.hits("refs"), Vec::<String>::new());

    let status = status_report(harness.settings()).unwrap();
    assert_eq!(status.indexed_documents, Some(2));
    assert!(status.crawler_running);
    assert_eq!(status.crawl_paths, 2);
    assert_eq!(status.paths_due, 0);
    assert_eq!(status.tracked_documents, 2);

    // Everything was just crawled
    assert!(crawl_once(harness.settings(), false).unwrap().is_none());
}

#[test]
fn test_full_crawl_reindexes_unchanged_documents() {
    let harness = Harness::new();
    crawl_once(harness.settings(), false).unwrap();

    let progress = crawl_once(harness.settings(), true).unwrap().unwrap();
    assert_eq!(progress.indexed, 2);
    assert_eq!(status_report(harness.settings()).unwrap().indexed_documents, Some(2));
}

#[test]
fn test_clear_resets_index_and_schedule() {
    let harness = Harness::new();
    crawl_once(harness.settings(), false).unwrap();

    clear_index(harness.settings()).unwrap();
    let status = status_report(harness.settings()).unwrap();
    assert_eq!(status.indexed_documents, Some(0));
    assert_eq!(status.tracked_documents, 0);
    assert!(harness.hits("running").is_empty());

    // The whole tree is due again
    let progress = crawl_once(harness.settings(), false).unwrap().unwrap();
    assert_eq!(progress.indexed, 2);
}

#[test]
fn test_reindex_through_provider() {
    let harness = Harness::new();

    let progress = reindex(harness.settings(), None, false).unwrap();
    assert_eq!(progress.indexed, 2);
    assert_eq!(harness.hits("revenue"), vec!["file:/reports/q3.html".to_string()]);

    // Other containers are not served by the filesystem provider
    let progress = reindex(harness.settings(), Some("elsewhere"), false).unwrap();
    assert_eq!(progress.indexed, 0);
}
