//! End-to-end test infrastructure for doc-search.
//!
//! Provides a shared [`TestHarness`] running the real indexing service
//! against throwaway RocksDB and index directories, with an in-memory
//! resolver for documents.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use search_index::{
    DocumentSearcher, InMemorySecurityPolicy, ManagerHandle, OpenedIndex, SearchIndexConfig,
    SearchRequest, SecurityPolicy,
};
use search_indexing::{IndexingService, MemoryResolver, MemoryResource, ResolverRegistry};
use search_storage::Storage;
use search_types::{DocumentId, ExtractionSettings, IndexingSettings, Priority};

/// Prefix the in-memory resolver answers for.
pub const PREFIX: &str = "mem";

/// How long a test waits for the pipeline to go idle.
pub const WAIT: Duration = Duration::from_secs(20);

pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    pub storage: Arc<Storage>,
    pub index: Arc<ManagerHandle>,
    pub resolver: Arc<MemoryResolver>,
    pub service: Arc<IndexingService>,
}

impl TestHarness {
    /// A started service over a fresh index.
    pub fn new() -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let index = ManagerHandle::open(&Self::index_config_in(&temp_dir));
        Self::with_index(temp_dir, index)
    }

    /// A started service over an already opened index.
    pub fn with_opened(temp_dir: tempfile::TempDir, opened: OpenedIndex) -> Self {
        Self::with_index(temp_dir, ManagerHandle::new(opened))
    }

    fn with_index(temp_dir: tempfile::TempDir, index: ManagerHandle) -> Self {
        let storage =
            Arc::new(Storage::open(&temp_dir.path().join("db")).expect("Failed to open test storage"));
        let index = Arc::new(index);
        let resolver = Arc::new(MemoryResolver::new());
        let resolvers = Arc::new(ResolverRegistry::new());
        resolvers.register(PREFIX, resolver.clone());

        let service = IndexingService::new(
            fast_settings(),
            &ExtractionSettings::default(),
            storage.clone(),
            index.clone(),
            resolvers,
        );
        service.start().expect("Failed to start indexing service");
        service.set_running(true);

        Self {
            _temp_dir: temp_dir,
            storage,
            index,
            resolver,
            service,
        }
    }

    pub fn index_config_in(temp_dir: &tempfile::TempDir) -> SearchIndexConfig {
        SearchIndexConfig::new(temp_dir.path().join("index"))
    }

    /// Make `resource` resolvable and queue it for indexing.
    pub fn add(&self, resource: MemoryResource) {
        let id = resource.id.as_str().to_string();
        self.resolver.insert(resource);
        self.service
            .add_resource(&id, Priority::Item)
            .expect("Failed to queue resource");
    }

    /// Wait for every queue to drain, then commit.
    pub fn settle(&self) {
        assert!(self.service.wait_for_idle(WAIT), "pipeline did not go idle");
        self.service.commit().expect("Commit failed");
    }

    pub fn searcher(&self, policy: impl SecurityPolicy + 'static) -> DocumentSearcher {
        DocumentSearcher::new(self.index.clone(), Arc::new(policy))
    }

    /// Identifiers of the hits for `query` as the system principal, in
    /// ranked order.
    pub fn search_ids(&self, query: &str) -> Vec<String> {
        self.searcher(InMemorySecurityPolicy::new())
            .search(&SearchRequest::new(query))
            .expect("Search failed")
            .hits
            .into_iter()
            .map(|hit| hit.identifier)
            .collect()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        let _ = self.service.shutdown();
    }
}

/// Indexing settings with short polls so tests settle quickly.
pub fn fast_settings() -> IndexingSettings {
    IndexingSettings {
        worker_threads: 2,
        poll_timeout_ms: 20,
        runner_poll_timeout_ms: 20,
        idle_commit_delay_ms: 0,
        shutdown_join_timeout_ms: 2000,
        ..IndexingSettings::default()
    }
}

/// A plain-text document in `container`.
pub fn text_doc(name: &str, container: &str, body: &str) -> MemoryResource {
    MemoryResource::new(
        DocumentId::new(PREFIX, name).expect("valid document id"),
        container,
        "text/plain",
        body,
    )
}

/// A fixed point in time, `minutes` past 2024-01-29 10:00 UTC.
pub fn at(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 29, 10, 0, 0).single().expect("valid timestamp")
        + chrono::Duration::minutes(minutes)
}
