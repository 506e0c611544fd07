//! Pipeline behavior across the service, crawler and filesystem tree.

use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use search_index::{ManagerHandle, SearchIndexConfig};
use search_indexing::{
    Crawler, FileResolver, FileSystemTree, IndexingService, Resource, ResolverRegistry,
    ResourceResolver, Runnable, FILE_PREFIX,
};
use search_storage::Storage;
use search_types::{
    CrawlerSettings, DocumentId, ExtractionSettings, IndexingSettings, Priority, SecurityContext,
};
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(20);

fn fast_settings() -> IndexingSettings {
    IndexingSettings {
        worker_threads: 2,
        poll_timeout_ms: 20,
        runner_poll_timeout_ms: 20,
        idle_commit_delay_ms: 0,
        shutdown_join_timeout_ms: 2000,
        ..IndexingSettings::default()
    }
}

fn open_service(
    tmp: &TempDir,
    settings: IndexingSettings,
    resolvers: Arc<ResolverRegistry>,
) -> Arc<IndexingService> {
    let storage = Arc::new(Storage::open(&tmp.path().join("db")).unwrap());
    let index = Arc::new(ManagerHandle::open(&SearchIndexConfig::new(
        tmp.path().join("index"),
    )));
    IndexingService::new(
        settings,
        &ExtractionSettings::default(),
        storage,
        index,
        resolvers,
    )
}

/// Opens or closes for every resource reading through it.
#[derive(Default)]
struct Gate {
    open: Mutex<bool>,
    changed: Condvar,
}

impl Gate {
    fn wait(&self) {
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.changed.wait(open).unwrap();
        }
    }

    fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.changed.notify_all();
    }
}

struct GatedResource {
    id: DocumentId,
    gate: Arc<Gate>,
}

impl Resource for GatedResource {
    fn id(&self) -> &DocumentId {
        &self.id
    }

    fn name(&self) -> &str {
        self.id.identifier()
    }

    fn exists(&self) -> bool {
        true
    }

    fn content(&self) -> std::io::Result<Vec<u8>> {
        self.gate.wait();
        Ok(b"gated content".to_vec())
    }

    fn content_type(&self) -> String {
        "text/plain".to_string()
    }

    fn modified(&self) -> Option<DateTime<Utc>> {
        None
    }

    fn security_context(&self) -> SecurityContext {
        SecurityContext::container("c1")
    }
}

struct GatedResolver {
    gate: Arc<Gate>,
}

impl ResourceResolver for GatedResolver {
    fn resolve(&self, identifier: &str) -> Option<Arc<dyn Resource>> {
        Some(Arc::new(GatedResource {
            id: DocumentId::new("gated", identifier).ok()?,
            gate: self.gate.clone(),
        }))
    }
}

#[test]
fn test_runner_stalls_above_high_water_mark() {
    let tmp = TempDir::new().unwrap();
    let gate = Arc::new(Gate::default());
    let resolvers = Arc::new(ResolverRegistry::new());
    resolvers.register("gated", Arc::new(GatedResolver { gate: gate.clone() }));
    let service = open_service(
        &tmp,
        IndexingSettings {
            high_water_mark: 2,
            ..fast_settings()
        },
        resolvers,
    );
    service.start().unwrap();

    // Two workers block inside content(); the rest stay queued
    let task = service.create_task("flood");
    for i in 0..6 {
        task.add_resource(&format!("gated:{i}"), Priority::Bulk).unwrap();
    }
    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    task.add_runnable(
        Runnable::new("crawl continuation", move || {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        }),
        Priority::Crawl,
    )
    .unwrap();
    task.set_ready().unwrap();
    service.set_running(true);

    thread::sleep(Duration::from_millis(300));
    assert!(service.status().pre_queue > 2);
    assert!(!ran.load(Ordering::SeqCst), "runner must wait for the queue to drain");

    gate.open();
    assert!(task.wait(WAIT));
    assert!(ran.load(Ordering::SeqCst));
    assert_eq!(task.progress().indexed, 6);
    service.shutdown().unwrap();
}

#[test]
fn test_filesystem_crawl_indexes_tree() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("root");
    fs::create_dir_all(root.join("docs/deep")).unwrap();
    fs::create_dir_all(root.join(".git")).unwrap();
    fs::write(root.join("readme.txt"), "welcome to the lab").unwrap();
    fs::write(root.join("docs/notes.txt"), "running experiments").unwrap();
    fs::write(root.join("docs/deep/data.txt"), "raw numbers").unwrap();
    fs::write(root.join(".git/HEAD"), "ref: main").unwrap();

    let resolvers = Arc::new(ResolverRegistry::new());
    resolvers.register(FILE_PREFIX, Arc::new(FileResolver::new(&root, "c1")));
    let service = open_service(&tmp, fast_settings(), resolvers);
    service.start().unwrap();
    let crawler = Crawler::new(
        service.clone(),
        Arc::new(FileSystemTree::new(&root)),
        CrawlerSettings::default(),
    );
    crawler.start().unwrap();

    let task = crawler.full_crawl().unwrap();
    assert!(task.wait(WAIT));
    assert!(service.wait_for_idle(WAIT));
    service.commit().unwrap();

    let searcher = service.index().current().searcher().unwrap();
    assert_eq!(searcher.num_docs(), 3);
    drop(searcher);

    let storage = service.storage();
    let state = storage.document_state("file:/docs/notes.txt").unwrap().unwrap();
    let modified = fs::metadata(root.join("docs/notes.txt"))
        .unwrap()
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap();
    assert!(state.last_indexed.unwrap() >= modified);
    assert!(storage.document_state("file:/.git/HEAD").unwrap().is_none());

    // A second normal crawl finds nothing new
    let task = service.create_task("recrawl");
    crawler
        .crawl_path(&task, &search_storage::CrawlPath::root(), false)
        .unwrap();
    assert_eq!(task.progress().estimate, 0);
    task.set_ready().unwrap();

    service.shutdown().unwrap();
}
