//! Command implementations.
//!
//! Every command opens the same [`Runtime`]: RocksDB storage for the crawl
//! schedule, the full-text index and an indexing service wired to the
//! configured crawl root. Only `start` runs the scheduler.

use std::fmt;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::signal;
use tracing::{error, info, warn};

use search_index::{
    CategoryRegistry, ContainerInfo, DocumentSearcher, InMemorySecurityPolicy, ManagerHandle,
    SearchCategory, SearchIndexConfig, SearchRequest, SearchResults, SecurityPolicy, SortOrder,
};
use search_indexing::{
    Crawler, FileResolver, FileSystemProvider, FileSystemTree, IndexTask, IndexingService,
    ResolverRegistry, TaskProgress, FILE_PREFIX,
};
use search_scheduler::{
    create_crawl_job, create_maintenance_job, CrawlJobConfig, MaintenanceJobConfig, SchedulerConfig,
    SchedulerService,
};
use search_storage::Storage;
use search_types::Settings;

use crate::cli::PathArgs;

/// How often a waiting command logs task progress.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// Load layered settings and apply CLI overrides on top.
pub fn load_settings(
    config_path: Option<&str>,
    log_level: Option<&str>,
    paths: &PathArgs,
) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;
    apply_overrides(&mut settings, log_level, paths);
    Ok(settings)
}

pub fn apply_overrides(settings: &mut Settings, log_level: Option<&str>, paths: &PathArgs) {
    if let Some(level) = log_level {
        settings.log_level = level.to_string();
    }
    if let Some(root) = &paths.crawl_root {
        settings.crawl_root = Some(root.clone());
    }
    if let Some(index_path) = &paths.index_path {
        settings.index_path = index_path.clone();
    }
    if let Some(db_path) = &paths.db_path {
        settings.db_path = db_path.clone();
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `level`.
pub fn init_logging(level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

fn open_index(settings: &Settings) -> ManagerHandle {
    let config = SearchIndexConfig::from_settings(settings);
    let handle = ManagerHandle::open(&config);
    if let Some(reason) = handle.configuration_error() {
        error!(
            index_path = %config.index_path.display(),
            reason = %reason,
            "Full-text index unavailable, documents will not be indexed"
        );
    }
    handle
}

/// Storage, index and indexing service for one process.
pub struct Runtime {
    settings: Settings,
    storage: Arc<Storage>,
    index: Arc<ManagerHandle>,
    service: Arc<IndexingService>,
    crawler: Option<Arc<Crawler>>,
    containers: Arc<dyn SecurityPolicy>,
    categories: Arc<CategoryRegistry>,
}

impl Runtime {
    /// Open everything. Service threads are not started.
    pub fn open(settings: Settings) -> Result<Self> {
        let db_path = settings.expanded_db_path();
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent).context("Failed to create database directory")?;
        }
        let storage = Arc::new(
            Storage::open(&db_path)
                .with_context(|| format!("Failed to open storage at {}", db_path.display()))?,
        );
        let index = Arc::new(open_index(&settings));

        let resolvers = Arc::new(ResolverRegistry::new());
        let service = IndexingService::new(
            settings.indexing.clone(),
            &settings.extraction,
            storage.clone(),
            index.clone(),
            resolvers.clone(),
        );

        let crawler = match settings.crawl_root.as_deref() {
            Some(root) => {
                let root = Settings::expand_path(root);
                if !root.is_dir() {
                    anyhow::bail!("Crawl root {} is not a directory", root.display());
                }
                let container = settings.container_id.clone();
                resolvers.register(FILE_PREFIX, Arc::new(FileResolver::new(root.clone(), container.clone())));
                service.add_document_provider(Arc::new(FileSystemProvider::new(
                    root.clone(),
                    container,
                    settings.crawler.excluded_directories.clone(),
                )));
                let tree = Arc::new(FileSystemTree::new(root));
                Some(Crawler::new(service.clone(), tree, settings.crawler.clone()))
            }
            None => None,
        };

        // Crawled files all live in the configured container
        let mut containers = InMemorySecurityPolicy::new();
        containers.add_container(ContainerInfo::folder(settings.container_id.clone(), None));

        Ok(Self {
            settings,
            storage,
            index,
            service,
            crawler,
            containers: Arc::new(containers),
            categories: Arc::new(CategoryRegistry::new()),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn service(&self) -> &Arc<IndexingService> {
        &self.service
    }

    pub fn crawler(&self) -> Result<&Arc<Crawler>> {
        self.crawler
            .as_ref()
            .context("No crawl root configured (set crawl_root or pass --crawl-root)")
    }

    pub fn searcher(&self) -> DocumentSearcher {
        DocumentSearcher::with_categories(
            self.index.clone(),
            self.containers.clone(),
            self.categories.clone(),
        )
    }

    pub fn categories(&self) -> &Arc<CategoryRegistry> {
        &self.categories
    }

    /// Stop the service threads; commits whatever is pending.
    pub fn shutdown(&self) -> Result<()> {
        self.service
            .shutdown()
            .context("Indexing service did not shut down cleanly")
    }
}

fn wait_for_task(task: &IndexTask) -> TaskProgress {
    while !task.wait(PROGRESS_INTERVAL) {
        let progress = task.progress();
        info!(
            task = progress.id,
            indexed = progress.indexed,
            failed = progress.failed,
            outstanding = progress.outstanding,
            "Waiting for task"
        );
    }
    task.progress()
}

/// Run the indexer, crawler and crawl job until Ctrl-C or SIGTERM.
pub async fn start_daemon(settings: Settings) -> Result<()> {
    info!(
        db_path = %settings.db_path,
        index_path = %settings.index_path,
        crawl_root = ?settings.crawl_root,
        "Search daemon starting"
    );
    let runtime = Runtime::open(settings)?;
    let crawler = runtime.crawler()?.clone();

    runtime.service().start().context("Failed to start indexing service")?;
    crawler.start().context("Failed to start crawler")?;

    let scheduler_config = SchedulerConfig::default().with_timezone(runtime.settings().timezone.clone());
    let mut scheduler = SchedulerService::new(scheduler_config).await?;
    create_crawl_job(
        &scheduler,
        crawler,
        CrawlJobConfig::from(&runtime.settings().crawler),
    )
    .await?;
    create_maintenance_job(
        &scheduler,
        runtime.service().clone(),
        MaintenanceJobConfig::from(&runtime.settings().indexing),
    )
    .await?;
    scheduler.start().await?;

    let stopped = runtime.service().shutdown_token();
    tokio::select! {
        _ = shutdown_signal() => {}
        _ = stopped.cancelled() => warn!("Indexing service stopped on its own, shutting down"),
    }

    if let Err(e) = scheduler.shutdown().await {
        warn!(error = %e, "Scheduler shutdown failed");
    }
    tokio::task::spawn_blocking(move || runtime.shutdown())
        .await
        .context("Shutdown task panicked")??;
    info!("Search daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

/// Query the index as the system principal.
pub fn search_index(settings: &Settings, request: &SearchRequest) -> Result<SearchResults> {
    let index = Arc::new(open_index(settings));
    let searcher = DocumentSearcher::new(index, Arc::new(InMemorySecurityPolicy::new()));
    searcher.search(request).context("Search failed")
}

/// The categories a search can be restricted to.
pub fn search_categories() -> Vec<SearchCategory> {
    CategoryRegistry::new().list()
}

pub fn handle_search(
    settings: &Settings,
    query: String,
    category: Option<String>,
    offset: usize,
    limit: usize,
    sort: &str,
) -> Result<()> {
    let sort: SortOrder = sort.parse().map_err(anyhow::Error::msg)?;
    let mut request = SearchRequest::new(query)
        .with_page(offset, limit)
        .with_sort(sort);
    if let Some(category) = category {
        request = request.with_category(category);
    }

    let results = search_index(settings, &request)?;
    println!("{} hit(s)", results.total_hits);
    for hit in &results.hits {
        println!();
        println!("{}  [{:.3}]", hit.title, hit.score);
        println!("  {}", hit.identifier);
        if let Some(url) = &hit.url {
            println!("  {url}");
        }
        if !hit.summary.is_empty() {
            println!("  {}", hit.summary);
        }
    }
    Ok(())
}

/// One crawl pass over the configured root. Returns `None` when nothing
/// was due.
pub fn crawl_once(settings: Settings, full: bool) -> Result<Option<TaskProgress>> {
    let runtime = Runtime::open(settings)?;
    let crawler = runtime.crawler()?.clone();
    runtime.service().start()?;
    crawler.start()?;

    let task = if full {
        Some(crawler.full_crawl()?)
    } else {
        crawler.crawl_due(Utc::now())?
    };
    let progress = task.as_deref().map(wait_for_task);
    runtime.service().commit()?;
    runtime.shutdown()?;
    Ok(progress)
}

/// Point-in-time view of the index and the crawl schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    /// `None` when the index cannot be searched
    pub indexed_documents: Option<u64>,
    pub configuration_error: Option<String>,
    pub crawler_running: bool,
    pub crawl_paths: u64,
    pub paths_due: usize,
    pub tracked_documents: u64,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.indexed_documents {
            Some(n) => writeln!(f, "Indexed documents: {n}")?,
            None => writeln!(f, "Indexed documents: unavailable")?,
        }
        if let Some(reason) = &self.configuration_error {
            writeln!(f, "Configuration error: {reason}")?;
        }
        let state = if self.crawler_running { "running" } else { "paused" };
        writeln!(f, "Crawler: {state}")?;
        writeln!(f, "Crawl schedule: {} path(s), {} due", self.crawl_paths, self.paths_due)?;
        write!(f, "Documents with watermarks: {}", self.tracked_documents)
    }
}

pub fn status_report(settings: Settings) -> Result<StatusReport> {
    let min_gap = chrono::Duration::seconds(settings.crawler.min_recrawl_gap_secs as i64);
    let runtime = Runtime::open(settings)?;
    let stats = runtime.storage.get_stats()?;
    let due = runtime
        .storage
        .get_paths_due_for_crawl(usize::MAX, Utc::now(), min_gap)?;

    Ok(StatusReport {
        indexed_documents: runtime.searcher().num_docs().ok(),
        configuration_error: runtime.index.configuration_error(),
        crawler_running: runtime.storage.crawler_running()?,
        crawl_paths: stats.crawl_path_count,
        paths_due: due.len(),
        tracked_documents: stats.document_count,
    })
}

/// Delete every document and make the whole tree due again.
pub fn clear_index(settings: Settings) -> Result<()> {
    let runtime = Runtime::open(settings)?;
    runtime.service().clear().context("Failed to clear index")?;
    runtime.shutdown()
}

/// Re-enumerate documents through the providers and wait for them. With
/// `recursive`, containers below `container` are reindexed too.
pub fn reindex(settings: Settings, container: Option<&str>, recursive: bool) -> Result<TaskProgress> {
    let runtime = Runtime::open(settings)?;
    let service = runtime.service();
    service.start()?;
    service.set_running(true);

    let task = match container {
        Some(container) if recursive => {
            service.index_project(None, container, runtime.containers.clone())?
        }
        Some(container) => service.index_container(container, None)?,
        None => service.index_full()?,
    };
    let progress = wait_for_task(&task);
    service.commit()?;
    runtime.shutdown()?;
    Ok(progress)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn settings(tmp: &TempDir) -> Settings {
        Settings {
            db_path: tmp.path().join("db").to_string_lossy().to_string(),
            index_path: tmp.path().join("index").to_string_lossy().to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_overrides_win() {
        let mut settings = Settings::default();
        let paths = PathArgs {
            crawl_root: Some("/srv/docs".into()),
            index_path: Some("/var/index".into()),
            db_path: None,
        };
        let db_path = settings.db_path.clone();
        apply_overrides(&mut settings, Some("debug"), &paths);
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.crawl_root.as_deref(), Some("/srv/docs"));
        assert_eq!(settings.index_path, "/var/index");
        assert_eq!(settings.db_path, db_path);
    }

    #[test]
    fn test_crawl_requires_root() {
        let tmp = TempDir::new().unwrap();
        let err = crawl_once(settings(&tmp), false).unwrap_err();
        assert!(err.to_string().contains("No crawl root"));
    }

    #[test]
    fn test_missing_root_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut settings = settings(&tmp);
        settings.crawl_root = Some(tmp.path().join("absent").to_string_lossy().to_string());
        assert!(Runtime::open(settings).is_err());
    }

    #[test]
    fn test_builtin_categories_listed() {
        let names: Vec<_> = search_categories().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["file", "navigation"]);
    }

    #[test]
    fn test_recursive_reindex_of_configured_container() {
        let tmp = TempDir::new().unwrap();
        let files = tmp.path().join("files");
        fs::create_dir_all(files.join("sub")).unwrap();
        fs::write(files.join("a.txt"), "alpha").unwrap();
        fs::write(files.join("sub").join("b.txt"), "beta").unwrap();
        let mut settings = settings(&tmp);
        settings.crawl_root = Some(files.to_string_lossy().to_string());
        settings.indexing.worker_threads = 1;
        settings.indexing.idle_commit_delay_ms = 0;
        let container = settings.container_id.clone();

        let progress = reindex(settings.clone(), Some(&container), true).unwrap();
        assert_eq!(progress.indexed, 2);
        assert_eq!(progress.failed, 0);

        let results = search_index(&settings, &SearchRequest::new("beta").with_category("file")).unwrap();
        assert_eq!(results.total_hits, 1);
    }

    #[test]
    fn test_status_of_empty_index() {
        let tmp = TempDir::new().unwrap();
        let report = status_report(settings(&tmp)).unwrap();
        assert_eq!(report.indexed_documents, Some(0));
        assert!(report.configuration_error.is_none());
        assert_eq!(report.crawl_paths, 0);
        assert!(report.to_string().contains("Indexed documents: 0"));
    }
}
