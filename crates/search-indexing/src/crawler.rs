//! The crawler: discovers documents in a virtual resource tree.
//!
//! Each directory is crawled by a runnable at crawl priority. Crawling a
//! directory queues its changed documents at background priority and a
//! crawl runnable for every new subdirectory; known subdirectories wait
//! for their own schedule entry to come due. A full crawl descends into
//! everything and ignores watermarks.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use search_storage::CrawlPath;
use search_types::{CrawlerSettings, Priority};
use tracing::{debug, info};

use crate::error::IndexingError;
use crate::item::Runnable;
use crate::service::IndexingService;
use crate::task::IndexTask;

/// A child of a directory in the resource tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeNode {
    Directory(CrawlPath),
    Document {
        id: String,
        modified: Option<DateTime<Utc>>,
    },
}

impl TreeNode {
    pub(crate) fn sort_key(&self) -> &str {
        match self {
            TreeNode::Directory(path) => path.as_str(),
            TreeNode::Document { id, .. } => id,
        }
    }
}

/// The hierarchy the crawler walks.
pub trait ResourceTree: Send + Sync {
    /// Children of `path`; `None` when the directory no longer exists.
    fn list(&self, path: &CrawlPath) -> Result<Option<Vec<TreeNode>>, IndexingError>;
}

pub struct Crawler {
    service: Arc<IndexingService>,
    tree: Arc<dyn ResourceTree>,
    settings: CrawlerSettings,
}

impl Crawler {
    pub fn new(
        service: Arc<IndexingService>,
        tree: Arc<dyn ResourceTree>,
        settings: CrawlerSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            service,
            tree,
            settings,
        })
    }

    /// Persist Running, seed the root into the schedule and release the
    /// runner.
    pub fn start(&self) -> Result<(), IndexingError> {
        let storage = self.service.storage();
        storage.set_crawler_running(true)?;
        let root = CrawlPath::root();
        let entry = storage.ensure_path(&root)?;
        if entry.next_crawl.is_none() {
            storage.update_path(&root, entry.last_crawled, Some(Utc::now()))?;
        }
        self.service.set_running(true);
        info!("Crawler started");
        Ok(())
    }

    /// Persist Paused and hold back new runnables. Queued documents still
    /// drain; what is indexed so far is committed.
    pub fn pause(&self) -> Result<(), IndexingError> {
        self.service.storage().set_crawler_running(false)?;
        self.service.set_running(false);
        self.service.commit()?;
        info!("Crawler paused");
        Ok(())
    }

    pub fn is_running(&self) -> Result<bool, IndexingError> {
        Ok(self.service.storage().crawler_running()?)
    }

    /// Queue a crawl of every schedule entry that is due at `now`.
    /// Returns `None` when paused or when nothing is due.
    pub fn crawl_due(self: &Arc<Self>, now: DateTime<Utc>) -> Result<Option<Arc<IndexTask>>, IndexingError> {
        if !self.is_running()? {
            return Ok(None);
        }
        let min_gap = Duration::seconds(self.settings.min_recrawl_gap_secs as i64);
        let due = self
            .service
            .storage()
            .get_paths_due_for_crawl(self.settings.batch_limit, now, min_gap)?;
        if due.is_empty() {
            return Ok(None);
        }

        let task = self.service.create_task(format!("Crawl {} due paths", due.len()));
        for entry in &due {
            self.submit(&task, entry.crawl_path()?, false)?;
        }
        task.set_ready()?;
        info!(paths = due.len(), "Dispatched due crawl paths");
        Ok(Some(task))
    }

    /// Walk the whole tree, reindexing every document.
    pub fn full_crawl(self: &Arc<Self>) -> Result<Arc<IndexTask>, IndexingError> {
        let task = self.service.create_task("Full crawl");
        self.submit(&task, CrawlPath::root(), true)?;
        task.set_ready()?;
        info!("Started full crawl");
        Ok(task)
    }

    fn submit(self: &Arc<Self>, task: &Arc<IndexTask>, path: CrawlPath, full: bool) -> Result<(), IndexingError> {
        let crawler = self.clone();
        let owner = task.clone();
        let name = format!("crawl {path}");
        let runnable = Runnable::new(name, move || crawler.crawl_path(&owner, &path, full));
        task.add_runnable(runnable, Priority::Crawl)
    }

    fn is_excluded(&self, name: &str) -> bool {
        self.settings.excluded_directories.iter().any(|d| d == name)
    }

    /// Crawl one directory: queue its documents and new subdirectories on
    /// `task`, then reschedule it.
    pub fn crawl_path(
        self: &Arc<Self>,
        task: &Arc<IndexTask>,
        path: &CrawlPath,
        full: bool,
    ) -> Result<(), IndexingError> {
        let storage = self.service.storage();
        let Some(children) = self.tree.list(path)? else {
            let removed = storage.delete_path(path)?;
            info!(path = %path, removed, "Directory is gone, removed from crawl schedule");
            return Ok(());
        };

        let mut documents = 0usize;
        let mut skipped = 0usize;
        let mut directories = 0usize;
        for node in children {
            match node {
                TreeNode::Directory(child) => {
                    if self.is_excluded(child.name()) {
                        continue;
                    }
                    let known = storage.get_path(&child)?.is_some();
                    storage.ensure_path(&child)?;
                    if full || !known {
                        self.submit(task, child, full)?;
                        directories += 1;
                    }
                }
                TreeNode::Document { id, modified } => {
                    if !full {
                        if let Some(state) = storage.document_state(&id)? {
                            if !state.needs_indexing(modified) {
                                skipped += 1;
                                continue;
                            }
                        }
                    }
                    task.add_resource(&id, Priority::Background)?;
                    documents += 1;
                }
            }
        }

        let now = Utc::now();
        let next = now + Duration::seconds(self.settings.recrawl_interval_secs as i64);
        storage.update_path(path, Some(now), Some(next))?;
        debug!(path = %path, documents, skipped, directories, full, "Crawled directory");
        Ok(())
    }
}
