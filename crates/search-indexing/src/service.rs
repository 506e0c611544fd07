//! The indexing service.
//!
//! A pool of worker threads drains the pre-processing queue: each worker
//! resolves the item's resource, extracts its content and writes it to the
//! index. A single runner thread executes runnables (crawl steps, bulk
//! deletes, provider enumerations) one at a time and stalls while the
//! pre-processing queue is above its high-water mark. A timer thread
//! periodically commits pending writes so they become searchable.
//!
//! All commits happen under one commit lock together with the counters
//! that drive them.

use std::collections::{BTreeSet, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use search_extract::{extract_summary, ExtractedContent, ExtractorChain, SizePolicy};
use search_index::document::property;
use search_index::{IndexDocument, ManagerHandle, SearchIndexConfig, SecurityPolicy};
use search_storage::{CrawlPath, Storage};
use search_types::{ExtractionSettings, IndexingSettings, Operation, Priority};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dispatch::WorkQueues;
use crate::error::{FailureKind, IndexingError};
use crate::item::{CompletionGuard, Runnable, WorkItem};
use crate::provider::DocumentProvider;
use crate::resource::{ResolverRegistry, Resource};
use crate::stats::{CommitState, HourlyRate, RATE_DELETED, RATE_INDEXED};
use crate::task::{IndexTask, TaskProgress, TaskRegistry};

/// Weight of a queued runnable in the busy estimate.
const RUNNABLE_WEIGHT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Indexed,
    Deleted,
    /// The resource no longer exists.
    Gone,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub running: bool,
    pub busy: bool,
    pub pre_queue: usize,
    pub run_queue: usize,
    pub tasks: Vec<TaskProgress>,
    pub indexed_since_commit: u64,
    pub total_indexed: u64,
    pub total_failed: u64,
    pub commits: u64,
    pub last_commit: Option<DateTime<Utc>>,
    pub index_available: bool,
    pub configuration_error: Option<String>,
    pub rates: Vec<HourlyRate>,
}

/// What a maintenance pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    /// Watermarks older than the retention window.
    pub examined: usize,
    /// Of those, documents that no longer exist and were forgotten.
    pub removed: usize,
}

pub struct IndexingService {
    settings: IndexingSettings,
    summary_length: usize,
    extractors: ExtractorChain,
    storage: Arc<Storage>,
    index: Arc<ManagerHandle>,
    resolvers: Arc<ResolverRegistry>,
    queues: Arc<WorkQueues>,
    tasks: Arc<TaskRegistry>,
    default_task: Arc<IndexTask>,
    providers: RwLock<Vec<Arc<dyn DocumentProvider>>>,
    commit_state: Mutex<CommitState>,
    running: Mutex<bool>,
    running_changed: Condvar,
    started: AtomicBool,
    cancel: CancellationToken,
    /// Dropped on shutdown, which disconnects `timer_stop`.
    timer_stop_tx: Mutex<Option<Sender<()>>>,
    timer_stop: Receiver<()>,
    /// Each service thread sends its name here as it exits.
    exit_tx: Sender<String>,
    exits: Receiver<String>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

/// Reports the owning thread's exit, including by panic.
struct ExitNotice {
    name: String,
    exits: Sender<String>,
}

impl Drop for ExitNotice {
    fn drop(&mut self) {
        let _ = self.exits.send(std::mem::take(&mut self.name));
    }
}

impl IndexingService {
    pub fn new(
        settings: IndexingSettings,
        extraction: &ExtractionSettings,
        storage: Arc<Storage>,
        index: Arc<ManagerHandle>,
        resolvers: Arc<ResolverRegistry>,
    ) -> Arc<Self> {
        let queues = Arc::new(WorkQueues::new());
        let tasks = TaskRegistry::new(&queues);
        let default_task = tasks.create("default", true);
        let (timer_stop_tx, timer_stop) = crossbeam_channel::bounded(0);
        let (exit_tx, exits) = crossbeam_channel::unbounded();
        Arc::new(Self {
            settings,
            summary_length: extraction.summary_length,
            extractors: ExtractorChain::new(SizePolicy::from(extraction)),
            storage,
            index,
            resolvers,
            queues,
            tasks,
            default_task,
            providers: RwLock::new(Vec::new()),
            commit_state: Mutex::new(CommitState::new()),
            running: Mutex::new(false),
            running_changed: Condvar::new(),
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            timer_stop_tx: Mutex::new(Some(timer_stop_tx)),
            timer_stop,
            exit_tx,
            exits,
            threads: Mutex::new(Vec::new()),
        })
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn index(&self) -> &Arc<ManagerHandle> {
        &self.index
    }

    pub fn resolvers(&self) -> &Arc<ResolverRegistry> {
        &self.resolvers
    }

    /// Cancelled when the service shuts down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn the worker pool, the runner and the refresh timer. Calling it
    /// again is a no-op.
    pub fn start(self: &Arc<Self>) -> Result<(), IndexingError> {
        if self.cancel.is_cancelled() {
            return Err(IndexingError::ShutDown);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let workers = self.settings.effective_worker_threads();
        let mut threads = self.threads.lock().unwrap_or_else(PoisonError::into_inner);
        for i in 0..workers {
            threads.push(self.spawn(format!("search-indexer-{i}"), Self::worker_loop)?);
        }
        threads.push(self.spawn("search-runner".to_string(), Self::runner_loop)?);
        threads.push(self.spawn("search-refresh".to_string(), Self::timer_loop)?);

        info!(workers, "Indexing service started");
        Ok(())
    }

    fn spawn(
        self: &Arc<Self>,
        name: String,
        body: fn(Arc<Self>),
    ) -> Result<JoinHandle<()>, IndexingError> {
        let service = self.clone();
        let notice = ExitNotice {
            name: name.clone(),
            exits: self.exit_tx.clone(),
        };
        let handle = thread::Builder::new().name(name).spawn(move || {
            let _notice = notice;
            body(service);
        })?;
        Ok(handle)
    }

    // ---- running gate -------------------------------------------------

    /// Allow or hold back the runner. Workers keep draining the
    /// pre-processing queue either way.
    pub fn set_running(&self, running: bool) {
        let mut guard = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if *guard != running {
            info!(running, "Indexing runner state changed");
        }
        *guard = running;
        self.running_changed.notify_all();
    }

    pub fn is_running(&self) -> bool {
        *self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until running, up to `timeout`. False on timeout or shutdown.
    pub fn wait_for_running(&self, timeout: Duration) -> bool {
        let running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        let (running, _) = self
            .running_changed
            .wait_timeout_while(running, timeout, |running| {
                !*running && !self.cancel.is_cancelled()
            })
            .unwrap_or_else(PoisonError::into_inner);
        *running && !self.cancel.is_cancelled()
    }

    // ---- tasks and submission -----------------------------------------

    pub fn create_task(&self, description: impl Into<String>) -> Arc<IndexTask> {
        self.tasks.create(description, false)
    }

    /// The never-completing task that owns ad hoc submissions.
    pub fn default_task(&self) -> &Arc<IndexTask> {
        &self.default_task
    }

    pub fn tasks(&self) -> Vec<Arc<IndexTask>> {
        self.tasks.list()
    }

    /// Queue document `id` for indexing on the default task.
    pub fn add_resource(&self, id: &str, priority: Priority) -> Result<(), IndexingError> {
        self.default_task.add_resource(id, priority)
    }

    /// Queue removal of document `id` on the default task.
    pub fn delete_resource(&self, id: &str) -> Result<(), IndexingError> {
        self.default_task.delete_resource(id, Priority::Delete)
    }

    /// Remove every document of `container_id` from the index, as a
    /// background runnable.
    pub fn delete_container(self: &Arc<Self>, container_id: &str) -> Result<(), IndexingError> {
        let service = Arc::downgrade(self);
        let container = container_id.to_string();
        let runnable = Runnable::new(format!("delete container {container}"), move || {
            let service = service.upgrade().ok_or(IndexingError::ShutDown)?;
            service.index.current().delete_container(&container)?;
            service.lock_commit_state().record_change(RATE_DELETED);
            info!(container = %container, "Deleted container from index");
            Ok(())
        });
        self.default_task.add_runnable(runnable, Priority::Background)
    }

    pub fn add_document_provider(&self, provider: Arc<dyn DocumentProvider>) {
        debug!(provider = provider.name(), "Registered document provider");
        self.providers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(provider);
    }

    fn providers(&self) -> Vec<Arc<dyn DocumentProvider>> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Ask every provider for the documents of `container_id` modified
    /// after `since`. Returns the task tracking them.
    pub fn index_container(
        &self,
        container_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Arc<IndexTask>, IndexingError> {
        self.enumerate_providers(
            format!("Index container {container_id}"),
            Some(container_id.to_string()),
            since,
        )
    }

    /// Ask every provider for all of its documents.
    pub fn index_full(&self) -> Result<Arc<IndexTask>, IndexingError> {
        self.enumerate_providers("Full reindex".to_string(), None, None)
    }

    /// Reindex `project` and every container below it in `containers`.
    /// The subtree is walked by a bulk runnable, which queues one provider
    /// enumeration per container. Uses `task` when given, leaving it to the
    /// caller to mark it ready; otherwise creates a ready task.
    pub fn index_project(
        self: &Arc<Self>,
        task: Option<Arc<IndexTask>>,
        project: &str,
        containers: Arc<dyn SecurityPolicy>,
    ) -> Result<Arc<IndexTask>, IndexingError> {
        let created = task.is_none();
        let task = task.unwrap_or_else(|| self.create_task(format!("Index project {project}")));

        let service = Arc::downgrade(self);
        let walking = task.clone();
        let root = project.to_string();
        let runnable = Runnable::new(format!("walk project {project}"), move || {
            let service = service.upgrade().ok_or(IndexingError::ShutDown)?;
            let subtree = container_subtree(containers.as_ref(), &root);
            debug!(project = %root, containers = subtree.len(), "Indexing project");
            for container in subtree {
                service.add_provider_runnables(&walking, Some(container), None)?;
            }
            Ok(())
        });
        task.add_runnable(runnable, Priority::Bulk)?;
        if created {
            task.set_ready()?;
        }
        Ok(task)
    }

    fn enumerate_providers(
        &self,
        description: String,
        container: Option<String>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Arc<IndexTask>, IndexingError> {
        let task = self.create_task(description);
        self.add_provider_runnables(&task, container, since)?;
        task.set_ready()?;
        Ok(task)
    }

    fn add_provider_runnables(
        &self,
        task: &Arc<IndexTask>,
        container: Option<String>,
        since: Option<DateTime<Utc>>,
    ) -> Result<(), IndexingError> {
        for provider in self.providers() {
            let enumerating = task.clone();
            let name = match &container {
                Some(c) => format!("enumerate {} in {c}", provider.name()),
                None => format!("enumerate {}", provider.name()),
            };
            let container = container.clone();
            let runnable = Runnable::new(name, move || {
                provider.enumerate_documents(&enumerating, container.as_deref(), since)
            });
            task.add_runnable(runnable, Priority::Bulk)?;
        }
        Ok(())
    }

    // ---- worker -------------------------------------------------------

    fn worker_loop(self: Arc<Self>) {
        let poll = Duration::from_millis(self.settings.poll_timeout_ms);
        while !self.cancel.is_cancelled() {
            match self.queues.take_pre(poll, self.settings.high_water_mark) {
                None => self.commit_if_idle(),
                Some(item) if item.is_commit_marker() => {
                    self.commit_if_idle();
                    self.queues.finished();
                }
                Some(item) => {
                    let result = panic::catch_unwind(AssertUnwindSafe(|| self.process_item(item)));
                    if result.is_err() {
                        error!("Indexing worker panicked while processing an item");
                    }
                    self.queues.finished();
                }
            }
        }
        debug!("Indexing worker exiting");
    }

    fn process_item(&self, mut item: WorkItem) {
        let guard = CompletionGuard::new(item.completion());
        if item.task_cancelled() {
            debug!(doc_id = item.id(), "Skipping item of cancelled task");
            guard.finish(false);
            return;
        }

        let result = match item.operation() {
            Operation::Add => self.index_item(&mut item),
            Operation::Delete => self.delete_item(&item),
            Operation::Noop => Ok(ItemOutcome::Skipped),
        };
        match result {
            Ok(outcome) => {
                debug!(doc_id = item.id(), outcome = ?outcome, "Processed item");
                guard.finish(true);
            }
            Err(e) => self.handle_failure(item, guard, e),
        }
    }

    fn index_item(&self, item: &mut WorkItem) -> Result<ItemOutcome, IndexingError> {
        let Some(resource) = item.resolve(&self.resolvers) else {
            return Ok(ItemOutcome::Gone);
        };
        if !resource.exists() {
            return Ok(ItemOutcome::Gone);
        }
        if !resource.should_index() {
            return Ok(ItemOutcome::Skipped);
        }

        // Never earlier than discovery, so an edit made while the item sat
        // in the queue is picked up by the next crawl.
        let modified = resource.modified();
        let stamp = match modified {
            Some(m) if m > item.discovered() => m,
            _ => item.discovered(),
        };

        // Never indexed, but stamped so the crawler stops offering it.
        if resource.content_type().starts_with("image/") {
            self.storage.set_last_indexed(item.id(), stamp, modified)?;
            return Ok(ItemOutcome::Skipped);
        }

        let document = self.build_document(resource.as_ref())?;
        self.index.current().index(item.id(), &document)?;
        self.storage.set_last_indexed(item.id(), stamp, modified)?;
        self.record_change(RATE_INDEXED);
        Ok(ItemOutcome::Indexed)
    }

    fn delete_item(&self, item: &WorkItem) -> Result<ItemOutcome, IndexingError> {
        self.index.current().delete_document(item.id())?;
        self.storage.delete_document_state(item.id())?;
        self.record_change(RATE_DELETED);
        Ok(ItemOutcome::Deleted)
    }

    fn build_document(&self, resource: &dyn Resource) -> Result<IndexDocument, IndexingError> {
        let content_type = resource.content_type();
        let admitted = match resource.content_length() {
            Some(len) => self.extractors.admits(len, &content_type),
            None => true,
        };
        let ExtractedContent {
            text,
            title: extracted_title,
            metadata,
            truncated,
        } = if admitted {
            let bytes = resource.content()?;
            self.extractors.extract(&bytes, &content_type)?
        } else {
            ExtractedContent::empty_body()
        };
        if truncated || !admitted {
            debug!(doc_id = %resource.id(), content_type = %content_type, "Indexed without body");
        }

        let properties = resource.properties();
        let title = extracted_title
            .filter(|t| !t.trim().is_empty())
            .or_else(|| properties.get(property::TITLE).cloned())
            .unwrap_or_else(|| resource.name().to_string());
        let summary = extract_summary(&text, Some(&title), self.summary_length);

        let mut document = IndexDocument::new(resource.security_context())
            .with_title(title)
            .with_body(text)
            .with_summary(summary);
        if let Some(url) = resource.url() {
            document = document.with_url(url);
        }
        if let Some(modified) = resource.modified() {
            document = document.with_modified(modified);
        }
        document.apply_properties(&properties);
        document.apply_properties(&metadata);
        Ok(document)
    }

    fn handle_failure(&self, mut item: WorkItem, guard: CompletionGuard, err: IndexingError) {
        match err.failure_kind() {
            FailureKind::Transient if item.attempts() < self.settings.max_retries => {
                item.record_attempt();
                warn!(
                    doc_id = item.id(),
                    attempt = item.attempts(),
                    error = %err,
                    "Transient indexing failure, requeueing"
                );
                guard.disarm();
                self.queues.enqueue_now(item);
            }
            FailureKind::Transient => {
                warn!(
                    doc_id = item.id(),
                    attempts = item.attempts(),
                    error = %err,
                    "Giving up on item after retries"
                );
                self.lock_commit_state().record_failure();
                guard.finish(false);
            }
            FailureKind::Content(kind) => {
                warn!(
                    doc_id = item.id(),
                    problem = kind.describe(),
                    error = %err,
                    "Could not extract document content"
                );
                let modified = item.cached_resource().and_then(|r| r.modified());
                if let Err(e) = self.storage.set_index_failed(item.id(), Utc::now(), modified) {
                    error!(doc_id = item.id(), error = %e, "Failed to record extraction failure");
                }
                self.lock_commit_state().record_failure();
                guard.finish(false);
            }
            FailureKind::RetryLater => {
                debug!(doc_id = item.id(), error = %err, "Index unavailable, leaving item for a later crawl");
                guard.finish(false);
            }
            FailureKind::Fatal => {
                error!(doc_id = item.id(), error = %err, "Indexing failed");
                self.lock_commit_state().record_failure();
                guard.finish(false);
            }
        }
    }

    // ---- runner -------------------------------------------------------

    fn runner_loop(self: Arc<Self>) {
        let poll = Duration::from_millis(self.settings.runner_poll_timeout_ms);
        while !self.cancel.is_cancelled() {
            if !self.wait_for_running(poll) {
                continue;
            }
            let Some(item) = self.queues.run.poll(poll) else {
                continue;
            };
            self.throttle();
            self.run_item(item);

            if self.queues.run.is_empty() {
                self.queues
                    .enqueue_now(WorkItem::commit_marker(self.queues.next_seq()));
            }
            self.queues.finished();
        }
        debug!("Indexing runner exiting");
    }

    /// Hold the runner while the pre-processing queue is over its
    /// high-water mark.
    fn throttle(&self) {
        let queued = self.queues.pre.len();
        if queued > self.settings.high_water_mark {
            debug!(queued, "Runner throttled");
            self.queues.wait_for_capacity(self.settings.high_water_mark);
        }
    }

    fn run_item(&self, item: WorkItem) {
        let guard = CompletionGuard::new(item.completion());
        let Some(runnable) = item.runnable_action() else {
            guard.finish(true);
            return;
        };
        if item.task_cancelled() {
            debug!(runnable = runnable.name(), "Skipping runnable of cancelled task");
            guard.finish(false);
            return;
        }

        match panic::catch_unwind(AssertUnwindSafe(|| runnable.run())) {
            Ok(Ok(())) => guard.finish(true),
            Ok(Err(e)) => {
                error!(runnable = runnable.name(), error = %e, "Runnable failed");
                guard.finish(false);
            }
            Err(_) => {
                error!(runnable = runnable.name(), "Runnable panicked");
                guard.finish(false);
            }
        }
    }

    // ---- commits ------------------------------------------------------

    fn timer_loop(self: Arc<Self>) {
        let interval = Duration::from_secs(self.settings.refresh_interval_secs.max(1));
        while let Err(RecvTimeoutError::Timeout) = self.timer_stop.recv_timeout(interval) {
            if let Err(e) = self.refresh() {
                warn!(error = %e, "Periodic index refresh failed");
            }
        }
        debug!("Index refresh timer exiting");
    }

    /// Commit and reopen readers if anything changed since the last commit.
    pub fn refresh(&self) -> Result<bool, IndexingError> {
        let mut state = self.lock_commit_state();
        let refreshed = self.index.current().refresh_if_dirty()?;
        if refreshed {
            state.record_commit();
            debug!("Refreshed index");
        }
        Ok(refreshed)
    }

    fn lock_commit_state(&self) -> MutexGuard<'_, CommitState> {
        self.commit_state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn record_change(&self, category: &str) {
        let mut state = self.lock_commit_state();
        state.record_change(category);
        if state.since_commit > self.settings.commit_threshold {
            if let Err(e) = self.commit_locked(&mut state, "threshold") {
                error!(error = %e, "Threshold commit failed");
            }
        }
    }

    /// Commit when writes are pending, nothing was indexed for the idle
    /// delay, and no runnable is about to produce more work.
    fn commit_if_idle(&self) {
        let idle_delay = Duration::from_millis(self.settings.idle_commit_delay_ms);
        let mut state = self.lock_commit_state();
        let quiet = state
            .last_indexed
            .is_some_and(|last| last.elapsed() >= idle_delay);
        if state.since_commit > 0 && quiet && self.queues.run.is_empty() {
            if let Err(e) = self.commit_locked(&mut state, "idle") {
                error!(error = %e, "Idle commit failed");
            }
        }
    }

    fn commit_locked(&self, state: &mut CommitState, reason: &str) -> Result<(), IndexingError> {
        let documents = state.since_commit;
        match self.index.current().commit() {
            Ok(()) => {
                state.record_commit();
                info!(documents, reason, "Committed index");
                Ok(())
            }
            Err(e) => {
                // The manager is closed now; retrying fails the same way
                // until the index is reinitialized.
                state.since_commit = 0;
                error!(documents, reason, error = %e, "Index commit failed");
                Err(e.into())
            }
        }
    }

    /// Commit now, regardless of the heuristics.
    pub fn commit(&self) -> Result<(), IndexingError> {
        let mut state = self.lock_commit_state();
        self.commit_locked(&mut state, "requested")
    }

    // ---- maintenance --------------------------------------------------

    /// Delete every document, reschedule the whole crawl tree and forget
    /// all watermarks.
    pub fn clear(&self) -> Result<(), IndexingError> {
        info!("Clearing search index");
        self.index.current().delete_all()?;
        self.commit()?;

        let now = Utc::now();
        let paths = self.storage.update_prefix(&CrawlPath::root(), None, Some(now))?;
        let documents = self.storage.clear_document_states("")?;
        info!(paths, documents, "Reset crawl schedule and watermarks");

        for provider in self.providers() {
            if let Err(e) = provider.index_deleted() {
                error!(provider = provider.name(), error = %e, "Provider failed to handle index clear");
            }
        }
        Ok(())
    }

    /// Forget documents whose watermark is older than the retention window
    /// and whose resource no longer exists, then compact storage.
    pub fn maintenance(&self, now: DateTime<Utc>) -> Result<MaintenanceReport, IndexingError> {
        let retention = chrono::Duration::days(self.settings.watermark_retention_days as i64);
        let stale = self.storage.document_states_before(now - retention)?;
        let mut report = MaintenanceReport {
            examined: stale.len(),
            removed: 0,
        };

        for (id, _) in stale {
            let exists = self.resolvers.resolve(&id).is_some_and(|r| r.exists());
            if exists {
                continue;
            }
            match self.index.current().delete_document(&id) {
                Ok(()) => self.record_change(RATE_DELETED),
                Err(e) if e.is_retry_later() => {}
                Err(e) => return Err(e.into()),
            }
            self.storage.delete_document_state(&id)?;
            report.removed += 1;
        }

        self.storage.compact()?;
        info!(
            examined = report.examined,
            removed = report.removed,
            "Search maintenance complete"
        );
        Ok(report)
    }

    /// Cancel every task and drop everything queued.
    pub fn purge_queues(&self) -> usize {
        self.tasks.cancel_all();
        let purged = self.queues.clear();
        info!(purged, "Purged indexing queues");
        purged
    }

    pub fn is_busy(&self) -> bool {
        !self.is_running()
            || self.queues.pre.len() + RUNNABLE_WEIGHT * self.queues.run.len()
                > self.settings.high_water_mark
    }

    /// Block until nothing is queued or being processed, up to `timeout`.
    pub fn wait_for_idle(&self, timeout: Duration) -> bool {
        self.queues.wait_for_idle(timeout)
    }

    pub fn status(&self) -> ServiceStatus {
        let manager = self.index.current();
        let state = self.lock_commit_state();
        ServiceStatus {
            running: self.is_running(),
            busy: self.is_busy(),
            pre_queue: self.queues.pre.len(),
            run_queue: self.queues.run.len(),
            tasks: self.tasks.list().iter().map(|t| t.progress()).collect(),
            indexed_since_commit: state.since_commit,
            total_indexed: state.total_indexed,
            total_failed: state.total_failed,
            commits: state.commits,
            last_commit: state.last_commit,
            index_available: manager.is_real() && !manager.is_closed(),
            configuration_error: self.index.configuration_error(),
            rates: state.rates.buckets(),
        }
    }

    /// Close the current index manager and open a fresh one from `config`.
    pub fn reinitialize(&self, config: &SearchIndexConfig) {
        let mut state = self.lock_commit_state();
        self.index.reinitialize(config);
        state.since_commit = 0;
        info!(
            available = self.index.current().is_real(),
            "Search index reinitialized"
        );
    }

    /// Join every service thread that reports its exit before the join
    /// timeout. Threads still busy after that are left detached.
    fn join_threads(&self) {
        let handles: Vec<_> = self
            .threads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        let deadline = Instant::now() + Duration::from_millis(self.settings.shutdown_join_timeout_ms);
        let mut exited = HashSet::new();
        while exited.len() < handles.len() {
            match self.exits.recv_deadline(deadline) {
                Ok(name) => {
                    exited.insert(name);
                }
                Err(_) => break,
            }
        }
        for handle in handles {
            let name = handle.thread().name().unwrap_or("indexing").to_string();
            if !exited.contains(&name) {
                warn!(thread = %name, "Indexing thread did not stop in time");
            } else if handle.join().is_err() {
                error!(thread = %name, "Indexing thread panicked");
            }
        }
    }

    /// Stop all threads and commit what was indexed since the last commit.
    pub fn shutdown(&self) -> Result<(), IndexingError> {
        if self.cancel.is_cancelled() {
            return Ok(());
        }
        info!("Shutting down indexing service");
        self.cancel.cancel();
        {
            let _guard = self.running.lock().unwrap_or_else(PoisonError::into_inner);
            self.running_changed.notify_all();
        }
        self.timer_stop_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.queues.clear();
        self.queues.close();
        self.join_threads();

        let mut state = self.lock_commit_state();
        if state.since_commit > 0 {
            self.commit_locked(&mut state, "shutdown")?;
        }
        info!("Indexing service stopped");
        Ok(())
    }
}

/// `root` and every container below it, each once.
fn container_subtree(containers: &dyn SecurityPolicy, root: &str) -> BTreeSet<String> {
    let mut seen = BTreeSet::new();
    let mut pending = vec![root.to_string()];
    while let Some(id) = pending.pop() {
        if !seen.insert(id.clone()) {
            continue;
        }
        pending.extend(containers.children(&id).into_iter().map(|c| c.id));
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{MemoryResolver, MemoryResource};
    use search_index::{NoopIndexManager, OpenedIndex};
    use search_types::DocumentId;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        service: Arc<IndexingService>,
        resolver: Arc<MemoryResolver>,
    }

    fn settings() -> IndexingSettings {
        IndexingSettings {
            worker_threads: 2,
            poll_timeout_ms: 20,
            runner_poll_timeout_ms: 20,
            idle_commit_delay_ms: 0,
            shutdown_join_timeout_ms: 2000,
            ..IndexingSettings::default()
        }
    }

    fn fixture_with(settings: IndexingSettings) -> Fixture {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(&dir.path().join("db")).unwrap());
        let index = Arc::new(ManagerHandle::open(&SearchIndexConfig::new(
            dir.path().join("index"),
        )));
        let resolvers = Arc::new(ResolverRegistry::new());
        let resolver = Arc::new(MemoryResolver::new());
        resolvers.register("mem", resolver.clone());
        let service = IndexingService::new(
            settings,
            &ExtractionSettings::default(),
            storage,
            index,
            resolvers,
        );
        Fixture {
            _dir: dir,
            service,
            resolver,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(settings())
    }

    fn text_resource(identifier: &str, body: &str) -> MemoryResource {
        MemoryResource::new(
            DocumentId::new("mem", identifier).unwrap(),
            "c1",
            "text/plain",
            body,
        )
    }

    fn num_docs(service: &IndexingService) -> u64 {
        service.index().current().searcher().unwrap().num_docs()
    }

    #[test]
    fn test_index_and_commit() {
        let f = fixture();
        f.resolver.insert(text_resource("a", "alpha document"));
        f.service.start().unwrap();

        let task = f.service.create_task("batch");
        task.add_resource("mem:a", Priority::Item).unwrap();
        task.set_ready().unwrap();
        assert!(task.wait(Duration::from_secs(10)));
        f.service.commit().unwrap();

        assert_eq!(num_docs(&f.service), 1);
        let state = f.service.storage().document_state("mem:a").unwrap().unwrap();
        assert!(state.last_indexed.is_some());
        assert_eq!(task.progress().indexed, 1);
        f.service.shutdown().unwrap();
    }

    #[test]
    fn test_images_are_skipped_but_stamped() {
        let f = fixture();
        f.resolver.insert(MemoryResource::new(
            DocumentId::new("mem", "photo.png").unwrap(),
            "c1",
            "image/png",
            "\u{89}PNG",
        ));
        f.service.start().unwrap();
        let task = f.service.create_task("image");
        task.add_resource("mem:photo.png", Priority::Item).unwrap();
        task.set_ready().unwrap();
        assert!(task.wait(Duration::from_secs(10)));
        f.service.commit().unwrap();

        assert_eq!(num_docs(&f.service), 0);
        assert_eq!(task.progress().failed, 0);
        let state = f
            .service
            .storage()
            .document_state("mem:photo.png")
            .unwrap()
            .unwrap();
        assert!(state.last_indexed.is_some());
        f.service.shutdown().unwrap();
    }

    #[test]
    fn test_missing_resource_completes_successfully() {
        let f = fixture();
        f.service.start().unwrap();
        let task = f.service.create_task("ghost");
        task.add_resource("mem:ghost", Priority::Item).unwrap();
        task.set_ready().unwrap();
        assert!(task.wait(Duration::from_secs(10)));
        assert_eq!(task.progress().failed, 0);
        assert!(f.service.storage().document_state("mem:ghost").unwrap().is_none());
        f.service.shutdown().unwrap();
    }

    #[test]
    fn test_delete_resource_removes_document_and_watermark() {
        let f = fixture();
        f.resolver.insert(text_resource("a", "alpha"));
        f.service.start().unwrap();
        f.service.add_resource("mem:a", Priority::Item).unwrap();
        assert!(f.service.wait_for_idle(Duration::from_secs(10)));
        f.service.commit().unwrap();
        assert_eq!(num_docs(&f.service), 1);

        f.service.delete_resource("mem:a").unwrap();
        assert!(f.service.wait_for_idle(Duration::from_secs(10)));
        f.service.commit().unwrap();
        assert_eq!(num_docs(&f.service), 0);
        assert!(f.service.storage().document_state("mem:a").unwrap().is_none());
        f.service.shutdown().unwrap();
    }

    #[test]
    fn test_content_failure_stamps_document() {
        let f = fixture();
        f.resolver.insert(MemoryResource::new(
            DocumentId::new("mem", "locked.pdf").unwrap(),
            "c1",
            "application/pdf",
            "%PDF-1.4\n/Encrypt 1 0 R",
        ));
        f.service.start().unwrap();
        let task = f.service.create_task("pdf");
        task.add_resource("mem:locked.pdf", Priority::Item).unwrap();
        task.set_ready().unwrap();
        assert!(task.wait(Duration::from_secs(10)));

        assert_eq!(task.progress().failed, 1);
        let state = f
            .service
            .storage()
            .document_state("mem:locked.pdf")
            .unwrap()
            .unwrap();
        assert!(state.failed_at.is_some());
        assert!(state.last_indexed.is_none());
        f.service.shutdown().unwrap();
    }

    #[test]
    fn test_noop_index_leaves_watermark_unset() {
        let f = fixture();
        f.service.index().swap(OpenedIndex {
            manager: Arc::new(NoopIndexManager::new("disabled for test")),
            configuration_error: Some("disabled for test".into()),
        });
        f.resolver.insert(text_resource("a", "alpha"));
        f.service.start().unwrap();
        f.service.add_resource("mem:a", Priority::Item).unwrap();
        assert!(f.service.wait_for_idle(Duration::from_secs(10)));

        assert!(f.service.storage().document_state("mem:a").unwrap().is_none());
        let status = f.service.status();
        assert!(!status.index_available);
        assert_eq!(status.configuration_error.as_deref(), Some("disabled for test"));
        f.service.shutdown().unwrap();
    }

    #[test]
    fn test_runnables_wait_for_running_gate() {
        let f = fixture();
        f.service.start().unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        f.service
            .default_task()
            .add_runnable(
                Runnable::new("flag", move || {
                    flag.store(true, Ordering::SeqCst);
                    Ok(())
                }),
                Priority::Bulk,
            )
            .unwrap();

        thread::sleep(Duration::from_millis(100));
        assert!(!ran.load(Ordering::SeqCst));
        assert!(f.service.is_busy());

        f.service.set_running(true);
        assert!(f.service.wait_for_idle(Duration::from_secs(10)));
        assert!(ran.load(Ordering::SeqCst));
        f.service.shutdown().unwrap();
    }

    #[test]
    fn test_failing_runnable_does_not_stop_runner() {
        let f = fixture();
        f.service.set_running(true);
        f.service.start().unwrap();
        let task = f.service.create_task("runnables");
        task.add_runnable(Runnable::new("boom", || panic!("boom")), Priority::Bulk)
            .unwrap();
        task.add_runnable(
            Runnable::new("fails", || Err(IndexingError::Runnable("nope".into()))),
            Priority::Bulk,
        )
        .unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        task.add_runnable(
            Runnable::new("ok", move || {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            }),
            Priority::Bulk,
        )
        .unwrap();
        task.set_ready().unwrap();

        assert!(task.wait(Duration::from_secs(10)));
        assert!(ran.load(Ordering::SeqCst));
        f.service.shutdown().unwrap();
    }

    struct RecordingProvider {
        containers: Mutex<Vec<String>>,
    }

    impl DocumentProvider for RecordingProvider {
        fn name(&self) -> &str {
            "recording"
        }

        fn enumerate_documents(
            &self,
            task: &Arc<IndexTask>,
            container: Option<&str>,
            _since: Option<DateTime<Utc>>,
        ) -> Result<(), IndexingError> {
            let container = container.unwrap_or_default().to_string();
            task.add_resource(&format!("mem:{container}"), Priority::Bulk)?;
            self.containers.lock().unwrap().push(container);
            Ok(())
        }
    }

    #[test]
    fn test_index_project_walks_container_subtree() {
        use search_index::{ContainerInfo, InMemorySecurityPolicy};

        let f = fixture();
        let provider = Arc::new(RecordingProvider {
            containers: Mutex::new(Vec::new()),
        });
        f.service.add_document_provider(provider.clone());
        for name in ["p1", "c1", "c2", "other"] {
            f.resolver.insert(
                text_resource(name, "project body")
                    .with_security_context(search_types::SecurityContext::container(name)),
            );
        }
        let mut tree = InMemorySecurityPolicy::new();
        tree.add_container(ContainerInfo::folder("root", None))
            .add_container(ContainerInfo::folder("p1", Some("root")))
            .add_container(ContainerInfo::folder("c1", Some("p1")))
            .add_container(ContainerInfo::folder("c2", Some("c1")))
            .add_container(ContainerInfo::folder("other", Some("root")));
        f.service.set_running(true);
        f.service.start().unwrap();

        let task = f.service.index_project(None, "p1", Arc::new(tree)).unwrap();
        assert!(task.wait(Duration::from_secs(10)));
        f.service.commit().unwrap();

        let mut walked = provider.containers.lock().unwrap().clone();
        walked.sort();
        assert_eq!(walked, vec!["c1", "c2", "p1"]);
        assert_eq!(task.progress().indexed, 3);
        assert_eq!(num_docs(&f.service), 3);
        f.service.shutdown().unwrap();
    }

    #[test]
    fn test_index_project_into_caller_task() {
        use search_index::InMemorySecurityPolicy;

        let f = fixture();
        let provider = Arc::new(RecordingProvider {
            containers: Mutex::new(Vec::new()),
        });
        f.service.add_document_provider(provider.clone());
        f.service.set_running(true);
        f.service.start().unwrap();

        let task = f.service.create_task("caller");
        let returned = f
            .service
            .index_project(Some(task.clone()), "lonely", Arc::new(InMemorySecurityPolicy::new()))
            .unwrap();
        assert!(Arc::ptr_eq(&task, &returned));
        assert!(!task.wait(Duration::from_millis(200)));

        task.set_ready().unwrap();
        assert!(task.wait(Duration::from_secs(10)));
        assert_eq!(*provider.containers.lock().unwrap(), vec!["lonely"]);
        f.service.shutdown().unwrap();
    }

    #[test]
    fn test_delete_container() {
        let f = fixture();
        f.resolver.insert(text_resource("a", "alpha"));
        f.resolver.insert(
            text_resource("b", "beta").with_security_context(search_types::SecurityContext::container("c2")),
        );
        f.service.set_running(true);
        f.service.start().unwrap();
        f.service.add_resource("mem:a", Priority::Item).unwrap();
        f.service.add_resource("mem:b", Priority::Item).unwrap();
        assert!(f.service.wait_for_idle(Duration::from_secs(10)));

        f.service.delete_container("c1").unwrap();
        assert!(f.service.wait_for_idle(Duration::from_secs(10)));
        f.service.commit().unwrap();
        assert_eq!(num_docs(&f.service), 1);
        f.service.shutdown().unwrap();
    }

    #[test]
    fn test_clear_empties_index_and_watermarks() {
        let f = fixture();
        f.resolver.insert(text_resource("a", "alpha"));
        f.service.start().unwrap();
        f.service.add_resource("mem:a", Priority::Item).unwrap();
        assert!(f.service.wait_for_idle(Duration::from_secs(10)));

        f.service.clear().unwrap();
        assert_eq!(num_docs(&f.service), 0);
        assert!(f.service.storage().document_state("mem:a").unwrap().is_none());
        f.service.shutdown().unwrap();
    }

    #[test]
    fn test_maintenance_forgets_vanished_documents() {
        let f = fixture();
        f.resolver.insert(text_resource("kept", "still here"));
        f.resolver.insert(text_resource("gone", "about to vanish"));
        f.service.start().unwrap();
        f.service.add_resource("mem:kept", Priority::Item).unwrap();
        f.service.add_resource("mem:gone", Priority::Item).unwrap();
        assert!(f.service.wait_for_idle(Duration::from_secs(10)));
        f.service.commit().unwrap();
        f.resolver.remove("gone");

        // Fresh watermarks are left alone
        let report = f.service.maintenance(Utc::now()).unwrap();
        assert_eq!(report, MaintenanceReport::default());

        let later = Utc::now() + chrono::Duration::days(8);
        let report = f.service.maintenance(later).unwrap();
        assert_eq!(report.examined, 2);
        assert_eq!(report.removed, 1);
        f.service.commit().unwrap();

        assert_eq!(num_docs(&f.service), 1);
        let storage = f.service.storage();
        assert!(storage.document_state("mem:gone").unwrap().is_none());
        assert!(storage.document_state("mem:kept").unwrap().is_some());
        f.service.shutdown().unwrap();
    }

    #[test]
    fn test_purge_cancels_tasks() {
        let f = fixture();
        // Not started: nothing drains the queues
        let task = f.service.create_task("doomed");
        task.add_resource("mem:a", Priority::Bulk).unwrap();
        task.add_resource("mem:b", Priority::Bulk).unwrap();

        assert_eq!(f.service.purge_queues(), 2);
        assert!(task.is_done());
        assert!(task.is_cancelled());
        assert_eq!(f.service.status().pre_queue, 0);
    }

    #[test]
    fn test_threshold_commit() {
        let f = fixture_with(IndexingSettings {
            commit_threshold: 1,
            idle_commit_delay_ms: 60_000,
            ..settings()
        });
        for name in ["a", "b", "c"] {
            f.resolver.insert(text_resource(name, "body"));
        }
        f.service.start().unwrap();
        let task = f.service.create_task("three");
        for name in ["a", "b", "c"] {
            task.add_resource(&format!("mem:{name}"), Priority::Item).unwrap();
        }
        task.set_ready().unwrap();
        assert!(task.wait(Duration::from_secs(10)));
        assert!(f.service.status().commits >= 1);
        f.service.shutdown().unwrap();
    }

    #[test]
    fn test_shutdown_commits_pending_work() {
        let f = fixture_with(IndexingSettings {
            idle_commit_delay_ms: 60_000,
            ..settings()
        });
        f.resolver.insert(text_resource("a", "alpha"));
        f.service.start().unwrap();
        f.service.add_resource("mem:a", Priority::Item).unwrap();
        assert!(f.service.wait_for_idle(Duration::from_secs(10)));

        f.service.shutdown().unwrap();
        assert_eq!(num_docs(&f.service), 1);
        assert!(matches!(f.service.start(), Err(IndexingError::ShutDown)));
    }

    #[test]
    fn test_shutdown_wakes_blocked_threads() {
        let f = fixture_with(IndexingSettings {
            poll_timeout_ms: 60_000,
            runner_poll_timeout_ms: 60_000,
            refresh_interval_secs: 3_600,
            shutdown_join_timeout_ms: 30_000,
            ..settings()
        });
        f.service.start().unwrap();
        let token = f.service.shutdown_token();
        thread::sleep(Duration::from_millis(50));

        let started = Instant::now();
        f.service.shutdown().unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(token.is_cancelled());
        assert!(f.service.threads.lock().unwrap().is_empty());
    }
}
