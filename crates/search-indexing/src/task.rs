//! Index tasks: groups of work items tracked to completion.
//!
//! Every item belongs to at most one task. A task completes once it has
//! been marked ready and its outstanding set is empty; completion happens
//! exactly once and removes the task from the registry. The service's
//! default task is never marked ready and therefore never completes.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use search_types::{DocumentId, Operation, Priority};
use serde::Serialize;
use tracing::{debug, info};

use crate::dispatch::WorkQueues;
use crate::error::IndexingError;
use crate::item::{Runnable, WorkItem};
use crate::resource::Resource;

pub struct IndexTask {
    id: u64,
    description: String,
    is_default: bool,
    started: DateTime<Utc>,
    completed: Mutex<Option<DateTime<Utc>>>,
    completed_changed: Condvar,
    cancelled: AtomicBool,
    ready: AtomicBool,
    done: AtomicBool,
    estimate: AtomicU64,
    indexed: AtomicU64,
    failed: AtomicU64,
    outstanding: Mutex<HashSet<u64>>,
    queues: Weak<WorkQueues>,
    registry: Weak<TaskRegistry>,
}

/// Point-in-time view of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskProgress {
    pub id: u64,
    pub description: String,
    pub estimate: u64,
    pub indexed: u64,
    pub failed: u64,
    pub outstanding: usize,
    pub ready: bool,
    pub cancelled: bool,
    pub started: DateTime<Utc>,
    pub completed: Option<DateTime<Utc>>,
}

impl IndexTask {
    fn new(
        id: u64,
        description: String,
        is_default: bool,
        queues: Weak<WorkQueues>,
        registry: Weak<TaskRegistry>,
    ) -> Self {
        Self {
            id,
            description,
            is_default,
            started: Utc::now(),
            completed: Mutex::new(None),
            completed_changed: Condvar::new(),
            cancelled: AtomicBool::new(false),
            ready: AtomicBool::new(false),
            done: AtomicBool::new(false),
            estimate: AtomicU64::new(0),
            indexed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            outstanding: Mutex::new(HashSet::new()),
            queues,
            registry,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_default(&self) -> bool {
        self.is_default
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// Queue the document `id` for indexing. The resource is resolved when
    /// a worker picks the item up.
    pub fn add_resource(self: &Arc<Self>, id: &str, priority: Priority) -> Result<(), IndexingError> {
        let id = DocumentId::parse(id)?;
        self.submit(|seq, task| {
            WorkItem::resource(seq, Some(task), Operation::Add, id.to_string(), None, priority)
        })
    }

    /// Queue an already materialized resource. Returns false when the
    /// resource asks not to be indexed.
    pub fn add_resource_handle(
        self: &Arc<Self>,
        resource: Arc<dyn Resource>,
        priority: Priority,
    ) -> Result<bool, IndexingError> {
        if !resource.should_index() {
            debug!(doc_id = %resource.id(), "Resource opted out of indexing");
            return Ok(false);
        }
        let id = resource.id().to_string();
        self.submit(|seq, task| {
            WorkItem::resource(seq, Some(task), Operation::Add, id, Some(resource), priority)
        })?;
        Ok(true)
    }

    /// Queue removal of document `id` from the index.
    pub fn delete_resource(self: &Arc<Self>, id: &str, priority: Priority) -> Result<(), IndexingError> {
        let id = DocumentId::parse(id)?;
        self.submit(|seq, task| {
            WorkItem::resource(seq, Some(task), Operation::Delete, id.to_string(), None, priority)
        })
    }

    pub fn add_runnable(self: &Arc<Self>, runnable: Runnable, priority: Priority) -> Result<(), IndexingError> {
        self.submit(|seq, task| WorkItem::runnable(seq, Some(task), runnable, priority))
    }

    fn submit(
        self: &Arc<Self>,
        build: impl FnOnce(u64, Arc<IndexTask>) -> WorkItem,
    ) -> Result<(), IndexingError> {
        let queues = self.queues.upgrade().ok_or(IndexingError::ShutDown)?;
        let item = build(queues.next_seq(), self.clone());
        self.outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(item.seq());
        // Runnables are bookkeeping, not documents
        if !item.is_runnable() {
            self.estimate.fetch_add(1, Ordering::Relaxed);
        }
        queues.enqueue(item);
        Ok(())
    }

    /// No more items will be added; the task completes once its
    /// outstanding items drain.
    pub fn set_ready(&self) -> Result<(), IndexingError> {
        if self.is_default {
            return Err(IndexingError::DefaultTaskReady);
        }
        self.ready.store(true, Ordering::SeqCst);
        self.check_done();
        Ok(())
    }

    /// Stop tracking outstanding items. Items already queued still run or
    /// are skipped, but their completion no longer affects this task.
    ///
    /// Cancelling the default task only forgets its outstanding items; it
    /// keeps accepting work.
    pub fn cancel(&self) {
        self.outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        if self.is_default {
            return;
        }
        self.cancelled.store(true, Ordering::SeqCst);
        info!(task = %self.description, "Index task cancelled");
        self.ready.store(true, Ordering::SeqCst);
        self.check_done();
    }

    pub(crate) fn complete_item(&self, seq: u64, success: bool, counted: bool) {
        if !self.remove_outstanding(seq) {
            return;
        }
        if counted {
            let counter = if success { &self.indexed } else { &self.failed };
            counter.fetch_add(1, Ordering::Relaxed);
        }
        self.check_done();
    }

    pub(crate) fn discard_item(&self, seq: u64, counted: bool) {
        if !self.remove_outstanding(seq) {
            return;
        }
        if counted {
            let _ = self
                .estimate
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        }
        self.check_done();
    }

    fn remove_outstanding(&self, seq: u64) -> bool {
        self.outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&seq)
    }

    fn check_done(&self) {
        if self.is_default || !self.ready.load(Ordering::SeqCst) {
            return;
        }
        if !self
            .outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
        {
            return;
        }
        if self.done.swap(true, Ordering::SeqCst) {
            return;
        }

        {
            let mut completed = self.completed.lock().unwrap_or_else(PoisonError::into_inner);
            *completed = Some(Utc::now());
            self.completed_changed.notify_all();
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
        info!(
            task = %self.description,
            indexed = self.indexed.load(Ordering::Relaxed),
            failed = self.failed.load(Ordering::Relaxed),
            "Index task complete"
        );
    }

    /// Block until the task completes, up to `timeout`.
    pub fn wait(&self, timeout: Duration) -> bool {
        let completed = self.completed.lock().unwrap_or_else(PoisonError::into_inner);
        let (completed, _) = self
            .completed_changed
            .wait_timeout_while(completed, timeout, |completed| completed.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        completed.is_some()
    }

    pub fn progress(&self) -> TaskProgress {
        TaskProgress {
            id: self.id,
            description: self.description.clone(),
            estimate: self.estimate.load(Ordering::Relaxed),
            indexed: self.indexed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            outstanding: self
                .outstanding
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
            ready: self.ready.load(Ordering::SeqCst),
            cancelled: self.is_cancelled(),
            started: self.started,
            completed: *self.completed.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }
}

impl std::fmt::Debug for IndexTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexTask")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("is_default", &self.is_default)
            .finish()
    }
}

/// Live tasks, including the default task.
pub struct TaskRegistry {
    tasks: Mutex<HashMap<u64, Arc<IndexTask>>>,
    next_id: AtomicU64,
    queues: Weak<WorkQueues>,
}

impl TaskRegistry {
    pub(crate) fn new(queues: &Arc<WorkQueues>) -> Arc<Self> {
        Arc::new(Self {
            tasks: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            queues: Arc::downgrade(queues),
        })
    }

    pub(crate) fn create(self: &Arc<Self>, description: impl Into<String>, is_default: bool) -> Arc<IndexTask> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let task = Arc::new(IndexTask::new(
            id,
            description.into(),
            is_default,
            self.queues.clone(),
            Arc::downgrade(self),
        ));
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, task.clone());
        debug!(task_id = id, task = %task.description, "Created index task");
        task
    }

    fn remove(&self, id: u64) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    pub fn get(&self, id: u64) -> Option<Arc<IndexTask>> {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Live tasks, oldest first.
    pub fn list(&self) -> Vec<Arc<IndexTask>> {
        let mut tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.id);
        tasks
    }

    pub(crate) fn cancel_all(&self) {
        for task in self.list() {
            task.cancel();
        }
    }
}
