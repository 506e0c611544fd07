//! Work items: the unit moving through the pipeline.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use search_types::{Operation, Priority};

use crate::error::IndexingError;
use crate::resource::{ResolverRegistry, Resource};
use crate::task::IndexTask;

type Action = dyn Fn() -> Result<(), IndexingError> + Send + Sync;

/// A deferred action run by the single runner thread.
#[derive(Clone)]
pub struct Runnable {
    name: String,
    action: Arc<Action>,
}

impl Runnable {
    pub fn new(
        name: impl Into<String>,
        action: impl Fn() -> Result<(), IndexingError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            action: Arc::new(action),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn run(&self) -> Result<(), IndexingError> {
        (self.action)()
    }

    fn identity(&self) -> usize {
        Arc::as_ptr(&self.action) as *const () as usize
    }
}

impl fmt::Debug for Runnable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runnable").field("name", &self.name).finish()
    }
}

enum Payload {
    Resource {
        id: String,
        resource: Option<Arc<dyn Resource>>,
        resolved: bool,
    },
    Runnable(Runnable),
    /// Asks a worker to consider committing.
    CommitMarker,
}

/// Value-equality key of a work item. Two items with equal keys do the
/// same work, so deferred enqueues coalesce on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ItemKey {
    Resource { operation: Operation, id: String },
    Runnable(usize),
    CommitMarker,
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemKey::Resource { operation, id } => write!(f, "{operation}:{id}"),
            ItemKey::Runnable(identity) => write!(f, "run:{identity:x}"),
            ItemKey::CommitMarker => f.write_str("commit"),
        }
    }
}

pub struct WorkItem {
    seq: u64,
    operation: Operation,
    priority: Priority,
    payload: Payload,
    task: Option<Arc<IndexTask>>,
    attempts: u32,
    discovered: DateTime<Utc>,
}

impl WorkItem {
    pub(crate) fn resource(
        seq: u64,
        task: Option<Arc<IndexTask>>,
        operation: Operation,
        id: String,
        resource: Option<Arc<dyn Resource>>,
        priority: Priority,
    ) -> Self {
        let resolved = resource.is_some();
        Self {
            seq,
            operation,
            priority,
            payload: Payload::Resource {
                id,
                resource,
                resolved,
            },
            task,
            attempts: 0,
            discovered: Utc::now(),
        }
    }

    pub(crate) fn runnable(
        seq: u64,
        task: Option<Arc<IndexTask>>,
        runnable: Runnable,
        priority: Priority,
    ) -> Self {
        Self {
            seq,
            operation: Operation::Noop,
            priority,
            payload: Payload::Runnable(runnable),
            task,
            attempts: 0,
            discovered: Utc::now(),
        }
    }

    pub(crate) fn commit_marker(seq: u64) -> Self {
        Self {
            seq,
            operation: Operation::Noop,
            priority: Priority::Commit,
            payload: Payload::CommitMarker,
            task: None,
            attempts: 0,
            discovered: Utc::now(),
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub(crate) fn record_attempt(&mut self) {
        self.attempts += 1;
        // Resolve again on the next attempt
        if let Payload::Resource {
            resource, resolved, ..
        } = &mut self.payload
        {
            *resource = None;
            *resolved = false;
        }
    }

    /// When the item was created; the watermark is never set earlier.
    pub fn discovered(&self) -> DateTime<Utc> {
        self.discovered
    }

    /// Document id, runnable name, or "commit".
    pub fn id(&self) -> &str {
        match &self.payload {
            Payload::Resource { id, .. } => id,
            Payload::Runnable(r) => r.name(),
            Payload::CommitMarker => "commit",
        }
    }

    pub fn key(&self) -> ItemKey {
        match &self.payload {
            Payload::Resource { id, .. } => ItemKey::Resource {
                operation: self.operation,
                id: id.clone(),
            },
            Payload::Runnable(r) => ItemKey::Runnable(r.identity()),
            Payload::CommitMarker => ItemKey::CommitMarker,
        }
    }

    pub fn is_runnable(&self) -> bool {
        matches!(self.payload, Payload::Runnable(_))
    }

    pub fn is_commit_marker(&self) -> bool {
        matches!(self.payload, Payload::CommitMarker)
    }

    pub fn runnable_action(&self) -> Option<&Runnable> {
        match &self.payload {
            Payload::Runnable(r) => Some(r),
            _ => None,
        }
    }

    pub fn task_cancelled(&self) -> bool {
        self.task.as_ref().is_some_and(|t| t.is_cancelled())
    }

    /// The item's resource, resolved on first access.
    pub fn resolve(&mut self, registry: &ResolverRegistry) -> Option<Arc<dyn Resource>> {
        match &mut self.payload {
            Payload::Resource {
                id,
                resource,
                resolved,
            } => {
                if !*resolved {
                    *resource = registry.resolve(id);
                    *resolved = true;
                }
                resource.clone()
            }
            _ => None,
        }
    }

    /// The resource if it has already been resolved.
    pub fn cached_resource(&self) -> Option<&Arc<dyn Resource>> {
        match &self.payload {
            Payload::Resource { resource, .. } => resource.as_ref(),
            _ => None,
        }
    }

    pub(crate) fn completion(&self) -> Completion {
        Completion {
            task: self.task.clone(),
            seq: self.seq,
            counted: matches!(self.payload, Payload::Resource { .. }),
        }
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("seq", &self.seq)
            .field("key", &self.key())
            .field("priority", &self.priority)
            .field("attempts", &self.attempts)
            .finish()
    }
}

/// Reports an item's outcome to its task.
#[derive(Clone)]
pub(crate) struct Completion {
    task: Option<Arc<IndexTask>>,
    seq: u64,
    /// Only resource items count towards the estimate and the
    /// indexed/failed totals.
    counted: bool,
}

impl Completion {
    pub(crate) fn complete(&self, success: bool) {
        if let Some(task) = &self.task {
            task.complete_item(self.seq, success, self.counted);
        }
    }

    /// The item was dropped without being processed (queue purge,
    /// coalesced duplicate, rolled-back transaction).
    pub(crate) fn discard(&self) {
        if let Some(task) = &self.task {
            task.discard_item(self.seq, self.counted);
        }
    }
}

/// Completes the item as failed if dropped while armed, so panics and early
/// returns never leak a task's outstanding entry.
pub(crate) struct CompletionGuard {
    completion: Option<Completion>,
}

impl CompletionGuard {
    pub(crate) fn new(completion: Completion) -> Self {
        Self {
            completion: Some(completion),
        }
    }

    pub(crate) fn finish(mut self, success: bool) {
        if let Some(completion) = self.completion.take() {
            completion.complete(success);
        }
    }

    /// The item was requeued and will complete later.
    pub(crate) fn disarm(mut self) {
        self.completion = None;
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if let Some(completion) = self.completion.take() {
            completion.complete(false);
        }
    }
}
