//! The two work queues and the transaction-aware enqueue path.
//!
//! Resource items go to the pre-queue drained by the worker pool;
//! runnables go to the run queue drained by the single runner thread.
//! Inside an active storage transaction an enqueue is deferred until the
//! transaction commits, and identical items coalesce.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, Weak};
use std::time::Duration;

use search_storage::transaction;
use tracing::{debug, warn};

use crate::item::WorkItem;
use crate::queue::PriorityQueue;

pub(crate) struct WorkQueues {
    pub(crate) pre: PriorityQueue<WorkItem>,
    pub(crate) run: PriorityQueue<WorkItem>,
    next_seq: AtomicU64,
    /// Items queued or being processed.
    pending: AtomicUsize,
    /// Held while checking or signalling the two conditions below.
    signal: Mutex<()>,
    idle_changed: Condvar,
    /// The pre-queue shrank or the queues closed.
    capacity_changed: Condvar,
}

/// An item parked in a transaction's commit hook. Dropping it unrun
/// (duplicate key, rollback) discards the item.
struct PendingItem(Option<WorkItem>);

impl PendingItem {
    fn take(mut self) -> Option<WorkItem> {
        self.0.take()
    }
}

impl Drop for PendingItem {
    fn drop(&mut self) {
        if let Some(item) = self.0.take() {
            debug!(key = %item.key(), "Discarding deferred item");
            item.completion().discard();
        }
    }
}

impl WorkQueues {
    pub(crate) fn new() -> Self {
        Self {
            pre: PriorityQueue::new(),
            run: PriorityQueue::new(),
            next_seq: AtomicU64::new(1),
            pending: AtomicUsize::new(0),
            signal: Mutex::new(()),
            idle_changed: Condvar::new(),
            capacity_changed: Condvar::new(),
        }
    }

    pub(crate) fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Queue `item`, deferring to the commit of the current transaction if
    /// one is active on this thread.
    pub(crate) fn enqueue(self: &Arc<Self>, item: WorkItem) {
        if transaction::is_active() {
            self.defer(item);
        } else {
            self.enqueue_now(item);
        }
    }

    fn defer(self: &Arc<Self>, item: WorkItem) {
        let key = item.key().to_string();
        let queues: Weak<WorkQueues> = Arc::downgrade(self);
        let pending = PendingItem(Some(item));
        let result = transaction::add_commit_task(key.clone(), move || {
            let item = pending.take();
            if let (Some(queues), Some(item)) = (queues.upgrade(), item) {
                queues.enqueue_now(item);
            }
        });
        match result {
            Ok(true) => debug!(key = %key, "Deferred enqueue until commit"),
            Ok(false) => debug!(key = %key, "Coalesced duplicate deferred item"),
            Err(e) => warn!(key = %key, error = %e, "Could not defer enqueue"),
        }
    }

    pub(crate) fn enqueue_now(&self, item: WorkItem) {
        let priority = item.priority();
        let queue = if item.is_runnable() {
            &self.run
        } else {
            &self.pre
        };
        self.pending.fetch_add(1, Ordering::SeqCst);
        if let Err(item) = queue.put(priority, item) {
            debug!(key = %item.key(), "Queue closed, dropping item");
            item.completion().discard();
            self.finished();
        }
    }

    /// An item taken from a queue is done (processed, failed or requeued).
    pub(crate) fn finished(&self) {
        let previous = self.pending.fetch_sub(1, Ordering::SeqCst);
        if previous <= 1 {
            let _guard = self.signal.lock().unwrap_or_else(PoisonError::into_inner);
            self.idle_changed.notify_all();
        }
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Take the next pre-queue item, waiting up to `timeout`, and wake a
    /// throttled runner once the queue is at or below `high_water_mark`.
    pub(crate) fn take_pre(&self, timeout: Duration, high_water_mark: usize) -> Option<WorkItem> {
        let item = self.pre.poll(timeout)?;
        if self.pre.len() <= high_water_mark {
            let _guard = self.signal.lock().unwrap_or_else(PoisonError::into_inner);
            self.capacity_changed.notify_all();
        }
        Some(item)
    }

    /// Block while the pre-queue holds more than `high_water_mark` items.
    /// Returns early when the queues close.
    pub(crate) fn wait_for_capacity(&self, high_water_mark: usize) {
        let guard = self.signal.lock().unwrap_or_else(PoisonError::into_inner);
        let _guard = self
            .capacity_changed
            .wait_while(guard, |_| {
                !self.pre.is_closed() && self.pre.len() > high_water_mark
            })
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Block until nothing is queued or in flight, up to `timeout`.
    pub(crate) fn wait_for_idle(&self, timeout: Duration) -> bool {
        let guard = self.signal.lock().unwrap_or_else(PoisonError::into_inner);
        let (_guard, result) = self
            .idle_changed
            .wait_timeout_while(guard, timeout, |_| self.pending() > 0)
            .unwrap_or_else(PoisonError::into_inner);
        !result.timed_out() || self.pending() == 0
    }

    /// Remove every queued item, discarding each from its task.
    pub(crate) fn clear(&self) -> usize {
        let mut items = self.pre.clear();
        items.extend(self.run.clear());
        let count = items.len();
        for item in items {
            item.completion().discard();
            self.finished();
        }
        count
    }

    pub(crate) fn close(&self) {
        self.pre.close();
        self.run.close();
        let _guard = self.signal.lock().unwrap_or_else(PoisonError::into_inner);
        self.capacity_changed.notify_all();
        self.idle_changed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use search_storage::Storage;
    use search_types::{Operation, Priority};
    use tempfile::TempDir;

    fn item(queues: &WorkQueues, id: &str) -> WorkItem {
        WorkItem::resource(
            queues.next_seq(),
            None,
            Operation::Add,
            id.to_string(),
            None,
            Priority::Item,
        )
    }

    #[test]
    fn test_enqueue_routes_by_kind() {
        let queues = Arc::new(WorkQueues::new());
        queues.enqueue(item(&queues, "mem:a"));
        let runnable = crate::item::Runnable::new("noop", || Ok(()));
        queues.enqueue(WorkItem::runnable(queues.next_seq(), None, runnable, Priority::Crawl));

        assert_eq!(queues.pre.len(), 1);
        assert_eq!(queues.run.len(), 1);
        assert_eq!(queues.pending(), 2);

        assert_eq!(queues.clear(), 2);
        assert_eq!(queues.pending(), 0);
        assert!(queues.wait_for_idle(Duration::from_millis(10)));
    }

    #[test]
    fn test_transaction_defers_and_coalesces() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let queues = Arc::new(WorkQueues::new());

        let txn = storage.begin().unwrap();
        queues.enqueue(item(&queues, "mem:a"));
        queues.enqueue(item(&queues, "mem:a"));
        queues.enqueue(item(&queues, "mem:b"));
        assert!(queues.pre.is_empty());

        txn.commit().unwrap();
        assert_eq!(queues.pre.len(), 2);
    }

    #[test]
    fn test_rollback_discards_deferred_items() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let queues = Arc::new(WorkQueues::new());

        {
            let _txn = storage.begin().unwrap();
            queues.enqueue(item(&queues, "mem:a"));
        }
        assert!(queues.pre.is_empty());
        assert_eq!(queues.pending(), 0);
    }

    #[test]
    fn test_closed_queue_drops_items() {
        let queues = Arc::new(WorkQueues::new());
        queues.close();
        queues.enqueue(item(&queues, "mem:a"));
        assert!(queues.pre.is_empty());
        assert_eq!(queues.pending(), 0);
    }

    #[test]
    fn test_capacity_wait_wakes_when_pre_queue_drains() {
        let queues = Arc::new(WorkQueues::new());
        for id in ["mem:a", "mem:b", "mem:c"] {
            queues.enqueue(item(&queues, id));
        }

        let waiter = {
            let queues = queues.clone();
            std::thread::spawn(move || queues.wait_for_capacity(1))
        };
        std::thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());

        assert!(queues.take_pre(Duration::from_millis(10), 1).is_some());
        assert!(queues.take_pre(Duration::from_millis(10), 1).is_some());
        waiter.join().unwrap();
        assert_eq!(queues.pre.len(), 1);
    }

    #[test]
    fn test_close_releases_capacity_waiters() {
        let queues = Arc::new(WorkQueues::new());
        queues.enqueue(item(&queues, "mem:a"));
        queues.enqueue(item(&queues, "mem:b"));
        let waiter = {
            let queues = queues.clone();
            std::thread::spawn(move || queues.wait_for_capacity(0))
        };
        queues.close();
        waiter.join().unwrap();
    }

    #[test]
    fn test_idle_wait_wakes_on_finish() {
        let queues = Arc::new(WorkQueues::new());
        queues.enqueue(item(&queues, "mem:a"));
        assert!(!queues.wait_for_idle(Duration::from_millis(20)));

        let worker = {
            let queues = queues.clone();
            std::thread::spawn(move || {
                let taken = queues.take_pre(Duration::from_secs(1), 10);
                assert!(taken.is_some());
                queues.finished();
            })
        };
        assert!(queues.wait_for_idle(Duration::from_secs(10)));
        worker.join().unwrap();
    }
}
