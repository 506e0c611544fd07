//! Thread-scoped storage transactions.
//!
//! A [`Transaction`] buffers writes in a `WriteBatch` and registers itself as
//! the active transaction of the calling thread. Code running on that thread
//! can attach post-commit tasks with [`add_commit_task`]; tasks are keyed, and
//! a second task with an equal key is dropped. On `commit()` the batch is
//! written atomically and the tasks run in registration order. Dropping the
//! transaction without committing discards both the writes and the tasks.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use rocksdb::WriteBatch;
use tracing::debug;

use crate::db::Storage;
use crate::error::StorageError;

type CommitTask = Box<dyn FnOnce()>;

#[derive(Default)]
struct CommitTasks {
    keys: HashSet<String>,
    tasks: Vec<CommitTask>,
}

thread_local! {
    static ACTIVE: RefCell<Option<Rc<RefCell<CommitTasks>>>> = const { RefCell::new(None) };
}

/// True when a transaction is open on the calling thread.
pub fn is_active() -> bool {
    ACTIVE.with(|active| active.borrow().is_some())
}

/// Register `task` to run after the calling thread's transaction commits.
///
/// Returns `Ok(false)` when a task with the same key is already registered
/// (the new task is dropped), and `NoActiveTransaction` when no transaction
/// is open.
pub fn add_commit_task(
    key: impl Into<String>,
    task: impl FnOnce() + 'static,
) -> Result<bool, StorageError> {
    ACTIVE.with(|active| {
        let active = active.borrow();
        let tasks = active.as_ref().ok_or(StorageError::NoActiveTransaction)?;
        let mut tasks = tasks.borrow_mut();
        if !tasks.keys.insert(key.into()) {
            return Ok(false);
        }
        tasks.tasks.push(Box::new(task));
        Ok(true)
    })
}

/// An open transaction bound to the thread that created it.
pub struct Transaction<'a> {
    storage: &'a Storage,
    batch: WriteBatch,
    tasks: Rc<RefCell<CommitTasks>>,
}

impl Storage {
    /// Open a transaction on the calling thread.
    ///
    /// Transactions do not nest; a second `begin()` on the same thread
    /// fails with `TransactionActive`.
    pub fn begin(&self) -> Result<Transaction<'_>, StorageError> {
        let tasks = Rc::new(RefCell::new(CommitTasks::default()));
        ACTIVE.with(|active| {
            let mut active = active.borrow_mut();
            if active.is_some() {
                return Err(StorageError::TransactionActive);
            }
            *active = Some(tasks.clone());
            Ok(())
        })?;
        Ok(Transaction {
            storage: self,
            batch: WriteBatch::default(),
            tasks,
        })
    }
}

impl Transaction<'_> {
    pub fn put(&mut self, cf_name: &str, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        let cf = self.storage.cf(cf_name)?;
        self.batch.put_cf(cf, key, value);
        Ok(())
    }

    pub fn delete(&mut self, cf_name: &str, key: &[u8]) -> Result<(), StorageError> {
        let cf = self.storage.cf(cf_name)?;
        self.batch.delete_cf(cf, key);
        Ok(())
    }

    /// Number of buffered writes.
    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    /// Write the batch, then run the post-commit tasks.
    ///
    /// The thread is released before the tasks run, so a task may open a
    /// new transaction of its own.
    pub fn commit(mut self) -> Result<(), StorageError> {
        let batch = std::mem::take(&mut self.batch);
        let result = self.storage.write_batch(batch);
        release_thread();

        result?;

        let tasks = std::mem::take(&mut self.tasks.borrow_mut().tasks);
        debug!(tasks = tasks.len(), "Transaction committed");
        for task in tasks {
            task();
        }
        Ok(())
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        // No-op after commit; otherwise this is a rollback.
        ACTIVE.with(|active| {
            let mut active = active.borrow_mut();
            if active
                .as_ref()
                .is_some_and(|current| Rc::ptr_eq(current, &self.tasks))
            {
                *active = None;
            }
        });
    }
}

fn release_thread() {
    ACTIVE.with(|active| *active.borrow_mut() = None);
}
