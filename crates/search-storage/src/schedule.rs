//! Persistent crawl schedule.
//!
//! One entry per crawled collection path, keyed by its normalized path.
//! Every non-root entry links to its parent entry by id; the root links to
//! itself. Missing ancestors are created on demand.

use chrono::{DateTime, Duration, Utc};
use rocksdb::{IteratorMode, WriteBatch};
use serde::{Deserialize, Serialize};
use std::sync::PoisonError;
use tracing::debug;

use crate::column_families::CF_CRAWL_PATHS;
use crate::db::Storage;
use crate::error::StorageError;
use crate::keys::CrawlPath;

/// A crawl schedule row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlPathEntry {
    pub id: u64,
    pub path: String,
    /// Parent entry id; the root references itself.
    pub parent_id: u64,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_crawled: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub next_crawl: Option<DateTime<Utc>>,
}

impl CrawlPathEntry {
    pub fn crawl_path(&self) -> Result<CrawlPath, StorageError> {
        CrawlPath::new(&self.path)
    }

    /// `next_crawl < now` and the entry was never crawled or was crawled
    /// more than `min_gap` ago.
    pub fn is_due(&self, now: DateTime<Utc>, min_gap: Duration) -> bool {
        let scheduled = matches!(self.next_crawl, Some(next) if next < now);
        let rested = match self.last_crawled {
            None => true,
            Some(last) => last < now - min_gap,
        };
        scheduled && rested
    }
}

impl Storage {
    /// Get the entry for `path`, creating it and any missing ancestors.
    pub fn ensure_path(&self, path: &CrawlPath) -> Result<CrawlPathEntry, StorageError> {
        let _guard = self
            .schedule_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.ensure_path_locked(path)
    }

    fn ensure_path_locked(&self, path: &CrawlPath) -> Result<CrawlPathEntry, StorageError> {
        if let Some(existing) = self.get_path(path)? {
            return Ok(existing);
        }

        let parent_id = match path.parent() {
            Some(parent) => Some(self.ensure_path_locked(&parent)?.id),
            None => None,
        };
        let id = self.next_path_id();
        let parent_id = parent_id.unwrap_or(id);

        let entry = CrawlPathEntry {
            id,
            path: path.to_string(),
            parent_id,
            last_crawled: None,
            next_crawl: None,
        };
        self.put_path(&entry)?;
        debug!(path = %path, id, parent_id, "Created crawl path entry");
        Ok(entry)
    }

    pub fn get_path(&self, path: &CrawlPath) -> Result<Option<CrawlPathEntry>, StorageError> {
        match self.get(CF_CRAWL_PATHS, &path.to_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_path(&self, entry: &CrawlPathEntry) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(entry)?;
        self.put(CF_CRAWL_PATHS, entry.path.as_bytes(), &bytes)
    }

    /// All schedule entries in path order.
    pub fn list_paths(&self) -> Result<Vec<CrawlPathEntry>, StorageError> {
        let cf = self.cf(CF_CRAWL_PATHS)?;
        let mut entries = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            entries.push(serde_json::from_slice(&value)?);
        }
        Ok(entries)
    }

    /// Entries whose crawl is due, earliest `next_crawl` first, at most
    /// `limit` of them.
    ///
    /// Returned entries are stamped `last_crawled = now` in the same atomic
    /// step, so a concurrent caller will not dispatch them again.
    pub fn get_paths_due_for_crawl(
        &self,
        limit: usize,
        now: DateTime<Utc>,
        min_gap: Duration,
    ) -> Result<Vec<CrawlPathEntry>, StorageError> {
        let _guard = self
            .schedule_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let mut due: Vec<CrawlPathEntry> = self
            .list_paths()?
            .into_iter()
            .filter(|entry| entry.is_due(now, min_gap))
            .collect();
        due.sort_by_key(|entry| entry.next_crawl);
        due.truncate(limit);

        if due.is_empty() {
            return Ok(due);
        }

        let cf = self.cf(CF_CRAWL_PATHS)?;
        let mut batch = WriteBatch::default();
        for entry in &mut due {
            entry.last_crawled = Some(now);
            batch.put_cf(cf, entry.path.as_bytes(), serde_json::to_vec(entry)?);
        }
        self.write_batch(batch)?;

        debug!(count = due.len(), "Dispatched due crawl paths");
        Ok(due)
    }

    /// Set both timestamps of a path, creating the entry if needed.
    pub fn update_path(
        &self,
        path: &CrawlPath,
        last_crawled: Option<DateTime<Utc>>,
        next_crawl: Option<DateTime<Utc>>,
    ) -> Result<CrawlPathEntry, StorageError> {
        let _guard = self
            .schedule_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut entry = self.ensure_path_locked(path)?;
        entry.last_crawled = last_crawled;
        entry.next_crawl = next_crawl;
        self.put_path(&entry)?;
        Ok(entry)
    }

    /// Set both timestamps on `prefix` and every path beneath it.
    ///
    /// Returns the number of entries updated.
    pub fn update_prefix(
        &self,
        prefix: &CrawlPath,
        last_crawled: Option<DateTime<Utc>>,
        next_crawl: Option<DateTime<Utc>>,
    ) -> Result<usize, StorageError> {
        let _guard = self
            .schedule_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let cf = self.cf(CF_CRAWL_PATHS)?;
        let mut batch = WriteBatch::default();
        let mut updated = 0;
        for mut entry in self.list_paths()? {
            if !prefix.contains(&entry.crawl_path()?) {
                continue;
            }
            entry.last_crawled = last_crawled;
            entry.next_crawl = next_crawl;
            batch.put_cf(cf, entry.path.as_bytes(), serde_json::to_vec(&entry)?);
            updated += 1;
        }
        self.write_batch(batch)?;
        Ok(updated)
    }

    /// Remove `path` and its whole subtree from the schedule.
    pub fn delete_path(&self, path: &CrawlPath) -> Result<usize, StorageError> {
        let _guard = self
            .schedule_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let cf = self.cf(CF_CRAWL_PATHS)?;
        let mut batch = WriteBatch::default();
        let mut removed = 0;
        for entry in self.list_paths()? {
            if path.contains(&entry.crawl_path()?) {
                batch.delete_cf(cf, entry.path.as_bytes());
                removed += 1;
            }
        }
        self.write_batch(batch)?;
        debug!(path = %path, removed, "Deleted crawl paths");
        Ok(removed)
    }
}
