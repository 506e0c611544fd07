//! RocksDB wrapper for doc-search storage.
//!
//! Provides:
//! - Database open/close with column family setup
//! - Generic single-key and prefix reads used by the typed stores
//! - Crawler state flag
//! - Storage statistics and compaction

use rocksdb::{ColumnFamily, Direction, IteratorMode, Options, WriteBatch, DB};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{debug, info};

use crate::column_families::{
    build_cf_descriptors, ALL_CF_NAMES, CF_CRAWL_PATHS, CF_DOCUMENTS, CF_SETTINGS,
};
use crate::error::StorageError;
use crate::keys::CRAWLER_RUNNING_KEY;
use crate::schedule::CrawlPathEntry;

/// Main storage interface for doc-search
pub struct Storage {
    pub(crate) db: DB,
    /// Next crawl path id
    pub(crate) path_sequence: AtomicU64,
    /// Serializes insert-or-get and read-and-stamp on the crawl schedule
    pub(crate) schedule_lock: Mutex<()>,
}

impl Storage {
    /// Open storage at the given path, creating if necessary
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        info!("Opening storage at {:?}", path);

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_background_jobs(4);

        let cf_descriptors = build_cf_descriptors();
        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        let path_sequence = Self::load_path_sequence(&db)?;

        Ok(Self {
            db,
            path_sequence: AtomicU64::new(path_sequence),
            schedule_lock: Mutex::new(()),
        })
    }

    /// Highest crawl path id plus one
    fn load_path_sequence(db: &DB) -> Result<u64, StorageError> {
        let cf = db
            .cf_handle(CF_CRAWL_PATHS)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(CF_CRAWL_PATHS.to_string()))?;

        let mut next = 1;
        for item in db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            let entry: CrawlPathEntry = serde_json::from_slice(&value)?;
            next = next.max(entry.id + 1);
        }
        Ok(next)
    }

    pub(crate) fn next_path_id(&self) -> u64 {
        self.path_sequence.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn cf(&self, cf_name: &str) -> Result<&ColumnFamily, StorageError> {
        self.db
            .cf_handle(cf_name)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(cf_name.to_string()))
    }

    /// Apply a prepared batch atomically.
    pub(crate) fn write_batch(&self, batch: WriteBatch) -> Result<(), StorageError> {
        self.db.write(batch)?;
        Ok(())
    }

    /// Flush all memtables to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        for cf_name in ALL_CF_NAMES {
            let cf = self.cf(cf_name)?;
            self.db.flush_cf(cf)?;
        }
        debug!("Flushed all column families");
        Ok(())
    }

    // ===== Generic Column Family Operations =====

    /// Put a value into a specific column family.
    pub fn put(&self, cf_name: &str, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        let cf = self.cf(cf_name)?;
        self.db.put_cf(cf, key, value)?;
        Ok(())
    }

    /// Get a value from a specific column family.
    pub fn get(&self, cf_name: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let cf = self.cf(cf_name)?;
        let result = self.db.get_cf(cf, key)?;
        Ok(result)
    }

    /// Delete a value from a specific column family.
    pub fn delete(&self, cf_name: &str, key: &[u8]) -> Result<(), StorageError> {
        let cf = self.cf(cf_name)?;
        self.db.delete_cf(cf, key)?;
        Ok(())
    }

    /// Iterate over entries with a given prefix in a column family.
    ///
    /// Returns the (key, value) pairs in key order.
    #[allow(clippy::type_complexity)]
    pub fn prefix_iterator(
        &self,
        cf_name: &str,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let cf = self.cf(cf_name)?;

        let mut results = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward));

        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            results.push((key.to_vec(), value.to_vec()));
        }

        Ok(results)
    }

    // ===== Crawler state =====

    /// Whether the crawler was left Running. Defaults to paused.
    pub fn crawler_running(&self) -> Result<bool, StorageError> {
        Ok(self
            .get(CF_SETTINGS, CRAWLER_RUNNING_KEY)?
            .map(|v| v.as_slice() == b"1")
            .unwrap_or(false))
    }

    pub fn set_crawler_running(&self, running: bool) -> Result<(), StorageError> {
        let value: &[u8] = if running { b"1" } else { b"0" };
        self.put(CF_SETTINGS, CRAWLER_RUNNING_KEY, value)
    }

    // ===== Admin Operations =====

    /// Compact every column family, reclaiming space left by deletes.
    pub fn compact(&self) -> Result<(), StorageError> {
        for cf_name in ALL_CF_NAMES {
            let cf = self.cf(cf_name)?;
            self.db.compact_range_cf::<&[u8], &[u8]>(cf, None, None);
        }
        info!("Compacted storage");
        Ok(())
    }

    /// Get database statistics.
    pub fn get_stats(&self) -> Result<StorageStats, StorageError> {
        let mut stats = StorageStats {
            crawl_path_count: self.count_cf_entries(self.cf(CF_CRAWL_PATHS)?)?,
            document_count: self.count_cf_entries(self.cf(CF_DOCUMENTS)?)?,
            ..Default::default()
        };
        stats.disk_usage_bytes = self.get_disk_usage();
        Ok(stats)
    }

    fn count_cf_entries(&self, cf: &ColumnFamily) -> Result<u64, StorageError> {
        let mut count = 0u64;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    fn get_disk_usage(&self) -> u64 {
        std::fs::read_dir(self.db.path())
            .map(|entries| {
                entries
                    .flatten()
                    .filter_map(|entry| entry.metadata().ok())
                    .map(|m| m.len())
                    .sum()
            })
            .unwrap_or(0)
    }
}

/// Statistics about the storage.
#[derive(Debug, Default)]
pub struct StorageStats {
    /// Number of crawl schedule entries
    pub crawl_path_count: u64,
    /// Number of documents with a watermark
    pub document_count: u64,
    /// Total disk usage in bytes
    pub disk_usage_bytes: u64,
}
