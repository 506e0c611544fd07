//! Opening the index with corruption recovery, the disabled-indexing
//! stand-in, and the swappable handle the rest of the system holds.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tantivy::query::Query;
use tantivy::{Index, IndexReader};
use tracing::{error, info, warn};

use crate::document::IndexDocument;
use crate::error::IndexError;
use crate::index::{delete_index_dir, SearchIndex, SearchIndexConfig};
use crate::manager::{IndexManager, SearcherGuard, TantivyIndexManager};
use crate::schema::DocumentSchema;

/// Calls between repeated "indexing disabled" warnings.
const NOOP_WARN_EVERY: u64 = 10_000;

/// Stand-in used when the on-disk index cannot be opened. Searches see an
/// empty in-memory index; writes are refused with
/// [`IndexError::Unavailable`] so nothing is marked as indexed; deletes and
/// commits do nothing.
pub struct NoopIndexManager {
    index: SearchIndex,
    reader: Option<IndexReader>,
    reason: String,
    calls: AtomicU64,
    leases: Arc<AtomicUsize>,
}

impl NoopIndexManager {
    pub fn new(reason: impl Into<String>) -> Self {
        let index = SearchIndex::in_ram();
        let reader = index.reader().ok();
        Self {
            index,
            reader,
            reason: reason.into(),
            calls: AtomicU64::new(0),
            leases: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    fn note_call(&self) {
        let n = self.calls.fetch_add(1, Ordering::Relaxed);
        if n % NOOP_WARN_EVERY == 0 {
            warn!(reason = %self.reason, calls = n + 1, "Full-text indexing is disabled");
        }
    }
}

impl IndexManager for NoopIndexManager {
    fn schema(&self) -> &DocumentSchema {
        self.index.schema()
    }

    fn tantivy_index(&self) -> &Index {
        self.index.index()
    }

    fn index(&self, _id: &str, _document: &IndexDocument) -> Result<(), IndexError> {
        self.note_call();
        Err(IndexError::Unavailable(self.reason.clone()))
    }

    fn delete_document(&self, _id: &str) -> Result<(), IndexError> {
        self.note_call();
        Ok(())
    }

    fn delete_query(&self, _query: Box<dyn Query>) -> Result<(), IndexError> {
        self.note_call();
        Ok(())
    }

    fn delete_all(&self) -> Result<(), IndexError> {
        self.note_call();
        Ok(())
    }

    fn commit(&self) -> Result<(), IndexError> {
        Ok(())
    }

    fn refresh_if_dirty(&self) -> Result<bool, IndexError> {
        Ok(false)
    }

    fn searcher(&self) -> Result<SearcherGuard, IndexError> {
        let reader = self
            .reader
            .as_ref()
            .ok_or_else(|| IndexError::Unavailable(self.reason.clone()))?;
        Ok(SearcherGuard::new(reader.searcher(), self.leases.clone()))
    }

    fn close(&self) -> Result<(), IndexError> {
        Ok(())
    }

    fn is_closed(&self) -> bool {
        false
    }

    fn is_real(&self) -> bool {
        false
    }
}

/// Result of opening the index.
pub struct OpenedIndex {
    pub manager: Arc<dyn IndexManager>,
    /// Set when indexing had to be disabled.
    pub configuration_error: Option<String>,
}

impl OpenedIndex {
    fn disabled(err: &IndexError) -> Self {
        let reason = format!("Full-text search index could not be opened: {err}");
        error!(error = %err, "Disabling full-text indexing");
        Self {
            manager: Arc::new(NoopIndexManager::new(reason.clone())),
            configuration_error: Some(reason),
        }
    }
}

/// Open the index at `config`, recovering from format errors.
pub fn open_index_manager(config: &SearchIndexConfig) -> OpenedIndex {
    open_index_manager_with(config, TantivyIndexManager::open)
}

/// Open with an injectable opener.
///
/// A format error (corrupt or incompatible index) deletes the directory and
/// retries once. Any other failure, or a second failure, installs a
/// [`NoopIndexManager`] and records a configuration error.
pub fn open_index_manager_with<M, F>(config: &SearchIndexConfig, open: F) -> OpenedIndex
where
    M: IndexManager + 'static,
    F: Fn(&SearchIndexConfig) -> Result<M, IndexError>,
{
    match open(config) {
        Ok(manager) => OpenedIndex {
            manager: Arc::new(manager),
            configuration_error: None,
        },
        Err(e) if e.is_format_error() => {
            warn!(
                path = ?config.index_path,
                error = %e,
                "Search index is unreadable, deleting and rebuilding"
            );
            if let Err(delete_err) = delete_index_dir(&config.index_path) {
                return OpenedIndex::disabled(&delete_err);
            }
            match open(config) {
                Ok(manager) => {
                    info!(path = ?config.index_path, "Recreated search index");
                    OpenedIndex {
                        manager: Arc::new(manager),
                        configuration_error: None,
                    }
                }
                Err(e) => OpenedIndex::disabled(&e),
            }
        }
        Err(e) => OpenedIndex::disabled(&e),
    }
}

/// The current index manager, swappable when the index location changes.
///
/// Callers take a snapshot with [`current`](Self::current) per operation;
/// a swap closes the old manager, after which its writes report
/// [`IndexError::Closed`].
pub struct ManagerHandle {
    current: RwLock<Arc<dyn IndexManager>>,
    configuration_error: RwLock<Option<String>>,
}

impl ManagerHandle {
    pub fn new(opened: OpenedIndex) -> Self {
        Self {
            current: RwLock::new(opened.manager),
            configuration_error: RwLock::new(opened.configuration_error),
        }
    }

    /// Open the index at `config` with recovery.
    pub fn open(config: &SearchIndexConfig) -> Self {
        Self::new(open_index_manager(config))
    }

    pub fn current(&self) -> Arc<dyn IndexManager> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn configuration_error(&self) -> Option<String> {
        self.configuration_error
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Install a new manager and close the old one. Returns the old one.
    pub fn swap(&self, opened: OpenedIndex) -> Arc<dyn IndexManager> {
        let old = {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *current, opened.manager)
        };
        self.finish_swap(&old, opened.configuration_error);
        old
    }

    fn finish_swap(&self, old: &Arc<dyn IndexManager>, configuration_error: Option<String>) {
        *self
            .configuration_error
            .write()
            .unwrap_or_else(PoisonError::into_inner) = configuration_error;
        if let Err(e) = old.close() {
            warn!(error = %e, "Error closing previous index manager");
        }
    }

    /// Reopen the index at `config` (for example after the index location
    /// changed) and swap it in.
    ///
    /// The current manager's writer holds the directory lock, so when the
    /// location is unchanged it is closed before the new one opens. Callers
    /// block on the handle meanwhile and never see the closed manager.
    pub fn reinitialize(&self, config: &SearchIndexConfig) -> Arc<dyn IndexManager> {
        info!(path = ?config.index_path, "Reinitializing search index");
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if current.index_path() == Some(config.index_path.as_path()) {
            if let Err(e) = current.close() {
                warn!(error = %e, "Error closing index manager before reopening");
            }
        }
        let opened = open_index_manager(config);
        let old = std::mem::replace(&mut *current, opened.manager);
        drop(current);
        self.finish_swap(&old, opened.configuration_error);
        old
    }
}
