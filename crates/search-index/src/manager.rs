//! The index manager: one writer and leased searchers over one index.
//!
//! Tantivy has no near-real-time readers, so "refresh" means committing the
//! pending writes and reloading the reader. The `dirty` flag records whether
//! anything was written since the last commit.

use std::ops::Deref;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tantivy::query::{Query, TermQuery};
use tantivy::schema::IndexRecordOption;
use tantivy::{Index, IndexReader, IndexWriter, Searcher, Term};
use tracing::{debug, error, info};

use crate::document::IndexDocument;
use crate::error::IndexError;
use crate::index::{SearchIndex, SearchIndexConfig};
use crate::schema::DocumentSchema;

/// Writer, searcher and lifecycle operations over one index.
pub trait IndexManager: Send + Sync {
    fn schema(&self) -> &DocumentSchema;

    /// The underlying Tantivy index, for building query parsers.
    fn tantivy_index(&self) -> &Index;

    /// Upsert: delete any document with `id`, then add this one.
    fn index(&self, id: &str, document: &IndexDocument) -> Result<(), IndexError>;

    /// Deletes on a closed manager are dropped silently.
    fn delete_document(&self, id: &str) -> Result<(), IndexError>;

    fn delete_documents(&self, ids: &[String]) -> Result<(), IndexError> {
        for id in ids {
            self.delete_document(id)?;
        }
        Ok(())
    }

    fn delete_query(&self, query: Box<dyn Query>) -> Result<(), IndexError>;

    /// Delete every document in `container_id`.
    fn delete_container(&self, container_id: &str) -> Result<(), IndexError> {
        let term = Term::from_field_text(self.schema().container, container_id);
        self.delete_query(Box::new(TermQuery::new(term, IndexRecordOption::Basic)))
    }

    fn delete_all(&self) -> Result<(), IndexError>;

    /// Commit pending writes and make them visible to new searchers.
    fn commit(&self) -> Result<(), IndexError>;

    /// Commit only if something was written since the last commit.
    /// Returns whether a commit happened.
    fn refresh_if_dirty(&self) -> Result<bool, IndexError>;

    /// Lease a point-in-time searcher. The lease is released on drop.
    fn searcher(&self) -> Result<SearcherGuard, IndexError>;

    /// Commit what is pending and release the writer. Idempotent.
    fn close(&self) -> Result<(), IndexError>;

    fn is_closed(&self) -> bool;

    /// Directory of the on-disk index, if there is one.
    fn index_path(&self) -> Option<&Path> {
        None
    }

    /// False for the stand-in used when indexing is disabled.
    fn is_real(&self) -> bool {
        true
    }
}

/// A leased searcher.
pub struct SearcherGuard {
    searcher: Searcher,
    leases: Arc<AtomicUsize>,
}

impl SearcherGuard {
    pub(crate) fn new(searcher: Searcher, leases: Arc<AtomicUsize>) -> Self {
        leases.fetch_add(1, Ordering::SeqCst);
        Self { searcher, leases }
    }
}

impl Deref for SearcherGuard {
    type Target = Searcher;

    fn deref(&self) -> &Searcher {
        &self.searcher
    }
}

impl Drop for SearcherGuard {
    fn drop(&mut self) {
        self.leases.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Index manager over an on-disk Tantivy index.
pub struct TantivyIndexManager {
    index: SearchIndex,
    reader: IndexReader,
    writer: Mutex<Option<IndexWriter>>,
    dirty: AtomicBool,
    closed: AtomicBool,
    leases: Arc<AtomicUsize>,
}

impl TantivyIndexManager {
    /// Open (or create) the index at the configured location.
    pub fn open(config: &SearchIndexConfig) -> Result<Self, IndexError> {
        Self::from_index(SearchIndex::open_or_create(config.clone())?)
    }

    pub fn from_index(index: SearchIndex) -> Result<Self, IndexError> {
        let writer = index.writer()?;
        let reader = index.reader()?;
        Ok(Self {
            index,
            reader,
            writer: Mutex::new(Some(writer)),
            dirty: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            leases: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Searchers currently leased out.
    pub fn outstanding_searchers(&self) -> usize {
        self.leases.load(Ordering::SeqCst)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    fn lock_writer(&self) -> Result<std::sync::MutexGuard<'_, Option<IndexWriter>>, IndexError> {
        self.writer
            .lock()
            .map_err(|e| IndexError::Fatal(format!("Index writer lock error: {}", e)))
    }

    /// Run `op` against the writer, or report `Closed`.
    fn with_writer<T>(
        &self,
        op: impl FnOnce(&mut IndexWriter) -> Result<T, IndexError>,
    ) -> Result<T, IndexError> {
        let mut guard = self.lock_writer()?;
        let writer = guard.as_mut().ok_or(IndexError::Closed)?;
        let result = op(writer)?;
        self.dirty.store(true, Ordering::SeqCst);
        Ok(result)
    }

    /// Same as `with_writer`, but a closed manager is a no-op.
    fn with_writer_or_skip(
        &self,
        what: &str,
        op: impl FnOnce(&mut IndexWriter) -> Result<(), IndexError>,
    ) -> Result<(), IndexError> {
        match self.with_writer(op) {
            Err(IndexError::Closed) => {
                debug!(operation = what, "Index manager closed, dropping delete");
                Ok(())
            }
            other => other,
        }
    }

    /// Commit under the writer lock. A failed commit leaves the writer in
    /// an unknown state, so it is dropped and the manager closed.
    fn commit_locked(&self, writer_slot: &mut Option<IndexWriter>) -> Result<(), IndexError> {
        let writer = writer_slot.as_mut().ok_or(IndexError::Closed)?;
        match writer.commit() {
            Ok(opstamp) => {
                self.dirty.store(false, Ordering::SeqCst);
                self.reader.reload()?;
                debug!(opstamp, "Committed index");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Index commit failed, closing writer");
                writer_slot.take();
                self.closed.store(true, Ordering::SeqCst);
                Err(IndexError::Fatal(e.to_string()))
            }
        }
    }
}

impl IndexManager for TantivyIndexManager {
    fn schema(&self) -> &DocumentSchema {
        self.index.schema()
    }

    fn tantivy_index(&self) -> &Index {
        self.index.index()
    }

    fn index(&self, id: &str, document: &IndexDocument) -> Result<(), IndexError> {
        let schema = self.index.schema();
        let doc = document.to_tantivy(id, schema);
        self.with_writer(|writer| {
            writer.delete_term(Term::from_field_text(schema.id, id));
            writer.add_document(doc)?;
            Ok(())
        })
    }

    fn delete_document(&self, id: &str) -> Result<(), IndexError> {
        let field = self.index.schema().id;
        self.with_writer_or_skip("delete_document", |writer| {
            writer.delete_term(Term::from_field_text(field, id));
            Ok(())
        })
    }

    fn delete_query(&self, query: Box<dyn Query>) -> Result<(), IndexError> {
        self.with_writer_or_skip("delete_query", |writer| {
            writer.delete_query(query)?;
            Ok(())
        })
    }

    fn delete_all(&self) -> Result<(), IndexError> {
        self.with_writer_or_skip("delete_all", |writer| {
            writer.delete_all_documents()?;
            Ok(())
        })
    }

    fn commit(&self) -> Result<(), IndexError> {
        let mut guard = self.lock_writer()?;
        self.commit_locked(&mut guard)
    }

    fn refresh_if_dirty(&self) -> Result<bool, IndexError> {
        if !self.is_dirty() {
            return Ok(false);
        }
        let mut guard = self.lock_writer()?;
        if guard.is_none() {
            return Ok(false);
        }
        self.commit_locked(&mut guard)?;
        Ok(true)
    }

    fn searcher(&self) -> Result<SearcherGuard, IndexError> {
        Ok(SearcherGuard::new(self.reader.searcher(), self.leases.clone()))
    }

    fn close(&self) -> Result<(), IndexError> {
        let mut guard = self.lock_writer()?;
        if guard.is_none() {
            return Ok(());
        }
        let result = if self.is_dirty() {
            self.commit_locked(&mut guard)
        } else {
            Ok(())
        };
        guard.take();
        self.closed.store(true, Ordering::SeqCst);
        info!(path = ?self.index.path(), "Closed index manager");
        result
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn index_path(&self) -> Option<&Path> {
        Some(self.index.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use search_types::SecurityContext;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> TantivyIndexManager {
        TantivyIndexManager::open(&SearchIndexConfig::new(dir.path()).with_memory_mb(15)).unwrap()
    }

    fn doc(title: &str) -> IndexDocument {
        IndexDocument::new(SecurityContext::container("c1")).with_title(title)
    }

    #[test]
    fn test_reindex_same_id_replaces() {
        let dir = TempDir::new().unwrap();
        let manager = open(&dir);

        manager.index("file:/a", &doc("first")).unwrap();
        manager.commit().unwrap();
        manager.index("file:/a", &doc("second")).unwrap();
        manager.commit().unwrap();

        assert_eq!(manager.searcher().unwrap().num_docs(), 1);
    }

    #[test]
    fn test_refresh_if_dirty() {
        let dir = TempDir::new().unwrap();
        let manager = open(&dir);

        assert!(!manager.refresh_if_dirty().unwrap());
        manager.index("file:/a", &doc("x")).unwrap();
        assert!(manager.is_dirty());
        assert!(manager.refresh_if_dirty().unwrap());
        assert!(!manager.is_dirty());
        assert_eq!(manager.searcher().unwrap().num_docs(), 1);
    }

    #[test]
    fn test_delete_container_and_all() {
        let dir = TempDir::new().unwrap();
        let manager = open(&dir);

        manager.index("a", &doc("x")).unwrap();
        manager
            .index("b", &IndexDocument::new(SecurityContext::container("c2")))
            .unwrap();
        manager.commit().unwrap();

        manager.delete_container("c1").unwrap();
        manager.commit().unwrap();
        assert_eq!(manager.searcher().unwrap().num_docs(), 1);

        manager.delete_all().unwrap();
        manager.commit().unwrap();
        assert_eq!(manager.searcher().unwrap().num_docs(), 0);
    }

    #[test]
    fn test_searcher_leases_released() {
        let dir = TempDir::new().unwrap();
        let manager = open(&dir);
        {
            let _a = manager.searcher().unwrap();
            let _b = manager.searcher().unwrap();
            assert_eq!(manager.outstanding_searchers(), 2);
        }
        assert_eq!(manager.outstanding_searchers(), 0);
    }

    #[test]
    fn test_closed_manager() {
        let dir = TempDir::new().unwrap();
        let manager = open(&dir);
        manager.index("a", &doc("pending")).unwrap();
        manager.close().unwrap();
        manager.close().unwrap();

        assert!(manager.is_closed());
        assert!(matches!(
            manager.index("b", &doc("late")),
            Err(IndexError::Closed)
        ));
        // Deletes are dropped silently
        manager.delete_document("a").unwrap();
        // Pending writes were committed on close
        assert_eq!(manager.searcher().unwrap().num_docs(), 1);
    }
}
