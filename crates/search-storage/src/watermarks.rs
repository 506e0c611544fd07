//! Per-document indexing watermarks.
//!
//! The watermark of a document is the time it was last indexed. It is only
//! advanced by a successful index write, and never set earlier than the
//! content's own modification time. Documents that failed with a content
//! error carry a failure stamp instead so the crawler does not retry them on
//! every pass.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::column_families::CF_DOCUMENTS;
use crate::db::Storage;
use crate::error::StorageError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentState {
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_indexed: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub modified: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub failed_at: Option<DateTime<Utc>>,
}

impl DocumentState {
    /// Whether a normal (non-forced) crawl should enqueue this document
    /// given its current modification time.
    pub fn needs_indexing(&self, modified: Option<DateTime<Utc>>) -> bool {
        if let Some(failed_at) = self.failed_at {
            return matches!(modified, Some(m) if m > failed_at);
        }
        match (self.last_indexed, modified) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(indexed), Some(modified)) => modified > indexed,
        }
    }
}

impl Storage {
    pub fn document_state(&self, doc_id: &str) -> Result<Option<DocumentState>, StorageError> {
        match self.get(CF_DOCUMENTS, doc_id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_document_state(&self, doc_id: &str, state: &DocumentState) -> Result<(), StorageError> {
        self.put(CF_DOCUMENTS, doc_id.as_bytes(), &serde_json::to_vec(state)?)
    }

    /// Record a successful index write and clear any failure stamp.
    pub fn set_last_indexed(
        &self,
        doc_id: &str,
        indexed: DateTime<Utc>,
        modified: Option<DateTime<Utc>>,
    ) -> Result<(), StorageError> {
        let state = DocumentState {
            last_indexed: Some(indexed),
            modified,
            failed_at: None,
        };
        self.put_document_state(doc_id, &state)
    }

    /// Stamp a document as failed, dropping its watermark.
    pub fn set_index_failed(
        &self,
        doc_id: &str,
        failed_at: DateTime<Utc>,
        modified: Option<DateTime<Utc>>,
    ) -> Result<(), StorageError> {
        let state = DocumentState {
            last_indexed: None,
            modified,
            failed_at: Some(failed_at),
        };
        self.put_document_state(doc_id, &state)
    }

    pub fn delete_document_state(&self, doc_id: &str) -> Result<(), StorageError> {
        self.delete(CF_DOCUMENTS, doc_id.as_bytes())
    }

    /// Forget watermarks for every document id starting with `prefix`
    /// (all documents for an empty prefix).
    pub fn clear_document_states(&self, prefix: &str) -> Result<usize, StorageError> {
        let cf = self.cf(CF_DOCUMENTS)?;
        let mut batch = rocksdb::WriteBatch::default();
        let entries = self.prefix_iterator(CF_DOCUMENTS, prefix.as_bytes())?;
        for (key, _) in &entries {
            batch.delete_cf(cf, key);
        }
        self.write_batch(batch)?;
        Ok(entries.len())
    }

    /// Documents whose latest stamp (indexed or failed) is older than
    /// `cutoff`, in id order.
    pub fn document_states_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<(String, DocumentState)>, StorageError> {
        let mut stale = Vec::new();
        for (key, value) in self.prefix_iterator(CF_DOCUMENTS, b"")? {
            let state: DocumentState = serde_json::from_slice(&value)?;
            let stamp = state.last_indexed.max(state.failed_at);
            if stamp.is_some_and(|s| s < cutoff) {
                stale.push((String::from_utf8_lossy(&key).into_owned(), state));
            }
        }
        Ok(stale)
    }
}
