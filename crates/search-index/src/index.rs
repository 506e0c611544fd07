//! Tantivy index management.
//!
//! Handles index creation, opening and schema validation.

use std::path::{Path, PathBuf};

use search_types::Settings;
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy};
use tracing::{debug, info};

use crate::error::IndexError;
use crate::schema::{build_document_schema, register_tokenizers, DocumentSchema};

/// Default memory budget for IndexWriter (50MB)
const DEFAULT_WRITER_MEMORY_MB: usize = 50;

/// Search index configuration
#[derive(Debug, Clone)]
pub struct SearchIndexConfig {
    /// Path to index directory
    pub index_path: PathBuf,
    /// Memory budget for writer in MB
    pub writer_memory_mb: usize,
}

impl Default for SearchIndexConfig {
    fn default() -> Self {
        Self {
            index_path: PathBuf::from("./search-index"),
            writer_memory_mb: DEFAULT_WRITER_MEMORY_MB,
        }
    }
}

impl SearchIndexConfig {
    pub fn new(index_path: impl Into<PathBuf>) -> Self {
        Self {
            index_path: index_path.into(),
            writer_memory_mb: DEFAULT_WRITER_MEMORY_MB,
        }
    }

    pub fn with_memory_mb(mut self, mb: usize) -> Self {
        self.writer_memory_mb = mb;
        self
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.expanded_index_path()).with_memory_mb(settings.indexing.writer_memory_mb)
    }
}

/// Wrapper for Tantivy index with schema access.
pub struct SearchIndex {
    index: Index,
    schema: DocumentSchema,
    config: SearchIndexConfig,
}

impl SearchIndex {
    /// Open existing index or create new one.
    ///
    /// An existing index written with a different schema is reported as
    /// [`IndexError::SchemaMismatch`].
    pub fn open_or_create(config: SearchIndexConfig) -> Result<Self, IndexError> {
        let index = open_or_create_index(&config.index_path)?;
        let schema = DocumentSchema::from_schema(index.schema())?;

        info!(path = ?config.index_path, "Opened search index");

        Ok(Self {
            index,
            schema,
            config,
        })
    }

    /// An in-memory index, used when the on-disk index cannot be opened.
    pub fn in_ram() -> Self {
        let schema = build_document_schema();
        let index = Index::create_in_ram(schema.schema().clone());
        register_tokenizers(&index);
        Self {
            index,
            schema,
            config: SearchIndexConfig::new(PathBuf::new()),
        }
    }

    /// Get the document schema
    pub fn schema(&self) -> &DocumentSchema {
        &self.schema
    }

    /// Get the underlying Tantivy index
    pub fn index(&self) -> &Index {
        &self.index
    }

    /// Create an IndexWriter with configured memory budget
    pub fn writer(&self) -> Result<IndexWriter, IndexError> {
        let memory_budget = self.config.writer_memory_mb * 1024 * 1024;
        let writer = self.index.writer(memory_budget)?;
        debug!(
            memory_mb = self.config.writer_memory_mb,
            "Created index writer"
        );
        Ok(writer)
    }

    /// Create an IndexReader. Reloads are explicit, after each commit.
    pub fn reader(&self) -> Result<IndexReader, IndexError> {
        let reader = self
            .index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        debug!("Created index reader");
        Ok(reader)
    }

    /// Get the index path
    pub fn path(&self) -> &Path {
        &self.config.index_path
    }

    /// Check if index exists at the configured path
    pub fn exists(&self) -> bool {
        self.config.index_path.join("meta.json").exists()
    }
}

/// Open an existing index or create a new one.
///
/// Uses MmapDirectory for persistence.
pub fn open_or_create_index(path: &Path) -> Result<Index, IndexError> {
    let index = if path.join("meta.json").exists() {
        debug!(path = ?path, "Opening existing index");
        Index::open_in_dir(path)?
    } else {
        info!(path = ?path, "Creating new index");
        std::fs::create_dir_all(path)?;
        let schema = build_document_schema();
        Index::create_in_dir(path, schema.schema().clone())?
    };
    register_tokenizers(&index);
    Ok(index)
}

/// Remove every file of the index at `path`.
pub fn delete_index_dir(path: &Path) -> Result<(), IndexError> {
    if path.exists() {
        info!(path = ?path, "Deleting search index directory");
        std::fs::remove_dir_all(path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_new_index() {
        let temp_dir = TempDir::new().unwrap();
        let config = SearchIndexConfig::new(temp_dir.path());

        let index = SearchIndex::open_or_create(config).unwrap();
        assert!(index.exists());
    }

    #[test]
    fn test_reopen_existing_index() {
        let temp_dir = TempDir::new().unwrap();
        let config = SearchIndexConfig::new(temp_dir.path());

        let _index1 = SearchIndex::open_or_create(config.clone()).unwrap();

        let index2 = SearchIndex::open_or_create(config).unwrap();
        assert!(index2.exists());
    }

    #[test]
    fn test_create_writer_and_reader() {
        let temp_dir = TempDir::new().unwrap();
        let config = SearchIndexConfig::new(temp_dir.path());
        let index = SearchIndex::open_or_create(config).unwrap();

        let _writer = index.writer().unwrap();
        let _reader = index.reader().unwrap();
    }

    #[test]
    fn test_corrupt_meta_is_format_error() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("meta.json"), b"{ not json").unwrap();

        let err = SearchIndex::open_or_create(SearchIndexConfig::new(temp_dir.path()))
            .err()
            .unwrap();
        assert!(err.is_format_error(), "{err}");
    }

    #[test]
    fn test_delete_index_dir() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("idx");
        SearchIndex::open_or_create(SearchIndexConfig::new(&path)).unwrap();
        delete_index_dir(&path).unwrap();
        assert!(!path.exists());
        // Deleting a missing directory is fine
        delete_index_dir(&path).unwrap();
    }

    #[test]
    fn test_config_with_memory() {
        let config = SearchIndexConfig::new("/tmp/test").with_memory_mb(100);
        assert_eq!(config.writer_memory_mb, 100);
    }
}
