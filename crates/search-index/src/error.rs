//! Index error types.

use thiserror::Error;

/// Errors that can occur during index and search operations.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Tantivy index error
    #[error("Tantivy error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    /// Query parse error
    #[error("Query parse error: {0}")]
    QueryParse(#[from] tantivy::query::QueryParserError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Schema mismatch
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// The manager was closed (index location changed or shut down);
    /// the caller should retry against the new manager later
    #[error("Index manager is closed")]
    Closed,

    /// Indexing is disabled because the index could not be opened
    #[error("Index unavailable: {0}")]
    Unavailable(String),

    /// The search named a category nobody registered
    #[error("Unknown search category: {0}")]
    UnknownCategory(String),

    /// A commit failed and the writer was force-closed; the manager must
    /// be reinitialized
    #[error("Fatal index error: {0}")]
    Fatal(String),
}

impl IndexError {
    /// Errors meaning the on-disk index was written in an incompatible or
    /// corrupt format. These trigger one delete-and-reinitialize cycle.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            IndexError::SchemaMismatch(_)
                | IndexError::Tantivy(tantivy::TantivyError::DataCorruption(_))
                | IndexError::Tantivy(tantivy::TantivyError::IncompatibleIndex(_))
                | IndexError::Tantivy(tantivy::TantivyError::SchemaError(_))
        )
    }

    /// Errors meaning "this manager can no longer take the write; leave the
    /// watermark unset and reindex later".
    pub fn is_retry_later(&self) -> bool {
        matches!(self, IndexError::Closed | IndexError::Unavailable(_))
    }
}
