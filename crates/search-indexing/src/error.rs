//! Error types for the indexing pipeline.

use search_extract::{ContentErrorKind, ExtractError};
use search_index::IndexError;
use search_storage::StorageError;
use search_types::SearchError;
use thiserror::Error;

/// Errors that can occur in the indexing pipeline
#[derive(Error, Debug)]
pub enum IndexingError {
    /// Storage operation failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Index manager error
    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    /// Content could not be extracted
    #[error("Extraction error: {0}")]
    Extract(#[from] ExtractError),

    /// Malformed identifier or other invalid input
    #[error("Invalid input: {0}")]
    Invalid(#[from] SearchError),

    /// Reading a resource failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The default task never completes
    #[error("The default task cannot be marked ready")]
    DefaultTaskReady,

    /// The service is shutting down or already stopped
    #[error("Indexing service is shut down")]
    ShutDown,

    /// A runnable reported a failure
    #[error("Runnable failed: {0}")]
    Runnable(String),
}

/// How a failed item is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Requeue, up to the retry limit.
    Transient,
    /// Stamp the document failed; retried on a forced crawl.
    Content(ContentErrorKind),
    /// The index manager is closed or disabled; leave the watermark unset.
    RetryLater,
    /// Needs operator attention; leave the watermark unset.
    Fatal,
}

impl IndexingError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            IndexingError::Extract(e) if e.is_transient() => FailureKind::Transient,
            IndexingError::Extract(e) => FailureKind::Content(e.kind()),
            IndexingError::Index(e) if e.is_retry_later() => FailureKind::RetryLater,
            IndexingError::Index(IndexError::Fatal(_)) => FailureKind::Fatal,
            IndexingError::Index(_) | IndexingError::Storage(_) | IndexingError::Io(_) => {
                FailureKind::Transient
            }
            IndexingError::ShutDown => FailureKind::RetryLater,
            IndexingError::Invalid(_)
            | IndexingError::DefaultTaskReady
            | IndexingError::Runnable(_) => FailureKind::Fatal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IndexingError::Runnable("boom".to_string());
        assert_eq!(err.to_string(), "Runnable failed: boom");
        assert_eq!(
            IndexingError::DefaultTaskReady.to_string(),
            "The default task cannot be marked ready"
        );
    }

    #[test]
    fn test_failure_kinds() {
        let io = IndexingError::Io(std::io::Error::other("busy"));
        assert_eq!(io.failure_kind(), FailureKind::Transient);

        let encrypted = IndexingError::Extract(ExtractError::Encrypted("pdf"));
        assert_eq!(
            encrypted.failure_kind(),
            FailureKind::Content(ContentErrorKind::Encrypted)
        );

        let closed = IndexingError::Index(IndexError::Closed);
        assert_eq!(closed.failure_kind(), FailureKind::RetryLater);

        let fatal = IndexingError::Index(IndexError::Fatal("oom".into()));
        assert_eq!(fatal.failure_kind(), FailureKind::Fatal);
    }
}
