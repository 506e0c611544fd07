//! Error types shared across the document search system.

use thiserror::Error;

/// Unified error type for shared domain operations.
#[derive(Debug, Error)]
pub enum SearchError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A document identifier did not have the `prefix:identifier` form
    #[error("Invalid document id: {0}")]
    InvalidDocumentId(String),

    /// Invalid input error
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
