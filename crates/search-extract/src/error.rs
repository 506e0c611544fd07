//! Extraction error types.
//!
//! Every failure carries a classification that decides how the pipeline
//! reacts: transient failures are retried, content failures stamp the
//! document as failed.

use thiserror::Error;

/// Classification of an extraction failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentErrorKind {
    /// Structurally broken document
    Malformed,
    /// No extractor understands the format
    Unsupported,
    /// Password-protected or encrypted content
    Encrypted,
    /// Content exceeds the configured size policy
    TooLarge,
    /// I/O failure while reading content; worth retrying
    Transient,
}

impl ContentErrorKind {
    /// Human-readable label used in warnings.
    pub fn describe(&self) -> &'static str {
        match self {
            ContentErrorKind::Malformed => "malformed document",
            ContentErrorKind::Unsupported => "unsupported format",
            ContentErrorKind::Encrypted => "encrypted or password-protected document",
            ContentErrorKind::TooLarge => "document too large",
            ContentErrorKind::Transient => "transient read failure",
        }
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Malformed {format} content: {message}")]
    Malformed { format: &'static str, message: String },

    #[error("Unsupported content type: {0}")]
    Unsupported(String),

    #[error("Encrypted {0} content")]
    Encrypted(&'static str),

    #[error("Content too large: {size} bytes (limit {limit})")]
    TooLarge { size: u64, limit: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExtractError {
    pub fn malformed(format: &'static str, err: impl std::fmt::Display) -> Self {
        ExtractError::Malformed {
            format,
            message: err.to_string(),
        }
    }

    pub fn kind(&self) -> ContentErrorKind {
        match self {
            ExtractError::Malformed { .. } => ContentErrorKind::Malformed,
            ExtractError::Unsupported(_) => ContentErrorKind::Unsupported,
            ExtractError::Encrypted(_) => ContentErrorKind::Encrypted,
            ExtractError::TooLarge { .. } => ContentErrorKind::TooLarge,
            ExtractError::Io(_) => ContentErrorKind::Transient,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ContentErrorKind::Transient
    }
}

/// Archives are parsed from memory, so even zip I/O errors mean a broken
/// archive rather than a transient read failure.
impl From<zip::result::ZipError> for ExtractError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::UnsupportedArchive(msg) if msg.contains("ncrypt") => {
                ExtractError::Encrypted("zip")
            }
            other => ExtractError::malformed("zip", other),
        }
    }
}
