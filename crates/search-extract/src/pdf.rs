//! PDF extraction via `pdf-extract`.

use std::panic::{self, AssertUnwindSafe};

use crate::chain::ContentExtractor;
use crate::content::ExtractedContent;
use crate::error::ExtractError;

pub const MIME_PDF: &str = "application/pdf";

pub struct PdfExtractor;

impl PdfExtractor {
    pub fn is_pdf(header: &[u8]) -> bool {
        header.starts_with(b"%PDF-")
    }

    fn is_encrypted(bytes: &[u8]) -> bool {
        bytes.windows(8).any(|w| w == b"/Encrypt")
    }
}

impl ContentExtractor for PdfExtractor {
    fn name(&self) -> &'static str {
        "pdf"
    }

    fn handles(&self, content_type: &str, header: &[u8]) -> bool {
        content_type == MIME_PDF || Self::is_pdf(header)
    }

    fn extract(&self, bytes: &[u8], _content_type: &str) -> Result<ExtractedContent, ExtractError> {
        if !Self::is_pdf(bytes) {
            return Err(ExtractError::malformed("pdf", "missing %PDF- header"));
        }
        if Self::is_encrypted(bytes) {
            return Err(ExtractError::Encrypted("pdf"));
        }

        // The parser panics on some malformed inputs.
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            pdf_extract::extract_text_from_mem(bytes)
        }));
        match result {
            Ok(Ok(text)) => Ok(ExtractedContent::from_text(text)),
            Ok(Err(e)) => Err(ExtractError::malformed("pdf", e)),
            Err(_) => Err(ExtractError::malformed("pdf", "parser panicked")),
        }
    }
}
