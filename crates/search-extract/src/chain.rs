//! The extractor chain.
//!
//! Specialized extractors are consulted in order; the first whose
//! `handles` accepts the declared type and header bytes extracts the
//! document. Anything unclaimed goes to [`AutoDetectExtractor`], which
//! sniffs the bytes itself.

use tracing::debug;

use crate::content::{ExtractedContent, SizePolicy};
use crate::error::ExtractError;
use crate::ooxml::OoxmlExtractor;
use crate::pdf::PdfExtractor;
use crate::text::{HtmlExtractor, PlainTextExtractor};

/// Bytes handed to `handles` for sniffing.
const HEADER_LEN: usize = 512;

/// A single format parser.
pub trait ContentExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this extractor claims content of `content_type` starting
    /// with `header`.
    fn handles(&self, content_type: &str, header: &[u8]) -> bool;

    fn extract(&self, bytes: &[u8], content_type: &str) -> Result<ExtractedContent, ExtractError>;
}

/// Fallback that ignores the declared type and looks at the bytes.
pub struct AutoDetectExtractor;

impl ContentExtractor for AutoDetectExtractor {
    fn name(&self) -> &'static str {
        "auto-detect"
    }

    fn handles(&self, _content_type: &str, _header: &[u8]) -> bool {
        true
    }

    fn extract(&self, bytes: &[u8], content_type: &str) -> Result<ExtractedContent, ExtractError> {
        let header = &bytes[..bytes.len().min(HEADER_LEN)];
        if PdfExtractor::is_pdf(header) {
            return PdfExtractor.extract(bytes, content_type);
        }
        if OoxmlExtractor::is_zip(header) {
            return OoxmlExtractor.extract(bytes, content_type);
        }
        if HtmlExtractor::looks_like_html(header) {
            return HtmlExtractor.extract(bytes, content_type);
        }
        if looks_like_text(bytes) {
            return PlainTextExtractor.extract(bytes, content_type);
        }
        Err(ExtractError::Unsupported(content_type.to_string()))
    }
}

/// Valid UTF-8 without NUL bytes.
fn looks_like_text(bytes: &[u8]) -> bool {
    !bytes.contains(&0) && std::str::from_utf8(bytes).is_ok()
}

pub struct ExtractorChain {
    extractors: Vec<Box<dyn ContentExtractor>>,
    fallback: Box<dyn ContentExtractor>,
    policy: SizePolicy,
}

impl Default for ExtractorChain {
    fn default() -> Self {
        Self::new(SizePolicy::default())
    }
}

impl ExtractorChain {
    /// The standard chain: plain text, HTML, PDF, OOXML, then auto-detect.
    pub fn new(policy: SizePolicy) -> Self {
        Self {
            extractors: vec![
                Box::new(PlainTextExtractor),
                Box::new(HtmlExtractor),
                Box::new(PdfExtractor),
                Box::new(OoxmlExtractor),
            ],
            fallback: Box::new(AutoDetectExtractor),
            policy,
        }
    }

    /// Put `extractor` ahead of the built-in ones.
    pub fn with_extractor(mut self, extractor: Box<dyn ContentExtractor>) -> Self {
        self.extractors.insert(0, extractor);
        self
    }

    pub fn policy(&self) -> &SizePolicy {
        &self.policy
    }

    /// Whether content of `len` bytes should be read and parsed at all.
    /// Images are indexed by name only.
    pub fn admits(&self, len: u64, content_type: &str) -> bool {
        !content_type.starts_with("image/") && !self.policy.is_too_big(len, content_type)
    }

    /// Extract `bytes` of the declared `content_type`.
    ///
    /// Content the policy refuses yields an empty body rather than an
    /// error so the document is still indexed by name and metadata.
    pub fn extract(&self, bytes: &[u8], content_type: &str) -> Result<ExtractedContent, ExtractError> {
        let content_type = essence(content_type);
        if !self.admits(bytes.len() as u64, &content_type) {
            debug!(
                content_type = %content_type,
                size = bytes.len(),
                "Skipping body extraction"
            );
            return Ok(ExtractedContent::empty_body());
        }

        let header = &bytes[..bytes.len().min(HEADER_LEN)];
        let extractor = self
            .extractors
            .iter()
            .find(|e| e.handles(&content_type, header))
            .unwrap_or(&self.fallback);

        debug!(extractor = extractor.name(), content_type = %content_type, "Extracting");
        extractor.extract(bytes, &content_type)
    }
}

/// Lowercased MIME type without parameters (`text/html; charset=utf-8`
/// becomes `text/html`).
fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}
