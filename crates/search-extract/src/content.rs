//! Extraction results, size policy and summaries.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use search_types::ExtractionSettings;

/// Normalized output of an extractor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedContent {
    /// Plain text body, whitespace-normalized.
    pub text: String,
    /// Title found inside the document, if any.
    pub title: Option<String>,
    /// Format-specific key/value metadata (author, keywords, ...).
    pub metadata: BTreeMap<String, String>,
    /// Set when the body was dropped by the size policy.
    pub truncated: bool,
}

impl ExtractedContent {
    pub fn from_text(text: impl AsRef<str>) -> Self {
        Self {
            text: normalize_whitespace(text.as_ref()),
            ..Default::default()
        }
    }

    /// Body-less content for documents indexed by name and metadata only.
    pub fn empty_body() -> Self {
        Self {
            truncated: true,
            ..Default::default()
        }
    }

    pub fn with_title(mut self, title: Option<String>) -> Self {
        self.title = title
            .map(|t| normalize_whitespace(&t))
            .filter(|t| !t.is_empty());
        self
    }
}

/// Size limit applied before extraction.
///
/// Compressed office formats expand a lot when parsed, so their raw size is
/// multiplied by `compressed_inflation_factor` before the comparison.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizePolicy {
    pub max_bytes: u64,
    pub compressed_inflation_factor: f64,
}

impl Default for SizePolicy {
    fn default() -> Self {
        Self::from(&ExtractionSettings::default())
    }
}

impl From<&ExtractionSettings> for SizePolicy {
    fn from(settings: &ExtractionSettings) -> Self {
        Self {
            max_bytes: settings.max_document_bytes,
            compressed_inflation_factor: settings.compressed_inflation_factor,
        }
    }
}

impl SizePolicy {
    /// Effective size of `len` raw bytes of `content_type`.
    pub fn effective_size(&self, len: u64, content_type: &str) -> u64 {
        if is_compressed_office_type(content_type) {
            (len as f64 * self.compressed_inflation_factor) as u64
        } else {
            len
        }
    }

    pub fn is_too_big(&self, len: u64, content_type: &str) -> bool {
        self.effective_size(len, content_type) > self.max_bytes
    }
}

/// Zip-based office formats (OOXML and OpenDocument).
pub fn is_compressed_office_type(content_type: &str) -> bool {
    content_type.starts_with("application/vnd.openxmlformats-officedocument")
        || content_type.starts_with("application/vnd.oasis.opendocument")
}

/// Collapse runs of whitespace into single spaces and trim.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Matches the `: /<guid>` suffix some titles carry for disambiguation.
static TITLE_GUID_SUFFIX: OnceLock<Option<Regex>> = OnceLock::new();

fn strip_title_guid(title: &str) -> Cow<'_, str> {
    let pattern = TITLE_GUID_SUFFIX.get_or_init(|| {
        Regex::new(
            r": /[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
        )
        .ok()
    });
    match pattern {
        Some(re) => re.replace_all(title, ""),
        None => Cow::Borrowed(title),
    }
}

/// Build a short display summary of a document body.
///
/// A leading copy of the title (without any `: /<guid>` suffix) is dropped.
/// A body longer than `max_chars` characters is cut at the first
/// whitespace or `/` at or after character `max_chars - 1`, or hard at
/// `max_chars` when there is none, and `...` is appended.
pub fn extract_summary(body: &str, title: Option<&str>, max_chars: usize) -> String {
    let mut text = body.trim_start();
    if let Some(title) = title {
        let title = strip_title_guid(title.trim());
        if !title.is_empty() {
            if let Some(rest) = text.strip_prefix(title.as_ref()) {
                text = rest.trim_start();
            }
        }
    }

    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let separator = text
        .char_indices()
        .skip(max_chars.saturating_sub(1))
        .find(|(_, c)| c.is_whitespace() || *c == '/')
        .map(|(idx, _)| idx);
    let cut = separator.unwrap_or_else(|| {
        text.char_indices()
            .nth(max_chars)
            .map(|(idx, _)| idx)
            .unwrap_or(text.len())
    });
    format!("{}...", &text[..cut])
}
