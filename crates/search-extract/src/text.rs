//! Plain text and HTML extractors.

use crate::chain::ContentExtractor;
use crate::content::{normalize_whitespace, ExtractedContent};
use crate::error::ExtractError;

/// Wrap width handed to html2text; wide enough that wrapping never splits
/// words, the output is whitespace-normalized afterwards anyway.
const HTML_RENDER_WIDTH: usize = 1000;

/// `text/*` content other than HTML and XML, decoded as lossy UTF-8.
pub struct PlainTextExtractor;

impl ContentExtractor for PlainTextExtractor {
    fn name(&self) -> &'static str {
        "plain-text"
    }

    fn handles(&self, content_type: &str, _header: &[u8]) -> bool {
        content_type.starts_with("text/") && !content_type.contains("html") && !content_type.contains("xml")
    }

    fn extract(&self, bytes: &[u8], _content_type: &str) -> Result<ExtractedContent, ExtractError> {
        let text = String::from_utf8_lossy(strip_bom(bytes));
        Ok(ExtractedContent::from_text(text))
    }
}

/// HTML documents: visible text via html2text, title from `<title>`.
pub struct HtmlExtractor;

impl HtmlExtractor {
    pub fn looks_like_html(header: &[u8]) -> bool {
        let start = String::from_utf8_lossy(&header[..header.len().min(256)]).to_ascii_lowercase();
        let start = start.trim_start();
        start.starts_with("<!doctype html") || start.starts_with("<html")
    }
}

impl ContentExtractor for HtmlExtractor {
    fn name(&self) -> &'static str {
        "html"
    }

    fn handles(&self, content_type: &str, header: &[u8]) -> bool {
        content_type == "text/html"
            || content_type == "application/xhtml+xml"
            || (content_type.starts_with("text/") && Self::looks_like_html(strip_bom(header)))
    }

    fn extract(&self, bytes: &[u8], _content_type: &str) -> Result<ExtractedContent, ExtractError> {
        let bytes = strip_bom(bytes);
        let title = html_title(&String::from_utf8_lossy(bytes));
        let rendered = html2text::from_read(bytes, HTML_RENDER_WIDTH)
            .map_err(|e| ExtractError::malformed("html", e))?;
        Ok(ExtractedContent::from_text(rendered).with_title(title))
    }
}

fn strip_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes)
}

/// Text of the first `<title>` element, if present.
fn html_title(html: &str) -> Option<String> {
    let lower = html.to_ascii_lowercase();
    let open = lower.find("<title")?;
    let content_start = open + lower[open..].find('>')? + 1;
    let content_end = content_start + lower[content_start..].find("</title")?;
    let title = normalize_whitespace(&html[content_start..content_end]);
    (!title.is_empty()).then_some(title)
}
