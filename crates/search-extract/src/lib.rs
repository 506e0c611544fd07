//! Content extraction for the doc-search indexing pipeline.
//!
//! Turns raw document bytes plus a declared MIME type into normalized plain
//! text, an optional title and a metadata map.
//!
//! # Components
//! - `ExtractorChain`: ordered specialized extractors with an auto-detecting
//!   fallback and a size policy
//! - `PlainTextExtractor`, `HtmlExtractor`, `PdfExtractor`, `OoxmlExtractor`
//! - `extract_summary`: display summaries for search hits

pub mod chain;
pub mod content;
pub mod error;
pub mod ooxml;
pub mod pdf;
pub mod text;

pub use chain::{AutoDetectExtractor, ContentExtractor, ExtractorChain};
pub use content::{extract_summary, normalize_whitespace, ExtractedContent, SizePolicy};
pub use error::{ContentErrorKind, ExtractError};
pub use ooxml::OoxmlExtractor;
pub use pdf::PdfExtractor;
pub use text::{HtmlExtractor, PlainTextExtractor};
