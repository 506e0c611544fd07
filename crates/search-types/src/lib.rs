//! # search-types
//!
//! Shared domain types for the doc-search indexing pipeline.
//!
//! This crate defines the vocabulary used throughout the system:
//! - `DocumentId`: `prefix:identifier` document addressing
//! - `SecurityContext`: the container/sub-resource pair stored per document
//! - `Priority` / `Operation`: work item scheduling
//! - `Settings`: layered configuration

pub mod config;
pub mod document;
pub mod error;
pub mod priority;

pub use config::{CrawlerSettings, ExtractionSettings, IndexingSettings, Settings};
pub use document::{DocumentId, SecurityContext};
pub use error::SearchError;
pub use priority::{Operation, Priority};
