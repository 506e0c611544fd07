//! # search-index
//!
//! The full-text index: document schema, the single-writer index manager
//! with corruption recovery, and security-filtered search.
//!
//! ## Components
//! - `IndexManager`: upsert, delete, commit and searcher leases over one
//!   Tantivy index; `NoopIndexManager` stands in when the index is unusable
//! - `ManagerHandle`: the current manager, swappable on reinitialize
//! - `DocumentSearcher`: boosted free-text queries, category filter,
//!   container scope and per-user visibility
//! - `CategoryRegistry`: the categories a search may be restricted to
//! - `SecurityPolicy`: container hierarchy and permission checks

pub mod categories;
pub mod document;
pub mod error;
pub mod index;
pub mod manager;
pub mod recovery;
pub mod schema;
pub mod searcher;
pub mod security;

pub use categories::{CategoryRegistry, SearchCategory, FILE_CATEGORY, NAVIGATION_CATEGORY};
pub use document::{IndexDocument, TermWeight, WeightedText};
pub use error::IndexError;
pub use index::{delete_index_dir, open_or_create_index, SearchIndex, SearchIndexConfig};
pub use manager::{IndexManager, SearcherGuard, TantivyIndexManager};
pub use recovery::{
    open_index_manager, open_index_manager_with, ManagerHandle, NoopIndexManager, OpenedIndex,
};
pub use schema::{build_document_schema, DocumentSchema};
pub use searcher::{
    escape_term, DocumentSearcher, SearchHit, SearchRequest, SearchResults, SortOrder,
};
pub use security::{
    ContainerInfo, ContainerKind, InMemorySecurityPolicy, Principal, SearchScope,
    SecureCollector, SecurityFilter, SecurityPolicy,
};
