//! Storage layer for the doc-search indexing pipeline.
//!
//! Provides RocksDB-backed storage with:
//! - Column family isolation for the crawl schedule, document watermarks
//!   and crawler state
//! - Insert-or-get crawl path entries with parent links
//! - Atomic "due for crawl" dispatch that stamps entries as it reads them
//! - Thread-scoped transactions with deduplicated post-commit hooks

pub mod column_families;
pub mod db;
pub mod error;
pub mod keys;
pub mod schedule;
pub mod transaction;
pub mod watermarks;

pub use db::{Storage, StorageStats};
pub use error::StorageError;
pub use keys::CrawlPath;
pub use schedule::CrawlPathEntry;
pub use transaction::Transaction;
pub use watermarks::DocumentState;
