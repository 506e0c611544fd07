//! Column family definitions for RocksDB.
//!
//! - crawl_paths: crawl schedule entries keyed by normalized path
//! - documents: per-document indexing watermarks keyed by document id
//! - settings: small process-wide flags (crawler state)

use rocksdb::{ColumnFamilyDescriptor, Options};

/// Column family name for crawl schedule entries
pub const CF_CRAWL_PATHS: &str = "crawl_paths";

/// Column family name for document watermarks
pub const CF_DOCUMENTS: &str = "documents";

/// Column family name for persisted flags
pub const CF_SETTINGS: &str = "settings";

/// All column family names
pub const ALL_CF_NAMES: &[&str] = &[CF_CRAWL_PATHS, CF_DOCUMENTS, CF_SETTINGS];

/// Watermarks are small and rewritten often; compress them.
fn documents_options() -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
    opts
}

/// Build all column family descriptors
pub fn build_cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
    vec![
        ColumnFamilyDescriptor::new(CF_CRAWL_PATHS, Options::default()),
        ColumnFamilyDescriptor::new(CF_DOCUMENTS, documents_options()),
        ColumnFamilyDescriptor::new(CF_SETTINGS, Options::default()),
    ]
}
