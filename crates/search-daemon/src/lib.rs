//! Search daemon library exports.
//!
//! - `cli`: command-line argument parsing with clap
//! - `commands`: command implementations (start, search, crawl, status,
//!   clear, reindex, categories)

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands, PathArgs};
pub use commands::{
    apply_overrides, clear_index, crawl_once, handle_search, init_logging, load_settings, reindex,
    search_categories, search_index, start_daemon, status_report, Runtime, StatusReport,
};
