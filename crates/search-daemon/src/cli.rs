//! Command-line argument parsing. CLI flags override every other
//! configuration source.

use clap::{Parser, Subcommand};

/// Full-text document search daemon
#[derive(Parser, Debug)]
#[command(name = "search-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides ~/.config/doc-search/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Where the index and crawl schedule live. Shared by every command.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct PathArgs {
    /// Directory crawled and indexed
    #[arg(long)]
    pub crawl_root: Option<String>,

    /// Full-text index directory
    #[arg(long)]
    pub index_path: Option<String>,

    /// Crawl schedule database directory
    #[arg(long)]
    pub db_path: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the indexer, crawler and crawl schedule until interrupted
    Start {
        #[command(flatten)]
        paths: PathArgs,
    },

    /// Search the index
    Search {
        /// Query text
        query: String,

        /// Only documents in this category
        #[arg(long)]
        category: Option<String>,

        #[arg(long, default_value = "0")]
        offset: usize,

        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,

        /// relevance or modified
        #[arg(long, default_value = "relevance")]
        sort: String,

        #[command(flatten)]
        paths: PathArgs,
    },

    /// Crawl the configured root once and commit
    Crawl {
        /// Ignore watermarks and reindex every document
        #[arg(long)]
        full: bool,

        #[command(flatten)]
        paths: PathArgs,
    },

    /// Show index and crawl schedule status
    Status {
        #[command(flatten)]
        paths: PathArgs,
    },

    /// Delete every document and reset the crawl schedule
    Clear {
        #[command(flatten)]
        paths: PathArgs,
    },

    /// Reindex through the document providers
    Reindex {
        /// Only this container
        #[arg(long)]
        container: Option<String>,

        /// Also every container below --container
        #[arg(long, requires = "container")]
        recursive: bool,

        #[command(flatten)]
        paths: PathArgs,
    },

    /// List the categories searches can be restricted to
    Categories {
        #[command(flatten)]
        paths: PathArgs,
    },
}

impl Commands {
    pub fn paths(&self) -> &PathArgs {
        match self {
            Commands::Start { paths }
            | Commands::Search { paths, .. }
            | Commands::Crawl { paths, .. }
            | Commands::Status { paths }
            | Commands::Clear { paths }
            | Commands::Reindex { paths, .. }
            | Commands::Categories { paths } => paths,
        }
    }
}
