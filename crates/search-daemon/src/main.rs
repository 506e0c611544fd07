//! Full-text document search daemon.
//!
//! ```bash
//! search-daemon start --crawl-root ~/Documents
//! search-daemon search "quarterly report" --sort modified
//! search-daemon crawl [--full]
//! search-daemon status
//! search-daemon clear
//! search-daemon reindex [--container ID [--recursive]]
//! search-daemon categories
//! ```
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/doc-search/config.toml)
//! 3. `--config` file
//! 4. Environment variables (DOCSEARCH_*)
//! 5. CLI flags

use anyhow::Result;
use clap::Parser;

use search_daemon::{
    clear_index, crawl_once, handle_search, init_logging, load_settings, reindex,
    search_categories, start_daemon, status_report, Cli, Commands,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(
        cli.config.as_deref(),
        cli.log_level.as_deref(),
        cli.command.paths(),
    )?;
    init_logging(&settings.log_level)?;

    match cli.command {
        Commands::Start { .. } => {
            start_daemon(settings).await?;
        }
        Commands::Search {
            query,
            category,
            offset,
            limit,
            sort,
            ..
        } => {
            handle_search(&settings, query, category, offset, limit, &sort)?;
        }
        Commands::Crawl { full, .. } => match crawl_once(settings, full)? {
            Some(progress) => println!(
                "Crawl finished: {} indexed, {} failed",
                progress.indexed, progress.failed
            ),
            None => println!("Nothing due for crawl"),
        },
        Commands::Status { .. } => {
            println!("{}", status_report(settings)?);
        }
        Commands::Clear { .. } => {
            clear_index(settings)?;
            println!("Index cleared; every directory is due for crawl");
        }
        Commands::Reindex {
            container,
            recursive,
            ..
        } => {
            let progress = reindex(settings, container.as_deref(), recursive)?;
            println!(
                "Reindex finished: {} indexed, {} failed",
                progress.indexed, progress.failed
            );
        }
        Commands::Categories { .. } => {
            for category in search_categories() {
                println!("{:<12} {}", category.name, category.description);
            }
        }
    }

    Ok(())
}
