//! Configuration loading for doc-search.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at ~/.config/doc-search/config.toml.

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::SearchError;

const APP_NAME: &str = "doc-search";

/// Tuning for the indexing pipeline (queues, workers, commit cadence).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingSettings {
    /// Number of indexing worker threads; 0 means `max(1, cpus / 4)`.
    #[serde(default)]
    pub worker_threads: usize,

    /// Pre-processing queue length above which the runner stops
    /// dispatching new runnables.
    #[serde(default = "default_high_water_mark")]
    pub high_water_mark: usize,

    /// Attempts for transient failures before the item is dropped.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Documents indexed since the last commit that force a commit.
    #[serde(default = "default_commit_threshold")]
    pub commit_threshold: u64,

    /// Quiet period after the last indexed document before an
    /// opportunistic commit (ms).
    #[serde(default = "default_idle_commit_delay_ms")]
    pub idle_commit_delay_ms: u64,

    /// Worker poll timeout on the pre-processing queue (ms).
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// Runner poll timeout on the run queue (ms).
    #[serde(default = "default_runner_poll_timeout_ms")]
    pub runner_poll_timeout_ms: u64,

    /// Interval of the near-real-time refresh timer (seconds).
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,

    /// Index writer memory budget in MB.
    #[serde(default = "default_writer_memory_mb")]
    pub writer_memory_mb: usize,

    /// How long shutdown waits for each thread to exit (ms).
    #[serde(default = "default_shutdown_join_timeout_ms")]
    pub shutdown_join_timeout_ms: u64,

    /// Cron expression for the maintenance job (6-field).
    #[serde(default = "default_maintenance_cron")]
    pub maintenance_cron: String,

    /// Watermarks untouched for this many days are dropped by maintenance
    /// when their document no longer exists.
    #[serde(default = "default_watermark_retention_days")]
    pub watermark_retention_days: u64,
}

fn default_high_water_mark() -> usize {
    1000
}

fn default_max_retries() -> u32 {
    3
}

fn default_commit_threshold() -> u64 {
    10_000
}

fn default_idle_commit_delay_ms() -> u64 {
    2_000
}

fn default_poll_timeout_ms() -> u64 {
    2_000
}

fn default_runner_poll_timeout_ms() -> u64 {
    1_000
}

fn default_refresh_interval_secs() -> u64 {
    5
}

fn default_writer_memory_mb() -> usize {
    50
}

fn default_shutdown_join_timeout_ms() -> u64 {
    1_000
}

fn default_maintenance_cron() -> String {
    "0 0 4 * * 0".to_string()
}

fn default_watermark_retention_days() -> u64 {
    7
}

impl Default for IndexingSettings {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            high_water_mark: default_high_water_mark(),
            max_retries: default_max_retries(),
            commit_threshold: default_commit_threshold(),
            idle_commit_delay_ms: default_idle_commit_delay_ms(),
            poll_timeout_ms: default_poll_timeout_ms(),
            runner_poll_timeout_ms: default_runner_poll_timeout_ms(),
            refresh_interval_secs: default_refresh_interval_secs(),
            writer_memory_mb: default_writer_memory_mb(),
            shutdown_join_timeout_ms: default_shutdown_join_timeout_ms(),
            maintenance_cron: default_maintenance_cron(),
            watermark_retention_days: default_watermark_retention_days(),
        }
    }
}

impl IndexingSettings {
    /// Resolve the worker count, applying the `max(1, cpus / 4)` default.
    pub fn effective_worker_threads(&self) -> usize {
        if self.worker_threads > 0 {
            return self.worker_threads;
        }
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        (cpus / 4).max(1)
    }
}

/// Content extraction limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionSettings {
    /// Documents larger than this are indexed by name and metadata only.
    #[serde(default = "default_max_document_bytes")]
    pub max_document_bytes: u64,

    /// Size multiplier applied to compressed office formats before the
    /// limit check.
    #[serde(default = "default_compressed_inflation_factor")]
    pub compressed_inflation_factor: f64,

    /// Maximum characters kept in a stored summary.
    #[serde(default = "default_summary_length")]
    pub summary_length: usize,
}

fn default_max_document_bytes() -> u64 {
    10 * 1024 * 1024
}

fn default_compressed_inflation_factor() -> f64 {
    5.0
}

fn default_summary_length() -> usize {
    400
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            max_document_bytes: default_max_document_bytes(),
            compressed_inflation_factor: default_compressed_inflation_factor(),
            summary_length: default_summary_length(),
        }
    }
}

/// Crawler schedule settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerSettings {
    /// Delay before a crawled directory becomes due again (seconds).
    #[serde(default = "default_recrawl_interval_secs")]
    pub recrawl_interval_secs: u64,

    /// A directory crawled more recently than this is never due (seconds).
    #[serde(default = "default_min_recrawl_gap_secs")]
    pub min_recrawl_gap_secs: u64,

    /// Maximum schedule entries dispatched per crawl pass.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,

    /// Directory names never descended into.
    #[serde(default = "default_excluded_directories")]
    pub excluded_directories: Vec<String>,

    /// Cron expression for the periodic crawl job (6-field).
    #[serde(default = "default_crawl_cron")]
    pub crawl_cron: String,
}

fn default_recrawl_interval_secs() -> u64 {
    24 * 60 * 60
}

fn default_min_recrawl_gap_secs() -> u64 {
    30 * 60
}

fn default_batch_limit() -> usize {
    100
}

fn default_excluded_directories() -> Vec<String> {
    [".git", ".svn", "CVS", ".Trash", "node_modules"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_crawl_cron() -> String {
    "0 * * * * *".to_string()
}

impl Default for CrawlerSettings {
    fn default() -> Self {
        Self {
            recrawl_interval_secs: default_recrawl_interval_secs(),
            min_recrawl_gap_secs: default_min_recrawl_gap_secs(),
            batch_limit: default_batch_limit(),
            excluded_directories: default_excluded_directories(),
            crawl_cron: default_crawl_cron(),
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Path to RocksDB storage directory
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Path to the full-text index directory
    #[serde(default = "default_index_path")]
    pub index_path: String,

    /// Root directory exposed to the crawler as the resource tree
    #[serde(default)]
    pub crawl_root: Option<String>,

    /// Container id assigned to crawled files
    #[serde(default = "default_container_id")]
    pub container_id: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub indexing: IndexingSettings,

    #[serde(default)]
    pub extraction: ExtractionSettings,

    #[serde(default)]
    pub crawler: CrawlerSettings,

    /// Timezone for scheduled jobs
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_db_path() -> String {
    ProjectDirs::from("", "", APP_NAME)
        .map(|p| p.data_local_dir().join("db"))
        .unwrap_or_else(|| PathBuf::from("./data"))
        .to_string_lossy()
        .to_string()
}

fn default_index_path() -> String {
    ProjectDirs::from("", "", APP_NAME)
        .map(|p| p.data_local_dir().join("index"))
        .unwrap_or_else(|| PathBuf::from("./index"))
        .to_string_lossy()
        .to_string()
}

fn default_container_id() -> String {
    "root".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            index_path: default_index_path(),
            crawl_root: None,
            container_id: default_container_id(),
            log_level: default_log_level(),
            indexing: IndexingSettings::default(),
            extraction: ExtractionSettings::default(),
            crawler: CrawlerSettings::default(),
            timezone: default_timezone(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/doc-search/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (DOCSEARCH_*, nested keys joined by `__`)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, SearchError> {
        let config_dir = ProjectDirs::from("", "", APP_NAME)
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("db_path", default_db_path())
            .map_err(|e| SearchError::Config(e.to_string()))?
            .set_default("index_path", default_index_path())
            .map_err(|e| SearchError::Config(e.to_string()))?
            .set_default("container_id", default_container_id())
            .map_err(|e| SearchError::Config(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| SearchError::Config(e.to_string()))?
            .set_default("timezone", default_timezone())
            .map_err(|e| SearchError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // DOCSEARCH_INDEX_PATH, DOCSEARCH_INDEXING__WORKER_THREADS, ...
        builder = builder.add_source(
            Environment::with_prefix("DOCSEARCH")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| SearchError::Config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| SearchError::Config(e.to_string()))
    }

    /// Expand a leading `~/` to the user's home directory.
    pub fn expand_path(path: &str) -> PathBuf {
        if let Some(rest) = path.strip_prefix("~/") {
            if let Some(home) = std::env::var_os("HOME") {
                return PathBuf::from(home).join(rest);
            }
        }
        PathBuf::from(path)
    }

    pub fn expanded_db_path(&self) -> PathBuf {
        Self::expand_path(&self.db_path)
    }

    pub fn expanded_index_path(&self) -> PathBuf {
        Self::expand_path(&self.index_path)
    }
}
