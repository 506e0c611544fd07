//! Background job scheduler for the doc-search daemon.
//!
//! Wraps `tokio-cron-scheduler` with timezone-aware cron jobs, graceful
//! shutdown through a `CancellationToken`, and a [`JobRegistry`] recording
//! every run. The periodic crawl and maintenance jobs live in [`jobs`].
//!
//! # Example
//!
//! ```ignore
//! use search_scheduler::{create_crawl_job, CrawlJobConfig, SchedulerConfig, SchedulerService};
//!
//! let scheduler = SchedulerService::new(SchedulerConfig::default()).await?;
//! create_crawl_job(&scheduler, crawler, CrawlJobConfig::default()).await?;
//! scheduler.start().await?;
//! ```

mod config;
mod error;
pub mod jobs;
mod registry;
mod scheduler;

pub use config::SchedulerConfig;
pub use error::SchedulerError;
pub use jobs::{create_crawl_job, create_maintenance_job, CrawlJobConfig, MaintenanceJobConfig};
pub use registry::{JobOutput, JobRegistry, JobResult, JobStatus};
pub use scheduler::{validate_cron_expression, SchedulerService};
