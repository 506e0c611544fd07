//! Jobs registered with the scheduler.
//!
//! - **crawl**: dispatches every crawl schedule entry that has come due
//! - **maintenance**: forgets vanished documents and compacts storage

pub mod crawl;
pub mod maintenance;

pub use crawl::{create_crawl_job, CrawlJobConfig};
pub use maintenance::{create_maintenance_job, MaintenanceJobConfig};
