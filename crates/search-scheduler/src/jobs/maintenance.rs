//! Search maintenance job.
//!
//! Forgets watermarks of documents that vanished more than the retention
//! window ago and compacts the crawl schedule database. By default runs
//! weekly at 4 AM Sunday, away from the crawl's busy hours.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use search_indexing::IndexingService;
use search_types::IndexingSettings;

use crate::registry::JobOutput;
use crate::{SchedulerError, SchedulerService};

pub const MAINTENANCE_JOB_NAME: &str = "search_maintenance";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceJobConfig {
    /// Cron expression (default: "0 0 4 * * 0" = 4 AM Sunday)
    pub cron: String,

    /// IANA timezone; the scheduler default when unset
    pub timezone: Option<String>,
}

impl Default for MaintenanceJobConfig {
    fn default() -> Self {
        Self::from(&IndexingSettings::default())
    }
}

impl From<&IndexingSettings> for MaintenanceJobConfig {
    fn from(settings: &IndexingSettings) -> Self {
        Self {
            cron: settings.maintenance_cron.clone(),
            timezone: None,
        }
    }
}

/// Register the maintenance job.
pub async fn create_maintenance_job(
    scheduler: &SchedulerService,
    service: Arc<IndexingService>,
    config: MaintenanceJobConfig,
) -> Result<uuid::Uuid, SchedulerError> {
    let id = scheduler
        .register_job(
            MAINTENANCE_JOB_NAME,
            &config.cron,
            config.timezone.as_deref(),
            move |token| {
                let service = service.clone();
                async move {
                    if token.is_cancelled() {
                        return Ok(JobOutput::new().with_metadata("skipped", "shutdown"));
                    }
                    let report = tokio::task::spawn_blocking(move || service.maintenance(Utc::now()))
                        .await
                        .map_err(|e| format!("maintenance job panicked: {e}"))?
                        .map_err(|e| e.to_string())?;

                    Ok(JobOutput::new()
                        .with_metadata("examined", report.examined.to_string())
                        .with_metadata("removed", report.removed.to_string()))
                }
            },
        )
        .await?;

    info!(cron = %config.cron, "Registered maintenance job");
    Ok(id)
}
