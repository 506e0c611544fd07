//! Periodic crawl job.
//!
//! Each firing asks the [`Crawler`] for the directories that are due and
//! queues them on a fresh task. The crawl itself runs on the indexing
//! service's threads; the job only dispatches.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use search_indexing::Crawler;
use search_types::CrawlerSettings;

use crate::registry::JobOutput;
use crate::{SchedulerError, SchedulerService};

pub const CRAWL_JOB_NAME: &str = "crawl";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlJobConfig {
    /// Cron expression (default: "0 * * * * *" = every minute)
    pub cron: String,

    /// IANA timezone; the scheduler default when unset
    pub timezone: Option<String>,
}

impl Default for CrawlJobConfig {
    fn default() -> Self {
        Self::from(&CrawlerSettings::default())
    }
}

impl From<&CrawlerSettings> for CrawlJobConfig {
    fn from(settings: &CrawlerSettings) -> Self {
        Self {
            cron: settings.crawl_cron.clone(),
            timezone: None,
        }
    }
}

/// Register the crawl job.
pub async fn create_crawl_job(
    scheduler: &SchedulerService,
    crawler: Arc<Crawler>,
    config: CrawlJobConfig,
) -> Result<uuid::Uuid, SchedulerError> {
    scheduler
        .register_job(
            CRAWL_JOB_NAME,
            &config.cron,
            config.timezone.as_deref(),
            move |token| {
                let crawler = crawler.clone();
                async move {
                    if token.is_cancelled() {
                        return Ok(JobOutput::new().with_metadata("skipped", "shutdown"));
                    }
                    // Storage and queue access block
                    let dispatched = tokio::task::spawn_blocking(move || crawler.crawl_due(Utc::now()))
                        .await
                        .map_err(|e| format!("crawl job panicked: {e}"))?
                        .map_err(|e| e.to_string())?;

                    Ok(match dispatched {
                        Some(task) => {
                            let progress = task.progress();
                            JobOutput::new()
                                .with_metadata("task", progress.id.to_string())
                                .with_metadata("description", progress.description)
                        }
                        None => {
                            debug!("Nothing due for crawl");
                            JobOutput::new().with_metadata("task", "none")
                        }
                    })
                }
            },
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{JobResult, SchedulerConfig};
    use search_index::{ManagerHandle, SearchIndexConfig};
    use search_indexing::{FileSystemTree, IndexingService, ResolverRegistry};
    use search_storage::Storage;
    use search_types::{ExtractionSettings, IndexingSettings};
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn crawler(tmp: &TempDir) -> (Arc<IndexingService>, Arc<Crawler>) {
        let files = tmp.path().join("files");
        std::fs::create_dir_all(&files).unwrap();
        std::fs::write(files.join("notes.txt"), "lab notes").unwrap();

        let storage = Arc::new(Storage::open(&tmp.path().join("db")).unwrap());
        let index = Arc::new(ManagerHandle::open(&SearchIndexConfig::new(tmp.path().join("index"))));
        let service = IndexingService::new(
            IndexingSettings::default(),
            &ExtractionSettings::default(),
            storage,
            index,
            Arc::new(ResolverRegistry::new()),
        );
        let tree = Arc::new(FileSystemTree::new(files));
        let crawler = Crawler::new(service.clone(), tree, CrawlerSettings::default());
        (service, crawler)
    }

    #[test]
    fn test_config_follows_crawler_settings() {
        let settings = CrawlerSettings {
            crawl_cron: "0 */5 * * * *".to_string(),
            ..Default::default()
        };
        let config = CrawlJobConfig::from(&settings);
        assert_eq!(config.cron, "0 */5 * * * *");
        assert!(config.timezone.is_none());
        assert_eq!(CrawlJobConfig::default().cron, "0 * * * * *");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_invalid_cron_rejected() {
        let tmp = TempDir::new().unwrap();
        let (_service, crawler) = crawler(&tmp);
        let scheduler = SchedulerService::new(SchedulerConfig::default()).await.unwrap();
        let config = CrawlJobConfig {
            cron: "every minute".to_string(),
            timezone: None,
        };
        let result = create_crawl_job(&scheduler, crawler, config).await;
        assert!(matches!(result, Err(SchedulerError::InvalidCron(_))));
        assert_eq!(scheduler.registry().job_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_job_dispatches_due_root() {
        let tmp = TempDir::new().unwrap();
        let (service, crawler) = crawler(&tmp);
        crawler.start().unwrap();

        let mut scheduler = SchedulerService::new(SchedulerConfig {
            shutdown_timeout_secs: 1,
            ..Default::default()
        })
        .await
        .unwrap();
        let config = CrawlJobConfig {
            cron: "* * * * * *".to_string(),
            timezone: None,
        };
        create_crawl_job(&scheduler, crawler, config).await.unwrap();
        let registry = scheduler.registry();

        scheduler.start().await.unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while registry.get_status(CRAWL_JOB_NAME).unwrap().run_count == 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        scheduler.shutdown().await.unwrap();

        let status = registry.get_status(CRAWL_JOB_NAME).unwrap();
        assert_eq!(status.last_result, Some(JobResult::Success));
        // Indexing threads never started, so the root crawl is still queued
        assert!(service.status().run_queue >= 1);
        assert!(service
            .tasks()
            .iter()
            .any(|t| t.progress().description.starts_with("Crawl")));
    }
}
