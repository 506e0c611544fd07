//! Scheduler service wrapper around tokio-cron-scheduler.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono_tz::Tz;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::registry::{JobOutput, JobRegistry, JobResult};
use crate::{SchedulerConfig, SchedulerError};

/// Validate a 6-field cron expression
/// (second minute hour day-of-month month day-of-week).
///
/// ```
/// use search_scheduler::validate_cron_expression;
///
/// assert!(validate_cron_expression("0 * * * * *").is_ok());
/// assert!(validate_cron_expression("0 30 4 * * *").is_ok());
/// assert!(validate_cron_expression("invalid").is_err());
/// assert!(validate_cron_expression("").is_err());
/// ```
pub fn validate_cron_expression(expr: &str) -> Result<(), SchedulerError> {
    match Job::new_async(expr, |_uuid, _lock| Box::pin(async {})) {
        Ok(_) => Ok(()),
        Err(e) => Err(SchedulerError::InvalidCron(format!("'{expr}': {e}"))),
    }
}

/// Owns the cron scheduler, the shutdown token handed to every job and
/// the registry of job runs.
pub struct SchedulerService {
    scheduler: JobScheduler,
    config: SchedulerConfig,
    shutdown_token: CancellationToken,
    registry: Arc<JobRegistry>,
    is_running: AtomicBool,
}

impl SchedulerService {
    /// Create the service without starting it.
    pub async fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config.parse_timezone()?;
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler,
            config,
            shutdown_token: CancellationToken::new(),
            registry: Arc::new(JobRegistry::new()),
            is_running: AtomicBool::new(false),
        })
    }

    pub async fn start(&self) -> Result<(), SchedulerError> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyRunning);
        }
        self.scheduler.start().await?;
        info!(jobs = self.registry.job_count(), "Scheduler started");
        Ok(())
    }

    /// Cancel the shutdown token, give running jobs the configured grace
    /// period, then stop the scheduler.
    pub async fn shutdown(&mut self) -> Result<(), SchedulerError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(SchedulerError::NotRunning);
        }

        info!("Initiating scheduler shutdown");
        self.shutdown_token.cancel();

        let grace = Duration::from_secs(self.config.shutdown_timeout_secs);
        let deadline = Instant::now() + grace;
        while self.registry.get_all_status().iter().any(|s| s.is_running) && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        if let Err(e) = self.scheduler.shutdown().await {
            warn!(error = %e, "Error during scheduler shutdown");
        }

        self.is_running.store(false, Ordering::SeqCst);
        info!("Scheduler shutdown complete");
        Ok(())
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn registry(&self) -> Arc<JobRegistry> {
        self.registry.clone()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Add a cron job with timezone-aware scheduling. `timezone` falls
    /// back to the configured default.
    pub async fn add_cron_job<F, Fut>(
        &self,
        name: &str,
        cron_expr: &str,
        timezone: Option<&str>,
        job_fn: F,
    ) -> Result<uuid::Uuid, SchedulerError>
    where
        F: Fn(CancellationToken) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let tz: Tz = match timezone {
            Some(tz_str) => Self::parse_timezone(tz_str)?,
            None => self.config.parse_timezone()?,
        };
        validate_cron_expression(cron_expr)?;

        let job_name = name.to_string();
        let shutdown_token = self.shutdown_token.clone();

        let job = Job::new_async_tz(cron_expr, tz, move |_uuid, _lock| {
            let token = shutdown_token.clone();
            let job_fn = job_fn.clone();
            let name = job_name.clone();

            Box::pin(async move {
                if token.is_cancelled() {
                    return;
                }
                info!(job = %name, "Job started");
                let start = Instant::now();
                job_fn(token).await;
                info!(job = %name, duration_ms = start.elapsed().as_millis(), "Job completed");
            })
        })
        .map_err(|e| SchedulerError::InvalidCron(e.to_string()))?;

        let uuid = self.scheduler.add(job).await?;
        info!(job = %name, uuid = %uuid, cron = %cron_expr, timezone = %tz.name(), "Job registered");
        Ok(uuid)
    }

    /// Like [`add_cron_job`](Self::add_cron_job), but every run is
    /// recorded in the registry and a firing that overlaps a run still in
    /// progress is skipped.
    pub async fn register_job<F, Fut>(
        &self,
        name: &str,
        cron_expr: &str,
        timezone: Option<&str>,
        job_fn: F,
    ) -> Result<uuid::Uuid, SchedulerError>
    where
        F: Fn(CancellationToken) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<JobOutput, String>> + Send,
    {
        let registry = self.registry.clone();
        let job_name = name.to_string();

        let uuid = self.add_cron_job(name, cron_expr, timezone, move |token| {
            let registry = registry.clone();
            let job_fn = job_fn.clone();
            let name = job_name.clone();
            async move {
                if !registry.try_start(&name) {
                    info!(job = %name, "Previous run still in progress, skipping");
                    registry.record_complete(
                        &name,
                        JobResult::Skipped("previous run in progress".into()),
                        0,
                        Default::default(),
                    );
                    return;
                }

                let start = Instant::now();
                let (result, metadata) = match job_fn(token).await {
                    Ok(output) => (JobResult::Success, output.metadata),
                    Err(e) => {
                        warn!(job = %name, error = %e, "Job failed");
                        (JobResult::Failed(e), Default::default())
                    }
                };
                let elapsed = start.elapsed().as_millis() as u64;
                registry.record_complete(&name, result, elapsed, metadata);
            }
        })
        .await?;
        self.registry.register(name, cron_expr);
        Ok(uuid)
    }

    pub fn parse_timezone(tz_str: &str) -> Result<Tz, SchedulerError> {
        tz_str
            .parse()
            .map_err(|_| SchedulerError::InvalidTimezone(tz_str.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn quick_config() -> SchedulerConfig {
        SchedulerConfig {
            shutdown_timeout_secs: 1,
            ..Default::default()
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_scheduler_start_stop() {
        let mut scheduler = SchedulerService::new(quick_config()).await.unwrap();
        assert!(!scheduler.is_running());

        scheduler.start().await.unwrap();
        assert!(scheduler.is_running());
        assert!(matches!(scheduler.start().await, Err(SchedulerError::AlreadyRunning)));

        scheduler.shutdown().await.unwrap();
        assert!(!scheduler.is_running());
        assert!(matches!(scheduler.shutdown().await, Err(SchedulerError::NotRunning)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_shutdown_cancels_token() {
        let mut scheduler = SchedulerService::new(quick_config()).await.unwrap();
        let token = scheduler.shutdown_token();
        assert!(!token.is_cancelled());

        scheduler.start().await.unwrap();
        scheduler.shutdown().await.unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_invalid_timezone_config() {
        let config = SchedulerConfig {
            default_timezone: "Invalid/Zone".to_string(),
            ..Default::default()
        };
        let result = SchedulerService::new(config).await;
        assert!(matches!(result, Err(SchedulerError::InvalidTimezone(_))));
    }

    #[test]
    fn test_validate_cron_expression() {
        assert!(validate_cron_expression("0 0 * * * *").is_ok());
        assert!(validate_cron_expression("*/10 * * * * *").is_ok());
        assert!(validate_cron_expression("0 0 0 * * SUN").is_ok());
        assert!(validate_cron_expression("* * *").is_err());
    }

    #[test]
    fn test_timezone_parsing() {
        assert!(SchedulerService::parse_timezone("UTC").is_ok());
        assert!(SchedulerService::parse_timezone("America/Chicago").is_ok());
        assert!(matches!(
            SchedulerService::parse_timezone("Mars/Olympus"),
            Err(SchedulerError::InvalidTimezone(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_add_cron_job_invalid_expression() {
        let scheduler = SchedulerService::new(SchedulerConfig::default()).await.unwrap();
        let result = scheduler
            .add_cron_job("bad-job", "invalid-cron", None, |_token| async {})
            .await;
        assert!(matches!(result, Err(SchedulerError::InvalidCron(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_add_cron_job_with_timezone() {
        let scheduler = SchedulerService::new(SchedulerConfig::default()).await.unwrap();
        let uuid = scheduler
            .add_cron_job("tz-job", "0 0 3 * * *", Some("Europe/Berlin"), |_token| async {})
            .await
            .unwrap();
        assert!(!uuid.is_nil());

        let result = scheduler
            .add_cron_job("bad-tz", "0 0 3 * * *", Some("Nowhere/Zone"), |_token| async {})
            .await;
        assert!(matches!(result, Err(SchedulerError::InvalidTimezone(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_register_job_records_runs() {
        let mut scheduler = SchedulerService::new(quick_config()).await.unwrap();
        let counter = Arc::new(AtomicU32::new(0));
        let seen = counter.clone();

        scheduler
            .register_job("tick", "* * * * * *", None, move |_token| {
                let seen = seen.clone();
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok(JobOutput::new().with_metadata("kind", "tick"))
                }
            })
            .await
            .unwrap();
        assert_eq!(scheduler.registry().job_count(), 1);

        scheduler.start().await.unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while counter.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.shutdown().await.unwrap();

        let status = scheduler.registry().get_status("tick").unwrap();
        assert!(status.run_count >= 1);
        assert_eq!(status.last_result, Some(JobResult::Success));
        assert_eq!(status.last_run_metadata["kind"], "tick");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_register_job_skips_overlapping_run() {
        let mut scheduler = SchedulerService::new(quick_config()).await.unwrap();
        let registry = scheduler.registry();

        scheduler
            .register_job("slow", "* * * * * *", None, |_token| async {
                Ok(JobOutput::new())
            })
            .await
            .unwrap();
        // Pretend a run is already in flight
        assert!(registry.try_start("slow"));

        scheduler.start().await.unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while registry.get_status("slow").unwrap().run_count == 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let status = registry.get_status("slow").unwrap();
        assert!(matches!(status.last_result, Some(JobResult::Skipped(_))));
        assert!(status.is_running);

        registry.record_complete("slow", JobResult::Success, 0, Default::default());
        scheduler.shutdown().await.unwrap();
    }
}
