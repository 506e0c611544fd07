//! Job registry: per-job run history for status reporting.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of a job execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobResult {
    Success,
    Failed(String),
    /// The previous run was still in progress.
    Skipped(String),
}

/// Extra facts a job reports about its run.
#[derive(Debug, Clone, Default)]
pub struct JobOutput {
    pub metadata: HashMap<String, String>,
}

impl JobOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Status of a registered job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_name: String,
    pub cron_expr: String,
    /// When the job last finished
    pub last_run: Option<DateTime<Utc>>,
    pub last_duration_ms: Option<u64>,
    pub last_result: Option<JobResult>,
    pub run_count: u64,
    pub error_count: u64,
    pub is_running: bool,
    #[serde(default)]
    pub last_run_metadata: HashMap<String, String>,
}

impl JobStatus {
    pub fn new(job_name: String, cron_expr: String) -> Self {
        Self {
            job_name,
            cron_expr,
            last_run: None,
            last_duration_ms: None,
            last_result: None,
            run_count: 0,
            error_count: 0,
            is_running: false,
            last_run_metadata: HashMap::new(),
        }
    }
}

/// Thread-safe registry of job statuses.
///
/// ```
/// use search_scheduler::{JobRegistry, JobResult};
///
/// let registry = JobRegistry::new();
/// registry.register("crawl", "0 * * * * *");
/// assert!(registry.try_start("crawl"));
/// assert!(!registry.try_start("crawl"));
/// registry.record_complete("crawl", JobResult::Success, 12, Default::default());
/// assert!(!registry.is_running("crawl"));
/// ```
#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, JobStatus>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, JobStatus>> {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, JobStatus>> {
        self.jobs.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a job, replacing any previous entry of the same name.
    pub fn register(&self, job_name: &str, cron_expr: &str) {
        self.write().insert(
            job_name.to_string(),
            JobStatus::new(job_name.to_string(), cron_expr.to_string()),
        );
    }

    /// Mark the job running. False if it already was (or is unknown).
    pub fn try_start(&self, job_name: &str) -> bool {
        match self.write().get_mut(job_name) {
            Some(status) if !status.is_running => {
                status.is_running = true;
                true
            }
            _ => false,
        }
    }

    pub fn record_complete(
        &self,
        job_name: &str,
        result: JobResult,
        duration_ms: u64,
        metadata: HashMap<String, String>,
    ) {
        if let Some(status) = self.write().get_mut(job_name) {
            // A skipped run never started, so the running flag is not ours
            if !matches!(result, JobResult::Skipped(_)) {
                status.is_running = false;
            }
            status.last_run = Some(Utc::now());
            status.last_duration_ms = Some(duration_ms);
            status.run_count += 1;
            if matches!(result, JobResult::Failed(_)) {
                status.error_count += 1;
            }
            status.last_result = Some(result);
            status.last_run_metadata = metadata;
        }
    }

    pub fn get_status(&self, job_name: &str) -> Option<JobStatus> {
        self.read().get(job_name).cloned()
    }

    /// All jobs, sorted by name.
    pub fn get_all_status(&self) -> Vec<JobStatus> {
        let mut all: Vec<JobStatus> = self.read().values().cloned().collect();
        all.sort_by(|a, b| a.job_name.cmp(&b.job_name));
        all
    }

    pub fn is_running(&self, job_name: &str) -> bool {
        self.read().get(job_name).is_some_and(|s| s.is_running)
    }

    pub fn job_count(&self) -> usize {
        self.read().len()
    }
}
