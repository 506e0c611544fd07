use thiserror::Error;
use tokio_cron_scheduler::JobSchedulerError;

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Raised by tokio-cron-scheduler while creating, adding or stopping jobs
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Invalid cron expression: {0}")]
    InvalidCron(String),

    /// Not an IANA timezone name
    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Scheduler is already running")]
    AlreadyRunning,

    #[error("Scheduler is not running")]
    NotRunning,
}

impl From<JobSchedulerError> for SchedulerError {
    fn from(err: JobSchedulerError) -> Self {
        SchedulerError::Scheduler(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_input() {
        let err = SchedulerError::InvalidCron("'every minute': bad field count".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid cron expression: 'every minute': bad field count"
        );
        assert_eq!(
            SchedulerError::InvalidTimezone("Mars/Olympus".into()).to_string(),
            "Invalid timezone: Mars/Olympus"
        );
        assert!(SchedulerError::NotRunning.to_string().contains("not running"));
    }
}
