//! Scheduler configuration.

use serde::{Deserialize, Serialize};

use crate::SchedulerError;

/// Configuration for the scheduler service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Default timezone for jobs (IANA name, e.g. "America/New_York").
    #[serde(default = "default_timezone")]
    pub default_timezone: String,

    /// Seconds running jobs get to finish after shutdown is signalled.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_shutdown_timeout() -> u64 {
    5
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_timezone: default_timezone(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl SchedulerConfig {
    /// Scheduler config for the application's configured timezone.
    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.default_timezone = timezone.into();
        self
    }

    /// Parse the configured timezone.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidTimezone` if the string is not an
    /// IANA timezone identifier.
    pub fn parse_timezone(&self) -> Result<chrono_tz::Tz, SchedulerError> {
        self.default_timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|_| SchedulerError::InvalidTimezone(self.default_timezone.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.default_timezone, "UTC");
        assert_eq!(config.shutdown_timeout_secs, 5);
        assert_eq!(config.parse_timezone().unwrap().name(), "UTC");
    }

    #[test]
    fn test_parse_timezone_named() {
        let config = SchedulerConfig::default().with_timezone("America/New_York");
        assert_eq!(config.parse_timezone().unwrap().name(), "America/New_York");
    }

    #[test]
    fn test_parse_invalid_timezone() {
        let config = SchedulerConfig::default().with_timezone("Invalid/Zone");
        match config.parse_timezone() {
            Err(SchedulerError::InvalidTimezone(tz)) => assert_eq!(tz, "Invalid/Zone"),
            other => panic!("Expected InvalidTimezone error, got {other:?}"),
        }
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let parsed: SchedulerConfig = serde_json::from_str(r#"{"default_timezone":"Europe/London"}"#).unwrap();
        assert_eq!(parsed.default_timezone, "Europe/London");
        assert_eq!(parsed.shutdown_timeout_secs, 5);
    }
}
