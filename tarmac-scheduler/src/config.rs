//! Scheduler configuration
//!
//! Defines all configurable parameters for the scheduling core including
//! the session liveness threshold and event delivery tuning.

use std::time::Duration;

use tarmac_core::{Error, Result};

/// Scheduler configuration
///
/// All thresholds and limits are configurable to allow tuning for
/// different deployment scenarios (dev vs prod, few vs many runners).
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How long a session may go without a heartbeat before it reads as inactive
    pub liveness_threshold: Duration,

    /// Per-subscriber event queue capacity; a full queue drops events
    pub event_buffer: usize,

    /// Maximum size of a single log append in bytes
    pub max_append_size: usize,

    /// Applied to jobs enqueued without an explicit max duration
    pub default_max_job_duration: Duration,
}

impl SchedulerConfig {
    /// Creates a configuration with defaults
    pub fn new() -> Self {
        Self {
            liveness_threshold: Duration::from_secs(30),
            event_buffer: 256,
            max_append_size: 1024 * 1024,
            default_max_job_duration: Duration::from_secs(3600),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Recognized environment variables (all optional):
    /// - TARMAC_LIVENESS_THRESHOLD (seconds, default: 30)
    /// - TARMAC_EVENT_BUFFER (default: 256)
    /// - TARMAC_MAX_APPEND_SIZE (bytes, default: 1048576)
    /// - TARMAC_MAX_JOB_DURATION (seconds, default: 3600)
    pub fn from_env() -> Self {
        let defaults = Self::new();

        let liveness_threshold = std::env::var("TARMAC_LIVENESS_THRESHOLD")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.liveness_threshold);

        let event_buffer = std::env::var("TARMAC_EVENT_BUFFER")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.event_buffer);

        let max_append_size = std::env::var("TARMAC_MAX_APPEND_SIZE")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.max_append_size);

        let default_max_job_duration = std::env::var("TARMAC_MAX_JOB_DURATION")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.default_max_job_duration);

        Self {
            liveness_threshold,
            event_buffer,
            max_append_size,
            default_max_job_duration,
        }
    }

    pub fn with_liveness_threshold(mut self, threshold: Duration) -> Self {
        self.liveness_threshold = threshold;
        self
    }

    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity;
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if self.liveness_threshold.is_zero() {
            return Err(Error::InvalidState(
                "liveness_threshold must be greater than 0".to_string(),
            ));
        }

        if self.event_buffer == 0 {
            return Err(Error::InvalidState(
                "event_buffer must be greater than 0".to_string(),
            ));
        }

        if self.max_append_size == 0 {
            return Err(Error::InvalidState(
                "max_append_size must be greater than 0".to_string(),
            ));
        }

        if self.default_max_job_duration.is_zero() {
            return Err(Error::InvalidState(
                "default_max_job_duration must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.liveness_threshold, Duration::from_secs(30));
        assert_eq!(config.event_buffer, 256);
        assert_eq!(config.max_append_size, 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = SchedulerConfig::default();
        assert!(config.validate().is_ok());

        config.event_buffer = 0;
        assert!(config.validate().is_err());

        config.event_buffer = 16;
        config.liveness_threshold = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builders() {
        let config = SchedulerConfig::default()
            .with_liveness_threshold(Duration::from_secs(10))
            .with_event_buffer(8);
        assert_eq!(config.liveness_threshold, Duration::from_secs(10));
        assert_eq!(config.event_buffer, 8);
    }
}
