// Runner configuration

use crate::application::worker::constants::*;
use crate::error::{AppError, Result};
use std::time::Duration;

/// Runner configuration
///
/// Every field has a default; hosts override what they need.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Worker loops spawned per declared queue
    pub worker_count: usize,

    /// Delay between claim attempts of one worker loop
    pub poll_interval: Duration,

    /// Retry delay = base_retry_delay * attempt number
    pub base_retry_delay: Duration,

    /// Age after which a RUNNING claim is considered abandoned
    pub stale_threshold: Duration,

    /// How often stale recovery and retention pruning run
    pub cleanup_interval: Duration,

    /// How long terminal jobs are kept
    pub retention: Duration,

    /// Bound for each individual store call (claim, complete, fail, cleanup)
    pub store_timeout: Duration,

    /// Attempt ceiling for new jobs
    pub default_max_attempts: i32,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            base_retry_delay: DEFAULT_BASE_RETRY_DELAY,
            stale_threshold: DEFAULT_STALE_THRESHOLD,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            retention: DEFAULT_RETENTION,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            default_max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl RunnerConfig {
    /// Budget for one handler execution, derived from the stale threshold
    pub fn handler_timeout(&self) -> Duration {
        let (num, den) = HANDLER_TIMEOUT_RATIO;
        self.stale_threshold * num / den
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(AppError::Config("worker_count must be at least 1".into()));
        }
        if self.default_max_attempts < 1 {
            return Err(AppError::Config(
                "default_max_attempts must be at least 1".into(),
            ));
        }

        let durations = [
            ("poll_interval", self.poll_interval),
            ("stale_threshold", self.stale_threshold),
            ("cleanup_interval", self.cleanup_interval),
            ("retention", self.retention),
            ("store_timeout", self.store_timeout),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(AppError::Config(format!("{} must be non-zero", name)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RunnerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.worker_count, 2);
        assert_eq!(config.default_max_attempts, 3);
    }

    #[test]
    fn test_handler_timeout_stays_below_stale_threshold() {
        let config = RunnerConfig {
            stale_threshold: Duration::from_secs(100),
            ..Default::default()
        };
        assert_eq!(config.handler_timeout(), Duration::from_secs(80));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let config = RunnerConfig {
            worker_count: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(AppError::Config(_))));

        let config = RunnerConfig {
            poll_interval: Duration::ZERO,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("poll_interval"));
    }
}
