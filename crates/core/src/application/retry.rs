// Retry logic
use crate::domain::Job;
use std::time::Duration;

/// Retry decision result
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Requeue the job after this delay
    Retry(Duration),
    /// Attempt budget exhausted, the failure is terminal
    Exhausted,
}

/// Linear backoff retry policy
///
/// delay = base_delay * attempt, where `attempt` is the 1-based number of the
/// attempt that just failed. Non-decreasing in attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base_delay: Duration,
}

impl RetryPolicy {
    /// Create a new retry policy
    ///
    /// # Arguments
    /// * `base_delay` - Delay after the first failed attempt
    pub fn new(base_delay: Duration) -> Self {
        Self { base_delay }
    }

    pub fn delay_for(&self, attempt: i32) -> Duration {
        let attempt = u32::try_from(attempt.max(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(attempt)
    }

    /// Decide what happens when the current attempt of `job` fails.
    ///
    /// The store applies the same rule atomically in `fail`; this is used for
    /// the delay and for logging the expected outcome.
    pub fn decide(&self, job: &Job) -> RetryDecision {
        if job.is_last_attempt() {
            RetryDecision::Exhausted
        } else {
            RetryDecision::Retry(self.delay_for(job.current_attempt()))
        }
    }
}
