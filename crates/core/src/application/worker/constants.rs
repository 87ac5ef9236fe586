// Runner defaults (no magic values in the loops)
use std::time::Duration;

/// Worker loops per declared queue
pub const DEFAULT_WORKER_COUNT: usize = 2;

/// Interval between claim attempts of one worker loop (1s)
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Base retry delay, multiplied by the attempt number (10s)
pub const DEFAULT_BASE_RETRY_DELAY: Duration = Duration::from_secs(10);

/// RUNNING jobs claimed longer ago than this are presumed abandoned (5 minutes)
pub const DEFAULT_STALE_THRESHOLD: Duration = Duration::from_secs(5 * 60);

/// Interval between stale recovery / retention passes (1 minute)
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Terminal jobs are kept this long before deletion (7 days)
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Upper bound for a single store call (5s)
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Attempt ceiling for jobs enqueued without an override
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// Handler budget as a fraction of the stale threshold (numerator / denominator).
/// Keeps the local timeout ahead of stale recovery.
pub const HANDLER_TIMEOUT_RATIO: (u32, u32) = (4, 5);
