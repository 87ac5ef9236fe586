// Cleanup Loop - stale recovery + retention pruning

use crate::application::config::RunnerConfig;
use crate::application::worker::{bounded, ShutdownToken};
use crate::port::time_provider::duration_millis;
use crate::port::{JobStore, TimeProvider};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

/// Outcome of one cleanup pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    /// None when the step failed
    pub recovered: Option<u64>,
    pub deleted: Option<u64>,
}

/// Periodic maintenance task, one per runner.
///
/// Runs once immediately (repairing jobs abandoned by a previous process),
/// then every `cleanup_interval`.
pub struct CleanupLoop {
    store: Arc<dyn JobStore>,
    time_provider: Arc<dyn TimeProvider>,
    stale_threshold: Duration,
    retention: Duration,
    interval: Duration,
    store_timeout: Duration,
}

impl CleanupLoop {
    pub fn new(
        store: Arc<dyn JobStore>,
        time_provider: Arc<dyn TimeProvider>,
        config: &RunnerConfig,
    ) -> Self {
        Self {
            store,
            time_provider,
            stale_threshold: config.stale_threshold,
            retention: config.retention,
            interval: config.cleanup_interval,
            store_timeout: config.store_timeout,
        }
    }

    /// Run cleanup loop until shutdown
    pub async fn run(&self, mut shutdown: ShutdownToken) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            stale_threshold_ms = self.stale_threshold.as_millis() as u64,
            retention_ms = self.retention.as_millis() as u64,
            "Cleanup loop started"
        );

        // First tick fires immediately
        let mut tick = interval(self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {},
                _ = shutdown.wait() => break,
            }
            if shutdown.is_shutdown() {
                break;
            }
            self.run_once().await;
        }

        info!("Cleanup loop stopped");
    }

    /// One pass. Recovery and pruning are independent; a failure in one does not skip the other.
    pub async fn run_once(&self) -> CleanupReport {
        let mut report = CleanupReport::default();

        let recover = self.store.cleanup_stale_running(self.stale_threshold);
        match bounded("cleanup_stale_running", self.store_timeout, recover).await {
            Ok(recovered) => {
                if recovered > 0 {
                    warn!(recovered, "Requeued stale running jobs");
                }
                report.recovered = Some(recovered);
            }
            Err(e) => error!(error = %e, "Stale job recovery failed"),
        }

        let cutoff = self.time_provider.now_millis() - duration_millis(self.retention);
        let prune = self.store.delete_older_than(cutoff);
        match bounded("delete_older_than", self.store_timeout, prune).await {
            Ok(deleted) => {
                if deleted > 0 {
                    info!(deleted, cutoff, "Deleted expired terminal jobs");
                }
                report.deleted = Some(deleted);
            }
            Err(e) => error!(error = %e, "Retention pruning failed"),
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::worker::shutdown_channel;
    use crate::domain::{Job, JobStatus, JobType, JsonMap};
    use crate::port::job_store::mocks::MockJobStore;
    use crate::port::time_provider::mocks::MockTimeProvider;

    const NOW: i64 = 1_700_000_000_000;
    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn setup() -> (Arc<MockTimeProvider>, Arc<MockJobStore>, CleanupLoop) {
        let clock = Arc::new(MockTimeProvider::new(NOW));
        let store = Arc::new(MockJobStore::new(clock.clone()));
        let config = RunnerConfig {
            stale_threshold: Duration::from_secs(60),
            retention: 7 * DAY,
            cleanup_interval: Duration::from_millis(10),
            ..Default::default()
        };
        let cleanup = CleanupLoop::new(store.clone(), clock.clone(), &config);
        (clock, store, cleanup)
    }

    async fn insert(store: &MockJobStore, status: JobStatus, updated_at: i64) -> Job {
        let mut job = Job::new_test("default", JobType::new("t"), JsonMap::new());
        job.status = status;
        job.scheduled_at = updated_at;
        job.updated_at = updated_at;
        store.insert(&job).await.unwrap();
        job
    }

    #[tokio::test]
    async fn test_recovers_stale_job_without_touching_attempts() {
        let (clock, store, cleanup) = setup();
        let job = insert(&store, JobStatus::Pending, NOW).await;
        store.claim_next("default", "dead-worker").await.unwrap().unwrap();
        store.fail(&job.id, "dead-worker", "x", Duration::ZERO).await.unwrap();
        store.claim_next("default", "dead-worker").await.unwrap().unwrap();

        // Claimed 2T ago, never reported
        clock.advance(Duration::from_secs(120));
        let report = cleanup.run_once().await;
        assert_eq!(report.recovered, Some(1));

        let stored = store.get(&job.id).unwrap();
        assert_eq!(stored.status, JobStatus::Pending);
        assert_eq!(stored.attempts, 1);
        assert!(stored.claimed_by.is_none());
        assert!(stored.claimed_at.is_none());
    }

    #[tokio::test]
    async fn test_fresh_claim_is_left_alone() {
        let (clock, store, cleanup) = setup();
        let job = insert(&store, JobStatus::Pending, NOW).await;
        store.claim_next("default", "busy-worker").await.unwrap();

        clock.advance(Duration::from_secs(30));
        assert_eq!(cleanup.run_once().await.recovered, Some(0));
        assert_eq!(store.get(&job.id).unwrap().status, JobStatus::Running);
    }

    #[tokio::test]
    async fn test_prunes_only_old_terminal_jobs() {
        let (_clock, store, cleanup) = setup();
        let old = NOW - 8 * duration_millis(DAY);
        let old_done = insert(&store, JobStatus::Completed, old).await;
        let old_failed = insert(&store, JobStatus::Failed, old).await;
        let old_pending = insert(&store, JobStatus::Pending, old).await;
        let fresh_done = insert(&store, JobStatus::Completed, NOW).await;

        let report = cleanup.run_once().await;
        assert_eq!(report.deleted, Some(2));
        assert!(store.get(&old_done.id).is_none());
        assert!(store.get(&old_failed.id).is_none());
        assert!(store.get(&old_pending.id).is_some());
        assert!(store.get(&fresh_done.id).is_some());
    }

    #[tokio::test]
    async fn test_store_failure_is_reported_not_raised() {
        let (_clock, store, cleanup) = setup();
        store.set_unavailable(true);
        let report = cleanup.run_once().await;
        assert_eq!(report, CleanupReport { recovered: None, deleted: None });
    }

    #[tokio::test]
    async fn test_runs_immediately_and_stops_on_shutdown() {
        let (clock, store, cleanup) = setup();
        let job = insert(&store, JobStatus::Pending, NOW).await;
        store.claim_next("default", "crashed").await.unwrap();
        clock.advance(Duration::from_secs(600));

        let (tx, token) = shutdown_channel();
        let handle = tokio::spawn(async move { cleanup.run(token).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.get(&job.id).unwrap().status, JobStatus::Pending);

        tx.shutdown();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
