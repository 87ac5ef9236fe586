// Job Store Port (Interface)

use crate::domain::{Job, JobId, JsonMap, QueueStats};
use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Persistence interface for jobs.
///
/// Every transition is a single atomic store operation; there is no other
/// coordination between workers. Transitions out of RUNNING (`complete`,
/// `fail`, `fail_permanently`) only apply while the row is still RUNNING and
/// claimed by `worker_id`; otherwise they return `AppError::InvalidState` and
/// leave the row untouched.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a freshly built PENDING job
    async fn insert(&self, job: &Job) -> Result<()>;

    /// Find job by ID
    async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>>;

    /// Atomically claim the oldest due PENDING job in `queue` (FIFO by scheduled_at).
    ///
    /// Returns `None` when nothing is eligible.
    async fn claim_next(&self, queue: &str, worker_id: &str) -> Result<Option<Job>>;

    /// RUNNING -> COMPLETED, storing the handler result
    async fn complete(&self, id: &JobId, worker_id: &str, result: &JsonMap) -> Result<Job>;

    /// Record a failed attempt.
    ///
    /// Requeues with `scheduled_at = now + retry_delay` while attempts remain,
    /// otherwise the job becomes FAILED. `attempts` is incremented either way.
    async fn fail(
        &self,
        id: &JobId,
        worker_id: &str,
        error: &str,
        retry_delay: Duration,
    ) -> Result<Job>;

    /// RUNNING -> FAILED without consuming the retry budget
    async fn fail_permanently(&self, id: &JobId, worker_id: &str, error: &str) -> Result<Job>;

    /// PENDING | RUNNING -> CANCELLED
    async fn cancel(&self, id: &JobId) -> Result<Job>;

    /// Requeue RUNNING jobs claimed longer than `stale_threshold` ago.
    ///
    /// Recovery is not a failed attempt: `attempts` is left untouched.
    async fn cleanup_stale_running(&self, stale_threshold: Duration) -> Result<u64>;

    /// Delete terminal jobs with `updated_at < cutoff` (epoch ms)
    async fn delete_older_than(&self, cutoff: i64) -> Result<u64>;

    /// Job counts by status for every queue that has jobs
    async fn get_all_queue_stats(&self) -> Result<Vec<QueueStats>>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::domain::JobStatus;
    use crate::error::AppError;
    use crate::port::time_provider::duration_millis;
    use crate::port::TimeProvider;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    /// In-memory JobStore with the same transition rules as the SQL adapter.
    ///
    /// `set_unavailable(true)` makes every call fail with a database error.
    pub struct MockJobStore {
        jobs: Mutex<HashMap<JobId, Job>>,
        time_provider: Arc<dyn TimeProvider>,
        unavailable: AtomicBool,
    }

    impl MockJobStore {
        pub fn new(time_provider: Arc<dyn TimeProvider>) -> Self {
            Self {
                jobs: Mutex::new(HashMap::new()),
                time_provider,
                unavailable: AtomicBool::new(false),
            }
        }

        pub fn set_unavailable(&self, unavailable: bool) {
            self.unavailable.store(unavailable, Ordering::SeqCst);
        }

        pub fn get(&self, id: &str) -> Option<Job> {
            self.jobs.lock().unwrap().get(id).cloned()
        }

        fn check_available(&self) -> Result<()> {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(AppError::Database("mock store unavailable".to_string()));
            }
            Ok(())
        }

        fn transition_running<F>(&self, id: &JobId, worker_id: &str, apply: F) -> Result<Job>
        where
            F: FnOnce(&mut Job, i64),
        {
            self.check_available()?;
            let now = self.time_provider.now_millis();
            let mut jobs = self.jobs.lock().unwrap();
            let job = jobs
                .get_mut(id)
                .ok_or_else(|| AppError::NotFound(format!("Job {} not found", id)))?;
            if job.status != JobStatus::Running {
                return Err(AppError::InvalidState(format!(
                    "Job {} is {}, expected running",
                    id, job.status
                )));
            }
            if job.claimed_by.as_deref() != Some(worker_id) {
                return Err(AppError::InvalidState(format!(
                    "Job {} is claimed by {}, not {}",
                    id,
                    job.claimed_by.as_deref().unwrap_or("nobody"),
                    worker_id
                )));
            }
            apply(job, now);
            job.claimed_by = None;
            job.claimed_at = None;
            job.updated_at = now;
            Ok(job.clone())
        }
    }

    #[async_trait]
    impl JobStore for MockJobStore {
        async fn insert(&self, job: &Job) -> Result<()> {
            self.check_available()?;
            self.jobs
                .lock()
                .unwrap()
                .insert(job.id.clone(), job.clone());
            Ok(())
        }

        async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>> {
            self.check_available()?;
            Ok(self.get(id))
        }

        async fn claim_next(&self, queue: &str, worker_id: &str) -> Result<Option<Job>> {
            self.check_available()?;
            let now = self.time_provider.now_millis();
            let mut jobs = self.jobs.lock().unwrap();
            let next_id = jobs
                .values()
                .filter(|j| j.queue == queue && j.is_claimable(now))
                .min_by(|a, b| {
                    (a.scheduled_at, a.created_at, &a.id).cmp(&(b.scheduled_at, b.created_at, &b.id))
                })
                .map(|j| j.id.clone());

            let Some(job) = next_id.as_ref().and_then(|id| jobs.get_mut(id)) else {
                return Ok(None);
            };
            job.status = JobStatus::Running;
            job.claimed_by = Some(worker_id.to_string());
            job.claimed_at = Some(now);
            job.updated_at = now;
            Ok(Some(job.clone()))
        }

        async fn complete(&self, id: &JobId, worker_id: &str, result: &JsonMap) -> Result<Job> {
            self.transition_running(id, worker_id, |job, _| {
                job.status = JobStatus::Completed;
                job.result = Some(result.clone());
            })
        }

        async fn fail(
            &self,
            id: &JobId,
            worker_id: &str,
            error: &str,
            retry_delay: Duration,
        ) -> Result<Job> {
            self.transition_running(id, worker_id, |job, now| {
                if job.attempts + 1 < job.max_attempts {
                    job.status = JobStatus::Pending;
                    job.scheduled_at = now + duration_millis(retry_delay);
                } else {
                    job.status = JobStatus::Failed;
                }
                job.attempts += 1;
                job.last_error = Some(error.to_string());
            })
        }

        async fn fail_permanently(
            &self,
            id: &JobId,
            worker_id: &str,
            error: &str,
        ) -> Result<Job> {
            self.transition_running(id, worker_id, |job, _| {
                job.status = JobStatus::Failed;
                job.last_error = Some(error.to_string());
            })
        }

        async fn cancel(&self, id: &JobId) -> Result<Job> {
            self.check_available()?;
            let now = self.time_provider.now_millis();
            let mut jobs = self.jobs.lock().unwrap();
            let job = jobs
                .get_mut(id)
                .ok_or_else(|| AppError::NotFound(format!("Job {} not found", id)))?;
            if job.status.is_terminal() {
                return Err(AppError::InvalidState(format!(
                    "Cannot cancel job {} in state {}",
                    id, job.status
                )));
            }
            job.status = JobStatus::Cancelled;
            job.claimed_by = None;
            job.claimed_at = None;
            job.updated_at = now;
            Ok(job.clone())
        }

        async fn cleanup_stale_running(&self, stale_threshold: Duration) -> Result<u64> {
            self.check_available()?;
            let now = self.time_provider.now_millis();
            let cutoff = now - duration_millis(stale_threshold);
            let mut recovered = 0;
            for job in self.jobs.lock().unwrap().values_mut() {
                let stale = matches!(job.claimed_at, Some(at) if at < cutoff);
                if job.status == JobStatus::Running && stale {
                    job.status = JobStatus::Pending;
                    job.claimed_by = None;
                    job.claimed_at = None;
                    job.updated_at = now;
                    recovered += 1;
                }
            }
            Ok(recovered)
        }

        async fn delete_older_than(&self, cutoff: i64) -> Result<u64> {
            self.check_available()?;
            let mut jobs = self.jobs.lock().unwrap();
            let before = jobs.len();
            jobs.retain(|_, j| !(j.status.is_terminal() && j.updated_at < cutoff));
            Ok((before - jobs.len()) as u64)
        }

        async fn get_all_queue_stats(&self) -> Result<Vec<QueueStats>> {
            self.check_available()?;
            let mut by_queue: BTreeMap<String, QueueStats> = BTreeMap::new();
            for job in self.jobs.lock().unwrap().values() {
                by_queue
                    .entry(job.queue.clone())
                    .or_insert_with(|| QueueStats::new(job.queue.clone()))
                    .record(job.status, 1);
            }
            Ok(by_queue.into_values().collect())
        }
    }
}
