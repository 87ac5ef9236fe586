// Worker - Job execution loop for one (queue, slot)

pub mod constants;
mod in_flight;
mod shutdown;

pub use in_flight::{InFlightGuard, InFlightJobs};
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::config::RunnerConfig;
use crate::application::handler::{HandlerError, JobContext, JobHandler};
use crate::application::registry::HandlerRegistry;
use crate::application::retry::{RetryDecision, RetryPolicy};
use crate::domain::{Job, JsonMap};
use crate::error::{AppError, Result};
use crate::port::JobStore;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Run one store call under `limit`; elapsing maps to `AppError::Timeout`
pub(crate) async fn bounded<T, F>(op: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| AppError::Timeout(format!("{} exceeded {:?}", op, limit)))?
}

/// Worker processes jobs from a single queue, one job per poll tick
pub struct Worker {
    queue: String,
    worker_id: String,
    store: Arc<dyn JobStore>,
    registry: Arc<HandlerRegistry>,
    in_flight: Arc<InFlightJobs>,
    retry_policy: RetryPolicy,
    poll_interval: Duration,
    handler_timeout: Duration,
    store_timeout: Duration,
}

impl Worker {
    pub fn new(
        queue: impl Into<String>,
        worker_id: impl Into<String>,
        store: Arc<dyn JobStore>,
        registry: Arc<HandlerRegistry>,
        in_flight: Arc<InFlightJobs>,
        config: &RunnerConfig,
    ) -> Self {
        Self {
            queue: queue.into(),
            worker_id: worker_id.into(),
            store,
            registry,
            in_flight,
            retry_policy: RetryPolicy::new(config.base_retry_delay),
            poll_interval: config.poll_interval,
            handler_timeout: config.handler_timeout(),
            store_timeout: config.store_timeout,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Run worker loop until shutdown.
    ///
    /// Shutdown is observed between ticks; a job already dispatched is
    /// reported before the loop exits.
    pub async fn run(&self, mut shutdown: ShutdownToken) {
        info!(queue = %self.queue, worker_id = %self.worker_id, "Worker started");

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {},
                _ = shutdown.wait() => break,
            }
            if shutdown.is_shutdown() {
                break;
            }

            if let Err(e) = self.process_next_job(&shutdown).await {
                // Store trouble never kills the loop; try again next tick
                if e.is_transient() {
                    warn!(queue = %self.queue, worker_id = %self.worker_id, error = %e, "Claim failed");
                } else {
                    error!(queue = %self.queue, worker_id = %self.worker_id, error = %e, "Worker error");
                }
            }
        }

        info!(queue = %self.queue, worker_id = %self.worker_id, "Worker stopped");
    }

    /// Claim and process at most one job (returns true if a job was claimed)
    pub async fn process_next_job(&self, shutdown: &ShutdownToken) -> Result<bool> {
        let claim = self.store.claim_next(&self.queue, &self.worker_id);
        let job = match bounded("claim_next", self.store_timeout, claim).await? {
            Some(job) => job,
            None => return Ok(false),
        };

        let _in_flight = self.in_flight.track(&job.id);

        let Some(handler) = self.registry.get(job.job_type.as_str()) else {
            // Retrying cannot fix a missing registration
            let reason = format!("no handler registered for job type '{}'", job.job_type);
            error!(job_id = %job.id, queue = %job.queue, job_type = %job.job_type, "{}", reason);
            let report = self.store.fail_permanently(&job.id, &self.worker_id, &reason);
            self.report(&job, "fail_permanently", report).await;
            return Ok(true);
        };

        info!(
            job_id = %job.id,
            queue = %job.queue,
            job_type = %job.job_type,
            attempt = job.current_attempt(),
            max_attempts = job.max_attempts,
            "Processing job"
        );

        let ctx = JobContext::new(&job, self.handler_timeout, shutdown.clone());
        let started = Instant::now();
        let outcome = Self::execute(handler, ctx, job.payload.clone(), self.handler_timeout).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(result) => {
                let report = self.store.complete(&job.id, &self.worker_id, &result);
                if self.report(&job, "complete", report).await.is_some() {
                    info!(job_id = %job.id, job_type = %job.job_type, duration_ms, "Job completed");
                }
            }
            Err(err) => {
                let delay = self.retry_policy.delay_for(job.current_attempt());
                let report = self.store.fail(&job.id, &self.worker_id, err.message(), delay);
                if self.report(&job, "fail", report).await.is_none() {
                    debug!(job_id = %job.id, error = %err, "Handler failed");
                    return Ok(true);
                }
                match self.retry_policy.decide(&job) {
                    RetryDecision::Retry(delay) => warn!(
                        job_id = %job.id,
                        job_type = %job.job_type,
                        attempt = job.current_attempt(),
                        max_attempts = job.max_attempts,
                        duration_ms,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %err,
                        "Job failed, scheduling retry"
                    ),
                    RetryDecision::Exhausted => error!(
                        job_id = %job.id,
                        job_type = %job.job_type,
                        attempts = job.current_attempt(),
                        duration_ms,
                        error = %err,
                        "Job failed after max attempts"
                    ),
                }
            }
        }

        Ok(true)
    }

    /// Execute handler in its own task so a panic cannot take the loop down.
    ///
    /// Timeout aborts the task; both timeout and panic count as handler errors.
    async fn execute(
        handler: Arc<dyn JobHandler>,
        ctx: JobContext,
        payload: JsonMap,
        timeout: Duration,
    ) -> std::result::Result<JsonMap, HandlerError> {
        let mut handle = tokio::spawn(async move { handler.handle(ctx, payload).await });

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) if join_err.is_panic() => Err(HandlerError::new(format!(
                "handler panicked: {}",
                panic_message(join_err.into_panic())
            ))),
            Ok(Err(join_err)) => Err(HandlerError::new(format!(
                "handler task cancelled: {}",
                join_err
            ))),
            Err(_) => {
                handle.abort();
                Err(HandlerError::new(format!(
                    "handler timed out after {:?}",
                    timeout
                )))
            }
        }
    }

    /// Write an outcome back; failures leave the job RUNNING for stale recovery.
    ///
    /// Returns the updated job only when the outcome was recorded.
    async fn report<F>(&self, job: &Job, op: &str, fut: F) -> Option<Job>
    where
        F: Future<Output = Result<Job>>,
    {
        match bounded(op, self.store_timeout, fut).await {
            Ok(updated) => {
                debug!(
                    job_id = %updated.id,
                    status = %updated.status,
                    attempts = updated.attempts,
                    "Job outcome recorded"
                );
                Some(updated)
            }
            Err(AppError::InvalidState(reason)) => {
                warn!(
                    job_id = %job.id,
                    worker_id = %self.worker_id,
                    reason = %reason,
                    "Job no longer held by this worker, outcome discarded"
                );
                None
            }
            Err(e) => {
                error!(
                    job_id = %job.id,
                    op = op,
                    error = %e,
                    "Failed to record job outcome"
                );
                None
            }
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
