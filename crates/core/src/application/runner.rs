// Runner - lifecycle and orchestration facade

use crate::application::cleanup::CleanupLoop;
use crate::application::config::RunnerConfig;
use crate::application::enqueue::{EnqueueRequest, EnqueueService};
use crate::application::handler::JobHandler;
use crate::application::registry::HandlerRegistry;
use crate::application::worker::{bounded, shutdown_channel, InFlightJobs, ShutdownSender, Worker};
use crate::domain::{Job, JobId, JsonMap, QueueStats};
use crate::error::{AppError, Result};
use crate::port::id_provider::UuidProvider;
use crate::port::time_provider::SystemTimeProvider;
use crate::port::{IdProvider, JobStore, TimeProvider};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Snapshot for operator dashboards
#[derive(Debug, Clone, Serialize)]
pub struct RunnerStats {
    pub worker_id: String,
    pub active_jobs: usize,
    pub active_job_ids: Vec<JobId>,
    pub queues: Vec<QueueStats>,
}

/// Loops spawned by `start`, awaited by `stop`
struct Lifecycle {
    shutdown: ShutdownSender,
    tasks: JoinSet<()>,
}

/// Job runner owned by the host's lifecycle controller.
///
/// Register handlers and declare queues, then `start`. `stop` signals every
/// loop and waits for them up to a caller-chosen deadline.
pub struct Runner {
    worker_id: String,
    config: RunnerConfig,
    store: Arc<dyn JobStore>,
    time_provider: Arc<dyn TimeProvider>,
    enqueuer: EnqueueService,
    registry: Arc<HandlerRegistry>,
    queues: Mutex<Vec<String>>,
    in_flight: Arc<InFlightJobs>,
    started: AtomicBool,
    lifecycle: Mutex<Option<Lifecycle>>,
}

impl Runner {
    /// Create a runner with system clock and UUID job ids
    pub fn new(store: Arc<dyn JobStore>, config: RunnerConfig) -> Result<Self> {
        Self::with_providers(
            store,
            config,
            Arc::new(UuidProvider),
            Arc::new(SystemTimeProvider),
        )
    }

    /// Create a runner with injected providers (deterministic tests)
    pub fn with_providers(
        store: Arc<dyn JobStore>,
        config: RunnerConfig,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Result<Self> {
        config.validate()?;

        let instance = uuid::Uuid::new_v4().simple().to_string();
        let worker_id = format!("runner-{}-{}", std::process::id(), &instance[..8]);

        let enqueuer = EnqueueService::new(
            Arc::clone(&store),
            id_provider,
            Arc::clone(&time_provider),
            config.default_max_attempts,
        );

        Ok(Self {
            worker_id,
            config,
            store,
            time_provider,
            enqueuer,
            registry: Arc::new(HandlerRegistry::new()),
            queues: Mutex::new(Vec::new()),
            in_flight: Arc::new(InFlightJobs::new()),
            started: AtomicBool::new(false),
            lifecycle: Mutex::new(None),
        })
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Register the handler for `job_type` (last registration wins)
    pub fn register<H>(&self, job_type: impl Into<String>, handler: H)
    where
        H: JobHandler + 'static,
    {
        self.registry.register(job_type, Arc::new(handler));
    }

    /// Declare a queue to be serviced by `worker_count` loops
    pub fn add_queue(&self, name: impl Into<String>) {
        let name = name.into();
        if self.started.load(Ordering::SeqCst) {
            warn!(queue = %name, "Queue declared after start, ignored");
            return;
        }

        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        if !queues.contains(&name) {
            info!(queue = %name, "Queue declared");
            queues.push(name);
        }
    }

    pub fn queues(&self) -> Vec<String> {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Spawn the worker loops and the cleanup loop.
    ///
    /// Must be called from within a Tokio runtime. Fails with
    /// `AlreadyStarted` on a second call without side effects.
    pub fn start(&self) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| AppError::Internal(format!("start requires a Tokio runtime: {}", e)))?;

        // Held until the loops are recorded so a concurrent `stop` waits for them
        let mut lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(AppError::AlreadyStarted);
        }

        let queues = self.queues();
        if queues.is_empty() {
            warn!(worker_id = %self.worker_id, "No queues declared, runner will not process jobs");
        }
        if self.registry.job_types().is_empty() {
            warn!(worker_id = %self.worker_id, "No handlers registered");
        }

        let (shutdown, token) = shutdown_channel();
        let mut tasks = JoinSet::new();

        for queue in &queues {
            for slot in 0..self.config.worker_count {
                let worker = Worker::new(
                    queue.clone(),
                    format!("{}:{}:{}", self.worker_id, queue, slot),
                    Arc::clone(&self.store),
                    Arc::clone(&self.registry),
                    Arc::clone(&self.in_flight),
                    &self.config,
                );
                let token = token.clone();
                tasks.spawn_on(async move { worker.run(token).await }, &runtime);
            }
        }

        let cleanup = CleanupLoop::new(
            Arc::clone(&self.store),
            Arc::clone(&self.time_provider),
            &self.config,
        );
        tasks.spawn_on(async move { cleanup.run(token).await }, &runtime);

        *lifecycle = Some(Lifecycle { shutdown, tasks });
        drop(lifecycle);

        info!(
            worker_id = %self.worker_id,
            queues = ?queues,
            workers_per_queue = self.config.worker_count,
            job_types = ?self.registry.job_types(),
            "Runner started"
        );
        Ok(())
    }

    /// Signal every loop to stop and wait up to `timeout` for them to exit.
    ///
    /// On timeout the still-active job ids are logged and returned in
    /// `ShutdownTimeout`; running handlers are left to finish on their own.
    /// No-op if the runner was never started or is already stopped.
    pub async fn stop(&self, timeout: Duration) -> Result<()> {
        let lifecycle = self
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(Lifecycle { shutdown, mut tasks }) = lifecycle else {
            return Ok(());
        };

        info!(
            worker_id = %self.worker_id,
            active_jobs = self.in_flight.len(),
            timeout_ms = timeout.as_millis() as u64,
            "Stopping runner"
        );
        shutdown.shutdown();

        let drain = async {
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "Runner loop ended abnormally");
                }
            }
        };

        match tokio::time::timeout(timeout, drain).await {
            Ok(()) => {
                info!(worker_id = %self.worker_id, "Runner stopped");
                Ok(())
            }
            Err(_) => {
                // Loops keep running detached; their handlers observe the shutdown signal
                tasks.detach_all();
                let active_jobs = self.in_flight.snapshot();
                warn!(
                    worker_id = %self.worker_id,
                    active_jobs = ?active_jobs,
                    "Shutdown deadline exceeded with jobs still in flight"
                );
                Err(AppError::ShutdownTimeout { active_jobs })
            }
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub async fn enqueue(&self, queue: &str, job_type: &str, payload: JsonMap) -> Result<Job> {
        self.enqueuer.enqueue(queue, job_type, payload).await
    }

    pub async fn enqueue_delayed(
        &self,
        queue: &str,
        job_type: &str,
        payload: JsonMap,
        delay: Duration,
    ) -> Result<Job> {
        self.enqueuer
            .enqueue_delayed(queue, job_type, payload, delay)
            .await
    }

    /// `at_millis` is epoch ms
    pub async fn enqueue_at(
        &self,
        queue: &str,
        job_type: &str,
        payload: JsonMap,
        at_millis: i64,
    ) -> Result<Job> {
        self.enqueuer
            .enqueue_at(queue, job_type, payload, at_millis)
            .await
    }

    /// Enqueue with full control (schedule, attempt ceiling)
    pub async fn enqueue_request(&self, req: EnqueueRequest) -> Result<Job> {
        self.enqueuer.execute(req).await
    }

    pub async fn cancel(&self, job_id: &JobId) -> Result<Job> {
        let job = bounded("cancel", self.config.store_timeout, self.store.cancel(job_id)).await?;
        info!(job_id = %job.id, queue = %job.queue, "Job cancelled");
        Ok(job)
    }

    pub async fn get_job(&self, job_id: &JobId) -> Result<Option<Job>> {
        bounded(
            "find_by_id",
            self.config.store_timeout,
            self.store.find_by_id(job_id),
        )
        .await
    }

    pub async fn stats(&self) -> Result<RunnerStats> {
        let queues = bounded(
            "get_all_queue_stats",
            self.config.store_timeout,
            self.store.get_all_queue_stats(),
        )
        .await?;

        let active_job_ids = self.in_flight.snapshot();
        Ok(RunnerStats {
            worker_id: self.worker_id.clone(),
            active_jobs: active_job_ids.len(),
            active_job_ids,
            queues,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::handler::{HandlerError, JobContext};
    use crate::domain::JobStatus;
    use crate::port::job_store::mocks::MockJobStore;
    use async_trait::async_trait;
    use std::future::pending;
    use tokio_test::{assert_err, assert_ok};

    /// Store whose calls never return
    struct StalledStore;

    #[async_trait]
    impl JobStore for StalledStore {
        async fn insert(&self, _job: &Job) -> Result<()> {
            pending().await
        }
        async fn find_by_id(&self, _id: &JobId) -> Result<Option<Job>> {
            pending().await
        }
        async fn claim_next(&self, _queue: &str, _worker_id: &str) -> Result<Option<Job>> {
            pending().await
        }
        async fn complete(&self, _id: &JobId, _worker_id: &str, _result: &JsonMap) -> Result<Job> {
            pending().await
        }
        async fn fail(
            &self,
            _id: &JobId,
            _worker_id: &str,
            _error: &str,
            _retry_delay: Duration,
        ) -> Result<Job> {
            pending().await
        }
        async fn fail_permanently(&self, _id: &JobId, _worker_id: &str, _error: &str) -> Result<Job> {
            pending().await
        }
        async fn cancel(&self, _id: &JobId) -> Result<Job> {
            pending().await
        }
        async fn cleanup_stale_running(&self, _stale_threshold: Duration) -> Result<u64> {
            pending().await
        }
        async fn delete_older_than(&self, _cutoff: i64) -> Result<u64> {
            pending().await
        }
        async fn get_all_queue_stats(&self) -> Result<Vec<QueueStats>> {
            pending().await
        }
    }

    fn fast_config() -> RunnerConfig {
        RunnerConfig {
            worker_count: 2,
            poll_interval: Duration::from_millis(10),
            base_retry_delay: Duration::from_millis(10),
            stale_threshold: Duration::from_secs(30),
            cleanup_interval: Duration::from_millis(50),
            ..Default::default()
        }
    }

    fn runner() -> (Runner, Arc<MockJobStore>) {
        let store = Arc::new(MockJobStore::new(Arc::new(SystemTimeProvider)));
        let runner = Runner::new(store.clone(), fast_config()).unwrap();
        (runner, store)
    }

    async fn wait_for_status(runner: &Runner, id: &JobId, status: JobStatus) -> Job {
        for _ in 0..200 {
            let job = runner.get_job(id).await.unwrap().unwrap();
            if job.status == status {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never reached {}", id, status);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let store = Arc::new(MockJobStore::new(Arc::new(SystemTimeProvider)));
        let config = RunnerConfig {
            worker_count: 0,
            ..Default::default()
        };
        assert!(matches!(
            Runner::new(store, config),
            Err(AppError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_double_start_is_rejected() {
        let (runner, _store) = runner();
        runner.add_queue("default");

        assert_ok!(runner.start());
        assert!(matches!(runner.start(), Err(AppError::AlreadyStarted)));
        assert_ok!(runner.stop(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_start_without_queues_is_allowed() {
        let (runner, _store) = runner();
        assert_ok!(runner.start());
        assert_ok!(runner.stop(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_stop_before_start_is_noop() {
        let (runner, _store) = runner();
        assert_ok!(runner.stop(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_duplicate_queue_declared_once() {
        let (runner, _store) = runner();
        runner.add_queue("default");
        runner.add_queue("default");
        runner.add_queue("emails");
        assert_eq!(runner.queues(), vec!["default", "emails"]);
    }

    #[tokio::test]
    async fn test_enqueued_job_completes() {
        let (runner, _store) = runner();
        runner.add_queue("default");
        runner.register("double", |_ctx: JobContext, payload: JsonMap| async move {
            let n = payload.get("n").and_then(|v| v.as_i64()).unwrap_or(0);
            let mut out = JsonMap::new();
            out.insert("n".into(), serde_json::json!(n * 2));
            Ok::<_, HandlerError>(out)
        });

        let mut payload = JsonMap::new();
        payload.insert("n".into(), serde_json::json!(21));
        let job = runner.enqueue("default", "double", payload).await.unwrap();

        runner.start().unwrap();
        let done = wait_for_status(&runner, &job.id, JobStatus::Completed).await;
        assert_eq!(done.result.unwrap()["n"], serde_json::json!(42));
        assert_ok!(runner.stop(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_stop_times_out_on_uncooperative_handler() {
        let (runner, _store) = runner();
        runner.add_queue("default");
        runner.register("stubborn", |_ctx: JobContext, _payload: JsonMap| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, HandlerError>(JsonMap::new())
        });
        let job = runner.enqueue("default", "stubborn", JsonMap::new()).await.unwrap();

        runner.start().unwrap();
        wait_for_status(&runner, &job.id, JobStatus::Running).await;

        let err = assert_err!(runner.stop(Duration::from_millis(100)).await);
        match err {
            AppError::ShutdownTimeout { active_jobs } => assert_eq!(active_jobs, vec![job.id]),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_stats_reports_queues_and_active_jobs() {
        let (runner, _store) = runner();
        runner
            .enqueue("default", "anything", JsonMap::new())
            .await
            .unwrap();
        runner
            .enqueue_delayed("emails", "anything", JsonMap::new(), Duration::from_secs(3600))
            .await
            .unwrap();

        let stats = runner.stats().await.unwrap();
        assert_eq!(stats.worker_id, runner.worker_id());
        assert_eq!(stats.active_jobs, 0);
        assert_eq!(stats.queues.len(), 2);
        assert_eq!(stats.queues[0].queue, "default");
        assert_eq!(stats.queues[0].pending, 1);
        assert_eq!(stats.queues[1].queue, "emails");
    }

    #[tokio::test]
    async fn test_cancel_pending_job() {
        let (runner, _store) = runner();
        let job = runner.enqueue("default", "t", JsonMap::new()).await.unwrap();

        let cancelled = runner.cancel(&job.id).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert!(matches!(
            runner.cancel(&job.id).await,
            Err(AppError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_stalled_store_calls_time_out() {
        let config = RunnerConfig {
            store_timeout: Duration::from_millis(50),
            ..fast_config()
        };
        let runner = Runner::new(Arc::new(StalledStore), config).unwrap();
        let id = "job-1".to_string();

        assert!(matches!(runner.cancel(&id).await, Err(AppError::Timeout(_))));
        assert!(matches!(runner.get_job(&id).await, Err(AppError::Timeout(_))));
        assert!(matches!(runner.stats().await, Err(AppError::Timeout(_))));
    }

    /// A stop issued while start is still spawning waits for the loops it spawns
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_racing_start_stops_spawned_loops() {
        for _ in 0..20 {
            let (runner, store) = runner();
            let runner = Arc::new(runner);
            runner.add_queue("default");
            runner.register("t", |_ctx: JobContext, _payload: JsonMap| async move {
                Ok::<_, HandlerError>(JsonMap::new())
            });

            let starter = {
                let runner = Arc::clone(&runner);
                tokio::task::spawn_blocking(move || runner.start())
            };
            let stopper = {
                let runner = Arc::clone(&runner);
                tokio::spawn(async move {
                    while !runner.is_started() {
                        tokio::task::yield_now().await;
                    }
                    runner.stop(Duration::from_secs(1)).await
                })
            };
            assert_ok!(starter.await.unwrap());
            assert_ok!(stopper.await.unwrap());

            // No loop survived the stop, so nothing claims new work
            let job = runner.enqueue("default", "t", JsonMap::new()).await.unwrap();
            tokio::time::sleep(Duration::from_millis(40)).await;
            assert_eq!(store.get(&job.id).unwrap().status, JobStatus::Pending);
        }
    }
}
