//! Shared fixtures for the end-to-end tests
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tasklane_core::domain::{Job, JobId, JobStatus};
use tasklane_core::port::time_provider::SystemTimeProvider;
use tasklane_core::port::{JobStore, TimeProvider};
use tasklane_core::RunnerConfig;
use tasklane_infra_sqlite::{create_pool, run_migrations, SqliteJobStore};
use tempfile::TempDir;

/// Migrated SQLite file in a temp dir; removed on drop
pub struct TestDb {
    _dir: TempDir,
    pub url: String,
}

impl TestDb {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("tasklane.db").display());
        let pool = create_pool(&url, 1).await.unwrap();
        run_migrations(&pool).await.unwrap();
        pool.close().await;
        Self { _dir: dir, url }
    }

    /// Independent pool, as a separate process would open
    pub async fn pool(&self) -> SqlitePool {
        create_pool(&self.url, 4).await.unwrap()
    }

    pub async fn store(&self) -> Arc<SqliteJobStore> {
        self.store_with_clock(Arc::new(SystemTimeProvider)).await
    }

    pub async fn store_with_clock(&self, clock: Arc<dyn TimeProvider>) -> Arc<SqliteJobStore> {
        Arc::new(SqliteJobStore::new(self.pool().await, clock))
    }
}

/// Runner settings scaled down for tests
pub fn fast_config() -> RunnerConfig {
    RunnerConfig {
        worker_count: 2,
        poll_interval: Duration::from_millis(20),
        base_retry_delay: Duration::from_millis(10),
        stale_threshold: Duration::from_secs(30),
        cleanup_interval: Duration::from_millis(100),
        ..Default::default()
    }
}

/// Poll until the job reaches `status` (panics after `within`)
pub async fn wait_for_status(
    store: &dyn JobStore,
    id: &JobId,
    status: JobStatus,
    within: Duration,
) -> Job {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        let job = store.find_by_id(id).await.unwrap().unwrap();
        if job.status == status {
            return job;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {} stuck in {} (wanted {})",
            id,
            job.status,
            status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
