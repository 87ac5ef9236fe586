// SQLite JobStore Implementation

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tasklane_core::domain::{Job, JobId, JobStatus, JobType, JsonMap, QueueStats};
use tasklane_core::error::{AppError, Result};
use tasklane_core::port::time_provider::duration_millis;
use tasklane_core::port::{JobStore, TimeProvider};

/// Durable job store on SQLite.
///
/// Each transition is one `UPDATE ... RETURNING` statement, so claims from
/// concurrent workers (and processes sharing the file) never overlap.
pub struct SqliteJobStore {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Explain why a conditional update touched no row
    async fn miss(&self, id: &JobId, action: &str) -> AppError {
        let current: std::result::Result<Option<(String, Option<String>)>, _> =
            sqlx::query_as("SELECT status, claimed_by FROM jobs WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await;

        match current {
            Ok(None) => AppError::NotFound(format!("Job {} not found", id)),
            Ok(Some((status, Some(holder)))) => AppError::InvalidState(format!(
                "Cannot {} job {} in state {} (claimed by {})",
                action, id, status, holder
            )),
            Ok(Some((status, None))) => {
                AppError::InvalidState(format!("Cannot {} job {} in state {}", action, id, status))
            }
            Err(e) => map_sqlx_error(e),
        }
    }

    async fn finish(&self, id: &JobId, action: &str, row: Option<JobRow>) -> Result<Job> {
        match row {
            Some(row) => row.into_job(),
            None => Err(self.miss(id, action).await),
        }
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn insert(&self, job: &Job) -> Result<()> {
        let payload = serde_json::to_string(&job.payload)?;
        let result = job.result.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, queue, job_type, payload, status,
                attempts, max_attempts, scheduled_at,
                claimed_by, claimed_at, result, last_error,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.queue)
        .bind(job.job_type.as_str())
        .bind(payload)
        .bind(job.status.as_str())
        .bind(job.attempts)
        .bind(job.max_attempts)
        .bind(job.scheduled_at)
        .bind(&job.claimed_by)
        .bind(job.claimed_at)
        .bind(result)
        .bind(&job.last_error)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(JobRow::into_job).transpose()
    }

    async fn claim_next(&self, queue: &str, worker_id: &str) -> Result<Option<Job>> {
        let now = self.time_provider.now_millis();

        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET status = 'running', claimed_by = ?, claimed_at = ?, updated_at = ?
            WHERE id = (
                SELECT id FROM jobs
                WHERE queue = ? AND status = 'pending' AND scheduled_at <= ?
                ORDER BY scheduled_at ASC, created_at ASC, id ASC
                LIMIT 1
            )
              AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(worker_id)
        .bind(now)
        .bind(now)
        .bind(queue)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(JobRow::into_job).transpose()
    }

    async fn complete(&self, id: &JobId, worker_id: &str, result: &JsonMap) -> Result<Job> {
        let now = self.time_provider.now_millis();
        let result = serde_json::to_string(result)?;

        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET status = 'completed', result = ?,
                claimed_by = NULL, claimed_at = NULL, updated_at = ?
            WHERE id = ? AND status = 'running' AND claimed_by = ?
            RETURNING *
            "#,
        )
        .bind(result)
        .bind(now)
        .bind(id)
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        self.finish(id, "complete", row).await
    }

    async fn fail(
        &self,
        id: &JobId,
        worker_id: &str,
        error: &str,
        retry_delay: Duration,
    ) -> Result<Job> {
        let now = self.time_provider.now_millis();
        let retry_at = now.saturating_add(duration_millis(retry_delay));

        // SET expressions all see the pre-update row
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET status = CASE WHEN attempts + 1 < max_attempts THEN 'pending' ELSE 'failed' END,
                scheduled_at = CASE WHEN attempts + 1 < max_attempts THEN ? ELSE scheduled_at END,
                attempts = attempts + 1,
                last_error = ?,
                claimed_by = NULL, claimed_at = NULL, updated_at = ?
            WHERE id = ? AND status = 'running' AND claimed_by = ?
            RETURNING *
            "#,
        )
        .bind(retry_at)
        .bind(error)
        .bind(now)
        .bind(id)
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        self.finish(id, "fail", row).await
    }

    async fn fail_permanently(&self, id: &JobId, worker_id: &str, error: &str) -> Result<Job> {
        let now = self.time_provider.now_millis();

        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET status = 'failed', last_error = ?,
                claimed_by = NULL, claimed_at = NULL, updated_at = ?
            WHERE id = ? AND status = 'running' AND claimed_by = ?
            RETURNING *
            "#,
        )
        .bind(error)
        .bind(now)
        .bind(id)
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        self.finish(id, "fail", row).await
    }

    async fn cancel(&self, id: &JobId) -> Result<Job> {
        let now = self.time_provider.now_millis();

        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET status = 'cancelled',
                claimed_by = NULL, claimed_at = NULL, updated_at = ?
            WHERE id = ? AND status IN ('pending', 'running')
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        self.finish(id, "cancel", row).await
    }

    async fn cleanup_stale_running(&self, stale_threshold: Duration) -> Result<u64> {
        let now = self.time_provider.now_millis();
        let cutoff = now - duration_millis(stale_threshold);

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending', claimed_by = NULL, claimed_at = NULL, updated_at = ?
            WHERE status = 'running' AND claimed_at < ?
            "#,
        )
        .bind(now)
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn delete_older_than(&self, cutoff: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE status IN ('completed', 'failed', 'cancelled') AND updated_at < ?
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn get_all_queue_stats(&self) -> Result<Vec<QueueStats>> {
        let rows: Vec<(String, String, i64)> = sqlx::query_as(
            r#"
            SELECT queue, status, COUNT(*) FROM jobs
            GROUP BY queue, status
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let mut by_queue: BTreeMap<String, QueueStats> = BTreeMap::new();
        for (queue, status, count) in rows {
            let status: JobStatus = status.parse()?;
            by_queue
                .entry(queue.clone())
                .or_insert_with(|| QueueStats::new(queue))
                .record(status, count);
        }
        Ok(by_queue.into_values().collect())
    }
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    queue: String,
    job_type: String,
    payload: String,
    status: String,
    attempts: i32,
    max_attempts: i32,
    scheduled_at: i64,
    claimed_by: Option<String>,
    claimed_at: Option<i64>,
    result: Option<String>,
    last_error: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl JobRow {
    fn into_job(self) -> Result<Job> {
        let payload: JsonMap = serde_json::from_str(&self.payload)?;
        let result = self
            .result
            .as_deref()
            .map(serde_json::from_str::<JsonMap>)
            .transpose()?;

        Ok(Job {
            id: self.id,
            queue: self.queue,
            job_type: JobType::new(self.job_type),
            payload,
            status: self.status.parse()?,
            attempts: self.attempts,
            max_attempts: self.max_attempts,
            scheduled_at: self.scheduled_at,
            claimed_by: self.claimed_by,
            claimed_at: self.claimed_at,
            result,
            last_error: self.last_error,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
