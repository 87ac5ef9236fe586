// Enqueue Use Case

use crate::domain::{Job, JobType, JsonMap};
use crate::error::{AppError, Result};
use crate::port::time_provider::duration_millis;
use crate::port::{IdProvider, JobStore, TimeProvider};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const MAX_NAME_LEN: usize = 64;
const MAX_PAYLOAD_DEPTH: usize = 32;

/// When a new job becomes eligible for claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Schedule {
    Immediate,
    Delayed(Duration),
    /// Epoch ms
    At(i64),
}

/// Enqueue request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub queue: String,
    pub job_type: String,
    #[serde(default)]
    pub payload: JsonMap,
    pub schedule: Schedule,
    /// Overrides the runner default when set
    #[serde(default)]
    pub max_attempts: Option<i32>,
}

impl EnqueueRequest {
    pub fn new(queue: impl Into<String>, job_type: impl Into<String>, payload: JsonMap) -> Self {
        Self {
            queue: queue.into(),
            job_type: job_type.into(),
            payload,
            schedule: Schedule::Immediate,
            max_attempts: None,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.schedule = Schedule::Delayed(delay);
        self
    }

    pub fn at(mut self, at_millis: i64) -> Self {
        self.schedule = Schedule::At(at_millis);
        self
    }

    pub fn max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// Validate enqueue request before touching the store
pub fn validate_request(req: &EnqueueRequest) -> Result<()> {
    validate_name("queue", &req.queue)?;
    validate_name("job_type", &req.job_type)?;

    if let Some(max_attempts) = req.max_attempts {
        if max_attempts < 1 {
            return Err(AppError::Validation(format!(
                "max_attempts must be at least 1, got {}",
                max_attempts
            )));
        }
    }

    let depth = req
        .payload
        .values()
        .map(json_depth)
        .max()
        .unwrap_or(0)
        + 1;
    if depth > MAX_PAYLOAD_DEPTH {
        return Err(AppError::Validation(format!(
            "payload too deeply nested ({} levels, max {})",
            depth, MAX_PAYLOAD_DEPTH
        )));
    }

    Ok(())
}

fn validate_name(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(AppError::Validation(format!("{} must not be empty", field)));
    }
    if value.len() > MAX_NAME_LEN {
        return Err(AppError::Validation(format!(
            "{} too long ({} bytes, max {})",
            field,
            value.len(),
            MAX_NAME_LEN
        )));
    }
    let valid = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'));
    if !valid {
        return Err(AppError::Validation(format!(
            "{} must be alphanumeric (plus _ - . :): {:?}",
            field, value
        )));
    }
    Ok(())
}

fn json_depth(value: &serde_json::Value) -> usize {
    match value {
        serde_json::Value::Array(items) => 1 + items.iter().map(json_depth).max().unwrap_or(0),
        serde_json::Value::Object(map) => 1 + map.values().map(json_depth).max().unwrap_or(0),
        _ => 0,
    }
}

/// Builds and persists new jobs with injected ID and time
pub struct EnqueueService {
    store: Arc<dyn JobStore>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
    default_max_attempts: i32,
}

impl EnqueueService {
    pub fn new(
        store: Arc<dyn JobStore>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
        default_max_attempts: i32,
    ) -> Self {
        Self {
            store,
            id_provider,
            time_provider,
            default_max_attempts,
        }
    }

    /// Execute enqueue use case
    pub async fn execute(&self, req: EnqueueRequest) -> Result<Job> {
        validate_request(&req)?;

        let now = self.time_provider.now_millis();
        let scheduled_at = match req.schedule {
            Schedule::Immediate => now,
            Schedule::Delayed(delay) => now.saturating_add(duration_millis(delay)),
            Schedule::At(at) => at,
        };

        let job = Job::new(
            self.id_provider.generate_id(),
            now,
            req.queue,
            JobType::new(req.job_type),
            req.payload,
            scheduled_at,
            req.max_attempts.unwrap_or(self.default_max_attempts),
        );

        self.store.insert(&job).await?;

        info!(
            job_id = %job.id,
            queue = %job.queue,
            job_type = %job.job_type,
            scheduled_at = job.scheduled_at,
            "Job enqueued"
        );
        Ok(job)
    }

    /// Enqueue for immediate execution
    pub async fn enqueue(&self, queue: &str, job_type: &str, payload: JsonMap) -> Result<Job> {
        self.execute(EnqueueRequest::new(queue, job_type, payload))
            .await
    }

    /// Enqueue to become eligible after `delay`
    pub async fn enqueue_delayed(
        &self,
        queue: &str,
        job_type: &str,
        payload: JsonMap,
        delay: Duration,
    ) -> Result<Job> {
        self.execute(EnqueueRequest::new(queue, job_type, payload).delayed(delay))
            .await
    }

    /// Enqueue to become eligible at `at_millis` (epoch ms)
    pub async fn enqueue_at(
        &self,
        queue: &str,
        job_type: &str,
        payload: JsonMap,
        at_millis: i64,
    ) -> Result<Job> {
        self.execute(EnqueueRequest::new(queue, job_type, payload).at(at_millis))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobStatus;
    use crate::port::id_provider::mocks::SequentialIdProvider;
    use crate::port::job_store::mocks::MockJobStore;
    use crate::port::time_provider::mocks::MockTimeProvider;
    use serde_json::json;

    const NOW: i64 = 1_700_000_000_000;

    fn service() -> (EnqueueService, Arc<MockJobStore>) {
        let clock = Arc::new(MockTimeProvider::new(NOW));
        let store = Arc::new(MockJobStore::new(clock.clone()));
        let service = EnqueueService::new(
            store.clone(),
            Arc::new(SequentialIdProvider::new()),
            clock,
            3,
        );
        (service, store)
    }

    fn payload() -> JsonMap {
        let mut map = JsonMap::new();
        map.insert("user_id".into(), json!(42));
        map
    }

    #[tokio::test]
    async fn test_enqueue_immediate() {
        let (service, store) = service();
        let job = service.enqueue("default", "send_email", payload()).await.unwrap();

        assert_eq!(job.id, "job-1");
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.max_attempts, 3);
        assert_eq!(job.scheduled_at, NOW);
        assert_eq!(job.payload["user_id"], json!(42));
        assert_eq!(store.get("job-1").unwrap(), job);
    }

    #[tokio::test]
    async fn test_enqueue_delayed_and_at() {
        let (service, _store) = service();

        let delayed = service
            .enqueue_delayed("default", "report", payload(), Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(delayed.scheduled_at, NOW + 3_600_000);

        let at = service
            .enqueue_at("default", "report", payload(), NOW + 5)
            .await
            .unwrap();
        assert_eq!(at.scheduled_at, NOW + 5);
        assert_eq!(at.created_at, NOW);
    }

    #[tokio::test]
    async fn test_max_attempts_override() {
        let (service, _store) = service();
        let job = service
            .execute(EnqueueRequest::new("default", "t", JsonMap::new()).max_attempts(7))
            .await
            .unwrap();
        assert_eq!(job.max_attempts, 7);
    }

    #[test]
    fn test_validate_queue_name_empty() {
        let req = EnqueueRequest::new("", "test", JsonMap::new());
        let err = validate_request(&req).unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn test_validate_queue_name_too_long() {
        let req = EnqueueRequest::new("a".repeat(65), "test", JsonMap::new());
        let err = validate_request(&req).unwrap_err();
        assert!(err.to_string().contains("too long"));
    }

    #[test]
    fn test_validate_invalid_chars() {
        let req = EnqueueRequest::new("invalid@queue!", "test", JsonMap::new());
        let err = validate_request(&req).unwrap_err();
        assert!(err.to_string().contains("alphanumeric"));

        let req = EnqueueRequest::new("default", "'; DROP TABLE jobs; --", JsonMap::new());
        assert!(validate_request(&req).is_err());
    }

    #[test]
    fn test_validate_max_attempts() {
        let req = EnqueueRequest::new("default", "test", JsonMap::new()).max_attempts(0);
        let err = validate_request(&req).unwrap_err();
        assert!(err.to_string().contains("max_attempts"));
    }

    #[test]
    fn test_validate_payload_depth() {
        let mut deep = json!({"level": 0});
        for i in 1..=35 {
            deep = json!({"level": i, "nested": deep});
        }
        let mut payload = JsonMap::new();
        payload.insert("root".into(), deep);

        let req = EnqueueRequest::new("default", "test", payload);
        let err = validate_request(&req).unwrap_err();
        assert!(err.to_string().contains("deeply nested"));
    }

    #[tokio::test]
    async fn test_invalid_request_is_not_stored() {
        let (service, store) = service();
        let result = service.enqueue("bad queue", "t", JsonMap::new()).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert!(store.get_all_queue_stats().await.unwrap().is_empty());
    }
}
