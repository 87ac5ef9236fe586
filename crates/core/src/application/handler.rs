// Job handler contract (supplied by the host application)

use crate::application::worker::ShutdownToken;
use crate::domain::{Job, JobId, JobType, JsonMap, QueueId};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Business-logic failure reported by a handler.
///
/// Every handler error is retryable; the attempt budget decides when it becomes terminal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(format!("payload error: {}", err))
    }
}

/// Execution context handed to a handler.
///
/// Handlers should watch `cancelled()` and return promptly once the runner stops.
#[derive(Clone)]
pub struct JobContext {
    pub job_id: JobId,
    pub queue: QueueId,
    pub job_type: JobType,
    /// 1-based attempt number
    pub attempt: i32,
    pub max_attempts: i32,
    /// Budget after which the runner abandons this execution
    pub timeout: Duration,
    shutdown: ShutdownToken,
}

impl JobContext {
    pub fn new(job: &Job, timeout: Duration, shutdown: ShutdownToken) -> Self {
        Self {
            job_id: job.id.clone(),
            queue: job.queue.clone(),
            job_type: job.job_type.clone(),
            attempt: job.current_attempt(),
            max_attempts: job.max_attempts,
            timeout,
            shutdown,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.shutdown.is_shutdown()
    }

    /// Resolves once the runner is shutting down
    pub async fn cancelled(&mut self) {
        self.shutdown.wait().await;
    }
}

/// Handler for one job type
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, ctx: JobContext, payload: JsonMap) -> Result<JsonMap, HandlerError>;
}

/// Plain async closures are handlers
#[async_trait]
impl<F, Fut> JobHandler for F
where
    F: Fn(JobContext, JsonMap) -> Fut + Send + Sync,
    Fut: Future<Output = Result<JsonMap, HandlerError>> + Send + 'static,
{
    async fn handle(&self, ctx: JobContext, payload: JsonMap) -> Result<JsonMap, HandlerError> {
        (self)(ctx, payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::worker::shutdown_channel;
    use serde_json::json;

    fn test_job() -> Job {
        Job::new_test("default", JobType::new("echo"), JsonMap::new())
    }

    #[tokio::test]
    async fn test_closure_is_a_handler() {
        let handler = |_ctx: JobContext, payload: JsonMap| async move {
            let mut out = JsonMap::new();
            out.insert("echo".into(), json!(payload.len()));
            Ok::<_, HandlerError>(out)
        };

        let (_tx, token) = shutdown_channel();
        let ctx = JobContext::new(&test_job(), Duration::from_secs(1), token);
        let mut payload = JsonMap::new();
        payload.insert("a".into(), json!(1));

        let result = handler.handle(ctx, payload).await.unwrap();
        assert_eq!(result["echo"], json!(1));
    }

    #[tokio::test]
    async fn test_context_observes_shutdown() {
        let (tx, token) = shutdown_channel();
        let mut ctx = JobContext::new(&test_job(), Duration::from_secs(1), token);
        assert!(!ctx.is_cancelled());
        assert_eq!(ctx.attempt, 1);

        tx.shutdown();
        tokio::time::timeout(Duration::from_secs(1), ctx.cancelled())
            .await
            .expect("cancelled() should resolve after shutdown");
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn test_handler_error_conversions() {
        let err: HandlerError = "boom".into();
        assert_eq!(err.to_string(), "boom");
        assert_eq!(HandlerError::from(String::from("x")).message(), "x");
    }
}
