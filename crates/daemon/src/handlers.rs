//! Demo handlers registered by the reference host

use serde_json::json;
use std::time::Duration;
use tasklane_core::application::{HandlerError, JobContext};
use tasklane_core::domain::JsonMap;
use tasklane_core::Runner;
use tracing::info;

/// Upper bound for the `sleep` demo job
const MAX_SLEEP_MS: u64 = 60_000;

pub fn register_demo_handlers(runner: &Runner) {
    runner.register("echo", echo);
    runner.register("sleep", sleep);
    runner.register("fail", fail);
}

/// Returns the payload unchanged
async fn echo(ctx: JobContext, payload: JsonMap) -> Result<JsonMap, HandlerError> {
    info!(job_id = %ctx.job_id, keys = payload.len(), "echo");
    Ok(payload)
}

/// Sleeps `ms` milliseconds, stopping early on shutdown
async fn sleep(mut ctx: JobContext, payload: JsonMap) -> Result<JsonMap, HandlerError> {
    let ms = payload
        .get("ms")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| HandlerError::new("payload field 'ms' must be a non-negative integer"))?
        .min(MAX_SLEEP_MS);

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_millis(ms)) => {}
        _ = ctx.cancelled() => return Err(HandlerError::new("interrupted by shutdown")),
    }

    let mut result = JsonMap::new();
    result.insert("slept_ms".into(), json!(ms));
    Ok(result)
}

/// Always fails; exercises retry and backoff
async fn fail(ctx: JobContext, payload: JsonMap) -> Result<JsonMap, HandlerError> {
    let reason = payload
        .get("reason")
        .and_then(|v| v.as_str())
        .unwrap_or("demo failure");
    Err(HandlerError::new(format!(
        "{} (attempt {}/{})",
        reason, ctx.attempt, ctx.max_attempts
    )))
}
