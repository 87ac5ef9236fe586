// Job Domain Model

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::domain::error::DomainError;

/// Job ID (UUID v4)
pub type JobId = String;

/// Queue identifier
pub type QueueId = String;

/// Arbitrary structured payload / result
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

/// Job Status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal jobs never transition again; only retention pruning removes them
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(DomainError::UnknownStatus(other.to_string())),
        }
    }
}

/// Job Type (key into the handler registry)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobType(String);

impl JobType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Job Entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub queue: QueueId,
    pub job_type: JobType,
    pub payload: JsonMap,
    pub status: JobStatus,

    pub attempts: i32,
    pub max_attempts: i32,

    pub scheduled_at: i64, // epoch ms

    // Set only while RUNNING
    pub claimed_by: Option<String>,
    pub claimed_at: Option<i64>,

    pub result: Option<JsonMap>,
    pub last_error: Option<String>,

    pub created_at: i64,
    pub updated_at: i64,
}

impl Job {
    /// Create a new pending job
    ///
    /// # Arguments
    ///
    /// * `id` - Unique job ID (injected, not generated)
    /// * `now_millis` - Creation timestamp in epoch ms (injected, not system time)
    /// * `scheduled_at` - Earliest claim time in epoch ms
    pub fn new(
        id: impl Into<String>,
        now_millis: i64,
        queue: impl Into<String>,
        job_type: JobType,
        payload: JsonMap,
        scheduled_at: i64,
        max_attempts: i32,
    ) -> Self {
        Self {
            id: id.into(),
            queue: queue.into(),
            job_type,
            payload,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts,
            scheduled_at,
            claimed_by: None,
            claimed_at: None,
            result: None,
            last_error: None,
            created_at: now_millis,
            updated_at: now_millis,
        }
    }

    /// Create a test job with deterministic ID and timestamp.
    ///
    /// IDs are `test-1`, `test-2`, ...; timestamps start at 1000 and step by 1000.
    /// Only for tests, production code injects ID and time via providers.
    pub fn new_test(queue: impl Into<String>, job_type: JobType, payload: JsonMap) -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static TEST_COUNTER: AtomicU64 = AtomicU64::new(1);

        let counter = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let created_at = (counter * 1000) as i64;

        Self::new(
            format!("test-{}", counter),
            created_at,
            queue,
            job_type,
            payload,
            created_at,
            3,
        )
    }

    /// Eligible for claim iff PENDING and due
    pub fn is_claimable(&self, now_millis: i64) -> bool {
        self.status == JobStatus::Pending && self.scheduled_at <= now_millis
    }

    /// True when one more failure would exhaust the attempt budget
    pub fn is_last_attempt(&self) -> bool {
        self.attempts + 1 >= self.max_attempts
    }

    /// 1-based number of the attempt currently being executed
    pub fn current_attempt(&self) -> i32 {
        self.attempts + 1
    }
}
