// Domain Layer - Pure business logic and entities

pub mod error;
pub mod job;
pub mod queue;

// Re-exports
pub use error::DomainError;
pub use job::{Job, JobId, JobStatus, JobType, JsonMap, QueueId};
pub use queue::QueueStats;
