// Application Layer - Use Cases and Runtime Loops

pub mod cleanup;
pub mod config;
pub mod enqueue;
pub mod handler;
pub mod registry;
pub mod retry;
pub mod runner;
pub mod worker;

// Re-exports
pub use cleanup::{CleanupLoop, CleanupReport};
pub use config::RunnerConfig;
pub use enqueue::{EnqueueRequest, EnqueueService, Schedule};
pub use handler::{HandlerError, JobContext, JobHandler};
pub use registry::HandlerRegistry;
pub use retry::{RetryDecision, RetryPolicy};
pub use runner::{Runner, RunnerStats};
pub use worker::{shutdown_channel, ShutdownSender, ShutdownToken, Worker};
