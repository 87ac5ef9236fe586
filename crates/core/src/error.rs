// Central Error Type for the Application

use thiserror::Error;

use crate::domain::JobId;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Runner already started")]
    AlreadyStarted,

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Shutdown deadline exceeded with {} job(s) still in flight", active_jobs.len())]
    ShutdownTimeout { active_jobs: Vec<JobId> },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Store-side failures the worker loop should ride out
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Database(_) | AppError::Timeout(_))
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

// Note: sqlx::Error conversion is handled in infra-sqlite crate
// by converting to AppError::Database(String)
