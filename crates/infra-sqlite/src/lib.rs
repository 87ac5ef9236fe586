// Tasklane Infrastructure - SQLite Adapter
// Implements: JobStore

mod connection;
mod error;
mod job_store;
mod migration;

pub use connection::create_pool;
pub use job_store::SqliteJobStore;
pub use migration::{run_migrations, schema_version};

// Note: sqlx::Error conversion is handled by a helper function
// due to Rust's orphan rules (cannot implement From<sqlx::Error> for AppError here)
