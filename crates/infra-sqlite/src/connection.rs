// SQLite Connection Pool Setup

use crate::error::map_sqlx_error;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::str::FromStr;
use std::time::Duration;
use tasklane_core::error::Result;
use tracing::info;

/// Create SQLite connection pool with WAL mode.
///
/// Concurrent claims serialize on SQLite's single writer; `busy_timeout`
/// makes contending connections wait instead of failing with SQLITE_BUSY.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(map_sqlx_error)?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5))
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(options)
        .await
        .map_err(map_sqlx_error)?;

    info!(database_url, max_connections, "SQLite pool ready");
    Ok(pool)
}
