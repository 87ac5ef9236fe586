// Migration Runner

use crate::error::map_sqlx_error;
use sqlx::SqlitePool;
use tasklane_core::error::Result;
use tracing::info;

/// Ordered migrations; the index + 1 is the schema version
const MIGRATIONS: &[(&str, &str)] = &[(
    "Initial schema",
    include_str!("../migrations/001_initial_schema.sql"),
)];

/// Current schema version (0 for an empty database)
pub async fn schema_version(pool: &SqlitePool) -> Result<i64> {
    let table_exists: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_version'",
    )
    .fetch_one(pool)
    .await
    .map_err(map_sqlx_error)?;

    if table_exists == 0 {
        return Ok(0);
    }

    let version: Option<i64> =
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await
            .map_err(map_sqlx_error)?;
    Ok(version.unwrap_or(0))
}

/// Run database migrations (idempotent)
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = schema_version(pool).await?;
    info!(current_version, "Running database migrations");

    for (index, (name, sql)) in MIGRATIONS.iter().enumerate() {
        let version = index as i64 + 1;
        if current_version < version {
            info!(version, name, "Applying migration");
            apply_migration(pool, sql).await?;
        }
    }

    info!("All migrations applied successfully");
    Ok(())
}

/// Apply a single migration SQL file in one transaction
async fn apply_migration(pool: &SqlitePool, sql: &str) -> Result<()> {
    let mut tx = pool.begin().await.map_err(map_sqlx_error)?;

    // Split by semicolon and execute each statement
    for statement in sql.split(';') {
        let clean_statement = statement
            .lines()
            .filter(|line| !line.trim().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");
        let clean_statement = clean_statement.trim();

        if !clean_statement.is_empty() {
            sqlx::query(clean_statement)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        }
    }

    tx.commit().await.map_err(map_sqlx_error)?;
    Ok(())
}
