//! Tasklane - Reference Host
//! Wires SQLite store + Runner, runs until Ctrl+C, then drains in-flight jobs

mod handlers;
mod logging;
mod settings;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info, warn};

// Import workspace crates
use settings::DaemonSettings;
use tasklane_core::port::time_provider::SystemTimeProvider;
use tasklane_core::{AppError, Runner};
use tasklane_infra_sqlite::{create_pool, run_migrations, SqliteJobStore};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load configuration
    let settings = DaemonSettings::load()?;

    // 2. Initialize logging (guard flushes the file writer on exit)
    let _log_guard = logging::init(&settings)?;
    info!("Tasklane v{} starting...", VERSION);

    // 3. Initialize database
    let db_file = settings.db_file()?;
    if let Some(parent) = db_file.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("cannot create {}", parent.display()))?;
    }
    info!(db_path = %db_file.display(), "Initializing database...");

    let pool = create_pool(&settings.database_url()?, settings.max_connections)
        .await
        .context("DB pool creation failed")?;
    run_migrations(&pool).await.context("Migration failed")?;

    // 4. Setup dependencies (DI wiring)
    let store = Arc::new(SqliteJobStore::new(pool.clone(), Arc::new(SystemTimeProvider)));
    let runner = Runner::new(store, settings.runner_config())?;

    handlers::register_demo_handlers(&runner);
    for queue in &settings.queues {
        runner.add_queue(queue);
    }

    // 5. Start worker + cleanup loops
    runner.start()?;
    match runner.stats().await {
        Ok(stats) => info!(
            worker_id = %stats.worker_id,
            queues = %serde_json::to_string(&stats.queues).unwrap_or_default(),
            "System ready. Waiting for jobs..."
        ),
        Err(e) => warn!(error = %e, "Could not read queue stats"),
    }
    info!("Press Ctrl+C to shutdown");

    // 6. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Draining in-flight jobs...");

    // 7. Graceful shutdown
    match runner.stop(settings.shutdown_timeout()).await {
        Ok(()) => {}
        Err(AppError::ShutdownTimeout { active_jobs }) => {
            // Unfinished jobs stay RUNNING and are requeued by stale recovery on next start
            warn!(active_jobs = ?active_jobs, "Exiting with jobs still in flight");
        }
        Err(e) => error!(error = %e, "Runner stop failed"),
    }

    pool.close().await;
    info!("Shutdown complete.");

    Ok(())
}
