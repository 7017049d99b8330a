//! `cronctl run` - starts the event loop in the foreground (§4.7, §6b).

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use cronq_core::config::SchedulerConfig;
use cronq_core::store::JobStore;
use cronq_scheduler::{EventLoop, SqliteSessionFactory};
use cronq_store::SqliteStore;

pub async fn run(config_path: Option<&str>) -> Result<()> {
    let config = SchedulerConfig::load(config_path.map(std::path::Path::new))?;

    let store = SqliteStore::new(&config.database.path)?
        .with_superuser_policy(config.database.superuser_names.clone(), config.database.enable_superuser_jobs);

    // Only the first process to win the startup lock sweeps dangling runs
    // from a prior crash (§9 Open Question resolution).
    if store.try_acquire_startup_lock().await? {
        let swept = store.mark_pending_runs_failed().await?;
        info!(swept, "marked dangling runs from a prior instance as failed");
    } else {
        warn!("another instance holds the startup lock; skipping the crash sweep");
    }

    let store: Arc<dyn JobStore> = Arc::new(store);
    let factory = Arc::new(SqliteSessionFactory::open(&config.database.path)?);

    info!(database = %config.database.path.display(), "cronq scheduler starting");

    let mut event_loop = EventLoop::new(config.timing.connect_timeout, config.timing.max_wait);
    event_loop.run(store, factory).await?;

    Ok(())
}
