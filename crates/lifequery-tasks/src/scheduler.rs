//! Periodic auto-sync scheduler.
//!
//! Ticks in the background and drives a full sync when `auto_sync_interval`
//! is positive, the source is connected, and no sync is already running.
//! Progress events are discarded; the operation log records each run.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use lifequery_core::{MessageSource, OperationKind};
use lifequery_db::Database;
use lifequery_ingest::IngestPipeline;

use crate::manager::TaskManager;

/// Delay before the first tick and between ticks while auto-sync is off.
const IDLE_TICK_SECS: u64 = 60;

/// Spawn the auto-sync worker. The task runs until aborted (it is tied to
/// the server's lifetime).
pub fn spawn_auto_sync(
    db: Database,
    pipeline: IngestPipeline,
    source: Arc<dyn MessageSource>,
    tasks: TaskManager,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(subsystem = "tasks", component = "scheduler", "Auto-sync worker started");
        tokio::time::sleep(Duration::from_secs(IDLE_TICK_SECS)).await;

        loop {
            let sleep_secs = match tick(&db, &pipeline, &source, &tasks).await {
                Ok(secs) => secs,
                Err(e) => {
                    error!(error = %e, "Auto-sync tick failed");
                    300
                }
            };
            tokio::time::sleep(Duration::from_secs(sleep_secs)).await;
        }
    })
}

/// One scheduler tick. Returns how long to sleep before the next one.
async fn tick(
    db: &Database,
    pipeline: &IngestPipeline,
    source: &Arc<dyn MessageSource>,
    tasks: &TaskManager,
) -> lifequery_core::Result<u64> {
    // Re-read settings every tick so interval changes apply without a
    // restart.
    let settings = db.config.load_settings().await?;
    if settings.auto_sync_interval <= 0 {
        return Ok(IDLE_TICK_SECS);
    }

    let interval_secs = settings.auto_sync_interval as u64 * 60;

    let status = source.status().await?;
    if !status.is_connected() {
        info!("Auto-sync: source not connected, skipping");
        return Ok(interval_secs);
    }

    // A manual sync in flight wins; try again next interval.
    let handle = match tasks.begin(OperationKind::Sync, &db.log).await {
        Ok(handle) => handle,
        Err(lifequery_core::Error::Conflict(_)) => {
            info!("Auto-sync: a sync is already running, skipping");
            return Ok(interval_secs);
        }
        Err(e) => return Err(e),
    };

    info!(subsystem = "tasks", component = "scheduler", "Auto-sync starting");
    let (tx, mut rx) = mpsc::channel(64);
    // Drain progress so the pipeline never blocks on a full channel.
    let drain = tokio::spawn(async move { while rx.recv().await.is_some() {} });

    let outcome = pipeline
        .sync(&settings, handle.cancel_token(), tx)
        .await;
    handle.finish(&db.log, &outcome).await?;
    drain.abort();

    info!(subsystem = "tasks", component = "scheduler", "Auto-sync complete");
    Ok(interval_secs)
}
