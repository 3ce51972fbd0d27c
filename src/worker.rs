// Background tasks: a dedicated history writer (batched flushes via channel)
// and a maintenance loop (app stats logging, retention pruning, VACUUM).
// VACUUM runs on a configurable schedule (cron expression or fixed interval).

use crate::history_repo::HistoryRepo;
use crate::models::UtilizationSnapshot;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize};
use tokio::sync::mpsc;
use tokio::time::{Duration, interval};
use tracing::{info, warn};

/// Channel capacity for the snapshot writer (backpressure if writer falls behind).
pub fn writer_channel_capacity(flush_rate: u64) -> usize {
    (flush_rate as usize * 2).max(32)
}

/// Writer config: batching for the dedicated history writer task.
pub struct HistoryWriterConfig {
    pub flush_rate: u64,
    pub flush_interval_secs: u64,
}

/// Spawns the background task that receives snapshots from the ingest route
/// and flushes to the DB. Flushes when buffer len >= flush_rate, or every
/// flush_interval_secs, or when the channel closes. When all senders drop,
/// this task flushes remaining and exits.
pub fn spawn_history_writer(
    mut write_rx: mpsc::Receiver<UtilizationSnapshot>,
    history_repo: Arc<HistoryRepo>,
    config: HistoryWriterConfig,
    snapshots_saved_total: Arc<AtomicU64>,
) -> tokio::task::JoinHandle<()> {
    let flush_interval = Duration::from_secs(config.flush_interval_secs);
    tokio::spawn(async move {
        let mut buffer: Vec<UtilizationSnapshot> = Vec::new();
        let mut flush_tick = interval(flush_interval);
        flush_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                result = write_rx.recv() => {
                    match result {
                        Some(snapshot) => {
                            buffer.push(snapshot);
                            if buffer.len() >= config.flush_rate as usize
                                && let Err(e) = flush_buffer(&history_repo, &mut buffer, &snapshots_saved_total).await
                            {
                                warn!(error = %e, "history writer: save_snapshots failed");
                            }
                        }
                        None => break,
                    }
                }
                _ = flush_tick.tick() => {
                    if let Err(e) = flush_buffer(&history_repo, &mut buffer, &snapshots_saved_total).await {
                        warn!(error = %e, "history writer: save_snapshots failed");
                    }
                }
            }
        }
        if let Err(e) = flush_buffer(&history_repo, &mut buffer, &snapshots_saved_total).await {
            warn!(error = %e, "history writer: final flush failed");
        }
        tracing::debug!("History writer shutting down");
    })
}

async fn flush_buffer(
    history_repo: &HistoryRepo,
    buffer: &mut Vec<UtilizationSnapshot>,
    snapshots_saved_total: &AtomicU64,
) -> anyhow::Result<()> {
    if buffer.is_empty() {
        return Ok(());
    }
    let n = buffer.len();
    history_repo.save_snapshots(buffer).await?;
    snapshots_saved_total.fetch_add(n as u64, std::sync::atomic::Ordering::Relaxed);
    buffer.clear();
    tracing::debug!(
        operation = "save_snapshots",
        snapshots_count = n,
        "Snapshots saved"
    );
    Ok(())
}

/// Shared state and shutdown for the maintenance loop.
pub struct MaintenanceDeps {
    pub history_repo: Arc<HistoryRepo>,
    pub ws_connections: Arc<AtomicUsize>,
    pub snapshots_saved_total: Arc<AtomicU64>,
    pub shutdown_rx: tokio::sync::oneshot::Receiver<()>,
}

/// Maintenance timing. Stats logging and pruning use real-time intervals.
pub struct MaintenanceConfig {
    pub stats_log_interval_secs: u64,
    pub prune_interval_secs: u64,
    /// Optional cron expression for VACUUM (local time).
    pub vacuum_schedule: Option<String>,
    /// Run VACUUM every N seconds when vacuum_schedule is not set.
    pub vacuum_interval_secs: u64,
}

pub fn spawn_maintenance(
    deps: MaintenanceDeps,
    config: MaintenanceConfig,
) -> tokio::task::JoinHandle<()> {
    let MaintenanceDeps {
        history_repo,
        ws_connections,
        snapshots_saved_total,
        mut shutdown_rx,
    } = deps;

    let stats_log_interval = Duration::from_secs(config.stats_log_interval_secs);
    let prune_interval = Duration::from_secs(config.prune_interval_secs);

    tokio::spawn(async move {
        let mut stats_log_tick = interval(stats_log_interval);
        stats_log_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut prune_tick = interval(prune_interval);
        prune_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let (vacuum_tx, mut vacuum_rx) = mpsc::channel::<()>(1);
        tokio::spawn(vacuum_scheduler(
            config.vacuum_schedule,
            config.vacuum_interval_secs,
            vacuum_tx,
        ));

        let mut snapshots_pruned_total: u64 = 0;

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    tracing::debug!("Maintenance shutting down");
                    break;
                }
                _ = stats_log_tick.tick() => {
                    info!(
                        ws_clients = ws_connections.load(std::sync::atomic::Ordering::Relaxed),
                        snapshots_saved_total = snapshots_saved_total.load(std::sync::atomic::Ordering::Relaxed),
                        snapshots_pruned_total = snapshots_pruned_total,
                        "app stats"
                    );
                }
                _ = prune_tick.tick() => {
                    match history_repo.prune_old_data().await {
                        Ok(n) => {
                            snapshots_pruned_total += n;
                            tracing::debug!(operation = "prune_old_data", pruned = n, "Old data pruned");
                        }
                        Err(e) => {
                            warn!(error = %e, operation = "prune_old_data", "Failed to prune old data");
                        }
                    }
                }
                _ = vacuum_rx.recv() => {
                    if let Err(e) = history_repo.vacuum().await {
                        warn!(error = %e, "vacuum failed");
                    } else {
                        info!("vacuum complete");
                    }
                }
            }
        }
    })
}

/// Sends a message on `tx` at each VACUUM time (cron or fixed interval). Uses local time for cron.
async fn vacuum_scheduler(
    vacuum_schedule: Option<String>,
    vacuum_interval_secs: u64,
    tx: mpsc::Sender<()>,
) {
    if let Some(ref cron_str) = vacuum_schedule {
        let Ok(schedule) = cron::Schedule::from_str(cron_str) else {
            warn!(cron = %cron_str, "invalid vacuum_schedule; VACUUM will not run");
            return;
        };
        loop {
            let now = chrono::Local::now();
            let next = schedule.after(&now).next();
            if let Some(next) = next {
                let delay = (next - now).to_std().unwrap_or(Duration::from_secs(1));
                tokio::time::sleep(delay).await;
                if tx.send(()).await.is_err() {
                    break;
                }
            } else {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
        }
    } else {
        let interval = Duration::from_secs(vacuum_interval_secs);
        loop {
            tokio::time::sleep(interval).await;
            if tx.send(()).await.is_err() {
                break;
            }
        }
    }
}
