//! Scheduler - periodic export trigger
//!
//! One background task, one export at a time. The export runs inline in the
//! task, so ticks that fire while it is still running are dropped rather than
//! queued.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{error, info};

use crate::relational::Connector;
use crate::service::{ExportOutcome, SyncService};

pub const DEFAULT_EXPORT_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Handle to a running scheduler task
pub struct Scheduler {
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl Scheduler {
    /// Start exporting every `period`. The first export fires one period from now.
    pub fn spawn<C>(service: Arc<SyncService<C>>, period: Duration) -> Self
    where
        C: Connector + 'static,
    {
        let shutdown = Arc::new(Notify::new());
        let stop = Arc::clone(&shutdown);

        let task = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_secs = period.as_secs(), "Export scheduler started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => run_once(&service).await,
                    _ = stop.notified() => break,
                }
            }
            info!("Export scheduler stopped");
        });

        Self { shutdown, task }
    }

    /// Stop after the export in progress (if any) finishes.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(e) = self.task.await {
            error!(error = %e, "Export scheduler task failed");
        }
    }
}

async fn run_once<C: Connector>(service: &SyncService<C>) {
    match service.run_export().await {
        Ok(ExportOutcome::Completed(report)) => {
            info!(rows = report.rows_exported, size = report.size, "Scheduled export finished")
        }
        Ok(ExportOutcome::Skipped) => info!("Scheduled export skipped, previous run still active"),
        // The next tick retries
        Err(e) => error!(error = %e, "Scheduled export failed"),
    }
}
