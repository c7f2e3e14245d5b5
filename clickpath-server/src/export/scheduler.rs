//! Background export loop
//!
//! Runs the export engine on a fixed interval and shortly after the committer
//! reports a new engagement. Stops when the shutdown token is cancelled.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ExportSyncEngine;

/// Change notification from the committer to the export loop
#[derive(Debug, Clone, Default)]
pub struct SyncTrigger {
    notify: Arc<Notify>,
}

impl SyncTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a sync; coalesces with any request not yet picked up
    pub fn notify(&self) {
        self.notify.notify_one();
    }

    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

pub async fn run_scheduler(
    engine: Arc<ExportSyncEngine>,
    trigger: SyncTrigger,
    interval: Duration,
    debounce: Duration,
    cancel: CancellationToken,
) {
    info!(
        interval_secs = interval.as_secs(),
        debounce_ms = debounce.as_millis() as u64,
        "Export scheduler started"
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                debug!("Export interval elapsed");
            }
            _ = trigger.notified() => {
                // Let a burst of engagements settle into one batch
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(debounce) => {}
                }
                debug!("Export triggered by new engagement");
            }
        }

        let report = engine.sync_batch().await;
        if !report.errors.is_empty() {
            warn!(errors = ?report.errors, "Export cycle finished with errors");
        }
    }

    info!("Export scheduler stopped");
}
