//! Export sync engine
//!
//! Pushes engaged, not-yet-exported sessions to the spreadsheet and marks them
//! exported. Rows are appended before records are marked, so a failure between
//! the two steps can duplicate a row on the next cycle but never loses one.

pub mod rows;
pub mod scheduler;

use clickpath_common::config::ExportConfig;
use clickpath_common::db::SessionStore;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::sheets::{SheetClient, SheetError};

pub use scheduler::{run_scheduler, SyncTrigger};

/// Export sync errors
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Store error: {0}")]
    Store(#[from] clickpath_common::Error),

    #[error("Spreadsheet error: {0}")]
    Sheet(#[from] SheetError),
}

impl SyncError {
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Store(e) => e.is_transient(),
            SyncError::Sheet(e) => e.is_retryable(),
        }
    }
}

/// Outcome of one sync run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    /// Rows appended to the spreadsheet
    pub count: usize,
    /// Records marked exported
    pub marked: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    /// Another run was already in flight
    pub skipped: bool,
    pub attempts: u32,
}

impl SyncReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// Tunables for the export engine
#[derive(Debug, Clone)]
pub struct ExportSettings {
    pub sheet_title: String,
    pub batch_size: u32,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub include_direct: bool,
    pub message_max_chars: usize,
    pub call_timeout: Duration,
}

impl From<&ExportConfig> for ExportSettings {
    fn from(config: &ExportConfig) -> Self {
        Self {
            sheet_title: config.sheet_title.clone(),
            batch_size: config.batch_size,
            max_attempts: config.max_attempts.max(1),
            retry_delay: config.retry_delay(),
            include_direct: config.include_direct,
            message_max_chars: config.message_max_chars,
            call_timeout: config.call_timeout(),
        }
    }
}

impl ExportSettings {
    /// A1 range covering the header row
    pub fn header_range(&self) -> String {
        format!("{}!A1:{}1", self.quoted_title(), rows::LAST_COLUMN)
    }

    /// A1 range of the whole table, used as the append target
    pub fn table_range(&self) -> String {
        format!("{}!A:{}", self.quoted_title(), rows::LAST_COLUMN)
    }

    fn quoted_title(&self) -> String {
        format!("'{}'", self.sheet_title.replace('\'', "''"))
    }
}

/// Resets the in-flight flag when a run ends, however it ends
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Debug, Default)]
struct BatchOutcome {
    appended: usize,
    marked: usize,
    errors: Vec<String>,
}

pub struct ExportSyncEngine {
    store: Arc<dyn SessionStore>,
    sheet: Arc<dyn SheetClient>,
    settings: ExportSettings,
    cancel: CancellationToken,
    in_flight: AtomicBool,
    /// Sheet and header verified since the last spreadsheet error
    header_ready: AtomicBool,
}

impl ExportSyncEngine {
    pub fn new(
        store: Arc<dyn SessionStore>,
        sheet: Arc<dyn SheetClient>,
        settings: ExportSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            sheet,
            settings,
            cancel,
            in_flight: AtomicBool::new(false),
            header_ready: AtomicBool::new(false),
        }
    }

    /// Run one export cycle with retry
    ///
    /// Never fails: errors end up in the report. Returns a skipped report
    /// immediately when another run is in flight.
    pub async fn sync_batch(&self) -> SyncReport {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Export already in flight, skipping");
            return SyncReport::skipped();
        }
        let _guard = InFlight(&self.in_flight);

        let mut attempt = 0;
        loop {
            attempt += 1;

            match self.attempt_batch().await {
                Ok(outcome) => {
                    if outcome.appended > 0 {
                        info!(
                            attempt,
                            count = outcome.appended,
                            marked = outcome.marked,
                            errors = outcome.errors.len(),
                            "Export cycle complete"
                        );
                    }
                    return SyncReport {
                        count: outcome.appended,
                        marked: outcome.marked,
                        errors: outcome.errors,
                        skipped: false,
                        attempts: attempt,
                    };
                }
                Err(e) => {
                    if let SyncError::Sheet(_) = e {
                        self.header_ready.store(false, Ordering::Release);
                    }

                    let retry = e.is_retryable()
                        && attempt < self.settings.max_attempts
                        && !self.cancel.is_cancelled();
                    if !retry {
                        error!(attempt, error = %e, "Export cycle failed");
                        return SyncReport {
                            errors: vec![e.to_string()],
                            attempts: attempt,
                            ..SyncReport::default()
                        };
                    }

                    let delay = self.settings.retry_delay * attempt;
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Export attempt failed, will retry after backoff"
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.cancel.cancelled() => {
                            return SyncReport {
                                errors: vec![e.to_string()],
                                attempts: attempt,
                                ..SyncReport::default()
                            };
                        }
                    }
                }
            }
        }
    }

    async fn attempt_batch(&self) -> Result<BatchOutcome, SyncError> {
        let pending = self
            .store
            .pending_export(self.settings.batch_size, self.settings.include_direct)
            .await?;
        if pending.is_empty() {
            return Ok(BatchOutcome::default());
        }

        let batch: Vec<_> = pending
            .iter()
            .map(|s| rows::session_to_row(s, self.settings.message_max_chars))
            .collect();

        self.ensure_header().await?;
        self.call(self.sheet.append_rows(&self.settings.table_range(), &batch))
            .await?;

        let mut outcome = BatchOutcome {
            appended: batch.len(),
            ..BatchOutcome::default()
        };

        for (idx, session) in pending.iter().enumerate() {
            if self.cancel.is_cancelled() {
                let left = pending.len() - idx;
                warn!(left, "Export cancelled, remaining records stay pending");
                outcome
                    .errors
                    .push(format!("cancelled with {} records left unmarked", left));
                break;
            }

            match self
                .store
                .mark_exported(&session.session_id, chrono::Utc::now())
                .await
            {
                Ok(true) => outcome.marked += 1,
                Ok(false) => debug!(session_id = %session.session_id, "Already marked exported"),
                Err(e) => {
                    warn!(session_id = %session.session_id, error = %e, "Failed to mark exported");
                    outcome
                        .errors
                        .push(format!("{}: {}", session.session_id, e));
                }
            }
        }

        Ok(outcome)
    }

    /// Create the sheet and write the header row unless already verified
    async fn ensure_header(&self) -> Result<(), SheetError> {
        if self.header_ready.load(Ordering::Acquire) {
            return Ok(());
        }

        let title = &self.settings.sheet_title;
        if !self.call(self.sheet.sheet_exists(title)).await? {
            self.call(self.sheet.create_sheet(title)).await?;
        }

        let range = self.settings.header_range();
        let existing = self.call(self.sheet.read_range(&range)).await?;
        let has_header = existing
            .first()
            .is_some_and(|row| row.iter().any(|cell| !cell.trim().is_empty()));
        if !has_header {
            self.call(self.sheet.append_rows(&range, &[rows::header_row()]))
                .await?;
            info!(sheet = %title, "Wrote header row");
        }

        self.header_ready.store(true, Ordering::Release);
        Ok(())
    }

    async fn call<T>(
        &self,
        fut: impl Future<Output = Result<T, SheetError>>,
    ) -> Result<T, SheetError> {
        tokio::time::timeout(self.settings.call_timeout, fut)
            .await
            .map_err(|_| SheetError::Timeout)?
    }
}
