//! Operator-triggered export

use axum::{extract::State, Json};

use crate::error::{ApiError, ApiResult};
use crate::export::SyncReport;
use crate::AppState;

/// POST /api/sync
///
/// Runs one export cycle and returns its report. A cycle already in flight
/// yields `skipped: true`.
pub async fn trigger_sync(State(state): State<AppState>) -> ApiResult<Json<SyncReport>> {
    let engine = state
        .export
        .as_ref()
        .ok_or_else(|| ApiError::ServiceUnavailable("export is disabled".to_string()))?;

    Ok(Json(engine.sync_batch().await))
}
