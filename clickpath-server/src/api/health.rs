//! Health check endpoint

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `ok`, or `not_ready` while the store is unreachable
    pub status: String,
    pub module: String,
    pub version: String,
    pub uptime_secs: u64,
    pub export_enabled: bool,
}

/// GET /health
///
/// Answers 503 until the store has passed a connectivity check.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let ready = state.is_ready();
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            status: if ready { "ok" } else { "not_ready" }.to_string(),
            module: "clickpath-server".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: state.startup_time.elapsed().as_secs(),
            export_enabled: state.export.is_some(),
        }),
    )
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
