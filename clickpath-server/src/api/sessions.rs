//! Session creation and inspection
//!
//! The click-reporting path registers a session here before the visitor is
//! handed off to the messaging channel.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use clickpath_common::models::NewSession;
use clickpath_common::{Attributes, ClickSession};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    /// `created` or `exists`
    pub status: &'static str,
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

/// POST /api/sessions
///
/// First write wins: a repeat for an existing id answers 200 `exists` and
/// leaves the stored session untouched.
pub async fn create_session(
    State(state): State<AppState>,
    payload: Result<Json<Map<String, Value>>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<CreateSessionResponse>)> {
    let Json(body) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let session_id = ["sessionId", "session_id"]
        .iter()
        .filter_map(|k| body.get(*k))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadRequest("sessionId is required".to_string()))?
        .to_string();

    let phone_number = ["phoneNumber", "phone_number"]
        .iter()
        .filter_map(|k| body.get(*k))
        .filter_map(Value::as_str)
        .map(|p| state.resolver.normalizer().normalize(p))
        .find(|p| !p.is_empty())
        .unwrap_or_default();

    let session = NewSession {
        session_id: session_id.clone(),
        attributes: Attributes::from_params(&body),
        phone_number,
    };

    let created = state
        .store
        .create_session(&session, clickpath_common::time::now())
        .await?;

    if created {
        info!(session_id = %session_id, source = %session.attributes.source, "Session created");
        Ok((
            StatusCode::CREATED,
            Json(CreateSessionResponse {
                status: "created",
                session_id,
            }),
        ))
    } else {
        Ok((
            StatusCode::OK,
            Json(CreateSessionResponse {
                status: "exists",
                session_id,
            }),
        ))
    }
}

/// GET /api/sessions/:id
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<ClickSession>> {
    state
        .store
        .get_session(&session_id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound(session_id))
}
