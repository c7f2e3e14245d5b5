//! Messaging-channel webhook
//!
//! `POST /webhook` receives inbound message events. `GET /webhook` answers the
//! platform's subscription handshake.

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::attribution::InboundEvent;
use crate::engagement::CommitResult;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// POST /webhook
pub async fn receive_event(
    State(state): State<AppState>,
    payload: Result<Json<InboundEvent>, JsonRejection>,
) -> ApiResult<Json<CommitResult>> {
    if !state.is_ready() {
        return Err(ApiError::ServiceUnavailable(
            "session store not ready".to_string(),
        ));
    }

    let Json(event) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let raw_phone = event
        .sender_phone
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::BadRequest("sender_phone is required".to_string()))?;
    if state.resolver.normalizer().normalize(raw_phone).is_empty() {
        return Err(ApiError::BadRequest(
            "sender_phone contains no digits".to_string(),
        ));
    }

    debug!(
        has_token = event.context_token.is_some(),
        has_conversation = event.conversation_id.is_some(),
        "Inbound event"
    );

    let result = state.committer.process(&state.resolver, &event).await?;
    Ok(Json(result))
}

/// Subscription handshake parameters
#[derive(Debug, Deserialize)]
pub struct VerifyParams {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// GET /webhook
///
/// Echoes the challenge when mode is `subscribe` and the token matches.
pub async fn verify_subscription(
    State(state): State<AppState>,
    Query(params): Query<VerifyParams>,
) -> Result<(StatusCode, String), ApiError> {
    let Some(expected) = state.verify_token.as_deref() else {
        warn!("Webhook verification attempted but no verify token is configured");
        return Err(ApiError::ServiceUnavailable(
            "webhook verification not configured".to_string(),
        ));
    };

    let subscribing = params.mode.as_deref() == Some("subscribe");
    let token_ok = params.verify_token.as_deref() == Some(expected);
    match (subscribing, token_ok, params.challenge) {
        (true, true, Some(challenge)) => Ok((StatusCode::OK, challenge)),
        (true, true, None) => Err(ApiError::BadRequest("hub.challenge is required".to_string())),
        _ => {
            warn!("Webhook verification rejected");
            Err(ApiError::Unauthorized)
        }
    }
}
