//! clickpath-server library
//!
//! Attributes inbound messaging-channel events to marketing click sessions,
//! records each engagement exactly once and exports engaged sessions to a
//! spreadsheet.

use axum::Router;
use clickpath_common::db::SessionStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod attribution;
pub mod engagement;
pub mod error;
pub mod export;
pub mod sheets;

use attribution::Resolver;
use engagement::Committer;
use export::ExportSyncEngine;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SessionStore>,
    pub resolver: Arc<Resolver>,
    pub committer: Arc<Committer>,
    /// `None` when export is disabled
    pub export: Option<Arc<ExportSyncEngine>>,
    /// Bearer token for `/api/*`; `None` disables the check
    pub api_token: Option<String>,
    /// Webhook subscription handshake token
    pub verify_token: Option<String>,
    /// Set once the store has answered a connectivity check
    pub ready: Arc<AtomicBool>,
    pub startup_time: Instant,
}

impl AppState {
    pub fn new(store: Arc<dyn SessionStore>, resolver: Resolver, committer: Committer) -> Self {
        Self {
            store,
            resolver: Arc::new(resolver),
            committer: Arc::new(committer),
            export: None,
            api_token: None,
            verify_token: None,
            ready: Arc::new(AtomicBool::new(false)),
            startup_time: Instant::now(),
        }
    }

    pub fn with_export(mut self, engine: Arc<ExportSyncEngine>) -> Self {
        self.export = Some(engine);
        self
    }

    pub fn with_api_token(mut self, token: Option<String>) -> Self {
        self.api_token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn with_verify_token(mut self, token: Option<String>) -> Self {
        self.verify_token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }
}

/// Build application router
///
/// `/webhook` and `/health` are public; `/api/*` requires the API token when
/// one is configured.
pub fn build_router(state: AppState) -> Router {
    use axum::middleware;
    use axum::routing::{get, post};

    let protected = Router::new()
        .route("/api/sessions", post(api::create_session))
        .route("/api/sessions/:id", get(api::get_session))
        .route("/api/sync", post(api::trigger_sync))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api::auth_middleware,
        ));

    let public = Router::new()
        .route(
            "/webhook",
            post(api::receive_event).get(api::verify_subscription),
        )
        .merge(api::health_routes());

    Router::new()
        .merge(protected)
        .merge(public)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
