//! HTTP API handlers for clickpath-server

pub mod auth;
pub mod health;
pub mod sessions;
pub mod sync;
pub mod webhook;

pub use auth::auth_middleware;
pub use health::health_routes;
pub use sessions::{create_session, get_session};
pub use sync::trigger_sync;
pub use webhook::{receive_event, verify_subscription};
