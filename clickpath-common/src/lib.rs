//! # clickpath Common Library
//!
//! Shared code for the clickpath services including:
//! - Click session and direct engagement models
//! - Session store contract and its SQLite implementation
//! - Configuration loading
//! - Phone number normalization
//! - Time and id utilities

pub mod config;
pub mod db;
pub mod error;
pub mod ids;
pub mod models;
pub mod phone;
pub mod time;

pub use error::{Error, Result};
pub use models::{AttributionMethod, Attributes, ClickSession, DirectEngagement, ProcessedMessage};
