//! Matching strategies, one per waterfall step
//!
//! Each strategy looks at the inbound event and a read-only view of the store
//! and either produces a candidate or passes.

use async_trait::async_trait;
use chrono::Utc;
use clickpath_common::db::SessionStore;
use clickpath_common::{AttributionMethod, Attributes, Result};
use std::time::Duration;
use tracing::debug;

use super::token;
use super::InboundEvent;

/// A session chosen by a strategy
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub session_id: String,
    /// Attributes carried by the event itself (context token)
    pub attributes: Option<Attributes>,
    pub method: AttributionMethod,
}

/// Event after phone normalization
#[derive(Debug, Clone, Copy)]
pub struct EventView<'a> {
    pub event: &'a InboundEvent,
    pub phone: &'a str,
}

#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn find(&self, view: EventView<'_>, store: &dyn SessionStore) -> Result<Option<Candidate>>;
}

/// Authoritative match on a decodable context token
pub struct ContextTokenStrategy;

#[async_trait]
impl Strategy for ContextTokenStrategy {
    fn name(&self) -> &'static str {
        "context_token"
    }

    async fn find(&self, view: EventView<'_>, _store: &dyn SessionStore) -> Result<Option<Candidate>> {
        let Some(raw) = view.event.context_token.as_deref() else {
            return Ok(None);
        };

        match token::decode(raw) {
            Some(decoded) => Ok(Some(Candidate {
                session_id: decoded.session_id,
                attributes: Some(decoded.attributes),
                method: AttributionMethod::Context,
            })),
            None => {
                debug!("Ignoring malformed context token");
                Ok(None)
            }
        }
    }
}

/// Newest unengaged session inside a recency window, used when the channel
/// supplied a conversation or contact id
pub struct ChannelIdStrategy {
    pub window: Duration,
    pub batch_limit: u32,
}

#[async_trait]
impl Strategy for ChannelIdStrategy {
    fn name(&self) -> &'static str {
        "channel_id"
    }

    async fn find(&self, view: EventView<'_>, store: &dyn SessionStore) -> Result<Option<Candidate>> {
        let event = view.event;
        if !has_text(&event.conversation_id) && !has_text(&event.contact_id) {
            return Ok(None);
        }

        let window = chrono::Duration::from_std(self.window)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));
        let since = Utc::now() - window;

        let candidates = store.recent_unengaged(since, self.batch_limit).await?;
        Ok(candidates.into_iter().next().map(|session| Candidate {
            session_id: session.session_id,
            attributes: None,
            method: AttributionMethod::ChannelId,
        }))
    }
}

/// Newest unengaged session registered with the sender's phone
pub struct PhoneStrategy;

#[async_trait]
impl Strategy for PhoneStrategy {
    fn name(&self) -> &'static str {
        "phone"
    }

    async fn find(&self, view: EventView<'_>, store: &dyn SessionStore) -> Result<Option<Candidate>> {
        let session = store.latest_unengaged_by_phone(view.phone).await?;
        Ok(session.map(|session| Candidate {
            session_id: session.session_id,
            attributes: None,
            method: AttributionMethod::Phone,
        }))
    }
}

fn has_text(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}
