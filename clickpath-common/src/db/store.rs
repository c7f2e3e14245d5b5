//! Session store access contract
//!
//! The resolver, committer and export engine only ever see `dyn SessionStore`,
//! so tests can wrap or replace the SQLite implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    Attributes, ClickSession, DirectEngagement, DirectOutcome, EngagementOutcome,
    EngagementUpdate, NewSession, ProcessedMessage,
};
use crate::Result;

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Cheap round trip proving the store is reachable
    async fn ping(&self) -> Result<()>;

    /// Create a session unless one with the same id exists (first write wins).
    ///
    /// Returns `true` when this call created it.
    async fn create_session(&self, session: &NewSession, created_at: DateTime<Utc>) -> Result<bool>;

    async fn get_session(&self, session_id: &str) -> Result<Option<ClickSession>>;

    /// Unengaged sessions created at or after `since`, newest first
    async fn recent_unengaged(&self, since: DateTime<Utc>, limit: u32) -> Result<Vec<ClickSession>>;

    /// Newest unengaged session carrying this normalized phone number
    ///
    /// An empty phone never matches.
    async fn latest_unengaged_by_phone(&self, phone_number: &str) -> Result<Option<ClickSession>>;

    /// Where a message key was committed, if it was
    async fn processed_message(&self, message_key: &str) -> Result<Option<ProcessedMessage>>;

    /// Mark a session engaged in a single transaction.
    ///
    /// - message key already committed: no write, [`EngagementOutcome::Replayed`]
    /// - unengaged: flip `has_engaged`, stamp `engaged_at`, write non-empty
    ///   enrichment fields
    /// - already engaged: no write, [`EngagementOutcome::AlreadyEngaged`]
    /// - missing: create it engaged with `attributes`
    ///
    /// Concurrent calls for one session flip the flag exactly once.
    async fn apply_engagement(
        &self,
        session_id: &str,
        update: &EngagementUpdate,
        attributes: &Attributes,
    ) -> Result<EngagementOutcome>;

    /// Insert a direct engagement unless its dedupe key was already committed
    async fn record_direct(&self, engagement: &DirectEngagement) -> Result<DirectOutcome>;

    /// Engaged sessions not yet exported, oldest engagement first
    ///
    /// Without `include_direct`, sessions attributed `direct` or sourced
    /// `direct_message` are left out.
    async fn pending_export(&self, limit: u32, include_direct: bool) -> Result<Vec<ClickSession>>;

    /// Flip `synced_to_export` for an engaged, unexported session.
    ///
    /// Returns `false` if the session was missing, unengaged or already exported.
    async fn mark_exported(&self, session_id: &str, exported_at: DateTime<Utc>) -> Result<bool>;
}
