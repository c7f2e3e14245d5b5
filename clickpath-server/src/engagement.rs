//! Engagement committer
//!
//! Applies a resolver decision to the session store exactly once. Every commit
//! claims the message's dedupe key, so redelivered webhooks and concurrent
//! deliveries end in the no-op path instead of a second engagement.

use chrono::Utc;
use clickpath_common::config::DirectPolicy;
use clickpath_common::db::SessionStore;
use clickpath_common::ids;
use clickpath_common::models::{DirectOutcome, EngagementOutcome, EngagementUpdate};
use clickpath_common::{
    AttributionMethod, Attributes, DirectEngagement, ProcessedMessage, Result,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::attribution::{Decision, InboundEvent, Resolver};
use crate::export::SyncTrigger;

/// Whether a commit changed stored state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitStatus {
    Processed,
    /// Replay of something already committed
    Skipped,
}

/// Result of committing one decision
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResult {
    pub status: CommitStatus,
    pub session_id: Option<String>,
    pub attribution_method: AttributionMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direct_engagement_id: Option<String>,
}

impl CommitResult {
    /// Answer for a message committed earlier, pointing at that commit
    fn replay_of(earlier: ProcessedMessage) -> Self {
        Self {
            status: CommitStatus::Skipped,
            session_id: earlier.session_id,
            attribution_method: earlier.attribution_method,
            direct_engagement_id: earlier.direct_engagement_id,
        }
    }
}

pub struct Committer {
    store: Arc<dyn SessionStore>,
    direct_policy: DirectPolicy,
    trigger: Option<SyncTrigger>,
}

impl Committer {
    pub fn new(store: Arc<dyn SessionStore>, direct_policy: DirectPolicy) -> Self {
        Self {
            store,
            direct_policy,
            trigger: None,
        }
    }

    /// Notify the export loop after each new engagement
    pub fn with_trigger(mut self, trigger: SyncTrigger) -> Self {
        self.trigger = Some(trigger);
        self
    }

    /// Resolve and commit one inbound event.
    ///
    /// A message whose dedupe key is already stored is answered from the
    /// earlier commit without running the resolver, since its session no
    /// longer looks unengaged.
    pub async fn process(&self, resolver: &Resolver, event: &InboundEvent) -> Result<CommitResult> {
        let phone = resolver
            .normalizer()
            .normalize(event.sender_phone.as_deref().unwrap_or_default());
        let key = dedupe_key(&phone, event);

        if let Some(earlier) = self.store.processed_message(&key).await? {
            debug!(message_key = %key, "Redelivered message, resolution skipped");
            return Ok(CommitResult::replay_of(earlier));
        }

        let decision = resolver.resolve(event).await?;
        self.commit(&decision, event).await
    }

    pub async fn commit(&self, decision: &Decision, event: &InboundEvent) -> Result<CommitResult> {
        let key = dedupe_key(&decision.sender_phone, event);
        match &decision.session_id {
            Some(session_id) => {
                let attributes = decision.attributes.clone().unwrap_or_default();
                self.engage(session_id, decision.method, &key, decision, event, &attributes)
                    .await
            }
            None => match self.direct_policy {
                DirectPolicy::Record => self.record_direct(&key, decision, event).await,
                DirectPolicy::Synthesize => {
                    let session_id = ids::direct_session_id(&key);
                    self.engage(
                        &session_id,
                        AttributionMethod::Direct,
                        &key,
                        decision,
                        event,
                        &Attributes::direct_message(),
                    )
                    .await
                }
            },
        }
    }

    async fn engage(
        &self,
        session_id: &str,
        method: AttributionMethod,
        message_key: &str,
        decision: &Decision,
        event: &InboundEvent,
        attributes: &Attributes,
    ) -> Result<CommitResult> {
        let update = EngagementUpdate {
            message_key: message_key.to_string(),
            phone_number: decision.sender_phone.clone(),
            method,
            engaged_at: Utc::now(),
            last_message_text: message_summary(event),
            contact_id: event.contact_id.clone(),
            conversation_id: event.conversation_id.clone(),
            contact_name: event.contact_name.clone(),
        };

        let outcome = self
            .store
            .apply_engagement(session_id, &update, attributes)
            .await?;

        let stored = match outcome {
            EngagementOutcome::Engaged(session) => {
                info!(session_id, method = %method, "Engagement committed");
                session
            }
            EngagementOutcome::Created(session) => {
                info!(session_id, method = %method, "Engagement committed on new session");
                session
            }
            EngagementOutcome::AlreadyEngaged(session) => {
                debug!(session_id, "Session already engaged, replay ignored");
                // A replay reports the method stored by the original commit
                return Ok(CommitResult {
                    status: CommitStatus::Skipped,
                    session_id: Some(session.session_id),
                    attribution_method: session.attribution_method.unwrap_or(method),
                    direct_engagement_id: None,
                });
            }
            EngagementOutcome::Replayed(earlier) => {
                debug!(message_key, "Message already committed, replay ignored");
                return Ok(CommitResult::replay_of(earlier));
            }
        };

        if let Some(trigger) = &self.trigger {
            trigger.notify();
        }

        Ok(CommitResult {
            status: CommitStatus::Processed,
            session_id: Some(stored.session_id),
            attribution_method: stored.attribution_method.unwrap_or(method),
            direct_engagement_id: None,
        })
    }

    async fn record_direct(
        &self,
        message_key: &str,
        decision: &Decision,
        event: &InboundEvent,
    ) -> Result<CommitResult> {
        let engagement = DirectEngagement {
            id: ids::generate(),
            dedupe_key: message_key.to_string(),
            phone_number: decision.sender_phone.clone(),
            message_text: message_summary(event).unwrap_or_default(),
            conversation_id: event.conversation_id.clone(),
            contact_id: event.contact_id.clone(),
            received_at: Utc::now(),
        };

        match self.store.record_direct(&engagement).await? {
            DirectOutcome::Recorded(d) => {
                info!(direct_engagement_id = %d.id, "Direct engagement recorded");
                Ok(CommitResult {
                    status: CommitStatus::Processed,
                    session_id: None,
                    attribution_method: AttributionMethod::Direct,
                    direct_engagement_id: Some(d.id),
                })
            }
            DirectOutcome::Duplicate(earlier) => {
                debug!(message_key, "Direct engagement replay ignored");
                Ok(CommitResult::replay_of(earlier))
            }
        }
    }
}

/// Identity of one inbound message for replay detection
///
/// The platform message id when present, otherwise a digest of sender,
/// conversation and text.
pub fn dedupe_key(sender_phone: &str, event: &InboundEvent) -> String {
    if let Some(id) = event.message_id.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        return format!("msg:{}", id);
    }

    let text = message_summary(event).unwrap_or_default();
    let digest = ids::digest(&[
        sender_phone,
        event.conversation_id.as_deref().unwrap_or_default(),
        &text,
    ]);
    format!("sha256:{}", digest)
}

/// Text stored as the last message: the text itself, or a media marker
pub fn message_summary(event: &InboundEvent) -> Option<String> {
    if let Some(text) = event.message_text.as_deref().filter(|t| !t.trim().is_empty()) {
        return Some(text.to_string());
    }
    event
        .media_type
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(|m| format!("[media:{}]", m))
}
