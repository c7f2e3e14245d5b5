//! Attribution resolver
//!
//! Decides which click session an inbound message belongs to by running an
//! ordered list of strategies, highest confidence first:
//!
//! 1. context token (`context`)
//! 2. channel identifiers within a recency window (`channel_id`)
//! 3. sender phone (`phone`)
//!
//! When none matches the decision is `direct`. The resolver only reads the
//! store; committing the decision is the engagement committer's job.

pub mod strategies;
pub mod token;

use clickpath_common::config::AttributionConfig;
use clickpath_common::db::SessionStore;
use clickpath_common::phone::PhoneNormalizer;
use clickpath_common::{AttributionMethod, Attributes, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use strategies::{ChannelIdStrategy, ContextTokenStrategy, EventView, PhoneStrategy, Strategy};

/// Inbound webhook event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Raw channel-format sender number; required
    #[serde(default)]
    pub sender_phone: Option<String>,
    #[serde(default)]
    pub context_token: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub contact_id: Option<String>,
    #[serde(default)]
    pub contact_name: Option<String>,
    #[serde(default)]
    pub message_text: Option<String>,
    /// Platform message id, used to recognise redelivery
    #[serde(default)]
    pub message_id: Option<String>,
    /// Set for non-text messages (image, audio, ...)
    #[serde(default)]
    pub media_type: Option<String>,
}

/// Resolver output
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub method: AttributionMethod,
    /// `None` for direct decisions
    pub session_id: Option<String>,
    /// Attributes carried by the event, folded in if the session must be created
    pub attributes: Option<Attributes>,
    /// Normalized sender phone
    pub sender_phone: String,
}

impl Decision {
    pub fn is_direct(&self) -> bool {
        self.session_id.is_none()
    }
}

/// Ordered strategy waterfall over a session store
pub struct Resolver {
    store: Arc<dyn SessionStore>,
    normalizer: PhoneNormalizer,
    strategies: Vec<Box<dyn Strategy>>,
}

impl Resolver {
    /// Resolver with the standard waterfall
    pub fn new(store: Arc<dyn SessionStore>, config: &AttributionConfig) -> Self {
        let strategies: Vec<Box<dyn Strategy>> = vec![
            Box::new(ContextTokenStrategy),
            Box::new(ChannelIdStrategy {
                window: config.channel_window(),
                batch_limit: config.channel_batch_limit,
            }),
            Box::new(PhoneStrategy),
        ];
        Self::with_strategies(store, config.phone_normalizer(), strategies)
    }

    pub fn with_strategies(
        store: Arc<dyn SessionStore>,
        normalizer: PhoneNormalizer,
        strategies: Vec<Box<dyn Strategy>>,
    ) -> Self {
        Self {
            store,
            normalizer,
            strategies,
        }
    }

    pub fn normalizer(&self) -> &PhoneNormalizer {
        &self.normalizer
    }

    /// Run the waterfall; the first strategy with a candidate wins.
    ///
    /// Store errors abort resolution so no partial decision is committed.
    pub async fn resolve(&self, event: &InboundEvent) -> Result<Decision> {
        let phone = self
            .normalizer
            .normalize(event.sender_phone.as_deref().unwrap_or_default());
        let view = EventView {
            event,
            phone: &phone,
        };

        for strategy in &self.strategies {
            if let Some(candidate) = strategy.find(view, self.store.as_ref()).await? {
                info!(
                    session_id = %candidate.session_id,
                    method = %candidate.method,
                    "Attributed inbound message"
                );
                return Ok(Decision {
                    method: candidate.method,
                    session_id: Some(candidate.session_id),
                    attributes: candidate.attributes,
                    sender_phone: phone,
                });
            }
            debug!(strategy = strategy.name(), "No candidate");
        }

        info!(phone = %phone, "No session matched, treating as direct");
        Ok(Decision {
            method: AttributionMethod::Direct,
            session_id: None,
            attributes: None,
            sender_phone: phone,
        })
    }
}
