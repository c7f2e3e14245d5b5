//! Click session and engagement models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Default `source` when a click carries none
pub const DEFAULT_SOURCE: &str = "direct";

/// Default for every other attribution parameter
pub const DEFAULT_ATTRIBUTE: &str = "none";

/// Source recorded on sessions synthesized from unattributed messages
pub const DIRECT_MESSAGE_SOURCE: &str = "direct_message";

// ============================================================================
// Attribution parameters
// ============================================================================

/// Accepted spellings per attribution parameter, in lookup order
const SOURCE_KEYS: &[&str] = &["source", "utm_source", "utmSource"];
const MEDIUM_KEYS: &[&str] = &["medium", "utm_medium", "utmMedium"];
const CAMPAIGN_KEYS: &[&str] = &["campaign", "utm_campaign", "utmCampaign"];
const CONTENT_KEYS: &[&str] = &["content", "utm_content", "utmContent"];
const PLACEMENT_KEYS: &[&str] = &["placement", "utm_placement", "utmPlacement", "utm_term"];

/// Marketing attribution parameters of a click
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attributes {
    pub source: String,
    pub medium: String,
    pub campaign: String,
    pub content: String,
    pub placement: String,
}

impl Default for Attributes {
    fn default() -> Self {
        Self {
            source: DEFAULT_SOURCE.to_string(),
            medium: DEFAULT_ATTRIBUTE.to_string(),
            campaign: DEFAULT_ATTRIBUTE.to_string(),
            content: DEFAULT_ATTRIBUTE.to_string(),
            placement: DEFAULT_ATTRIBUTE.to_string(),
        }
    }
}

impl Attributes {
    /// Build attributes from a loosely-keyed parameter map.
    ///
    /// Each parameter is looked up under all of its accepted spellings; the
    /// first non-blank string wins. Absent parameters take their default.
    pub fn from_params(params: &Map<String, Value>) -> Self {
        let defaults = Self::default();
        Self {
            source: lookup(params, SOURCE_KEYS).unwrap_or(defaults.source),
            medium: lookup(params, MEDIUM_KEYS).unwrap_or(defaults.medium),
            campaign: lookup(params, CAMPAIGN_KEYS).unwrap_or(defaults.campaign),
            content: lookup(params, CONTENT_KEYS).unwrap_or(defaults.content),
            placement: lookup(params, PLACEMENT_KEYS).unwrap_or(defaults.placement),
        }
    }

    /// Attributes for a session synthesized from an unattributed message
    pub fn direct_message() -> Self {
        Self {
            source: DIRECT_MESSAGE_SOURCE.to_string(),
            ..Self::default()
        }
    }
}

fn lookup(params: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| params.get(*k))
        .filter_map(|v| v.as_str())
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

// ============================================================================
// Attribution method
// ============================================================================

/// Which resolver strategy attributed an engagement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributionMethod {
    Context,
    ChannelId,
    Phone,
    Direct,
}

impl AttributionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributionMethod::Context => "context",
            AttributionMethod::ChannelId => "channel_id",
            AttributionMethod::Phone => "phone",
            AttributionMethod::Direct => "direct",
        }
    }
}

impl fmt::Display for AttributionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttributionMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "context" => Ok(AttributionMethod::Context),
            "channel_id" => Ok(AttributionMethod::ChannelId),
            "phone" => Ok(AttributionMethod::Phone),
            "direct" => Ok(AttributionMethod::Direct),
            other => Err(Error::InvalidInput(format!(
                "unknown attribution method '{}'",
                other
            ))),
        }
    }
}

// ============================================================================
// Records
// ============================================================================

/// One marketing-link click, awaiting or having received engagement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickSession {
    pub session_id: String,
    pub attributes: Attributes,
    /// Normalized phone number, empty until the visitor is identified
    pub phone_number: String,
    pub has_engaged: bool,
    pub synced_to_export: bool,
    pub created_at: DateTime<Utc>,
    pub engaged_at: Option<DateTime<Utc>>,
    pub exported_at: Option<DateTime<Utc>>,
    pub last_message_text: Option<String>,
    pub contact_id: Option<String>,
    pub conversation_id: Option<String>,
    pub contact_name: Option<String>,
    pub attribution_method: Option<AttributionMethod>,
}

/// Inbound message that matched no click session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectEngagement {
    pub id: String,
    /// Unique per distinct inbound message; replays share it
    pub dedupe_key: String,
    pub phone_number: String,
    pub message_text: String,
    pub conversation_id: Option<String>,
    pub contact_id: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// Session creation request from the click-reporting path
#[derive(Debug, Clone, PartialEq)]
pub struct NewSession {
    pub session_id: String,
    pub attributes: Attributes,
    /// Already normalized, empty when unknown
    pub phone_number: String,
}

/// Fields written when a session is marked engaged
#[derive(Debug, Clone, PartialEq)]
pub struct EngagementUpdate {
    /// Identity of the inbound message; a second commit under the same key
    /// is a replay
    pub message_key: String,
    /// Normalized sender phone
    pub phone_number: String,
    pub method: AttributionMethod,
    pub engaged_at: DateTime<Utc>,
    pub last_message_text: Option<String>,
    pub contact_id: Option<String>,
    pub conversation_id: Option<String>,
    pub contact_name: Option<String>,
}

/// Where an inbound message was committed
///
/// Exactly one of `session_id` and `direct_engagement_id` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedMessage {
    pub message_key: String,
    pub session_id: Option<String>,
    pub direct_engagement_id: Option<String>,
    pub attribution_method: AttributionMethod,
    pub processed_at: DateTime<Utc>,
}

/// Result of applying an engagement to the store
#[derive(Debug, Clone, PartialEq)]
pub enum EngagementOutcome {
    /// Existing session flipped to engaged by this call
    Engaged(ClickSession),
    /// Session was already engaged; nothing written
    AlreadyEngaged(ClickSession),
    /// Session did not exist and was created engaged
    Created(ClickSession),
    /// The message key was committed before; nothing written
    Replayed(ProcessedMessage),
}

impl EngagementOutcome {
    /// Session as stored after this call, `None` for a replay
    pub fn session(&self) -> Option<&ClickSession> {
        match self {
            EngagementOutcome::Engaged(s)
            | EngagementOutcome::AlreadyEngaged(s)
            | EngagementOutcome::Created(s) => Some(s),
            EngagementOutcome::Replayed(_) => None,
        }
    }

    /// Whether this call changed stored state
    pub fn is_new(&self) -> bool {
        matches!(
            self,
            EngagementOutcome::Engaged(_) | EngagementOutcome::Created(_)
        )
    }
}

/// Result of recording a direct engagement
#[derive(Debug, Clone, PartialEq)]
pub enum DirectOutcome {
    Recorded(DirectEngagement),
    /// Same message key already committed, as a direct engagement or to a session
    Duplicate(ProcessedMessage),
}
