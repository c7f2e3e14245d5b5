//! SQLite-backed session store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::debug;

use crate::db::store::SessionStore;
use crate::models::{
    AttributionMethod, Attributes, ClickSession, DirectEngagement, DirectOutcome,
    EngagementOutcome, EngagementUpdate, NewSession, ProcessedMessage, DIRECT_MESSAGE_SOURCE,
};
use crate::time::{from_millis, to_millis};
use crate::{Error, Result};

const SESSION_COLUMNS: &str = "session_id, source, medium, campaign, content, placement, \
     phone_number, has_engaged, synced_to_export, created_at, engaged_at, exported_at, \
     last_message_text, contact_id, conversation_id, contact_name, attribution_method";

const DIRECT_COLUMNS: &str =
    "id, dedupe_key, phone_number, message_text, conversation_id, contact_id, received_at";

const PROCESSED_COLUMNS: &str =
    "message_key, session_id, direct_engagement_id, attribution_method, processed_at";

/// Session store over a SQLite pool
#[derive(Clone)]
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch_in_tx(
        tx: &mut Transaction<'_, Sqlite>,
        session_id: &str,
    ) -> Result<Option<ClickSession>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM click_sessions WHERE session_id = ?",
            SESSION_COLUMNS
        ))
        .bind(session_id)
        .fetch_optional(&mut **tx)
        .await?;

        row.as_ref().map(session_from_row).transpose()
    }

    /// Claim `message_key` for this transaction.
    ///
    /// Returns the earlier commit when the key was already claimed. As the
    /// transaction's first write it also takes the SQLite write lock.
    async fn claim_message_in_tx(
        tx: &mut Transaction<'_, Sqlite>,
        claim: &ProcessedMessage,
    ) -> Result<Option<ProcessedMessage>> {
        let claimed = sqlx::query(&format!(
            "INSERT INTO processed_messages ({}) VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(message_key) DO NOTHING",
            PROCESSED_COLUMNS
        ))
        .bind(&claim.message_key)
        .bind(&claim.session_id)
        .bind(&claim.direct_engagement_id)
        .bind(claim.attribution_method.as_str())
        .bind(to_millis(&claim.processed_at))
        .execute(&mut **tx)
        .await?
        .rows_affected()
            == 1;

        if claimed {
            return Ok(None);
        }

        let row = sqlx::query(&format!(
            "SELECT {} FROM processed_messages WHERE message_key = ?",
            PROCESSED_COLUMNS
        ))
        .bind(&claim.message_key)
        .fetch_one(&mut **tx)
        .await?;

        processed_from_row(&row).map(Some)
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn create_session(&self, session: &NewSession, created_at: DateTime<Utc>) -> Result<bool> {
        let attrs = &session.attributes;
        let result = sqlx::query(
            r#"
            INSERT INTO click_sessions (
                session_id, source, medium, campaign, content, placement,
                phone_number, has_engaged, synced_to_export, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, 0, 0, ?)
            ON CONFLICT(session_id) DO NOTHING
            "#,
        )
        .bind(&session.session_id)
        .bind(&attrs.source)
        .bind(&attrs.medium)
        .bind(&attrs.campaign)
        .bind(&attrs.content)
        .bind(&attrs.placement)
        .bind(&session.phone_number)
        .bind(to_millis(&created_at))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<ClickSession>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM click_sessions WHERE session_id = ?",
            SESSION_COLUMNS
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(session_from_row).transpose()
    }

    async fn recent_unengaged(&self, since: DateTime<Utc>, limit: u32) -> Result<Vec<ClickSession>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM click_sessions \
             WHERE has_engaged = 0 AND created_at >= ? \
             ORDER BY created_at DESC, rowid DESC LIMIT ?",
            SESSION_COLUMNS
        ))
        .bind(to_millis(&since))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(session_from_row).collect()
    }

    async fn latest_unengaged_by_phone(&self, phone_number: &str) -> Result<Option<ClickSession>> {
        if phone_number.is_empty() {
            return Ok(None);
        }

        let row = sqlx::query(&format!(
            "SELECT {} FROM click_sessions \
             WHERE has_engaged = 0 AND phone_number = ? \
             ORDER BY created_at DESC, rowid DESC LIMIT 1",
            SESSION_COLUMNS
        ))
        .bind(phone_number)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(session_from_row).transpose()
    }

    async fn processed_message(&self, message_key: &str) -> Result<Option<ProcessedMessage>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM processed_messages WHERE message_key = ?",
            PROCESSED_COLUMNS
        ))
        .bind(message_key)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(processed_from_row).transpose()
    }

    async fn apply_engagement(
        &self,
        session_id: &str,
        update: &EngagementUpdate,
        attributes: &Attributes,
    ) -> Result<EngagementOutcome> {
        let engaged_at = to_millis(&update.engaged_at);
        let mut tx = self.pool.begin().await?;

        // Writes come first so this transaction holds the write lock before
        // it reads anything.
        let claim = ProcessedMessage {
            message_key: update.message_key.clone(),
            session_id: Some(session_id.to_string()),
            direct_engagement_id: None,
            attribution_method: update.method,
            processed_at: update.engaged_at,
        };
        if let Some(earlier) = Self::claim_message_in_tx(&mut tx, &claim).await? {
            tx.commit().await?;
            debug!(session_id, message_key = %earlier.message_key, "Message already committed");
            return Ok(EngagementOutcome::Replayed(earlier));
        }

        let flipped = sqlx::query(
            r#"
            UPDATE click_sessions SET
                has_engaged = 1,
                engaged_at = MAX(?, created_at),
                phone_number = COALESCE(NULLIF(?, ''), phone_number),
                attribution_method = ?,
                last_message_text = COALESCE(NULLIF(?, ''), last_message_text),
                contact_id = COALESCE(NULLIF(?, ''), contact_id),
                conversation_id = COALESCE(NULLIF(?, ''), conversation_id),
                contact_name = COALESCE(NULLIF(?, ''), contact_name)
            WHERE session_id = ? AND has_engaged = 0
            "#,
        )
        .bind(engaged_at)
        .bind(&update.phone_number)
        .bind(update.method.as_str())
        .bind(&update.last_message_text)
        .bind(&update.contact_id)
        .bind(&update.conversation_id)
        .bind(&update.contact_name)
        .bind(session_id)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        if flipped {
            let session = Self::fetch_in_tx(&mut tx, session_id)
                .await?
                .ok_or_else(|| Error::Internal(format!("session {} vanished mid-commit", session_id)))?;
            tx.commit().await?;
            debug!(session_id, method = %update.method, "Session marked engaged");
            return Ok(EngagementOutcome::Engaged(session));
        }

        if let Some(existing) = Self::fetch_in_tx(&mut tx, session_id).await? {
            // Replays of this message report the method the session kept
            if let Some(method) = existing.attribution_method {
                sqlx::query(
                    "UPDATE processed_messages SET attribution_method = ? WHERE message_key = ?",
                )
                .bind(method.as_str())
                .bind(&update.message_key)
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await?;
            debug!(session_id, "Session already engaged, nothing written");
            return Ok(EngagementOutcome::AlreadyEngaged(existing));
        }

        sqlx::query(
            r#"
            INSERT INTO click_sessions (
                session_id, source, medium, campaign, content, placement,
                phone_number, has_engaged, synced_to_export, created_at, engaged_at,
                last_message_text, contact_id, conversation_id, contact_name,
                attribution_method
            ) VALUES (?, ?, ?, ?, ?, ?, ?, 1, 0, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(session_id)
        .bind(&attributes.source)
        .bind(&attributes.medium)
        .bind(&attributes.campaign)
        .bind(&attributes.content)
        .bind(&attributes.placement)
        .bind(&update.phone_number)
        .bind(engaged_at)
        .bind(engaged_at)
        .bind(non_empty(&update.last_message_text))
        .bind(non_empty(&update.contact_id))
        .bind(non_empty(&update.conversation_id))
        .bind(non_empty(&update.contact_name))
        .bind(update.method.as_str())
        .execute(&mut *tx)
        .await?;

        let created = Self::fetch_in_tx(&mut tx, session_id)
            .await?
            .ok_or_else(|| Error::Internal(format!("session {} missing after insert", session_id)))?;
        tx.commit().await?;
        debug!(session_id, method = %update.method, "Session created engaged");
        Ok(EngagementOutcome::Created(created))
    }

    async fn record_direct(&self, engagement: &DirectEngagement) -> Result<DirectOutcome> {
        let mut tx = self.pool.begin().await?;

        let claim = ProcessedMessage {
            message_key: engagement.dedupe_key.clone(),
            session_id: None,
            direct_engagement_id: Some(engagement.id.clone()),
            attribution_method: AttributionMethod::Direct,
            processed_at: engagement.received_at,
        };
        if let Some(earlier) = Self::claim_message_in_tx(&mut tx, &claim).await? {
            tx.commit().await?;
            return Ok(DirectOutcome::Duplicate(earlier));
        }

        sqlx::query(&format!(
            "INSERT INTO direct_engagements ({}) VALUES (?, ?, ?, ?, ?, ?, ?)",
            DIRECT_COLUMNS
        ))
        .bind(&engagement.id)
        .bind(&engagement.dedupe_key)
        .bind(&engagement.phone_number)
        .bind(&engagement.message_text)
        .bind(&engagement.conversation_id)
        .bind(&engagement.contact_id)
        .bind(to_millis(&engagement.received_at))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(DirectOutcome::Recorded(engagement.clone()))
    }

    async fn pending_export(&self, limit: u32, include_direct: bool) -> Result<Vec<ClickSession>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM click_sessions \
             WHERE has_engaged = 1 AND synced_to_export = 0 \
               AND (? = 1 OR (COALESCE(attribution_method, '') <> 'direct' AND source <> ?)) \
             ORDER BY engaged_at ASC, rowid ASC LIMIT ?",
            SESSION_COLUMNS
        ))
        .bind(include_direct)
        .bind(DIRECT_MESSAGE_SOURCE)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(session_from_row).collect()
    }

    async fn mark_exported(&self, session_id: &str, exported_at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE click_sessions SET synced_to_export = 1, exported_at = MAX(?, engaged_at) \
             WHERE session_id = ? AND has_engaged = 1 AND synced_to_export = 0",
        )
        .bind(to_millis(&exported_at))
        .bind(session_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn timestamp(row: &SqliteRow, column: &str) -> Result<Option<DateTime<Utc>>> {
    let millis: Option<i64> = row.try_get(column)?;
    millis
        .map(|m| {
            from_millis(m).ok_or_else(|| {
                Error::Internal(format!("{} out of range: {}", column, m))
            })
        })
        .transpose()
}

fn session_from_row(row: &SqliteRow) -> Result<ClickSession> {
    let created_at = timestamp(row, "created_at")?
        .ok_or_else(|| Error::Internal("created_at is NULL".to_string()))?;

    let attribution_method = row
        .try_get::<Option<String>, _>("attribution_method")?
        .map(|m| m.parse::<AttributionMethod>())
        .transpose()?;

    Ok(ClickSession {
        session_id: row.try_get("session_id")?,
        attributes: Attributes {
            source: row.try_get("source")?,
            medium: row.try_get("medium")?,
            campaign: row.try_get("campaign")?,
            content: row.try_get("content")?,
            placement: row.try_get("placement")?,
        },
        phone_number: row.try_get("phone_number")?,
        has_engaged: row.try_get("has_engaged")?,
        synced_to_export: row.try_get("synced_to_export")?,
        created_at,
        engaged_at: timestamp(row, "engaged_at")?,
        exported_at: timestamp(row, "exported_at")?,
        last_message_text: row.try_get("last_message_text")?,
        contact_id: row.try_get("contact_id")?,
        conversation_id: row.try_get("conversation_id")?,
        contact_name: row.try_get("contact_name")?,
        attribution_method,
    })
}

fn processed_from_row(row: &SqliteRow) -> Result<ProcessedMessage> {
    Ok(ProcessedMessage {
        message_key: row.try_get("message_key")?,
        session_id: row.try_get("session_id")?,
        direct_engagement_id: row.try_get("direct_engagement_id")?,
        attribution_method: row.try_get::<String, _>("attribution_method")?.parse()?,
        processed_at: timestamp(row, "processed_at")?
            .ok_or_else(|| Error::Internal("processed_at is NULL".to_string()))?,
    })
}
