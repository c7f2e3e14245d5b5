//! Database initialization
//!
//! Creates the database file on first run and brings the schema up to date.
//! Every statement is idempotent, so this runs on each startup.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

/// Current schema version
///
/// **IMPORTANT:** Increment this when adding new migrations
const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Per-connection wait on a locked database before returning SQLITE_BUSY
const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // WAL lets the export loop read while webhook handlers write
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;
    Ok(pool)
}

/// Single-connection in-memory database with the full schema
///
/// An in-memory SQLite database lives as long as its connection, so the pool
/// keeps exactly one connection open forever.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    create_schema(&pool).await?;
    Ok(pool)
}

async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_click_sessions_table(pool).await?;
    create_direct_engagements_table(pool).await?;
    create_processed_messages_table(pool).await?;
    run_migrations(pool).await?;
    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the click_sessions table
///
/// Timestamps are Unix epoch milliseconds so window filters and ordering
/// compare numerically.
async fn create_click_sessions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS click_sessions (
            session_id TEXT PRIMARY KEY,
            source TEXT NOT NULL DEFAULT 'direct',
            medium TEXT NOT NULL DEFAULT 'none',
            campaign TEXT NOT NULL DEFAULT 'none',
            content TEXT NOT NULL DEFAULT 'none',
            placement TEXT NOT NULL DEFAULT 'none',
            phone_number TEXT NOT NULL DEFAULT '',
            has_engaged INTEGER NOT NULL DEFAULT 0 CHECK (has_engaged IN (0, 1)),
            synced_to_export INTEGER NOT NULL DEFAULT 0 CHECK (synced_to_export IN (0, 1)),
            created_at INTEGER NOT NULL,
            engaged_at INTEGER,
            exported_at INTEGER,
            last_message_text TEXT,
            contact_id TEXT,
            conversation_id TEXT,
            contact_name TEXT,
            attribution_method TEXT,
            CHECK (synced_to_export = 0 OR has_engaged = 1)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Channel-identifier strategy: unengaged, newest first
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_click_sessions_unengaged \
         ON click_sessions(has_engaged, created_at)",
    )
    .execute(pool)
    .await?;

    // Phone strategy
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_click_sessions_phone \
         ON click_sessions(phone_number, has_engaged, created_at)",
    )
    .execute(pool)
    .await?;

    // Export scan
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_click_sessions_pending_export \
         ON click_sessions(has_engaged, synced_to_export, engaged_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_direct_engagements_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS direct_engagements (
            id TEXT PRIMARY KEY,
            dedupe_key TEXT NOT NULL UNIQUE,
            phone_number TEXT NOT NULL,
            message_text TEXT NOT NULL,
            conversation_id TEXT,
            contact_id TEXT,
            received_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// One row per committed inbound message, keyed by its dedupe key
async fn create_processed_messages_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS processed_messages (
            message_key TEXT PRIMARY KEY,
            session_id TEXT,
            direct_engagement_id TEXT,
            attribution_method TEXT NOT NULL,
            processed_at INTEGER NOT NULL,
            CHECK ((session_id IS NULL) <> (direct_engagement_id IS NULL))
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Get current schema version from database, 0 if none recorded
async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let version: Option<i32> =
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;

    Ok(version.unwrap_or(0))
}

/// Run all pending migrations
async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = get_schema_version(pool).await?;

    if current_version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    if current_version > CURRENT_SCHEMA_VERSION {
        warn!(
            "Database schema version ({}) is newer than code version ({})",
            current_version, CURRENT_SCHEMA_VERSION
        );
        return Ok(());
    }

    // v1 is the baseline created above
    if current_version < 2 {
        migrate_v2(pool).await?;
    }

    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(CURRENT_SCHEMA_VERSION)
        .execute(pool)
        .await?;

    info!(
        "Database schema migrated: v{} -> v{}",
        current_version, CURRENT_SCHEMA_VERSION
    );
    Ok(())
}

/// v2: direct engagements recorded before `processed_messages` existed
/// keep deduplicating
async fn migrate_v2(pool: &SqlitePool) -> Result<()> {
    let backfilled = sqlx::query(
        "INSERT OR IGNORE INTO processed_messages \
             (message_key, session_id, direct_engagement_id, attribution_method, processed_at) \
         SELECT dedupe_key, NULL, id, 'direct', received_at FROM direct_engagements",
    )
    .execute(pool)
    .await?
    .rows_affected();

    info!(backfilled, "Migration v2: processed_messages backfilled");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_database_has_tables() {
        let pool = init_memory_database().await.unwrap();

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();

        assert!(tables.contains(&"click_sessions".to_string()));
        assert!(tables.contains(&"direct_engagements".to_string()));
        assert!(tables.contains(&"processed_messages".to_string()));
        assert!(tables.contains(&"schema_version".to_string()));
    }

    #[tokio::test]
    async fn test_schema_version_recorded_once() {
        let pool = init_memory_database().await.unwrap();
        create_schema(&pool).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_version")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(get_schema_version(&pool).await.unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_v2_backfills_direct_engagements() {
        let pool = init_memory_database().await.unwrap();

        // Roll back to a v1 database holding one direct engagement
        sqlx::query("DELETE FROM schema_version").execute(&pool).await.unwrap();
        sqlx::query("INSERT INTO schema_version (version) VALUES (1)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO direct_engagements \
                 (id, dedupe_key, phone_number, message_text, received_at) \
             VALUES ('d1', 'msg:wamid.1', '919876543210', 'hi', 1000)",
        )
        .execute(&pool)
        .await
        .unwrap();

        create_schema(&pool).await.unwrap();

        let (direct_id, method): (String, String) = sqlx::query_as(
            "SELECT direct_engagement_id, attribution_method FROM processed_messages \
             WHERE message_key = 'msg:wamid.1'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(direct_id, "d1");
        assert_eq!(method, "direct");
        assert_eq!(get_schema_version(&pool).await.unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_synced_requires_engaged_constraint() {
        let pool = init_memory_database().await.unwrap();

        let result = sqlx::query(
            "INSERT INTO click_sessions (session_id, created_at, has_engaged, synced_to_export) \
             VALUES ('s1', 0, 0, 1)",
        )
        .execute(&pool)
        .await;

        assert!(result.is_err(), "synced_to_export=1 without has_engaged=1 must be rejected");
    }
}
