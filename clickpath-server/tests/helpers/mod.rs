//! Shared fixtures for clickpath-server integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clickpath_common::config::{AttributionConfig, DirectPolicy};
use clickpath_common::db::{init_memory_database, SessionStore, SqliteSessionStore};
use clickpath_common::models::{
    DirectOutcome, EngagementOutcome, EngagementUpdate, NewSession,
};
use clickpath_common::{
    AttributionMethod, Attributes, ClickSession, DirectEngagement, Error, ProcessedMessage, Result,
};
use clickpath_server::attribution::Resolver;
use clickpath_server::engagement::Committer;
use clickpath_server::sheets::{Row, SheetClient, SheetError};
use clickpath_server::AppState;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub async fn memory_store() -> Arc<SqliteSessionStore> {
    let pool = init_memory_database().await.expect("memory database");
    Arc::new(SqliteSessionStore::new(pool))
}

pub async fn seed_session(
    store: &dyn SessionStore,
    session_id: &str,
    phone: &str,
    created_at: DateTime<Utc>,
) {
    let session = NewSession {
        session_id: session_id.to_string(),
        attributes: Attributes {
            source: "facebook".to_string(),
            medium: "cpc".to_string(),
            campaign: "spring".to_string(),
            ..Attributes::default()
        },
        phone_number: phone.to_string(),
    };
    assert!(store.create_session(&session, created_at).await.unwrap());
}

/// Mark a seeded session engaged the way the committer would
pub async fn engage(store: &dyn SessionStore, session_id: &str, method: AttributionMethod) {
    let update = EngagementUpdate {
        message_key: format!("msg:seed-{}", session_id),
        phone_number: "919876543210".to_string(),
        method,
        engaged_at: Utc::now(),
        last_message_text: Some(format!("hello from {}", session_id)),
        contact_id: None,
        conversation_id: None,
        contact_name: None,
    };
    store
        .apply_engagement(session_id, &update, &Attributes::default())
        .await
        .unwrap();
}

/// Ready state over a fresh in-memory store
pub async fn ready_state(policy: DirectPolicy) -> (AppState, Arc<SqliteSessionStore>) {
    let store = memory_store().await;
    let dyn_store: Arc<dyn SessionStore> = store.clone();
    let resolver = Resolver::new(dyn_store.clone(), &AttributionConfig::default());
    let committer = Committer::new(dyn_store.clone(), policy);
    let state = AppState::new(dyn_store, resolver, committer);
    state.set_ready(true);
    (state, store)
}

// ============================================================================
// Spreadsheet fake
// ============================================================================

/// In-memory spreadsheet recording every call
#[derive(Default)]
pub struct RecordingSheet {
    pub sheets: Mutex<HashSet<String>>,
    /// Every appended row, header included, in order
    pub rows: Mutex<Vec<Row>>,
    pub append_calls: AtomicUsize,
    pub create_calls: AtomicUsize,
    /// Errors returned by successive `append_rows` calls before succeeding
    pub append_failures: Mutex<VecDeque<SheetError>>,
    /// Delay applied inside `append_rows`
    pub append_delay: Mutex<Option<Duration>>,
}

impl RecordingSheet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Sheet that already exists with its header row written
    pub fn with_header(title: &str) -> Arc<Self> {
        let sheet = Self::default();
        sheet.sheets.lock().unwrap().insert(title.to_string());
        sheet
            .rows
            .lock()
            .unwrap()
            .push(clickpath_server::export::rows::header_row());
        Arc::new(sheet)
    }

    pub fn fail_appends(&self, errors: Vec<SheetError>) {
        self.append_failures.lock().unwrap().extend(errors);
    }

    pub fn set_append_delay(&self, delay: Duration) {
        *self.append_delay.lock().unwrap() = Some(delay);
    }

    pub fn rows(&self) -> Vec<Row> {
        self.rows.lock().unwrap().clone()
    }

    /// Appended rows excluding the header
    pub fn data_rows(&self) -> Vec<Row> {
        self.rows()
            .into_iter()
            .filter(|r| r.first().map(String::as_str) != Some("Timestamp"))
            .collect()
    }
}

#[async_trait]
impl SheetClient for RecordingSheet {
    async fn sheet_exists(&self, title: &str) -> std::result::Result<bool, SheetError> {
        Ok(self.sheets.lock().unwrap().contains(title))
    }

    async fn create_sheet(&self, title: &str) -> std::result::Result<(), SheetError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.sheets.lock().unwrap().insert(title.to_string());
        Ok(())
    }

    async fn read_range(&self, _range: &str) -> std::result::Result<Vec<Row>, SheetError> {
        Ok(self.rows().into_iter().take(1).collect())
    }

    async fn append_rows(&self, _range: &str, rows: &[Row]) -> std::result::Result<(), SheetError> {
        self.append_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.append_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.append_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.rows.lock().unwrap().extend(rows.iter().cloned());
        Ok(())
    }
}

// ============================================================================
// Failure-injecting store
// ============================================================================

/// Store wrapper whose `mark_exported` fails for chosen session ids
pub struct FailingMarkStore {
    pub inner: Arc<SqliteSessionStore>,
    pub fail_ids: Mutex<HashSet<String>>,
}

impl FailingMarkStore {
    pub fn new(inner: Arc<SqliteSessionStore>, fail_ids: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fail_ids: Mutex::new(fail_ids.iter().map(|s| s.to_string()).collect()),
        })
    }

    pub fn heal(&self) {
        self.fail_ids.lock().unwrap().clear();
    }
}

#[async_trait]
impl SessionStore for FailingMarkStore {
    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }

    async fn create_session(&self, session: &NewSession, created_at: DateTime<Utc>) -> Result<bool> {
        self.inner.create_session(session, created_at).await
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<ClickSession>> {
        self.inner.get_session(session_id).await
    }

    async fn recent_unengaged(&self, since: DateTime<Utc>, limit: u32) -> Result<Vec<ClickSession>> {
        self.inner.recent_unengaged(since, limit).await
    }

    async fn latest_unengaged_by_phone(&self, phone_number: &str) -> Result<Option<ClickSession>> {
        self.inner.latest_unengaged_by_phone(phone_number).await
    }

    async fn processed_message(&self, message_key: &str) -> Result<Option<ProcessedMessage>> {
        self.inner.processed_message(message_key).await
    }

    async fn apply_engagement(
        &self,
        session_id: &str,
        update: &EngagementUpdate,
        attributes: &Attributes,
    ) -> Result<EngagementOutcome> {
        self.inner.apply_engagement(session_id, update, attributes).await
    }

    async fn record_direct(&self, engagement: &DirectEngagement) -> Result<DirectOutcome> {
        self.inner.record_direct(engagement).await
    }

    async fn pending_export(&self, limit: u32, include_direct: bool) -> Result<Vec<ClickSession>> {
        self.inner.pending_export(limit, include_direct).await
    }

    async fn mark_exported(&self, session_id: &str, exported_at: DateTime<Utc>) -> Result<bool> {
        if self.fail_ids.lock().unwrap().contains(session_id) {
            return Err(Error::Internal(format!("injected mark failure for {}", session_id)));
        }
        self.inner.mark_exported(session_id, exported_at).await
    }
}

// ============================================================================
// Counting store
// ============================================================================

/// Store with nothing to export that counts export scans.
///
/// Answers without touching SQLite, so it is safe under paused time.
#[derive(Default)]
pub struct CountingStore {
    pub pending_calls: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn scans(&self) -> usize {
        self.pending_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionStore for CountingStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn create_session(&self, _: &NewSession, _: DateTime<Utc>) -> Result<bool> {
        unimplemented!()
    }

    async fn get_session(&self, _: &str) -> Result<Option<ClickSession>> {
        unimplemented!()
    }

    async fn recent_unengaged(&self, _: DateTime<Utc>, _: u32) -> Result<Vec<ClickSession>> {
        unimplemented!()
    }

    async fn latest_unengaged_by_phone(&self, _: &str) -> Result<Option<ClickSession>> {
        unimplemented!()
    }

    async fn processed_message(&self, _: &str) -> Result<Option<ProcessedMessage>> {
        unimplemented!()
    }

    async fn apply_engagement(
        &self,
        _: &str,
        _: &EngagementUpdate,
        _: &Attributes,
    ) -> Result<EngagementOutcome> {
        unimplemented!()
    }

    async fn record_direct(&self, _: &DirectEngagement) -> Result<DirectOutcome> {
        unimplemented!()
    }

    async fn pending_export(&self, _: u32, _: bool) -> Result<Vec<ClickSession>> {
        self.pending_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }

    async fn mark_exported(&self, _: &str, _: DateTime<Utc>) -> Result<bool> {
        unimplemented!()
    }
}
