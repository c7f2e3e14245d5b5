//! Concurrent engagement commits against one session
//!
//! Uses a file-backed pool so commits really run on separate connections.

use chrono::Utc;
use clickpath_common::db::{init_database, SessionStore, SqliteSessionStore};
use clickpath_common::models::{EngagementOutcome, EngagementUpdate, NewSession};
use clickpath_common::{AttributionMethod, Attributes};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::task::JoinSet;

fn update(n: usize) -> EngagementUpdate {
    EngagementUpdate {
        message_key: format!("msg:{}", n),
        phone_number: format!("9198765432{:02}", n),
        method: AttributionMethod::Context,
        engaged_at: Utc::now(),
        last_message_text: Some(format!("message {}", n)),
        contact_id: None,
        conversation_id: None,
        contact_name: None,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_commits_flip_exactly_once() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("clickpath.db")).await.unwrap();
    let store = Arc::new(SqliteSessionStore::new(pool));

    store
        .create_session(
            &NewSession {
                session_id: "abc123".to_string(),
                attributes: Attributes::default(),
                phone_number: String::new(),
            },
            Utc::now(),
        )
        .await
        .unwrap();

    let mut join_set = JoinSet::new();
    for n in 0..16 {
        let store = Arc::clone(&store);
        join_set.spawn(async move {
            store
                .apply_engagement("abc123", &update(n), &Attributes::default())
                .await
                .expect("commit should not fail")
        });
    }

    let mut outcomes = Vec::new();
    while let Some(result) = join_set.join_next().await {
        outcomes.push(result.expect("task panicked"));
    }

    let engaged: Vec<_> = outcomes
        .iter()
        .filter(|o| matches!(o, EngagementOutcome::Engaged(_)))
        .collect();
    assert_eq!(engaged.len(), 1, "exactly one commit must flip has_engaged");

    // Every no-op saw the same committed state as the winner
    let winner = engaged[0].session().unwrap();
    for outcome in &outcomes {
        assert_eq!(outcome.session(), Some(winner));
    }

    let stored = store.get_session("abc123").await.unwrap().unwrap();
    assert_eq!(&stored, winner);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_commits_for_missing_session_create_once() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("clickpath.db")).await.unwrap();
    let store = Arc::new(SqliteSessionStore::new(pool));

    let mut join_set = JoinSet::new();
    for n in 0..8 {
        let store = Arc::clone(&store);
        join_set.spawn(async move {
            store
                .apply_engagement("from-token", &update(n), &Attributes::default())
                .await
                .expect("commit should not fail")
        });
    }

    let mut created = 0;
    while let Some(result) = join_set.join_next().await {
        match result.expect("task panicked") {
            EngagementOutcome::Created(_) => created += 1,
            EngagementOutcome::AlreadyEngaged(_) => {}
            EngagementOutcome::Engaged(s) => panic!("unexpected flip of {}", s.session_id),
            EngagementOutcome::Replayed(p) => panic!("unexpected replay of {}", p.message_key),
        }
    }
    assert_eq!(created, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_redeliveries_engage_one_session() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("clickpath.db")).await.unwrap();
    let store = Arc::new(SqliteSessionStore::new(pool));

    for id in ["first", "second", "third"] {
        store
            .create_session(
                &NewSession {
                    session_id: id.to_string(),
                    attributes: Attributes::default(),
                    phone_number: "919876543210".to_string(),
                },
                Utc::now(),
            )
            .await
            .unwrap();
    }

    // One message delivered three times, each delivery aimed at a different
    // candidate
    let mut join_set = JoinSet::new();
    for id in ["first", "second", "third"] {
        let store = Arc::clone(&store);
        join_set.spawn(async move {
            store
                .apply_engagement(id, &update(7), &Attributes::default())
                .await
                .expect("commit should not fail")
        });
    }

    let mut engaged = 0;
    let mut replayed = 0;
    while let Some(result) = join_set.join_next().await {
        match result.expect("task panicked") {
            EngagementOutcome::Engaged(_) => engaged += 1,
            EngagementOutcome::Replayed(_) => replayed += 1,
            other => panic!("unexpected outcome {:?}", other),
        }
    }
    assert_eq!((engaged, replayed), (1, 2));

    let mut engaged_ids = Vec::new();
    for id in ["first", "second", "third"] {
        if store.get_session(id).await.unwrap().unwrap().has_engaged {
            engaged_ids.push(id);
        }
    }
    assert_eq!(engaged_ids.len(), 1);
}
