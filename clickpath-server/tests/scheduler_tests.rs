//! Export loop timing under a paused clock

mod helpers;

use clickpath_common::config::ExportConfig;
use clickpath_server::export::{run_scheduler, ExportSettings, ExportSyncEngine, SyncTrigger};
use helpers::{CountingStore, RecordingSheet};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const INTERVAL: Duration = Duration::from_secs(60);
const DEBOUNCE: Duration = Duration::from_secs(2);

#[tokio::test(start_paused = true)]
async fn test_scheduler_runs_on_interval_and_after_debounced_notify() {
    let store = CountingStore::new();
    let engine = Arc::new(ExportSyncEngine::new(
        store.clone(),
        RecordingSheet::new(),
        ExportSettings::from(&ExportConfig::default()),
        CancellationToken::new(),
    ));
    let trigger = SyncTrigger::new();
    let cancel = CancellationToken::new();

    let handle = tokio::spawn(run_scheduler(
        engine,
        trigger.clone(),
        INTERVAL,
        DEBOUNCE,
        cancel.clone(),
    ));

    // The first interval tick is immediate
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(store.scans(), 1);

    // A notification syncs once the debounce has passed
    trigger.notify();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(store.scans(), 1);
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(store.scans(), 2);

    // Next interval tick
    tokio::time::sleep(INTERVAL).await;
    assert_eq!(store.scans(), 3);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("scheduler stops on cancel")
        .unwrap();

    tokio::time::sleep(INTERVAL * 2).await;
    assert_eq!(store.scans(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_debounce_skips_sync() {
    let store = CountingStore::new();
    let engine = Arc::new(ExportSyncEngine::new(
        store.clone(),
        RecordingSheet::new(),
        ExportSettings::from(&ExportConfig::default()),
        CancellationToken::new(),
    ));
    let trigger = SyncTrigger::new();
    let cancel = CancellationToken::new();

    let handle = tokio::spawn(run_scheduler(
        engine,
        trigger.clone(),
        INTERVAL,
        DEBOUNCE,
        cancel.clone(),
    ));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(store.scans(), 1);

    trigger.notify();
    tokio::time::sleep(Duration::from_millis(500)).await;
    cancel.cancel();
    handle.await.unwrap();

    assert_eq!(store.scans(), 1);
}
