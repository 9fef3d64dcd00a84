use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use prefsync::{
    EngineConfig, FlushOutcome, LifecycleBridge, LifecycleSignal, MemoryStore, SyncEngine,
};

fn fast_engine(store: Arc<MemoryStore>) -> SyncEngine {
    crate::init_tracing();
    SyncEngine::new(
        store,
        EngineConfig {
            cache_ttl_secs: 300,
            coalesce_delay_ms: 100,
        },
    )
}

async fn settle(delay_ms: u64) {
    tokio::time::sleep(Duration::from_millis(delay_ms + 50)).await;
    tokio::task::yield_now().await;
}

#[tokio::test(start_paused = true)]
async fn full_session_lifecycle() {
    let store = Arc::new(MemoryStore::new());
    let engine = fast_engine(store.clone());
    let bridge = LifecycleBridge::new(engine.clone());

    // First visit: defaults materialize and are persisted once.
    let initial = engine.fetch(Some("ada")).await.unwrap();
    assert_eq!(initial.get("theme"), Some(&json!("system")));
    assert_eq!(store.insert_count(), 1);

    // A burst of settings-panel edits.
    engine
        .update_one(Some("ada"), "theme", json!("dark"))
        .await
        .unwrap();
    engine
        .update_one(Some("ada"), "fontSize", json!("large"))
        .await
        .unwrap();
    engine
        .update_many(
            Some("ada"),
            prefsync::Preferences::from_value(json!({"notifications": {"sms": true}})).unwrap(),
            false,
        )
        .await
        .unwrap();

    // All visible immediately, nothing durable yet.
    let seen = engine.fetch(Some("ada")).await.unwrap();
    assert_eq!(seen.get("theme"), Some(&json!("dark")));
    assert_eq!(seen.to_value()["notifications"]["sms"], json!(true));
    assert_eq!(store.update_count(), 0);

    // The tab goes to the background: pending edits are flushed.
    let outcome = bridge
        .notify(LifecycleSignal::ForegroundLost, Some("ada"))
        .await
        .unwrap();
    assert_eq!(outcome, FlushOutcome::Flushed);
    assert_eq!(store.update_count(), 1);

    let durable = store.record("ada").unwrap().record;
    assert_eq!(durable.get("theme"), Some(&json!("dark")));
    assert_eq!(durable.get("fontSize"), Some(&json!("large")));
    assert_eq!(durable.to_value()["notifications"]["sms"], json!(true));
    assert_eq!(
        durable.to_value()["notifications"]["email"],
        json!(true),
        "untouched defaults ride along in the full snapshot"
    );

    // Session ends with no further edits: nothing left to flush.
    let outcome = bridge
        .notify(LifecycleSignal::SessionEnding, Some("ada"))
        .await
        .unwrap();
    assert_eq!(outcome, FlushOutcome::Idle);
    assert_eq!(store.update_count(), 1);

    // A later session picks the durable state back up.
    let next_session = engine.fetch(Some("ada")).await.unwrap();
    assert_eq!(next_session.get("theme"), Some(&json!("dark")));
}

#[tokio::test(start_paused = true)]
async fn users_do_not_share_state() {
    let store = Arc::new(MemoryStore::new());
    let engine = fast_engine(store.clone());

    engine
        .update_one(Some("ada"), "theme", json!("dark"))
        .await
        .unwrap();
    engine
        .update_one(Some("grace"), "theme", json!("light"))
        .await
        .unwrap();
    settle(100).await;

    assert_eq!(
        store.record("ada").unwrap().record.get("theme"),
        Some(&json!("dark"))
    );
    assert_eq!(
        store.record("grace").unwrap().record.get("theme"),
        Some(&json!("light"))
    );
}

#[tokio::test(start_paused = true)]
async fn spaced_edits_produce_separate_writes() {
    let store = Arc::new(MemoryStore::new());
    let engine = fast_engine(store.clone());
    engine.fetch(Some("ada")).await.unwrap();

    engine
        .update_one(Some("ada"), "theme", json!("dark"))
        .await
        .unwrap();
    settle(100).await;
    engine
        .update_one(Some("ada"), "fontSize", json!("large"))
        .await
        .unwrap();
    settle(100).await;

    assert_eq!(
        store.update_count(),
        2,
        "edits further apart than the delay are not coalesced"
    );
    let last = store.last_update("ada").unwrap();
    assert_eq!(
        last.get("theme"),
        Some(&json!("dark")),
        "the second flush still carries the full merged snapshot"
    );
}

#[tokio::test(start_paused = true)]
async fn engine_clones_share_one_pending_table() {
    let store = Arc::new(MemoryStore::new());
    let engine = fast_engine(store.clone());
    let clone = engine.clone();

    engine
        .update_one(Some("ada"), "theme", json!("dark"))
        .await
        .unwrap();
    assert!(clone.has_pending_write("ada"));

    clone.force_flush_all(Some("ada")).await.unwrap();
    assert!(!engine.has_pending_write("ada"));
    assert_eq!(store.update_count(), 1);
}
