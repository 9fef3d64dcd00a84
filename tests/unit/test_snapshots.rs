use std::sync::Arc;

use serde_json::json;

use prefsync::{MemoryStore, PrefsyncError, SyncEngine, EXPORT_VERSION};

fn engine() -> (SyncEngine, Arc<MemoryStore>) {
    crate::init_tracing();
    let store = Arc::new(MemoryStore::new());
    (SyncEngine::with_defaults(store.clone()), store)
}

#[tokio::test(start_paused = true)]
async fn export_round_trips_through_import() {
    let (engine, _store) = engine();
    engine.fetch(Some("ada")).await.unwrap();
    engine
        .update_one(Some("ada"), "theme", json!("dark"))
        .await
        .unwrap();

    // Export from one account, import into another.
    let envelope = engine.export_snapshot(Some("ada")).await.unwrap();
    let exported = serde_json::to_value(&envelope).unwrap();
    assert_eq!(exported["exportVersion"], json!(EXPORT_VERSION));

    engine
        .import_snapshot(Some("grace"), exported)
        .await
        .unwrap();
    let migrated = engine.fetch(Some("grace")).await.unwrap();
    assert_eq!(migrated.get("theme"), Some(&json!("dark")));
    assert!(
        migrated.get("exportedAt").is_none(),
        "export metadata is not a preference and must not survive import"
    );
}

#[tokio::test(start_paused = true)]
async fn import_failure_leaves_no_trace() {
    let (engine, store) = engine();
    engine.fetch(Some("ada")).await.unwrap();
    engine
        .update_one(Some("ada"), "theme", json!("dark"))
        .await
        .unwrap();

    let err = engine
        .import_snapshot(Some("ada"), json!({"notifications": {"email": "always"}}))
        .await
        .unwrap_err();
    assert!(matches!(err, PrefsyncError::MalformedImport { .. }));

    // The rejected import neither wrote durably nor disturbed local state.
    assert_eq!(store.update_count(), 0);
    assert_eq!(
        engine.fetch(Some("ada")).await.unwrap().get("theme"),
        Some(&json!("dark"))
    );
    assert!(
        engine.has_pending_write("ada"),
        "the earlier edit is still awaiting its coalesced flush"
    );
}

#[tokio::test(start_paused = true)]
async fn import_tolerates_foreign_fields() {
    let (engine, _store) = engine();
    let imported = engine
        .import_snapshot(
            Some("ada"),
            json!({
                "theme": "dark",
                "someOtherAppsSetting": {"deeply": ["nested", "junk"]}
            }),
        )
        .await
        .unwrap();

    assert_eq!(imported.get("theme"), Some(&json!("dark")));
    assert!(imported.get("someOtherAppsSetting").is_none());
}
