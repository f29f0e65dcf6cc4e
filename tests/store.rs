//! Record store integration tests
//!
//! Persistence and lock behavior of the SQLite store across reopens.

use tempfile::TempDir;

use pipewatch::domain::{
    ActionDef, ExecutionRecord, RecordKey, StageDef, ThreadContext, Topology,
};
use pipewatch::{RecordStore, SqliteStore};

fn key() -> RecordKey {
    RecordKey {
        project_name: "demo".into(),
        execution_id: "e-1".into(),
    }
}

fn record() -> ExecutionRecord {
    let topology = Topology {
        stages: vec![StageDef {
            name: "Deploy".into(),
            actions: vec![ActionDef {
                name: "Push".into(),
                run_order: 1,
                category: Some("Deploy".into()),
            }],
        }],
    };
    let thread = ThreadContext {
        channel: "#deploys".into(),
        root_ts: "1.0".into(),
        headline: "Deployment just *started*".into(),
    };
    ExecutionRecord::bootstrap(key(), topology, thread)
}

#[tokio::test]
async fn records_survive_a_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("records.db");

    {
        let store = SqliteStore::open(&path).unwrap();
        let mut record = record();
        record.progress.current_stage = Some("Deploy".into());
        record
            .extra
            .insert("commitDetails".into(), serde_json::json!({"sha": "abc123"}));
        store.put(record).await.unwrap();
    }

    let store = SqliteStore::open(&path).unwrap();
    let loaded = store.get(&key()).await.unwrap().unwrap();
    assert_eq!(loaded.progress.current_stage.as_deref(), Some("Deploy"));
    assert_eq!(loaded.thread.root_ts, "1.0");
    assert_eq!(loaded.extra["commitDetails"]["sha"], "abc123");
    assert!(!loaded.lock);
}

#[tokio::test]
async fn lock_state_survives_a_reopen() {
    // A turn that died holding the lock still blocks successors after a
    // service restart; only release (or an operator) clears it.
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("records.db");

    {
        let store = SqliteStore::open(&path).unwrap();
        store.put(record()).await.unwrap();
        store.try_acquire(&key()).await.unwrap().unwrap();
    }

    let store = SqliteStore::open(&path).unwrap();
    assert!(store.try_acquire(&key()).await.unwrap().is_none());

    let held = store.get(&key()).await.unwrap().unwrap();
    assert!(held.lock);
    store.release(held).await.unwrap();
    assert!(store.try_acquire(&key()).await.unwrap().is_some());
}

#[tokio::test]
async fn get_reflects_a_held_lock() {
    // The lock lives in its own column; a read must report it even though
    // the record JSON was written before the lock was taken.
    let store = SqliteStore::in_memory().unwrap();
    store.put(record()).await.unwrap();

    let acquired = store.try_acquire(&key()).await.unwrap().unwrap();
    assert!(store.try_acquire(&key()).await.unwrap().is_none());

    let seen = store.get(&key()).await.unwrap().unwrap();
    assert!(seen.lock, "get() must reflect the held lock");

    store.release(acquired).await.unwrap();
    let seen = store.get(&key()).await.unwrap().unwrap();
    assert!(!seen.lock);
}

#[tokio::test]
async fn put_overwrites_an_existing_record() {
    // Bootstrap of a duplicate opening event replaces the record wholesale.
    let store = SqliteStore::in_memory().unwrap();
    let mut first = record();
    first.progress.current_stage = Some("Deploy".into());
    store.put(first).await.unwrap();

    store.put(record()).await.unwrap();
    let loaded = store.get(&key()).await.unwrap().unwrap();
    assert_eq!(loaded.progress.current_stage, None);
}
