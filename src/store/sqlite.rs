//! SQLite-backed record store.
//!
//! One row per (project, execution). The record itself is stored as JSON;
//! the lock lives in its own column so the conditional acquire is a single
//! `UPDATE ... WHERE locked = 0` checked through the changed-row count.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

use crate::domain::{ExecutionRecord, RecordKey};

use super::RecordStore;

/// Record store over a single SQLite database file.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create store directory: {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open record store: {}", path.display()))?;
        Self::init(conn)
    }

    /// Fully in-memory store, handy for local dry runs.
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().context("Failed to open in-memory store")?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS records (
                project_name TEXT NOT NULL,
                execution_id TEXT NOT NULL,
                record       TEXT NOT NULL,
                locked       INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (project_name, execution_id)
            );",
        )
        .context("Failed to initialize records table")?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn try_acquire(&self, key: &RecordKey) -> Result<Option<ExecutionRecord>> {
        let conn = self.conn.lock().await;
        let changed = conn
            .execute(
                "UPDATE records SET locked = 1
                 WHERE project_name = ?1 AND execution_id = ?2 AND locked = 0",
                params![key.project_name, key.execution_id],
            )
            .context("Failed to run conditional lock update")?;
        if changed == 0 {
            // Locked, or not created yet; callers cannot tell the difference.
            return Ok(None);
        }
        let json: String = conn
            .query_row(
                "SELECT record FROM records WHERE project_name = ?1 AND execution_id = ?2",
                params![key.project_name, key.execution_id],
                |row| row.get(0),
            )
            .with_context(|| format!("Failed to read record {key}"))?;
        let mut record: ExecutionRecord =
            serde_json::from_str(&json).with_context(|| format!("Corrupt record {key}"))?;
        record.lock = true;
        Ok(Some(record))
    }

    async fn release(&self, mut record: ExecutionRecord) -> Result<()> {
        record.lock = false;
        self.put(record).await
    }

    async fn put(&self, record: ExecutionRecord) -> Result<()> {
        let key = record.key();
        let json = serde_json::to_string(&record)
            .with_context(|| format!("Failed to serialize record {key}"))?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO records (project_name, execution_id, record, locked)
             VALUES (?1, ?2, ?3, ?4)",
            params![key.project_name, key.execution_id, json, record.lock as i64],
        )
        .with_context(|| format!("Failed to write record {key}"))?;
        Ok(())
    }

    async fn get(&self, key: &RecordKey) -> Result<Option<ExecutionRecord>> {
        let conn = self.conn.lock().await;
        let row: Option<(String, bool)> = conn
            .query_row(
                "SELECT record, locked FROM records
                 WHERE project_name = ?1 AND execution_id = ?2",
                params![key.project_name, key.execution_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .with_context(|| format!("Failed to read record {key}"))?;
        match row {
            Some((json, locked)) => {
                let mut record: ExecutionRecord = serde_json::from_str(&json)
                    .with_context(|| format!("Corrupt record {key}"))?;
                // The column is authoritative; the JSON snapshot predates
                // any in-place lock update.
                record.lock = locked;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ThreadContext, Topology};

    fn record(execution: &str) -> ExecutionRecord {
        ExecutionRecord::bootstrap(
            RecordKey {
                project_name: "test".into(),
                execution_id: execution.into(),
            },
            Topology::default(),
            ThreadContext::default(),
        )
    }

    #[tokio::test]
    async fn acquire_locks_and_release_unlocks() {
        let store = SqliteStore::in_memory().unwrap();
        store.put(record("e-1")).await.unwrap();
        let key = RecordKey {
            project_name: "test".into(),
            execution_id: "e-1".into(),
        };

        let acquired = store.try_acquire(&key).await.unwrap().unwrap();
        assert!(acquired.lock);

        // Second acquire fails while the lock is held.
        assert!(store.try_acquire(&key).await.unwrap().is_none());

        store.release(acquired).await.unwrap();
        assert!(store.try_acquire(&key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn acquire_of_missing_record_fails_like_contention() {
        let store = SqliteStore::in_memory().unwrap();
        let key = RecordKey {
            project_name: "test".into(),
            execution_id: "nope".into(),
        };
        assert!(store.try_acquire(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unrelated_executions_lock_independently() {
        let store = SqliteStore::in_memory().unwrap();
        store.put(record("e-1")).await.unwrap();
        store.put(record("e-2")).await.unwrap();

        let key = |execution: &str| RecordKey {
            project_name: "test".into(),
            execution_id: execution.into(),
        };
        assert!(store.try_acquire(&key("e-1")).await.unwrap().is_some());
        assert!(store.try_acquire(&key("e-2")).await.unwrap().is_some());
    }
}
