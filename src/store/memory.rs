//! In-memory record store, used by tests and `--dry-run` style invocations.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{ExecutionRecord, RecordKey};

use super::RecordStore;

/// Record store backed by a plain map behind a mutex. Same conditional-lock
/// semantics as the SQLite store.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<RecordKey, ExecutionRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn try_acquire(&self, key: &RecordKey) -> Result<Option<ExecutionRecord>> {
        let mut records = self.records.lock().await;
        match records.get_mut(key) {
            Some(record) if !record.lock => {
                record.lock = true;
                Ok(Some(record.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn release(&self, mut record: ExecutionRecord) -> Result<()> {
        record.lock = false;
        self.put(record).await
    }

    async fn put(&self, record: ExecutionRecord) -> Result<()> {
        let mut records = self.records.lock().await;
        records.insert(record.key(), record);
        Ok(())
    }

    async fn get(&self, key: &RecordKey) -> Result<Option<ExecutionRecord>> {
        let records = self.records.lock().await;
        Ok(records.get(key).cloned())
    }
}
