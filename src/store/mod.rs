//! Execution record store: keyed records with a conditional-update
//! optimistic lock.
//!
//! The store is the only coordination point between concurrent turns. A
//! failed conditional acquire does not distinguish "record locked" from
//! "record not created yet"; both retry identically, matching the observed
//! behavior of the system this replaces.

pub mod memory;
pub mod sqlite;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::domain::{ExecutionRecord, RecordKey};

// Re-export the store implementations
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Keyed record store with conditional update.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Conditionally take the lock: succeeds only if the record exists and
    /// is unlocked, atomically setting `lock = true`. Returns the record
    /// with the lock already persisted, or `None` when the precondition
    /// failed (locked, or missing).
    async fn try_acquire(&self, key: &RecordKey) -> Result<Option<ExecutionRecord>>;

    /// Unconditional full overwrite with `lock = false` and the record's
    /// final field values.
    async fn release(&self, record: ExecutionRecord) -> Result<()>;

    /// Unconditional create/overwrite. Used at bootstrap; a duplicate
    /// opening event overwrites rather than erroring.
    async fn put(&self, record: ExecutionRecord) -> Result<()>;

    /// Read a record without touching its lock.
    async fn get(&self, key: &RecordKey) -> Result<Option<ExecutionRecord>>;
}

#[async_trait]
impl<S: RecordStore + ?Sized> RecordStore for std::sync::Arc<S> {
    async fn try_acquire(&self, key: &RecordKey) -> Result<Option<ExecutionRecord>> {
        (**self).try_acquire(key).await
    }

    async fn release(&self, record: ExecutionRecord) -> Result<()> {
        (**self).release(record).await
    }

    async fn put(&self, record: ExecutionRecord) -> Result<()> {
        (**self).put(record).await
    }

    async fn get(&self, key: &RecordKey) -> Result<Option<ExecutionRecord>> {
        (**self).get(key).await
    }
}

/// Retry `try_acquire` with a fixed delay until it succeeds.
///
/// Unbounded by design: there is no lease or timeout, so a turn that died
/// holding the lock blocks successors until an operator intervenes.
pub async fn acquire<S: RecordStore + ?Sized>(
    store: &S,
    key: &RecordKey,
    retry_delay: Duration,
) -> Result<ExecutionRecord> {
    loop {
        if let Some(record) = store.try_acquire(key).await? {
            return Ok(record);
        }
        debug!(key = %key, "record locked or missing, retrying");
        tokio::time::sleep(retry_delay).await;
    }
}
