//! The per-execution record persisted in the record store.
//!
//! One record per (project, execution id). It is the only shared mutable
//! state in the system and is mutated exclusively by the lock holder.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::event::EventSignature;
use super::progress::Progress;
use super::topology::Topology;

/// Store key for an execution record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordKey {
    pub project_name: String,
    pub execution_id: String,
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project_name, self.execution_id)
    }
}

/// Notification-channel context, opaque to the reconciliation core.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadContext {
    pub channel: String,
    /// Root message of the execution thread; narrative lines reply to it and
    /// summary updates rewrite it.
    pub root_ts: String,
    /// Headline text of the root message, re-used on every summary rewrite.
    pub headline: String,
}

/// Buffered events that could not be admitted yet, keyed by signature.
///
/// A re-arrival with an identical signature overwrites the earlier entry
/// (last write wins per signature).
pub type PendingMessages = BTreeMap<EventSignature, DateTime<Utc>>;

/// The full record stored per execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub project_name: String,
    pub execution_id: String,
    #[serde(flatten)]
    pub progress: Progress,
    #[serde(default)]
    pub pending_messages: PendingMessages,
    pub topology: Topology,
    pub thread: ThreadContext,
    /// Category of the most recently observed action, kept for the notifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_action_category: Option<String>,
    /// True while a sequencer turn owns this record.
    pub lock: bool,
    /// Fields written by external collaborators; round-tripped untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ExecutionRecord {
    /// Fresh record for a newly observed execution: no stage in flight,
    /// empty buffer, unlocked.
    pub fn bootstrap(key: RecordKey, topology: Topology, thread: ThreadContext) -> Self {
        ExecutionRecord {
            project_name: key.project_name,
            execution_id: key.execution_id,
            progress: Progress::initial(),
            pending_messages: PendingMessages::new(),
            topology,
            thread,
            last_action_category: None,
            lock: false,
            extra: serde_json::Map::new(),
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey {
            project_name: self.project_name.clone(),
            execution_id: self.execution_id.clone(),
        }
    }
}
