//! Domain types for the pipewatch reconciliation engine.
//!
//! This module contains the core data structures:
//! - Events: lifecycle events, states, and buffer signatures
//! - Progress: per-execution stage/wave tracking
//! - Record: the persisted per-execution record
//! - Topology: the static stage/action layout of a pipeline

pub mod event;
pub mod progress;
pub mod record;
pub mod topology;

// Re-export commonly used types
pub use event::{EventError, EventKind, EventSignature, EventState, ExecutionEvent, IncomingEvent};
pub use progress::{CurrentActions, Progress};
pub use record::{ExecutionRecord, PendingMessages, RecordKey, ThreadContext};
pub use topology::{ActionDef, StageDef, Topology};
