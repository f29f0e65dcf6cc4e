//! pipewatch - causally ordered deployment pipeline narration
//!
//! Receives asynchronous lifecycle events (pipeline, stage, action) for
//! deployment pipeline executions, which may arrive out of order or
//! duplicated, and emits a single causally ordered narrative per execution
//! to Slack.
//!
//! # Architecture
//!
//! The system is built around three pieces:
//! - An admission guard decides, purely from an event and the execution's
//!   progress, whether the event may be applied now
//! - A pending buffer holds rejected events and replays them in arrival
//!   order once the blocking condition clears
//! - A per-execution optimistic lock in the record store serializes all
//!   turns for one execution while unrelated executions run in parallel
//!
//! # Modules
//!
//! - `adapters`: External collaborators (Slack, topology lookup)
//! - `core`: Reconciliation logic (guard, buffer, sequencer)
//! - `domain`: Data structures (events, progress, record, topology)
//! - `store`: Execution record store (SQLite, in-memory)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Process one inbound event
//! pipewatch handle --input event.json
//!
//! # Inspect an execution's record
//! pipewatch show my-project 0154a53b-e383-4964-9bc8-4e4a4c5f90a2
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod store;

// Re-export main types at crate root for convenience
pub use self::core::{admit, drain, Sequencer, SequencerOptions};
pub use domain::{
    EventSignature, EventState, ExecutionEvent, ExecutionRecord, IncomingEvent, Progress, Topology,
};

// External collaborator interfaces
pub use adapters::{Notifier, NotifyContext, SlackNotifier, TopologyLookup};
pub use store::{MemoryStore, RecordStore, SqliteStore};
