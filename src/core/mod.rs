//! The reconciliation engine.
//!
//! This module contains:
//! - Guard: pure admission decisions over progress state
//! - Buffer: replay of previously rejected events
//! - Sequencer: the lock-to-release turn tying it all together

pub mod buffer;
pub mod guard;
pub mod sequencer;

// Re-export commonly used items
pub use buffer::{drain, DrainOutcome};
pub use guard::admit;
pub use sequencer::{project_name, Sequencer, SequencerOptions};
