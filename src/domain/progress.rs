//! Per-execution progress state: which stage is open and which wave of
//! actions is in flight within it.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Actions currently in flight within the open stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentActions {
    /// Wave marker: set when the first action of a wave is admitted, cleared
    /// when the wave drains.
    pub run_order: Option<u32>,
    pub actions: BTreeSet<String>,
    /// True while the stage is open but no action event has been admitted
    /// yet; blocks the stage from closing before any action ran.
    pub no_started_action: bool,
}

impl CurrentActions {
    /// An empty wave. `no_started_action` is true right after a stage opens
    /// and false once at least one action has been seen.
    pub fn idle(no_started_action: bool) -> Self {
        CurrentActions {
            run_order: None,
            actions: BTreeSet::new(),
            no_started_action,
        }
    }
}

/// Progress of one pipeline execution: at most one stage open, and within it
/// at most one wave of actions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub current_stage: Option<String>,
    pub current_actions: CurrentActions,
}

impl Progress {
    /// State for a freshly bootstrapped execution: no stage in flight.
    pub fn initial() -> Self {
        Progress::default()
    }
}
