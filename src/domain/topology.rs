//! Static pipeline topology: the ordered stages and actions of a pipeline.
//!
//! Fetched once at bootstrap from the orchestration service, embedded in the
//! execution record, and read-only from then on.

use serde::{Deserialize, Serialize};

/// Snapshot of a pipeline's stage/action layout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub stages: Vec<StageDef>,
}

/// One stage, with its actions in definition order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDef {
    pub name: String,
    #[serde(default)]
    pub actions: Vec<ActionDef>,
}

/// One action within a stage. Actions sharing a `run_order` execute
/// concurrently; distinct `run_order` values are sequential waves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionDef {
    pub name: String,
    pub run_order: u32,
    /// Action category from the orchestration service (Source, Build,
    /// Deploy, ...); consumed only by the notifier for icons.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl Topology {
    pub fn stage(&self, name: &str) -> Option<&StageDef> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn action_run_order(&self, stage: &str, action: &str) -> Option<u32> {
        self.stage(stage)?
            .actions
            .iter()
            .find(|a| a.name == action)
            .map(|a| a.run_order)
    }

    pub fn action_category(&self, stage: &str, action: &str) -> Option<&str> {
        self.stage(stage)?
            .actions
            .iter()
            .find(|a| a.name == action)?
            .category
            .as_deref()
    }
}

impl StageDef {
    /// Number of actions in this stage. Stages with a single action get no
    /// separate action narrative lines.
    pub fn action_count(&self) -> usize {
        self.actions.len()
    }

    /// Highest `run_order` in this stage, i.e. the number of waves.
    pub fn wave_count(&self) -> u32 {
        self.actions.iter().map(|a| a.run_order).max().unwrap_or(0)
    }

    /// Distinct action categories, in first-appearance order.
    pub fn categories(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for action in &self.actions {
            if let Some(cat) = action.category.as_deref() {
                if !seen.contains(&cat) {
                    seen.push(cat);
                }
            }
        }
        seen
    }
}
