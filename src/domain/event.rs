//! Lifecycle events for pipeline executions.
//!
//! Events arrive at three levels (pipeline, stage, action) and carry one of
//! six states. The signature string is both the pending-buffer key and the
//! de-duplication key, so it must round-trip back into an event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while interpreting inbound events or buffered signatures.
#[derive(Debug, Error)]
pub enum EventError {
    /// The event names a stage or action the topology does not know about.
    #[error("event references unknown {kind} `{name}`")]
    UnknownTarget { kind: &'static str, name: String },

    /// A required field was absent for the event's level.
    #[error("event is missing required field `{0}`")]
    MissingField(&'static str),

    /// A buffered signature could not be decoded. Signatures are only ever
    /// produced by this crate, so this is a programming error, not input.
    #[error("malformed event signature `{0}`")]
    MalformedSignature(String),
}

/// Execution state carried by every lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventState {
    Started,
    Succeeded,
    Failed,
    Superseded,
    Canceled,
    Resumed,
}

impl EventState {
    /// STARTED and RESUMED open a scope; every other state closes one.
    pub fn is_opening(self) -> bool {
        matches!(self, EventState::Started | EventState::Resumed)
    }

    /// Canonical uppercase form, as used in signatures.
    pub fn as_str(self) -> &'static str {
        match self {
            EventState::Started => "STARTED",
            EventState::Succeeded => "SUCCEEDED",
            EventState::Failed => "FAILED",
            EventState::Superseded => "SUPERSEDED",
            EventState::Canceled => "CANCELED",
            EventState::Resumed => "RESUMED",
        }
    }

    /// Lowercase form for narrative text ("just *started*").
    pub fn label(self) -> &'static str {
        match self {
            EventState::Started => "started",
            EventState::Succeeded => "succeeded",
            EventState::Failed => "failed",
            EventState::Superseded => "superseded",
            EventState::Canceled => "canceled",
            EventState::Resumed => "resumed",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "STARTED" => EventState::Started,
            "SUCCEEDED" => EventState::Succeeded,
            "FAILED" => EventState::Failed,
            "SUPERSEDED" => EventState::Superseded,
            "CANCELED" => EventState::Canceled,
            "RESUMED" => EventState::Resumed,
            _ => return None,
        })
    }
}

/// The level an inbound event applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Pipeline,
    Stage,
    Action,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Pipeline => "pipeline",
            EventKind::Stage => "stage",
            EventKind::Action => "action",
        }
    }
}

/// A fully resolved lifecycle event, ready for admission.
///
/// Action events always carry their `run_order`; the sequencer resolves it
/// from the topology snapshot when the inbound payload omits it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionEvent {
    Pipeline {
        state: EventState,
    },
    Stage {
        stage: String,
        state: EventState,
    },
    Action {
        stage: String,
        action: String,
        state: EventState,
        run_order: u32,
    },
}

impl ExecutionEvent {
    pub fn state(&self) -> EventState {
        match self {
            ExecutionEvent::Pipeline { state }
            | ExecutionEvent::Stage { state, .. }
            | ExecutionEvent::Action { state, .. } => *state,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            ExecutionEvent::Pipeline { .. } => EventKind::Pipeline,
            ExecutionEvent::Stage { .. } => EventKind::Stage,
            ExecutionEvent::Action { .. } => EventKind::Action,
        }
    }

    pub fn stage(&self) -> Option<&str> {
        match self {
            ExecutionEvent::Pipeline { .. } => None,
            ExecutionEvent::Stage { stage, .. } | ExecutionEvent::Action { stage, .. } => {
                Some(stage)
            }
        }
    }

    /// Encode this event as its buffer signature.
    pub fn signature(&self) -> EventSignature {
        let parts: Vec<String> = match self {
            ExecutionEvent::Pipeline { state } => {
                vec!["pipeline".into(), state.as_str().into()]
            }
            ExecutionEvent::Stage { stage, state } => {
                vec!["stage".into(), state.as_str().into(), stage.clone()]
            }
            ExecutionEvent::Action {
                stage,
                action,
                state,
                run_order,
            } => vec![
                "action".into(),
                state.as_str().into(),
                stage.clone(),
                action.clone(),
                run_order.to_string(),
            ],
        };
        EventSignature(parts.join(":"))
    }
}

/// Buffer key encoding `"{type}:{state}:{stage}:{action}:{runOrder}"` with
/// absent fields omitted.
///
/// Two distinct in-flight events with identical signatures collapse into one
/// buffer entry (last arrival wins). That coarsening is inherited behavior.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventSignature(String);

impl EventSignature {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decode the signature back into the event it was produced from.
    pub fn to_event(&self) -> Result<ExecutionEvent, EventError> {
        let malformed = || EventError::MalformedSignature(self.0.clone());
        let parts: Vec<&str> = self.0.split(':').collect();
        let state = parts
            .get(1)
            .and_then(|s| EventState::parse(s))
            .ok_or_else(malformed)?;
        match parts[0] {
            "pipeline" if parts.len() == 2 => Ok(ExecutionEvent::Pipeline { state }),
            "stage" if parts.len() == 3 => Ok(ExecutionEvent::Stage {
                stage: parts[2].to_string(),
                state,
            }),
            "action" if parts.len() == 5 => Ok(ExecutionEvent::Action {
                stage: parts[2].to_string(),
                action: parts[3].to_string(),
                state,
                run_order: parts[4].parse().map_err(|_| malformed())?,
            }),
            _ => Err(malformed()),
        }
    }
}

impl std::fmt::Display for EventSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An inbound event as delivered by the event source.
///
/// Unknown `type`/`state` values and missing correlation fields fail
/// deserialization outright; those are hard input errors, never retried.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub pipeline_name: String,
    pub execution_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    pub state: EventState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_order: Option<u32>,
    pub time: DateTime<Utc>,
}

impl IncomingEvent {
    /// Resolve the inbound payload into an [`ExecutionEvent`], filling in the
    /// action's `run_order` from the topology when the payload omits it.
    pub fn resolve(
        &self,
        topology: &super::topology::Topology,
    ) -> Result<ExecutionEvent, EventError> {
        match self.kind {
            EventKind::Pipeline => Ok(ExecutionEvent::Pipeline { state: self.state }),
            EventKind::Stage => {
                let stage = self.stage.clone().ok_or(EventError::MissingField("stage"))?;
                Ok(ExecutionEvent::Stage {
                    stage,
                    state: self.state,
                })
            }
            EventKind::Action => {
                let stage = self.stage.clone().ok_or(EventError::MissingField("stage"))?;
                let action = self
                    .action
                    .clone()
                    .ok_or(EventError::MissingField("action"))?;
                let run_order = match self.run_order {
                    Some(order) => order,
                    None => topology.action_run_order(&stage, &action).ok_or_else(|| {
                        EventError::UnknownTarget {
                            kind: "action",
                            name: format!("{stage}/{action}"),
                        }
                    })?,
                };
                Ok(ExecutionEvent::Action {
                    stage,
                    action,
                    state: self.state,
                    run_order,
                })
            }
        }
    }
}
