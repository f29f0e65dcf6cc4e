//! Admission guard: decides whether a lifecycle event is consistent with an
//! execution's current progress and may be applied now.
//!
//! Pure and total: no I/O, never panics, and rejection leaves progress
//! untouched. The guard enforces a strict two-level nesting: at most one
//! stage open at a time, and within it at most one `run_order` wave of
//! actions in flight.

use crate::domain::{CurrentActions, ExecutionEvent, Progress};

/// Test `event` against `progress`.
///
/// Returns whether the event is admissible and the progress that results
/// from applying it. On rejection the returned progress is unchanged.
pub fn admit(event: &ExecutionEvent, progress: &Progress) -> (bool, Progress) {
    match event {
        ExecutionEvent::Pipeline { .. } => {
            // Pipeline-level terminal events only make sense with no stage
            // in flight.
            if progress.current_stage.is_none() {
                (
                    true,
                    Progress {
                        current_stage: progress.current_stage.clone(),
                        current_actions: CurrentActions::idle(true),
                    },
                )
            } else {
                (false, progress.clone())
            }
        }

        ExecutionEvent::Stage { stage, state } if state.is_opening() => {
            if progress.current_stage.is_none() {
                (
                    true,
                    Progress {
                        current_stage: Some(stage.clone()),
                        current_actions: CurrentActions::idle(true),
                    },
                )
            } else {
                (false, progress.clone())
            }
        }

        ExecutionEvent::Stage { stage, .. } => {
            let actions = &progress.current_actions;
            let admissible = actions.actions.is_empty()
                && progress.current_stage.as_deref() == Some(stage.as_str())
                && !actions.no_started_action;
            if admissible {
                (
                    true,
                    Progress {
                        current_stage: None,
                        current_actions: CurrentActions::idle(false),
                    },
                )
            } else {
                (false, progress.clone())
            }
        }

        ExecutionEvent::Action {
            stage,
            action,
            state,
            run_order,
        } if state.is_opening() => {
            let actions = &progress.current_actions;
            let same_stage = progress.current_stage.as_deref() == Some(stage.as_str());
            let same_wave = match actions.run_order {
                None => true,
                Some(current) => current == *run_order,
            };
            if same_stage && same_wave {
                let mut next_actions = actions.actions.clone();
                next_actions.insert(action.clone());
                (
                    true,
                    Progress {
                        current_stage: progress.current_stage.clone(),
                        current_actions: CurrentActions {
                            run_order: Some(*run_order),
                            actions: next_actions,
                            no_started_action: false,
                        },
                    },
                )
            } else {
                (false, progress.clone())
            }
        }

        ExecutionEvent::Action { action, .. } => {
            let actions = &progress.current_actions;
            if !actions.actions.contains(action) {
                return (false, progress.clone());
            }
            let mut remaining = actions.actions.clone();
            remaining.remove(action);
            let next_actions = if remaining.is_empty() {
                // Wave fully drained: ready for the next wave or for the
                // stage to close.
                CurrentActions::idle(false)
            } else {
                CurrentActions {
                    run_order: actions.run_order,
                    actions: remaining,
                    no_started_action: false,
                }
            };
            (
                true,
                Progress {
                    current_stage: progress.current_stage.clone(),
                    current_actions: next_actions,
                },
            )
        }
    }
}
