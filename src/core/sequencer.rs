//! The sequencer: one lock-acquire-to-release turn per incoming event.
//!
//! All side effects for an execution happen inside its critical section, so
//! their relative order is exactly the order in which admission succeeded.
//! Turns for different executions run fully in parallel; the record store's
//! conditional update is the only coordination between them.

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument};

use crate::adapters::{Notifier, NotifyContext, TopologyLookup};
use crate::domain::{
    EventKind, EventState, ExecutionEvent, ExecutionRecord, IncomingEvent, RecordKey,
};
use crate::store::{self, RecordStore};

use super::buffer;
use super::guard::admit;

/// Tunables for the sequencer. The retry delay is the only escape hatch the
/// lock discipline has; there is deliberately no lease or retry cap.
#[derive(Debug, Clone)]
pub struct SequencerOptions {
    pub lock_retry_delay: Duration,
    /// Prefix stripped from pipeline names to obtain the project name.
    pub pipeline_prefix: Option<String>,
}

impl Default for SequencerOptions {
    fn default() -> Self {
        SequencerOptions {
            lock_retry_delay: Duration::from_millis(500),
            pipeline_prefix: Some("codepipeline-".to_string()),
        }
    }
}

/// Derive the record-store project name from a pipeline name.
pub fn project_name(pipeline_name: &str, prefix: Option<&str>) -> String {
    match prefix.and_then(|p| pipeline_name.strip_prefix(p)) {
        Some(rest) if !rest.is_empty() => rest.to_string(),
        _ => pipeline_name.to_string(),
    }
}

/// Entry point tying the guard, buffer, store, and notifier together.
pub struct Sequencer<S, N, T> {
    store: S,
    notifier: N,
    topology: T,
    options: SequencerOptions,
}

impl<S, N, T> Sequencer<S, N, T>
where
    S: RecordStore,
    N: Notifier,
    T: TopologyLookup,
{
    pub fn new(store: S, notifier: N, topology: T, options: SequencerOptions) -> Self {
        Sequencer {
            store,
            notifier,
            topology,
            options,
        }
    }

    /// Process one incoming event to completion.
    ///
    /// On any failure past lock acquisition the record is left locked and no
    /// partial state is committed; a compatible retry or operator action is
    /// required to recover.
    #[instrument(skip(self, incoming), fields(
        pipeline = %incoming.pipeline_name,
        execution = %incoming.execution_id,
    ))]
    pub async fn handle(&self, incoming: &IncomingEvent) -> Result<()> {
        if incoming.kind == EventKind::Pipeline && incoming.state == EventState::Started {
            return self.bootstrap(incoming).await;
        }

        let key = self.key_for(incoming);
        let mut record = store::acquire(&self.store, &key, self.options.lock_retry_delay).await?;

        self.turn(&mut record, incoming).await?;
        self.store.release(record).await
    }

    fn key_for(&self, incoming: &IncomingEvent) -> RecordKey {
        RecordKey {
            project_name: project_name(
                &incoming.pipeline_name,
                self.options.pipeline_prefix.as_deref(),
            ),
            execution_id: incoming.execution_id.clone(),
        }
    }

    /// First event of a new execution: fetch the topology snapshot, open the
    /// narrative thread, create the record. A duplicate opening event
    /// overwrites the record rather than erroring.
    async fn bootstrap(&self, incoming: &IncomingEvent) -> Result<()> {
        let key = self.key_for(incoming);
        info!(key = %key, "bootstrapping execution record");

        let topology = self
            .topology
            .get_topology(&incoming.pipeline_name)
            .await
            .context("Failed to fetch pipeline topology")?;
        let thread = self
            .notifier
            .open_thread(
                &key.project_name,
                &incoming.pipeline_name,
                &incoming.execution_id,
                incoming.state,
            )
            .await?;

        let record = ExecutionRecord::bootstrap(key, topology, thread);
        self.store.put(record).await
    }

    /// The reconciliation body of a turn, run while holding the lock.
    async fn turn(&self, record: &mut ExecutionRecord, incoming: &IncomingEvent) -> Result<()> {
        let event = incoming.resolve(&record.topology)?;
        note_action_category(record, &event);
        let signature = event.signature();

        // Admission order of this turn: the direct event if it passed, plus
        // everything the drains unblocked, in timestamp order.
        let mut admitted: Vec<ExecutionEvent> = Vec::new();

        let (passed, next) = admit(&event, &record.progress);
        if passed {
            record.progress = next;
            admitted.push(event.clone());
        } else {
            // Earlier-buffered events may unblock this one: drain first,
            // then retest before giving up and buffering it.
            debug!(signature = %signature, "event rejected, draining buffer");
            let drained = buffer::drain(&mut record.pending_messages, &mut record.progress)?;
            admitted.extend(drained.admitted.into_iter().map(|(_, ev)| ev));

            let (retried, next) = admit(&event, &record.progress);
            if retried {
                record.progress = next;
                admitted.push(event.clone());
            } else {
                debug!(signature = %signature, time = %incoming.time, "event buffered");
                record
                    .pending_messages
                    .insert(signature.clone(), incoming.time);
            }
        }

        // Flush anything the new state unblocked.
        let drained = buffer::drain(&mut record.pending_messages, &mut record.progress)?;
        admitted.extend(drained.admitted.into_iter().map(|(_, ev)| ev));

        for event in &admitted {
            note_action_category(record, event);
            self.emit(record, &incoming.pipeline_name, event).await?;
        }

        info!(
            admitted = admitted.len(),
            pending = record.pending_messages.len(),
            "turn complete"
        );
        Ok(())
    }

    /// Emit the narrative line and summary update for one admitted event.
    ///
    /// Action lines are suppressed for single-action stages; the stage line
    /// already tells the whole story there.
    async fn emit(
        &self,
        record: &ExecutionRecord,
        pipeline_name: &str,
        event: &ExecutionEvent,
    ) -> Result<()> {
        if let ExecutionEvent::Action { stage, .. } = event {
            let single = record
                .topology
                .stage(stage)
                .map(|s| s.action_count() <= 1)
                .unwrap_or(true);
            if single {
                debug!(stage = %stage, "suppressing action line for single-action stage");
                return Ok(());
            }
        }

        let ctx = NotifyContext {
            project_name: &record.project_name,
            pipeline_name,
            execution_id: &record.execution_id,
            topology: &record.topology,
            thread: &record.thread,
        };
        self.notifier.announce(&ctx, event).await?;
        self.notifier.update_summary(&ctx, event).await?;
        Ok(())
    }
}

/// Remember the category of the most recent action we saw, for the notifier.
fn note_action_category(record: &mut ExecutionRecord, event: &ExecutionEvent) {
    if let ExecutionEvent::Action { stage, action, .. } = event {
        if let Some(category) = record.topology.action_category(stage, action) {
            record.last_action_category = Some(category.to_string());
        }
    }
}
