//! Interfaces to the external collaborators: the notification channel and
//! the pipeline orchestration service.
//!
//! The reconciliation core only ever talks to these traits; delivery is
//! at-least-once and nothing downstream de-duplicates.

pub mod slack;
pub mod topology_file;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::{EventState, ExecutionEvent, ThreadContext, Topology};

// Re-export the concrete adapters
pub use slack::SlackNotifier;
pub use topology_file::FileTopologyLookup;

/// Opaque handle to an emitted message. The core never inspects it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHandle(pub String);

/// Read-only context handed to the notifier alongside each event.
pub struct NotifyContext<'a> {
    pub project_name: &'a str,
    pub pipeline_name: &'a str,
    pub execution_id: &'a str,
    pub topology: &'a Topology,
    pub thread: &'a ThreadContext,
}

/// Outbound notification channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Open the narrative thread for a new execution and return its context.
    async fn open_thread(
        &self,
        project_name: &str,
        pipeline_name: &str,
        execution_id: &str,
        state: EventState,
    ) -> Result<ThreadContext>;

    /// Emit one narrative line for an admitted event.
    async fn announce(
        &self,
        ctx: &NotifyContext<'_>,
        event: &ExecutionEvent,
    ) -> Result<MessageHandle>;

    /// Rewrite the execution summary to reflect an admitted event.
    async fn update_summary(&self, ctx: &NotifyContext<'_>, event: &ExecutionEvent) -> Result<()>;
}

#[async_trait]
impl<N: Notifier + ?Sized> Notifier for std::sync::Arc<N> {
    async fn open_thread(
        &self,
        project_name: &str,
        pipeline_name: &str,
        execution_id: &str,
        state: EventState,
    ) -> Result<ThreadContext> {
        (**self)
            .open_thread(project_name, pipeline_name, execution_id, state)
            .await
    }

    async fn announce(
        &self,
        ctx: &NotifyContext<'_>,
        event: &ExecutionEvent,
    ) -> Result<MessageHandle> {
        (**self).announce(ctx, event).await
    }

    async fn update_summary(&self, ctx: &NotifyContext<'_>, event: &ExecutionEvent) -> Result<()> {
        (**self).update_summary(ctx, event).await
    }
}

/// Read-only lookup of a pipeline's static topology.
#[async_trait]
pub trait TopologyLookup: Send + Sync {
    /// Fetch the stage/action layout for `pipeline_name`. Failures are fatal
    /// for the invocation; there is no stale-topology fallback.
    async fn get_topology(&self, pipeline_name: &str) -> Result<Topology>;
}
