//! Built-in command handlers.
//!
//! Handlers run their external side effects (process runtime, tracker) first
//! and write the assignment store last. Each store write re-checks its
//! preconditions, so a failed command leaves assignments as they were.

mod review;
mod task;
mod worker;
mod workflow;

use std::sync::Arc;

pub use review::ReviewHandler;
pub use task::TaskHandler;
pub use worker::WorkerHandler;
pub use workflow::WorkflowHandler;

use super::registry::{CommandHandler, HandlerRegistry};
use super::types::CommandKind;
use crate::assignment::AssignmentStore;
use crate::config::OrchestratorConfig;
use crate::process::{MessageDeduplicator, ProcessRuntime};
use crate::tracker::TaskTracker;
use crate::workflow::WorkerPhase;

/// Everything a handler may touch.
#[derive(Clone)]
pub struct HandlerDeps {
    pub store: Arc<AssignmentStore>,
    pub runtime: Arc<dyn ProcessRuntime>,
    pub tracker: Arc<dyn TaskTracker>,
    pub dedup: Arc<MessageDeduplicator>,
    pub config: OrchestratorConfig,
}

impl HandlerDeps {
    /// Mirror a worker's phase onto its process. The runtime copy is
    /// informational, so a failure is logged and not propagated.
    pub(crate) async fn sync_phase(&self, worker_id: &str, phase: WorkerPhase, task_id: Option<&str>) {
        if let Err(e) = self.runtime.set_assignment(worker_id, phase, task_id).await {
            tracing::warn!(worker_id = %worker_id, phase = %phase, error = %e, "Failed to sync worker phase");
        }
    }
}

/// Register a handler for every command kind.
pub fn register_builtin_handlers(registry: &mut HandlerRegistry, deps: HandlerDeps) {
    let worker: Arc<dyn CommandHandler> = Arc::new(WorkerHandler::new(deps.clone()));
    let task: Arc<dyn CommandHandler> = Arc::new(TaskHandler::new(deps.clone()));
    let review: Arc<dyn CommandHandler> = Arc::new(ReviewHandler::new(deps.clone()));
    let workflow: Arc<dyn CommandHandler> = Arc::new(WorkflowHandler::new(deps));

    for kind in CommandKind::ALL {
        let handler = match kind {
            CommandKind::SpawnWorker
            | CommandKind::ReplaceWorker
            | CommandKind::RetireWorker
            | CommandKind::SendToWorker
            | CommandKind::Broadcast
            | CommandKind::StopWorker => &worker,
            CommandKind::AssignTask
            | CommandKind::ReportImplementationComplete
            | CommandKind::MarkTaskComplete
            | CommandKind::MarkTaskFailed => &task,
            CommandKind::AssignReview
            | CommandKind::AssignReviewFeedback
            | CommandKind::ReportReviewVerdict
            | CommandKind::ApproveCommit
            | CommandKind::ReportCommitFailed => &review,
            CommandKind::SignalWorkflowComplete => &workflow,
        };
        registry.register(kind, handler.clone());
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_kind_has_a_handler() {
        let fixture = test_support::fixture().await;
        let mut registry = HandlerRegistry::new();
        register_builtin_handlers(&mut registry, fixture.deps);
        assert!(registry.missing().is_empty());
    }
}
