//! Workflow completion signal.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use super::HandlerDeps;
use crate::assignment::{WorkflowCompletion, WorkflowOutcome};
use crate::command::registry::CommandHandler;
use crate::command::types::{Command, CommandOutput};
use crate::error::CommandError;

pub struct WorkflowHandler {
    deps: HandlerDeps,
}

impl WorkflowHandler {
    pub fn new(deps: HandlerDeps) -> Self {
        Self { deps }
    }

    async fn signal_complete(
        &self,
        outcome: WorkflowOutcome,
        summary: String,
    ) -> Result<CommandOutput, CommandError> {
        let busy: Vec<String> = self
            .deps
            .store
            .workers()
            .await
            .into_iter()
            .filter(|(_, w)| !w.is_idle())
            .map(|(id, _)| id)
            .collect();
        if !busy.is_empty() {
            tracing::warn!(busy = ?busy, "Workflow completed with workers still assigned");
        }

        if let Some(previous) = self.deps.store.workflow_completion().await {
            tracing::warn!(previous = %previous.outcome, "Overwriting earlier workflow completion");
        }
        self.deps
            .store
            .record_workflow_completion(WorkflowCompletion {
                outcome,
                summary: summary.clone(),
                completed_at: Utc::now(),
            })
            .await;

        Ok(CommandOutput::new(format!("Workflow complete: {outcome}")).with_data(json!({
            "outcome": outcome,
            "summary": summary,
            "busy_workers": busy,
        })))
    }
}

#[async_trait]
impl CommandHandler for WorkflowHandler {
    async fn handle(&self, command: Command) -> Result<CommandOutput, CommandError> {
        match command {
            Command::SignalWorkflowComplete { outcome, summary } => {
                self.signal_complete(outcome, summary).await
            }
            other => Err(CommandError::UnexpectedCommand {
                handler: "workflow",
                received: other.kind(),
            }),
        }
    }
}
