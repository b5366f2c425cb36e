//! Coordinator facade — the operations exposed to the tool layer.
//!
//! Each operation validates its arguments, runs the provisional assignment
//! check where one exists, and then goes through the command processor. The
//! handler repeats the check, so a passing precheck is only advisory.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::assignment::{AssignmentStore, AssignmentValidator, ConsistencySweep, WorkflowOutcome};
use crate::command::{Command, CommandProcessor, CommandResult, HandlerDeps, HandlerRegistry};
use crate::config::OrchestratorConfig;
use crate::error::{Error, Result};
use crate::process::{MessageDeduplicator, ProcessRuntime};
use crate::safety::{require_text, validate_task_id, validate_worker_id};
use crate::tracker::TaskTracker;
use crate::workflow::ReviewVerdict;

/// Reply to a tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResponse {
    pub success: bool,
    pub message: String,
    pub data: Value,
}

impl ToolResponse {
    pub fn ok(message: impl Into<String>, data: Value) -> Self {
        Self {
            success: true,
            message: message.into(),
            data,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: Value::Null,
        }
    }
}

impl From<CommandResult> for ToolResponse {
    fn from(result: CommandResult) -> Self {
        Self {
            success: result.success,
            message: result.message,
            data: result.data,
        }
    }
}

/// Errors become failed responses. Assignment errors display verbatim.
fn respond(result: Result<ToolResponse>) -> ToolResponse {
    result.unwrap_or_else(|e| ToolResponse::error(e.to_string()))
}

pub struct Coordinator {
    config: OrchestratorConfig,
    store: Arc<AssignmentStore>,
    runtime: Arc<dyn ProcessRuntime>,
    validator: AssignmentValidator,
    processor: CommandProcessor,
    sweep: Arc<ConsistencySweep>,
    cancel: CancellationToken,
    sweep_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Coordinator {
    /// Wire the store, handlers and processor. Must be called inside a Tokio
    /// runtime; the processor starts immediately.
    pub fn new(
        config: OrchestratorConfig,
        runtime: Arc<dyn ProcessRuntime>,
        tracker: Arc<dyn TaskTracker>,
    ) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(AssignmentStore::new());
        let deps = HandlerDeps {
            store: store.clone(),
            runtime: runtime.clone(),
            tracker,
            dedup: Arc::new(MessageDeduplicator::new(config.dedup_window)),
            config: config.clone(),
        };
        let mut registry = HandlerRegistry::new();
        crate::command::register_builtin_handlers(&mut registry, deps);

        let processor = CommandProcessor::start(config.queue_capacity, registry);
        let validator = AssignmentValidator::new(store.clone(), runtime.clone());
        let sweep = Arc::new(ConsistencySweep::new(
            store.clone(),
            runtime.clone(),
            config.max_task_duration,
        ));

        tracing::info!(
            queue_capacity = config.queue_capacity,
            submit_timeout_secs = config.submit_timeout.as_secs(),
            "Coordinator ready"
        );

        Ok(Self {
            config,
            store,
            runtime,
            validator,
            processor,
            sweep,
            cancel: CancellationToken::new(),
            sweep_task: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<AssignmentStore> {
        &self.store
    }

    pub fn sweep(&self) -> &Arc<ConsistencySweep> {
        &self.sweep
    }

    pub fn processor(&self) -> &CommandProcessor {
        &self.processor
    }

    /// Start the periodic consistency sweep. No-op if already running.
    pub async fn start_sweep(&self) {
        let mut task = self.sweep_task.lock().await;
        if task.is_none() {
            *task = Some(
                self.sweep
                    .clone()
                    .spawn(self.config.sweep_interval, self.cancel.child_token()),
            );
        }
    }

    /// Stop the sweep and the command processor.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(task) = self.sweep_task.lock().await.take()
            && let Err(e) = task.await
        {
            tracing::error!("Consistency sweep task failed: {}", e);
        }
        self.processor.shutdown().await;
    }

    async fn run(&self, command: Command) -> Result<ToolResponse> {
        let result = self
            .processor
            .submit_and_wait(command, self.config.submit_timeout)
            .await?;
        Ok(result.into())
    }

    // ── Worker lifecycle ────────────────────────────────────────────────

    pub async fn spawn_worker(&self, agent_type: Option<&str>) -> ToolResponse {
        respond(
            self.run(Command::SpawnWorker {
                agent_type: agent_type.map(str::to_string),
            })
            .await,
        )
    }

    pub async fn replace_worker(&self, worker_id: &str, reason: Option<&str>) -> ToolResponse {
        respond(
            async {
                validate_worker_id(worker_id)?;
                self.run(Command::ReplaceWorker {
                    worker_id: worker_id.to_string(),
                    reason: reason.map(str::to_string),
                })
                .await
            }
            .await,
        )
    }

    pub async fn retire_worker(&self, worker_id: &str, reason: Option<&str>) -> ToolResponse {
        respond(
            async {
                validate_worker_id(worker_id)?;
                self.run(Command::RetireWorker {
                    worker_id: worker_id.to_string(),
                    reason: reason.map(str::to_string),
                })
                .await
            }
            .await,
        )
    }

    /// Fire-and-forget: the response only confirms the stop was queued.
    pub async fn stop_worker(
        &self,
        worker_id: &str,
        force: bool,
        reason: Option<&str>,
    ) -> ToolResponse {
        respond(
            async {
                validate_worker_id(worker_id)?;
                let command_id = self
                    .processor
                    .submit(Command::StopWorker {
                        worker_id: worker_id.to_string(),
                        force,
                        reason: reason.map(str::to_string),
                    })
                    .await?;
                Ok::<_, Error>(ToolResponse::ok(
                    format!("Stop requested for {worker_id}"),
                    json!({ "command_id": command_id, "worker_id": worker_id, "force": force }),
                ))
            }
            .await,
        )
    }

    // ── Messaging ───────────────────────────────────────────────────────

    pub async fn send_to_worker(&self, worker_id: &str, message: &str) -> ToolResponse {
        respond(
            async {
                validate_worker_id(worker_id)?;
                require_text("message", message)?;
                self.run(Command::SendToWorker {
                    worker_id: worker_id.to_string(),
                    message: message.to_string(),
                })
                .await
            }
            .await,
        )
    }

    pub async fn broadcast(&self, message: &str, exclude: &[&str]) -> ToolResponse {
        respond(
            async {
                require_text("message", message)?;
                for worker_id in exclude {
                    validate_worker_id(worker_id)?;
                }
                self.run(Command::Broadcast {
                    message: message.to_string(),
                    exclude: exclude.iter().map(|s| s.to_string()).collect(),
                })
                .await
            }
            .await,
        )
    }

    // ── Tasks ───────────────────────────────────────────────────────────

    pub async fn assign_task(
        &self,
        worker_id: &str,
        task_id: &str,
        summary: Option<&str>,
    ) -> ToolResponse {
        respond(
            async {
                validate_worker_id(worker_id)?;
                validate_task_id(task_id)?;
                self.validator
                    .validate_task_assignment(worker_id, task_id)
                    .await?;
                self.run(Command::AssignTask {
                    worker_id: worker_id.to_string(),
                    task_id: task_id.to_string(),
                    summary: summary.map(str::to_string),
                })
                .await
            }
            .await,
        )
    }

    pub async fn report_implementation_complete(
        &self,
        worker_id: &str,
        summary: &str,
    ) -> ToolResponse {
        respond(
            async {
                validate_worker_id(worker_id)?;
                self.store.check_complete_implementation(worker_id).await?;
                self.run(Command::ReportImplementationComplete {
                    worker_id: worker_id.to_string(),
                    summary: summary.to_string(),
                })
                .await
            }
            .await,
        )
    }

    pub async fn mark_task_complete(&self, task_id: &str) -> ToolResponse {
        respond(
            async {
                validate_task_id(task_id)?;
                self.run(Command::MarkTaskComplete {
                    task_id: task_id.to_string(),
                })
                .await
            }
            .await,
        )
    }

    pub async fn mark_task_failed(&self, task_id: &str, reason: &str) -> ToolResponse {
        respond(
            async {
                validate_task_id(task_id)?;
                require_text("reason", reason)?;
                self.run(Command::MarkTaskFailed {
                    task_id: task_id.to_string(),
                    reason: reason.to_string(),
                })
                .await
            }
            .await,
        )
    }

    // ── Review ──────────────────────────────────────────────────────────

    pub async fn assign_task_review(
        &self,
        reviewer_id: &str,
        task_id: &str,
        implementer_id: &str,
        summary: &str,
        review_type: Option<&str>,
    ) -> ToolResponse {
        respond(
            async {
                validate_worker_id(reviewer_id)?;
                validate_worker_id(implementer_id)?;
                validate_task_id(task_id)?;
                require_text("summary", summary)?;
                self.validator
                    .validate_review_assignment(reviewer_id, task_id, implementer_id)
                    .await?;
                self.run(Command::AssignReview {
                    reviewer_id: reviewer_id.to_string(),
                    task_id: task_id.to_string(),
                    implementer_id: implementer_id.to_string(),
                    summary: summary.to_string(),
                    review_type: review_type.map(str::to_string),
                })
                .await
            }
            .await,
        )
    }

    pub async fn report_review_verdict(
        &self,
        reviewer_id: &str,
        verdict: ReviewVerdict,
        comments: &str,
    ) -> ToolResponse {
        respond(
            async {
                validate_worker_id(reviewer_id)?;
                self.run(Command::ReportReviewVerdict {
                    worker_id: reviewer_id.to_string(),
                    verdict,
                    comments: comments.to_string(),
                })
                .await
            }
            .await,
        )
    }

    pub async fn assign_review_feedback(
        &self,
        implementer_id: &str,
        task_id: &str,
        feedback: &str,
    ) -> ToolResponse {
        respond(
            async {
                validate_worker_id(implementer_id)?;
                validate_task_id(task_id)?;
                require_text("feedback", feedback)?;
                self.run(Command::AssignReviewFeedback {
                    implementer_id: implementer_id.to_string(),
                    task_id: task_id.to_string(),
                    feedback: feedback.to_string(),
                })
                .await
            }
            .await,
        )
    }

    pub async fn approve_commit(
        &self,
        implementer_id: &str,
        task_id: &str,
        commit_message: Option<&str>,
    ) -> ToolResponse {
        respond(
            async {
                validate_worker_id(implementer_id)?;
                validate_task_id(task_id)?;
                self.run(Command::ApproveCommit {
                    implementer_id: implementer_id.to_string(),
                    task_id: task_id.to_string(),
                    commit_message: commit_message.map(str::to_string),
                })
                .await
            }
            .await,
        )
    }

    pub async fn report_commit_failed(
        &self,
        implementer_id: &str,
        task_id: &str,
        reason: &str,
    ) -> ToolResponse {
        respond(
            async {
                validate_worker_id(implementer_id)?;
                validate_task_id(task_id)?;
                require_text("reason", reason)?;
                self.run(Command::ReportCommitFailed {
                    implementer_id: implementer_id.to_string(),
                    task_id: task_id.to_string(),
                    reason: reason.to_string(),
                })
                .await
            }
            .await,
        )
    }

    pub async fn signal_workflow_complete(
        &self,
        outcome: WorkflowOutcome,
        summary: &str,
    ) -> ToolResponse {
        respond(
            async {
                require_text("summary", summary)?;
                self.run(Command::SignalWorkflowComplete {
                    outcome,
                    summary: summary.to_string(),
                })
                .await
            }
            .await,
        )
    }

    // ── Queries ─────────────────────────────────────────────────────────

    /// Snapshot of workers and tasks, joined with the live process set.
    /// Filters by worker, by task, or returns everything.
    pub async fn query_worker_state(
        &self,
        worker_id: Option<&str>,
        task_id: Option<&str>,
    ) -> ToolResponse {
        if let Some(id) = worker_id
            && let Err(e) = validate_worker_id(id)
        {
            return respond(Err(e.into()));
        }
        if let Some(id) = task_id
            && let Err(e) = validate_task_id(id)
        {
            return respond(Err(e.into()));
        }

        let processes = self.runtime.list().await;
        let assignments = self.store.workers().await;

        let mut ids: Vec<String> = processes.iter().map(|p| p.id.clone()).collect();
        for (id, _) in &assignments {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids.sort();

        let mut workers = Vec::new();
        for id in ids {
            if worker_id.is_some_and(|w| w != id) {
                continue;
            }
            let assignment = assignments
                .iter()
                .find(|(w, _)| *w == id)
                .map(|(_, a)| a.clone())
                .unwrap_or_default();
            if task_id.is_some_and(|t| assignment.task_id != t) {
                continue;
            }
            let status = processes
                .iter()
                .find(|p| p.id == id)
                .map(|p| p.status.to_string())
                .unwrap_or_else(|| "missing".to_string());
            workers.push(json!({
                "worker_id": id,
                "status": status,
                "phase": assignment.phase,
                "role": assignment.role,
                "task_id": assignment.active_task(),
                "assigned_at": assignment.assigned_at,
                "implementer_id": assignment.implementer_id,
                "reviewer_id": assignment.reviewer_id,
            }));
        }

        let tasks: Vec<Value> = self
            .store
            .tasks()
            .await
            .into_iter()
            .filter(|t| task_id.is_none_or(|id| t.task_id == id))
            .filter(|t| {
                worker_id.is_none_or(|w| t.implementer == w || t.reviewer.as_deref() == Some(w))
            })
            .map(|t| json!(t))
            .collect();

        ToolResponse::ok(
            format!("{} workers, {} tasks", workers.len(), tasks.len()),
            json!({
                "workers": workers,
                "tasks": tasks,
                "workflow": self.store.workflow_completion().await,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{InMemoryRuntime, ProcessStatus};
    use crate::tracker::InMemoryTracker;

    async fn coordinator() -> Coordinator {
        let runtime = Arc::new(InMemoryRuntime::new());
        runtime.add_process("worker-1", ProcessStatus::Ready).await;
        let tracker = Arc::new(InMemoryTracker::new());
        tracker.add_issue("perles-abc.1", "Add login form").await;
        Coordinator::new(OrchestratorConfig::default(), runtime, tracker).unwrap()
    }

    #[tokio::test]
    async fn rejects_bad_task_id_before_submission() {
        let coordinator = coordinator().await;
        let response = coordinator
            .assign_task("worker-1", "perles-abc; rm -rf /", None)
            .await;
        assert!(!response.success);
        assert!(response.message.contains("invalid task ID"));
        assert_eq!(coordinator.store().task_count().await, 0);
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn assignment_errors_are_verbatim() {
        let coordinator = coordinator().await;
        let response = coordinator
            .assign_task_review("worker-1", "perles-abc.1", "worker-1", "check it", None)
            .await;
        assert_eq!(
            response,
            ToolResponse::error("reviewer cannot be the same as implementer")
        );
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn query_filters_by_worker() {
        let coordinator = coordinator().await;
        assert!(coordinator.assign_task("worker-1", "perles-abc.1", None).await.success);

        let response = coordinator.query_worker_state(Some("worker-1"), None).await;
        assert!(response.success);
        let worker = &response.data["workers"][0];
        assert_eq!(worker["phase"], "implementing");
        assert_eq!(worker["task_id"], "perles-abc.1");
        assert_eq!(response.data["tasks"][0]["status"], "implementing");

        let none = coordinator.query_worker_state(Some("worker-7"), None).await;
        assert_eq!(none.data["workers"], json!([]));
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn invalid_config_rejected() {
        let config = OrchestratorConfig {
            queue_capacity: 0,
            ..OrchestratorConfig::default()
        };
        let result = Coordinator::new(
            config,
            Arc::new(InMemoryRuntime::new()),
            Arc::new(InMemoryTracker::new()),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
