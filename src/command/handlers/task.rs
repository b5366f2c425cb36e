//! Task assignment and completion.

use async_trait::async_trait;
use serde_json::json;

use super::HandlerDeps;
use crate::assignment::AssignmentValidator;
use crate::command::registry::CommandHandler;
use crate::command::types::{Command, CommandOutput};
use crate::error::CommandError;
use crate::workflow::{TaskStatus, WorkerPhase};

pub struct TaskHandler {
    deps: HandlerDeps,
    validator: AssignmentValidator,
}

impl TaskHandler {
    pub fn new(deps: HandlerDeps) -> Self {
        let validator = AssignmentValidator::new(deps.store.clone(), deps.runtime.clone());
        Self { deps, validator }
    }

    async fn assign_task(
        &self,
        worker_id: String,
        task_id: String,
        summary: Option<String>,
    ) -> Result<CommandOutput, CommandError> {
        self.validator
            .validate_task_assignment(&worker_id, &task_id)
            .await?;

        let issue = self.deps.tracker.show_issue(&task_id).await?;
        let mut prompt = format!("[TASK ASSIGNMENT] {}: {}", issue.id, issue.title);
        if !issue.description.is_empty() {
            prompt.push_str("\n\n");
            prompt.push_str(&issue.description);
        }
        if let Some(summary) = summary.as_deref().filter(|s| !s.trim().is_empty()) {
            prompt.push_str("\n\nCoordinator notes: ");
            prompt.push_str(summary);
        }
        self.deps.runtime.resume(&worker_id, &prompt).await?;
        self.deps
            .sync_phase(&worker_id, WorkerPhase::Implementing, Some(&task_id))
            .await;

        self.deps.store.assign_task(&worker_id, &task_id).await?;

        Ok(
            CommandOutput::new(format!("Assigned {task_id} to {worker_id}")).with_data(json!({
                "worker_id": worker_id,
                "task_id": task_id,
                "phase": WorkerPhase::Implementing,
                "status": TaskStatus::Implementing,
            })),
        )
    }

    async fn report_implementation_complete(
        &self,
        worker_id: String,
        summary: String,
    ) -> Result<CommandOutput, CommandError> {
        let task_id = self
            .deps
            .store
            .check_complete_implementation(&worker_id)
            .await?;

        self.deps
            .tracker
            .add_comment(&task_id, &worker_id, &format!("Implementation complete: {summary}"))
            .await?;
        self.deps
            .sync_phase(&worker_id, WorkerPhase::AwaitingReview, Some(&task_id))
            .await;

        self.deps.store.complete_implementation(&worker_id).await?;

        Ok(CommandOutput::new(format!(
            "{worker_id} finished {task_id}; awaiting review"
        ))
        .with_data(json!({
            "worker_id": worker_id,
            "task_id": task_id,
            "phase": WorkerPhase::AwaitingReview,
        })))
    }

    async fn mark_task_complete(&self, task_id: String) -> Result<CommandOutput, CommandError> {
        let implementer = self.deps.store.check_complete_task(&task_id).await?;

        self.deps.tracker.mark_complete(&task_id).await?;
        self.deps.sync_phase(&implementer, WorkerPhase::Idle, None).await;

        self.deps.store.complete_task(&task_id).await?;

        Ok(CommandOutput::new(format!("Task {task_id} completed")).with_data(json!({
            "task_id": task_id,
            "implementer": implementer,
            "status": TaskStatus::Completed,
        })))
    }

    async fn mark_task_failed(
        &self,
        task_id: String,
        reason: String,
    ) -> Result<CommandOutput, CommandError> {
        let released = self.deps.store.check_fail_task(&task_id).await?;

        self.deps.tracker.mark_failed(&task_id, &reason).await?;
        for worker_id in [&released.implementer, &released.reviewer].into_iter().flatten() {
            self.deps.sync_phase(worker_id, WorkerPhase::Idle, None).await;
        }

        let released = self.deps.store.fail_task(&task_id).await?;
        tracing::warn!(task_id = %task_id, reason = %reason, "Task marked failed");

        Ok(CommandOutput::new(format!("Task {task_id} marked failed")).with_data(json!({
            "task_id": task_id,
            "reason": reason,
            "released_implementer": released.implementer,
            "released_reviewer": released.reviewer,
        })))
    }
}

#[async_trait]
impl CommandHandler for TaskHandler {
    async fn handle(&self, command: Command) -> Result<CommandOutput, CommandError> {
        match command {
            Command::AssignTask {
                worker_id,
                task_id,
                summary,
            } => self.assign_task(worker_id, task_id, summary).await,
            Command::ReportImplementationComplete { worker_id, summary } => {
                self.report_implementation_complete(worker_id, summary).await
            }
            Command::MarkTaskComplete { task_id } => self.mark_task_complete(task_id).await,
            Command::MarkTaskFailed { task_id, reason } => {
                self.mark_task_failed(task_id, reason).await
            }
            other => Err(CommandError::UnexpectedCommand {
                handler: "task",
                received: other.kind(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::fixture;
    use super::*;
    use crate::error::{AssignmentError, TrackerError};
    use crate::process::ProcessRuntime;
    use crate::tracker::{IssueState, TaskTracker};

    fn assign(worker_id: &str, task_id: &str) -> Command {
        Command::AssignTask {
            worker_id: worker_id.to_string(),
            task_id: task_id.to_string(),
            summary: Some("start with the form".to_string()),
        }
    }

    #[tokio::test]
    async fn assign_task_resumes_then_records() {
        let f = fixture().await;
        let handler = TaskHandler::new(f.deps.clone());

        handler.handle(assign("worker-1", "perles-abc.1")).await.unwrap();

        let worker = f.deps.store.worker("worker-1").await;
        assert_eq!(worker.phase, WorkerPhase::Implementing);
        assert_eq!(
            f.deps.store.task("perles-abc.1").await.unwrap().status,
            TaskStatus::Implementing
        );
        assert_eq!(f.runtime.resume_count("worker-1").await, 1);
        assert_eq!(
            f.runtime.get("worker-1").await.unwrap().task_id.as_deref(),
            Some("perles-abc.1")
        );
    }

    #[tokio::test]
    async fn failed_resume_leaves_store_untouched() {
        let f = fixture().await;
        let handler = TaskHandler::new(f.deps.clone());
        f.runtime.fail_resumes(true);

        assert!(handler.handle(assign("worker-1", "perles-abc.1")).await.is_err());
        assert!(f.deps.store.worker("worker-1").await.is_idle());
        assert!(f.deps.store.task("perles-abc.1").await.is_none());
    }

    #[tokio::test]
    async fn unknown_issue_rejected_before_resume() {
        let f = fixture().await;
        let handler = TaskHandler::new(f.deps.clone());

        let err = handler
            .handle(assign("worker-1", "perles-none.1"))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Tracker(TrackerError::IssueNotFound { .. })));
        assert_eq!(f.runtime.resume_count("worker-1").await, 0);
    }

    #[tokio::test]
    async fn second_implementer_rejected() {
        let f = fixture().await;
        let handler = TaskHandler::new(f.deps.clone());
        handler.handle(assign("worker-1", "perles-abc.1")).await.unwrap();

        let err = handler
            .handle(assign("worker-2", "perles-abc.1"))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Assignment(AssignmentError::AlreadyAssigned { .. })));
        assert_eq!(err.to_string(), "task perles-abc.1 already assigned to worker-1");
    }

    #[tokio::test]
    async fn report_complete_comments_on_issue() {
        let f = fixture().await;
        let handler = TaskHandler::new(f.deps.clone());
        handler.handle(assign("worker-1", "perles-abc.1")).await.unwrap();

        handler
            .handle(Command::ReportImplementationComplete {
                worker_id: "worker-1".to_string(),
                summary: "form added".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(
            f.deps.store.worker("worker-1").await.phase,
            WorkerPhase::AwaitingReview
        );
        let comments = f.tracker.comments("perles-abc.1").await;
        assert_eq!(comments.len(), 1);
        assert!(comments[0].text.contains("form added"));
    }

    #[tokio::test]
    async fn idle_worker_cannot_report_complete() {
        let f = fixture().await;
        let handler = TaskHandler::new(f.deps.clone());
        let err = handler
            .handle(Command::ReportImplementationComplete {
                worker_id: "worker-1".to_string(),
                summary: "nothing".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Assignment(AssignmentError::NoActiveTask { .. })));
    }

    #[tokio::test]
    async fn mark_failed_releases_worker_and_updates_tracker() {
        let f = fixture().await;
        let handler = TaskHandler::new(f.deps.clone());
        handler.handle(assign("worker-1", "perles-abc.1")).await.unwrap();

        handler
            .handle(Command::MarkTaskFailed {
                task_id: "perles-abc.1".to_string(),
                reason: "requirements unclear".to_string(),
            })
            .await
            .unwrap();

        assert!(f.deps.store.worker("worker-1").await.is_idle());
        let issue = f.tracker.show_issue("perles-abc.1").await.unwrap();
        assert_eq!(issue.state, IssueState::Failed);
    }

    #[tokio::test]
    async fn mark_complete_requires_commit() {
        let f = fixture().await;
        let handler = TaskHandler::new(f.deps.clone());
        handler.handle(assign("worker-1", "perles-abc.1")).await.unwrap();

        let err = handler
            .handle(Command::MarkTaskComplete {
                task_id: "perles-abc.1".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CommandError::Assignment(AssignmentError::InvalidStatusTransition { .. })
        ));
        let issue = f.tracker.show_issue("perles-abc.1").await.unwrap();
        assert_eq!(issue.state, IssueState::Open);
    }
}
