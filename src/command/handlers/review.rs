//! Review handoffs: assign review, verdict, feedback, commit approval.

use async_trait::async_trait;
use serde_json::json;

use super::HandlerDeps;
use crate::assignment::AssignmentValidator;
use crate::command::registry::CommandHandler;
use crate::command::types::{Command, CommandOutput};
use crate::error::CommandError;
use crate::workflow::{ReviewVerdict, TaskStatus, WorkerPhase};

pub struct ReviewHandler {
    deps: HandlerDeps,
    validator: AssignmentValidator,
}

impl ReviewHandler {
    pub fn new(deps: HandlerDeps) -> Self {
        let validator = AssignmentValidator::new(deps.store.clone(), deps.runtime.clone());
        Self { deps, validator }
    }

    async fn assign_review(
        &self,
        reviewer_id: String,
        task_id: String,
        implementer_id: String,
        summary: String,
        review_type: Option<String>,
    ) -> Result<CommandOutput, CommandError> {
        self.validator
            .validate_review_assignment(&reviewer_id, &task_id, &implementer_id)
            .await?;

        let review_type = review_type.unwrap_or_else(|| "complex".to_string());
        let prompt = format!(
            "[REVIEW ASSIGNMENT] Review {task_id} implemented by {implementer_id} ({review_type} review).\n\n{summary}"
        );
        self.deps.runtime.resume(&reviewer_id, &prompt).await?;
        self.deps
            .sync_phase(&reviewer_id, WorkerPhase::Reviewing, Some(&task_id))
            .await;

        self.deps
            .store
            .assign_review(&reviewer_id, &task_id, &implementer_id)
            .await?;

        Ok(CommandOutput::new(format!(
            "Assigned review of {task_id} to {reviewer_id}"
        ))
        .with_data(json!({
            "reviewer_id": reviewer_id,
            "implementer_id": implementer_id,
            "task_id": task_id,
            "review_type": review_type,
            "status": TaskStatus::InReview,
        })))
    }

    async fn report_review_verdict(
        &self,
        reviewer_id: String,
        verdict: ReviewVerdict,
        comments: String,
    ) -> Result<CommandOutput, CommandError> {
        let outcome = self.deps.store.check_verdict(&reviewer_id, verdict).await?;

        self.deps
            .tracker
            .add_comment(
                &outcome.task_id,
                &reviewer_id,
                &format!("Review {verdict}: {comments}"),
            )
            .await?;
        self.deps.sync_phase(&reviewer_id, WorkerPhase::Idle, None).await;

        let outcome = self.deps.store.record_verdict(&reviewer_id, verdict).await?;

        Ok(CommandOutput::new(format!(
            "Review of {} {}",
            outcome.task_id, outcome.status
        ))
        .with_data(json!({
            "task_id": outcome.task_id,
            "reviewer_id": reviewer_id,
            "implementer_id": outcome.implementer,
            "verdict": verdict,
            "status": outcome.status,
        })))
    }

    async fn assign_review_feedback(
        &self,
        implementer_id: String,
        task_id: String,
        feedback: String,
    ) -> Result<CommandOutput, CommandError> {
        self.deps.store.check_feedback(&implementer_id, &task_id).await?;

        let prompt = format!("[REVIEW FEEDBACK] {task_id} was denied. Address the following:\n\n{feedback}");
        self.deps.runtime.resume(&implementer_id, &prompt).await?;
        self.deps
            .sync_phase(&implementer_id, WorkerPhase::AddressingFeedback, Some(&task_id))
            .await;

        self.deps.store.begin_feedback(&implementer_id, &task_id).await?;

        Ok(CommandOutput::new(format!(
            "Sent review feedback for {task_id} to {implementer_id}"
        ))
        .with_data(json!({
            "implementer_id": implementer_id,
            "task_id": task_id,
            "phase": WorkerPhase::AddressingFeedback,
        })))
    }

    async fn approve_commit(
        &self,
        implementer_id: String,
        task_id: String,
        commit_message: Option<String>,
    ) -> Result<CommandOutput, CommandError> {
        self.deps.store.check_commit(&implementer_id, &task_id).await?;

        let mut prompt = format!("[COMMIT APPROVED] {task_id} passed review. Commit your changes.");
        if let Some(message) = commit_message.as_deref() {
            prompt.push_str("\n\nUse this commit message: ");
            prompt.push_str(message);
        }
        self.deps.runtime.resume(&implementer_id, &prompt).await?;
        self.deps
            .sync_phase(&implementer_id, WorkerPhase::Committing, Some(&task_id))
            .await;

        self.deps.store.begin_commit(&implementer_id, &task_id).await?;

        Ok(CommandOutput::new(format!(
            "Approved commit of {task_id} by {implementer_id}"
        ))
        .with_data(json!({
            "implementer_id": implementer_id,
            "task_id": task_id,
            "status": TaskStatus::Committing,
        })))
    }

    async fn report_commit_failed(
        &self,
        implementer_id: String,
        task_id: String,
        reason: String,
    ) -> Result<CommandOutput, CommandError> {
        self.deps
            .store
            .check_commit_failed(&implementer_id, &task_id)
            .await?;

        self.deps
            .tracker
            .add_comment(&task_id, &implementer_id, &format!("Commit failed: {reason}"))
            .await?;
        self.deps
            .sync_phase(&implementer_id, WorkerPhase::AddressingFeedback, Some(&task_id))
            .await;

        self.deps.store.commit_failed(&implementer_id, &task_id).await?;

        Ok(CommandOutput::new(format!(
            "Commit of {task_id} failed; {implementer_id} is addressing it"
        ))
        .with_data(json!({
            "implementer_id": implementer_id,
            "task_id": task_id,
            "reason": reason,
            "status": TaskStatus::Implementing,
        })))
    }
}

#[async_trait]
impl CommandHandler for ReviewHandler {
    async fn handle(&self, command: Command) -> Result<CommandOutput, CommandError> {
        match command {
            Command::AssignReview {
                reviewer_id,
                task_id,
                implementer_id,
                summary,
                review_type,
            } => {
                self.assign_review(reviewer_id, task_id, implementer_id, summary, review_type)
                    .await
            }
            Command::ReportReviewVerdict {
                worker_id,
                verdict,
                comments,
            } => self.report_review_verdict(worker_id, verdict, comments).await,
            Command::AssignReviewFeedback {
                implementer_id,
                task_id,
                feedback,
            } => {
                self.assign_review_feedback(implementer_id, task_id, feedback)
                    .await
            }
            Command::ApproveCommit {
                implementer_id,
                task_id,
                commit_message,
            } => self.approve_commit(implementer_id, task_id, commit_message).await,
            Command::ReportCommitFailed {
                implementer_id,
                task_id,
                reason,
            } => self.report_commit_failed(implementer_id, task_id, reason).await,
            other => Err(CommandError::UnexpectedCommand {
                handler: "review",
                received: other.kind(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{Fixture, fixture};
    use super::*;
    use crate::error::AssignmentError;

    /// worker-1 has implemented perles-abc.1 and is awaiting review.
    async fn awaiting_review() -> Fixture {
        let f = fixture().await;
        f.deps.store.assign_task("worker-1", "perles-abc.1").await.unwrap();
        f.deps.store.complete_implementation("worker-1").await.unwrap();
        f
    }

    fn review(reviewer: &str) -> Command {
        Command::AssignReview {
            reviewer_id: reviewer.to_string(),
            task_id: "perles-abc.1".to_string(),
            implementer_id: "worker-1".to_string(),
            summary: "check the validation".to_string(),
            review_type: None,
        }
    }

    fn verdict(verdict: ReviewVerdict) -> Command {
        Command::ReportReviewVerdict {
            worker_id: "worker-2".to_string(),
            verdict,
            comments: "looks fine".to_string(),
        }
    }

    #[tokio::test]
    async fn assign_review_opens_round() {
        let f = awaiting_review().await;
        let handler = ReviewHandler::new(f.deps.clone());

        handler.handle(review("worker-2")).await.unwrap();

        let task = f.deps.store.task("perles-abc.1").await.unwrap();
        assert_eq!(task.status, TaskStatus::InReview);
        assert_eq!(task.reviewer.as_deref(), Some("worker-2"));
        assert_eq!(f.runtime.resume_count("worker-2").await, 1);
    }

    #[tokio::test]
    async fn self_review_never_reaches_runtime() {
        let f = awaiting_review().await;
        let handler = ReviewHandler::new(f.deps.clone());

        let err = handler.handle(review("worker-1")).await.unwrap_err();
        assert!(matches!(err, CommandError::Assignment(AssignmentError::SelfReview)));
        assert_eq!(f.runtime.resume_count("worker-1").await, 0);
    }

    #[tokio::test]
    async fn approval_then_commit() {
        let f = awaiting_review().await;
        let handler = ReviewHandler::new(f.deps.clone());
        handler.handle(review("worker-2")).await.unwrap();

        let output = handler.handle(verdict(ReviewVerdict::Approved)).await.unwrap();
        assert_eq!(output.data["status"], "approved");
        assert!(f.deps.store.worker("worker-2").await.is_idle());

        handler
            .handle(Command::ApproveCommit {
                implementer_id: "worker-1".to_string(),
                task_id: "perles-abc.1".to_string(),
                commit_message: Some("feat: login form".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(
            f.deps.store.worker("worker-1").await.phase,
            WorkerPhase::Committing
        );
        assert_eq!(
            f.deps.store.task("perles-abc.1").await.unwrap().status,
            TaskStatus::Committing
        );
    }

    #[tokio::test]
    async fn denial_then_feedback() {
        let f = awaiting_review().await;
        let handler = ReviewHandler::new(f.deps.clone());
        handler.handle(review("worker-2")).await.unwrap();
        handler.handle(verdict(ReviewVerdict::Denied)).await.unwrap();

        // Commit is not allowed on a denied task.
        let err = handler
            .handle(Command::ApproveCommit {
                implementer_id: "worker-1".to_string(),
                task_id: "perles-abc.1".to_string(),
                commit_message: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CommandError::Assignment(AssignmentError::InvalidStatusTransition { .. })
        ));

        handler
            .handle(Command::AssignReviewFeedback {
                implementer_id: "worker-1".to_string(),
                task_id: "perles-abc.1".to_string(),
                feedback: "handle empty passwords".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(
            f.deps.store.worker("worker-1").await.phase,
            WorkerPhase::AddressingFeedback
        );
        assert_eq!(
            f.deps.store.task("perles-abc.1").await.unwrap().status,
            TaskStatus::Implementing
        );
    }

    #[tokio::test]
    async fn verdict_from_non_reviewer_rejected() {
        let f = awaiting_review().await;
        let handler = ReviewHandler::new(f.deps.clone());

        let err = handler
            .handle(verdict(ReviewVerdict::Approved))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Assignment(AssignmentError::NoActiveTask { .. })));
        assert!(f.tracker.comments("perles-abc.1").await.is_empty());
    }

    #[tokio::test]
    async fn commit_failure_returns_to_feedback() {
        let f = awaiting_review().await;
        let handler = ReviewHandler::new(f.deps.clone());
        handler.handle(review("worker-2")).await.unwrap();
        handler.handle(verdict(ReviewVerdict::Approved)).await.unwrap();
        handler
            .handle(Command::ApproveCommit {
                implementer_id: "worker-1".to_string(),
                task_id: "perles-abc.1".to_string(),
                commit_message: None,
            })
            .await
            .unwrap();

        handler
            .handle(Command::ReportCommitFailed {
                implementer_id: "worker-1".to_string(),
                task_id: "perles-abc.1".to_string(),
                reason: "pre-commit hook failed".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(
            f.deps.store.worker("worker-1").await.phase,
            WorkerPhase::AddressingFeedback
        );
    }
}
