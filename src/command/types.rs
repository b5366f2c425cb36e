//! Command and result types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::assignment::WorkflowOutcome;
use crate::error::CommandError;
use crate::workflow::ReviewVerdict;

/// A request to change orchestration state. One variant per tool operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    SpawnWorker {
        agent_type: Option<String>,
    },
    AssignTask {
        worker_id: String,
        task_id: String,
        summary: Option<String>,
    },
    ReplaceWorker {
        worker_id: String,
        reason: Option<String>,
    },
    RetireWorker {
        worker_id: String,
        reason: Option<String>,
    },
    SendToWorker {
        worker_id: String,
        message: String,
    },
    Broadcast {
        message: String,
        exclude: Vec<String>,
    },
    AssignReview {
        reviewer_id: String,
        task_id: String,
        implementer_id: String,
        summary: String,
        review_type: Option<String>,
    },
    AssignReviewFeedback {
        implementer_id: String,
        task_id: String,
        feedback: String,
    },
    ReportImplementationComplete {
        worker_id: String,
        summary: String,
    },
    ReportReviewVerdict {
        worker_id: String,
        verdict: ReviewVerdict,
        comments: String,
    },
    ApproveCommit {
        implementer_id: String,
        task_id: String,
        commit_message: Option<String>,
    },
    ReportCommitFailed {
        implementer_id: String,
        task_id: String,
        reason: String,
    },
    MarkTaskComplete {
        task_id: String,
    },
    MarkTaskFailed {
        task_id: String,
        reason: String,
    },
    StopWorker {
        worker_id: String,
        force: bool,
        reason: Option<String>,
    },
    SignalWorkflowComplete {
        outcome: WorkflowOutcome,
        summary: String,
    },
}

/// Discriminant of [`Command`], used as the handler registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    SpawnWorker,
    AssignTask,
    ReplaceWorker,
    RetireWorker,
    SendToWorker,
    Broadcast,
    AssignReview,
    AssignReviewFeedback,
    ReportImplementationComplete,
    ReportReviewVerdict,
    ApproveCommit,
    ReportCommitFailed,
    MarkTaskComplete,
    MarkTaskFailed,
    StopWorker,
    SignalWorkflowComplete,
}

impl CommandKind {
    pub const ALL: [CommandKind; 16] = [
        Self::SpawnWorker,
        Self::AssignTask,
        Self::ReplaceWorker,
        Self::RetireWorker,
        Self::SendToWorker,
        Self::Broadcast,
        Self::AssignReview,
        Self::AssignReviewFeedback,
        Self::ReportImplementationComplete,
        Self::ReportReviewVerdict,
        Self::ApproveCommit,
        Self::ReportCommitFailed,
        Self::MarkTaskComplete,
        Self::MarkTaskFailed,
        Self::StopWorker,
        Self::SignalWorkflowComplete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SpawnWorker => "spawn_worker",
            Self::AssignTask => "assign_task",
            Self::ReplaceWorker => "replace_worker",
            Self::RetireWorker => "retire_worker",
            Self::SendToWorker => "send_to_worker",
            Self::Broadcast => "broadcast",
            Self::AssignReview => "assign_review",
            Self::AssignReviewFeedback => "assign_review_feedback",
            Self::ReportImplementationComplete => "report_implementation_complete",
            Self::ReportReviewVerdict => "report_review_verdict",
            Self::ApproveCommit => "approve_commit",
            Self::ReportCommitFailed => "report_commit_failed",
            Self::MarkTaskComplete => "mark_task_complete",
            Self::MarkTaskFailed => "mark_task_failed",
            Self::StopWorker => "stop_worker",
            Self::SignalWorkflowComplete => "signal_workflow_complete",
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::SpawnWorker { .. } => CommandKind::SpawnWorker,
            Self::AssignTask { .. } => CommandKind::AssignTask,
            Self::ReplaceWorker { .. } => CommandKind::ReplaceWorker,
            Self::RetireWorker { .. } => CommandKind::RetireWorker,
            Self::SendToWorker { .. } => CommandKind::SendToWorker,
            Self::Broadcast { .. } => CommandKind::Broadcast,
            Self::AssignReview { .. } => CommandKind::AssignReview,
            Self::AssignReviewFeedback { .. } => CommandKind::AssignReviewFeedback,
            Self::ReportImplementationComplete { .. } => CommandKind::ReportImplementationComplete,
            Self::ReportReviewVerdict { .. } => CommandKind::ReportReviewVerdict,
            Self::ApproveCommit { .. } => CommandKind::ApproveCommit,
            Self::ReportCommitFailed { .. } => CommandKind::ReportCommitFailed,
            Self::MarkTaskComplete { .. } => CommandKind::MarkTaskComplete,
            Self::MarkTaskFailed { .. } => CommandKind::MarkTaskFailed,
            Self::StopWorker { .. } => CommandKind::StopWorker,
            Self::SignalWorkflowComplete { .. } => CommandKind::SignalWorkflowComplete,
        }
    }
}

/// What a handler reports on success.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutput {
    pub message: String,
    pub data: Value,
}

impl CommandOutput {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            data: Value::Null,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

/// Outcome of one processed command. Produced exactly once per accepted
/// command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandResult {
    pub command_id: Uuid,
    pub kind: CommandKind,
    pub success: bool,
    pub message: String,
    pub data: Value,
    pub error: Option<String>,
}

impl CommandResult {
    pub fn succeeded(command_id: Uuid, kind: CommandKind, output: CommandOutput) -> Self {
        Self {
            command_id,
            kind,
            success: true,
            message: output.message,
            data: output.data,
            error: None,
        }
    }

    pub fn failed(command_id: Uuid, kind: CommandKind, error: &CommandError) -> Self {
        let message = error.to_string();
        Self {
            command_id,
            kind,
            success: false,
            error: Some(message.clone()),
            message,
            data: Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_serde_tag() {
        let command = Command::AssignTask {
            worker_id: "worker-1".to_string(),
            task_id: "perles-abc.1".to_string(),
            summary: None,
        };
        let json = serde_json::to_value(&command).unwrap();
        assert_eq!(json["type"], command.kind().as_str());
    }

    #[test]
    fn kinds_are_distinct() {
        let names: std::collections::HashSet<_> =
            CommandKind::ALL.iter().map(|k| k.as_str()).collect();
        assert_eq!(names.len(), CommandKind::ALL.len());
    }

    #[test]
    fn failed_result_carries_error() {
        let err = CommandError::NoHandler {
            kind: CommandKind::Broadcast,
        };
        let result = CommandResult::failed(Uuid::new_v4(), CommandKind::Broadcast, &err);
        assert!(!result.success);
        assert_eq!(
            result.error.as_deref(),
            Some("no handler registered for command broadcast")
        );
    }
}
