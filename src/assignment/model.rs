//! Assignment records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::workflow::{TaskStatus, WorkerPhase, WorkerRole};

/// A worker's current share of the workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerAssignment {
    /// Task held by the worker; empty when idle.
    pub task_id: String,
    pub role: Option<WorkerRole>,
    pub phase: WorkerPhase,
    pub assigned_at: DateTime<Utc>,
    /// Counterpart implementer, set on reviewers.
    pub implementer_id: Option<String>,
    /// Counterpart reviewer, set on implementers while a review is open.
    pub reviewer_id: Option<String>,
}

impl WorkerAssignment {
    /// An idle worker with no task.
    pub fn idle() -> Self {
        Self {
            task_id: String::new(),
            role: None,
            phase: WorkerPhase::Idle,
            assigned_at: Utc::now(),
            implementer_id: None,
            reviewer_id: None,
        }
    }

    /// A freshly assigned implementer.
    pub fn implementer(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            role: Some(WorkerRole::Implementer),
            phase: WorkerPhase::Implementing,
            assigned_at: Utc::now(),
            implementer_id: None,
            reviewer_id: None,
        }
    }

    /// A freshly assigned reviewer of `implementer_id`'s work.
    pub fn reviewer(task_id: impl Into<String>, implementer_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            role: Some(WorkerRole::Reviewer),
            phase: WorkerPhase::Reviewing,
            assigned_at: Utc::now(),
            implementer_id: Some(implementer_id.into()),
            reviewer_id: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.task_id.is_empty()
    }

    /// The task held, if any.
    pub fn active_task(&self) -> Option<&str> {
        (!self.task_id.is_empty()).then_some(self.task_id.as_str())
    }
}

impl Default for WorkerAssignment {
    fn default() -> Self {
        Self::idle()
    }
}

/// A task's place in the workflow. Never deleted once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub task_id: String,
    pub implementer: String,
    /// Reviewer of the open review round, if one is in progress.
    pub reviewer: Option<String>,
    pub status: TaskStatus,
    pub started_at: DateTime<Utc>,
    pub review_started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Set by `mark_task_failed`. A failed task is closed until reassigned.
    pub failed_at: Option<DateTime<Utc>>,
    /// Reviewers of closed review rounds, oldest first.
    pub past_reviewers: Vec<String>,
}

impl TaskAssignment {
    /// A task just handed to its implementer.
    pub fn new(task_id: impl Into<String>, implementer: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            implementer: implementer.into(),
            reviewer: None,
            status: TaskStatus::Implementing,
            started_at: Utc::now(),
            review_started_at: None,
            completed_at: None,
            failed_at: None,
            past_reviewers: Vec::new(),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failed_at.is_some()
    }

    /// Completed or failed; no worker is expected to hold it.
    pub fn is_closed(&self) -> bool {
        self.status.is_terminal() || self.is_failed()
    }
}

/// How the coordinator ended the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowOutcome {
    Success,
    Partial,
    Aborted,
}

impl std::fmt::Display for WorkflowOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Aborted => "aborted",
        };
        write!(f, "{s}")
    }
}

/// Record left by `signal_workflow_complete`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowCompletion {
    pub outcome: WorkflowOutcome,
    pub summary: String,
    pub completed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_has_no_task() {
        let idle = WorkerAssignment::idle();
        assert!(idle.is_idle());
        assert_eq!(idle.active_task(), None);
        assert_eq!(idle.phase, WorkerPhase::Idle);
        assert!(idle.phase.allows_role(idle.role));
    }

    #[test]
    fn constructors_respect_role_phase_pairs() {
        let implementer = WorkerAssignment::implementer("perles-abc.1");
        assert!(implementer.phase.allows_role(implementer.role));
        assert_eq!(implementer.active_task(), Some("perles-abc.1"));

        let reviewer = WorkerAssignment::reviewer("perles-abc.1", "worker-1");
        assert!(reviewer.phase.allows_role(reviewer.role));
        assert_eq!(reviewer.implementer_id.as_deref(), Some("worker-1"));
    }

    #[test]
    fn new_task_starts_implementing() {
        let task = TaskAssignment::new("perles-abc.1", "worker-1");
        assert_eq!(task.status, TaskStatus::Implementing);
        assert!(task.reviewer.is_none());
    }
}
