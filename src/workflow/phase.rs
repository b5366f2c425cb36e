//! Worker phase state machine.

use serde::{Deserialize, Serialize};

/// Which side of the workflow a worker is on for its current task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerRole {
    Implementer,
    Reviewer,
}

impl std::fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Implementer => "implementer",
            Self::Reviewer => "reviewer",
        };
        write!(f, "{s}")
    }
}

/// Worker-side lifecycle phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerPhase {
    /// No task held.
    #[default]
    Idle,
    /// Implementer working on the task.
    Implementing,
    /// Implementer finished and is waiting for a reviewer.
    AwaitingReview,
    /// Reviewer examining the implementer's work.
    Reviewing,
    /// Implementer reworking after a denied review.
    AddressingFeedback,
    /// Implementer committing approved work.
    Committing,
}

/// The event that drives a phase transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseEvent {
    AssignTask,
    AssignTaskReview,
    Noop,
    ReportImplementationComplete,
    TaskFailed,
    Working,
    ReviewDenied,
    ReviewApproved,
    Waiting,
    ReportReviewVerdict,
    Reviewing,
    MarkTaskComplete,
    CommitFailed,
    Committing,
}

impl WorkerPhase {
    /// Look up the event that moves `self` to `target`, or `None` if the
    /// pair is not in the transition table.
    pub fn transition_event(&self, target: WorkerPhase) -> Option<PhaseEvent> {
        use PhaseEvent as E;
        use WorkerPhase::*;

        let event = match (self, target) {
            (Idle, Implementing) => E::AssignTask,
            (Idle, Reviewing) => E::AssignTaskReview,
            (Idle, Idle) => E::Noop,

            (Implementing, AwaitingReview) => E::ReportImplementationComplete,
            (Implementing, Idle) => E::TaskFailed,
            (Implementing, Implementing) => E::Working,

            (AwaitingReview, AddressingFeedback) => E::ReviewDenied,
            (AwaitingReview, Committing) => E::ReviewApproved,
            (AwaitingReview, Idle) => E::TaskFailed,
            (AwaitingReview, AwaitingReview) => E::Waiting,

            (Reviewing, Idle) => E::ReportReviewVerdict,
            (Reviewing, Reviewing) => E::Reviewing,

            (AddressingFeedback, AwaitingReview) => E::ReportImplementationComplete,
            (AddressingFeedback, Idle) => E::TaskFailed,
            (AddressingFeedback, AddressingFeedback) => E::Working,

            (Committing, Idle) => E::MarkTaskComplete,
            (Committing, AddressingFeedback) => E::CommitFailed,
            (Committing, Committing) => E::Committing,

            _ => return None,
        };
        Some(event)
    }

    /// Check if this phase allows transitioning to another phase.
    pub fn can_transition_to(&self, target: WorkerPhase) -> bool {
        self.transition_event(target).is_some()
    }

    /// Check whether `role` may hold this phase. Idle holds no role.
    pub fn allows_role(&self, role: Option<WorkerRole>) -> bool {
        match (self, role) {
            (Self::Idle, None) => true,
            (
                Self::Implementing | Self::AwaitingReview | Self::AddressingFeedback | Self::Committing,
                Some(WorkerRole::Implementer),
            ) => true,
            (Self::Reviewing, Some(WorkerRole::Reviewer)) => true,
            _ => false,
        }
    }

    /// The role a worker in this phase must hold.
    pub fn role(&self) -> Option<WorkerRole> {
        match self {
            Self::Idle => None,
            Self::Reviewing => Some(WorkerRole::Reviewer),
            _ => Some(WorkerRole::Implementer),
        }
    }
}

impl std::fmt::Display for WorkerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Implementing => "implementing",
            Self::AwaitingReview => "awaiting_review",
            Self::Reviewing => "reviewing",
            Self::AddressingFeedback => "addressing_feedback",
            Self::Committing => "committing",
        };
        write!(f, "{s}")
    }
}
