//! Task status state machine.

use serde::{Deserialize, Serialize};

/// Task-side workflow status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Implementing,
    InReview,
    Approved,
    Denied,
    Committing,
    Completed,
}

impl TaskStatus {
    /// Check if this status allows transitioning to another status.
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        use TaskStatus::*;

        matches!(
            (self, target),
            (Implementing, InReview) |
            (InReview, Approved) | (InReview, Denied) |
            (Approved, Committing) |
            (Denied, Implementing) |
            // Committing falls back to Implementing when the commit fails.
            (Committing, Completed) | (Committing, Implementing)
        )
    }

    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Implementing => "implementing",
            Self::InReview => "in_review",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::Committing => "committing",
            Self::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

/// Outcome of a reviewer's examination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewVerdict {
    Approved,
    Denied,
}

impl ReviewVerdict {
    /// The task status a verdict moves an in-review task to.
    pub fn resulting_status(&self) -> TaskStatus {
        match self {
            Self::Approved => TaskStatus::Approved,
            Self::Denied => TaskStatus::Denied,
        }
    }
}

impl std::fmt::Display for ReviewVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Approved => "APPROVED",
            Self::Denied => "DENIED",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_valid() {
        use TaskStatus::*;
        assert!(Implementing.can_transition_to(InReview));
        assert!(InReview.can_transition_to(Approved));
        assert!(InReview.can_transition_to(Denied));
        assert!(Approved.can_transition_to(Committing));
        assert!(Denied.can_transition_to(Implementing));
        assert!(Committing.can_transition_to(Completed));
        assert!(Committing.can_transition_to(Implementing));
    }

    #[test]
    fn status_transitions_invalid() {
        use TaskStatus::*;
        assert!(!Implementing.can_transition_to(Approved));
        assert!(!InReview.can_transition_to(Committing));
        assert!(!Denied.can_transition_to(Committing));
        assert!(!Approved.can_transition_to(Completed));
    }

    #[test]
    fn completed_is_terminal() {
        use TaskStatus::*;
        assert!(Completed.is_terminal());
        for target in [Implementing, InReview, Approved, Denied, Committing, Completed] {
            assert!(!Completed.can_transition_to(target));
        }
        assert!(!Committing.is_terminal());
    }

    #[test]
    fn verdict_maps_to_status() {
        assert_eq!(ReviewVerdict::Approved.resulting_status(), TaskStatus::Approved);
        assert_eq!(ReviewVerdict::Denied.resulting_status(), TaskStatus::Denied);
    }

    #[test]
    fn status_serde_roundtrip() {
        let json = serde_json::to_string(&TaskStatus::InReview).unwrap();
        assert_eq!(json, "\"in_review\"");
        let parsed: TaskStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, TaskStatus::InReview);
    }
}
