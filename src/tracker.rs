//! Task tracker seam — the external issue system tasks live in.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::TrackerError;

/// Tracker-side state of an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueState {
    Open,
    Completed,
    Failed,
}

/// An issue as reported by the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub title: String,
    pub description: String,
    pub state: IssueState,
}

/// A comment left on an issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueComment {
    pub author: String,
    pub text: String,
}

/// Contract of the external issue tracker.
#[async_trait]
pub trait TaskTracker: Send + Sync {
    async fn show_issue(&self, task_id: &str) -> Result<Issue, TrackerError>;

    async fn add_comment(&self, task_id: &str, author: &str, text: &str)
    -> Result<(), TrackerError>;

    async fn mark_complete(&self, task_id: &str) -> Result<(), TrackerError>;

    async fn mark_failed(&self, task_id: &str, reason: &str) -> Result<(), TrackerError>;
}

#[derive(Debug, Clone)]
struct TrackedIssue {
    issue: Issue,
    comments: Vec<IssueComment>,
    failure_reason: Option<String>,
}

/// In-memory [`TaskTracker`].
#[derive(Default)]
pub struct InMemoryTracker {
    issues: RwLock<HashMap<String, TrackedIssue>>,
}

impl InMemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an open issue.
    pub async fn add_issue(&self, id: impl Into<String>, title: impl Into<String>) {
        let id = id.into();
        self.issues.write().await.insert(
            id.clone(),
            TrackedIssue {
                issue: Issue {
                    id,
                    title: title.into(),
                    description: String::new(),
                    state: IssueState::Open,
                },
                comments: Vec::new(),
                failure_reason: None,
            },
        );
    }

    /// Comments left on an issue, oldest first.
    pub async fn comments(&self, task_id: &str) -> Vec<IssueComment> {
        self.issues
            .read()
            .await
            .get(task_id)
            .map(|t| t.comments.clone())
            .unwrap_or_default()
    }

    /// Reason recorded by `mark_failed`, if any.
    pub async fn failure_reason(&self, task_id: &str) -> Option<String> {
        self.issues
            .read()
            .await
            .get(task_id)
            .and_then(|t| t.failure_reason.clone())
    }

    async fn with_issue<R>(
        &self,
        task_id: &str,
        f: impl FnOnce(&mut TrackedIssue) -> R,
    ) -> Result<R, TrackerError> {
        let mut issues = self.issues.write().await;
        let tracked = issues
            .get_mut(task_id)
            .ok_or_else(|| TrackerError::IssueNotFound {
                task_id: task_id.to_string(),
            })?;
        Ok(f(tracked))
    }
}

#[async_trait]
impl TaskTracker for InMemoryTracker {
    async fn show_issue(&self, task_id: &str) -> Result<Issue, TrackerError> {
        self.with_issue(task_id, |t| t.issue.clone()).await
    }

    async fn add_comment(
        &self,
        task_id: &str,
        author: &str,
        text: &str,
    ) -> Result<(), TrackerError> {
        self.with_issue(task_id, |t| {
            t.comments.push(IssueComment {
                author: author.to_string(),
                text: text.to_string(),
            })
        })
        .await
    }

    async fn mark_complete(&self, task_id: &str) -> Result<(), TrackerError> {
        self.with_issue(task_id, |t| t.issue.state = IssueState::Completed)
            .await
    }

    async fn mark_failed(&self, task_id: &str, reason: &str) -> Result<(), TrackerError> {
        self.with_issue(task_id, |t| {
            t.issue.state = IssueState::Failed;
            t.failure_reason = Some(reason.to_string());
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_issue_errors() {
        let tracker = InMemoryTracker::new();
        let err = tracker.show_issue("perles-nope.1").await.unwrap_err();
        assert!(matches!(err, TrackerError::IssueNotFound { .. }));
    }

    #[tokio::test]
    async fn lifecycle() {
        let tracker = InMemoryTracker::new();
        tracker.add_issue("perles-abc.1", "Add login").await;

        tracker
            .add_comment("perles-abc.1", "worker-1", "implementation done")
            .await
            .unwrap();
        tracker.mark_complete("perles-abc.1").await.unwrap();

        let issue = tracker.show_issue("perles-abc.1").await.unwrap();
        assert_eq!(issue.state, IssueState::Completed);
        assert_eq!(tracker.comments("perles-abc.1").await.len(), 1);
    }

    #[tokio::test]
    async fn mark_failed_records_reason() {
        let tracker = InMemoryTracker::new();
        tracker.add_issue("perles-abc.1", "Add login").await;
        tracker.mark_failed("perles-abc.1", "tests broken").await.unwrap();

        assert_eq!(
            tracker.failure_reason("perles-abc.1").await.as_deref(),
            Some("tests broken")
        );
    }
}
