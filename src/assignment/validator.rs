//! Assignment validation against the store and the live process set.
//!
//! Results are provisional: a command in flight may win the race for the same
//! worker or task. Handlers repeat the store-side check under the write lock.

use std::sync::Arc;

use super::store::AssignmentStore;
use crate::error::AssignmentError;
use crate::process::{ProcessRuntime, ProcessStatus};

pub struct AssignmentValidator {
    store: Arc<AssignmentStore>,
    runtime: Arc<dyn ProcessRuntime>,
}

impl AssignmentValidator {
    pub fn new(store: Arc<AssignmentStore>, runtime: Arc<dyn ProcessRuntime>) -> Self {
        Self { store, runtime }
    }

    /// Check that `worker_id` may take `task_id` as implementer.
    pub async fn validate_task_assignment(
        &self,
        worker_id: &str,
        task_id: &str,
    ) -> Result<(), AssignmentError> {
        self.store.check_task_assignment(worker_id, task_id).await?;

        let process = self
            .runtime
            .get(worker_id)
            .await
            .ok_or_else(|| AssignmentError::NotFound {
                worker_id: worker_id.to_string(),
            })?;
        if process.status != ProcessStatus::Ready {
            return Err(AssignmentError::NotReady {
                worker_id: worker_id.to_string(),
                status: process.status.to_string(),
            });
        }
        Ok(())
    }

    /// Check that `reviewer_id` may review `implementer_id`'s work on `task_id`.
    pub async fn validate_review_assignment(
        &self,
        reviewer_id: &str,
        task_id: &str,
        implementer_id: &str,
    ) -> Result<(), AssignmentError> {
        self.store
            .check_review_assignment(reviewer_id, task_id, implementer_id)
            .await?;

        let status = self
            .runtime
            .get(reviewer_id)
            .await
            .map(|p| p.status.to_string())
            .unwrap_or_else(|| "missing".to_string());
        if status != ProcessStatus::Ready.to_string() {
            return Err(AssignmentError::ReviewerNotReady {
                worker_id: reviewer_id.to_string(),
                status,
            });
        }
        Ok(())
    }
}
