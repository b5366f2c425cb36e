//! Assignment store — the worker and task assignment maps.
//!
//! Both maps live behind one `RwLock`, so a write that touches a worker and
//! its task lands atomically. Queries take the read lock and return clones;
//! no caller ever holds a reference into the maps.
//!
//! Every mutator re-runs its preconditions under the write lock before
//! touching anything, so a rejected write leaves the store unchanged. The
//! matching `check_*` methods run the same preconditions under the read lock
//! and let command handlers refuse early, before any external side effect.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use super::model::{TaskAssignment, WorkerAssignment, WorkflowCompletion};
use crate::error::AssignmentError;
use crate::workflow::{PhaseEvent, ReviewVerdict, TaskStatus, WorkerPhase, WorkerRole};

/// A broken workflow invariant found by [`AssignmentStore::check_invariants`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvariantViolation {
    MultipleImplementers { task_id: String, workers: Vec<String> },
    MultipleReviewers { task_id: String, workers: Vec<String> },
    SelfReview { task_id: String, worker_id: String },
    ReviewerNotReviewing {
        task_id: String,
        reviewer: String,
        phase: WorkerPhase,
    },
    RolePhaseMismatch {
        worker_id: String,
        role: Option<WorkerRole>,
        phase: WorkerPhase,
    },
}

/// Workers released by a failed task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleasedWorkers {
    pub implementer: Option<String>,
    pub reviewer: Option<String>,
}

/// Where a review verdict landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerdictOutcome {
    pub task_id: String,
    pub implementer: String,
    pub status: TaskStatus,
}

#[derive(Debug, Default)]
struct Assignments {
    workers: HashMap<String, WorkerAssignment>,
    tasks: HashMap<String, TaskAssignment>,
    workflow: Option<WorkflowCompletion>,
}

/// Concurrency-safe owner of all assignment state.
#[derive(Debug, Default)]
pub struct AssignmentStore {
    state: RwLock<Assignments>,
}

impl AssignmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Queries ─────────────────────────────────────────────────────────

    /// A worker's assignment. Unknown workers are reported as idle.
    pub async fn worker(&self, worker_id: &str) -> WorkerAssignment {
        self.state
            .read()
            .await
            .workers
            .get(worker_id)
            .cloned()
            .unwrap_or_default()
    }

    /// A task's assignment, if the task was ever assigned.
    pub async fn task(&self, task_id: &str) -> Option<TaskAssignment> {
        self.state.read().await.tasks.get(task_id).cloned()
    }

    /// All worker assignments, sorted by worker ID.
    pub async fn workers(&self) -> Vec<(String, WorkerAssignment)> {
        let state = self.state.read().await;
        let mut workers: Vec<_> = state
            .workers
            .iter()
            .map(|(id, w)| (id.clone(), w.clone()))
            .collect();
        workers.sort_by(|a, b| a.0.cmp(&b.0));
        workers
    }

    /// All task assignments, sorted by task ID.
    pub async fn tasks(&self) -> Vec<TaskAssignment> {
        let state = self.state.read().await;
        let mut tasks: Vec<_> = state.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        tasks
    }

    /// Number of task records retained.
    pub async fn task_count(&self) -> usize {
        self.state.read().await.tasks.len()
    }

    /// The workflow completion record, once signalled.
    pub async fn workflow_completion(&self) -> Option<WorkflowCompletion> {
        self.state.read().await.workflow.clone()
    }

    /// Workers whose active task was assigned more than `max_duration`
    /// before `now`. Idle workers are never stuck.
    pub async fn stuck_workers(&self, max_duration: Duration, now: DateTime<Utc>) -> Vec<String> {
        let state = self.state.read().await;
        let mut stuck: Vec<String> = state
            .workers
            .iter()
            .filter(|(_, w)| {
                !w.is_idle()
                    && now
                        .signed_duration_since(w.assigned_at)
                        .to_std()
                        .is_ok_and(|elapsed| elapsed > max_duration)
            })
            .map(|(id, _)| id.clone())
            .collect();
        stuck.sort();
        stuck
    }

    /// Evaluate the workflow invariants over the current state.
    pub async fn check_invariants(&self) -> Vec<InvariantViolation> {
        let state = self.state.read().await;
        let mut violations = Vec::new();

        let mut implementers: HashMap<&str, Vec<String>> = HashMap::new();
        let mut reviewers: HashMap<&str, Vec<String>> = HashMap::new();
        for (id, w) in &state.workers {
            if !w.phase.allows_role(w.role) {
                violations.push(InvariantViolation::RolePhaseMismatch {
                    worker_id: id.clone(),
                    role: w.role,
                    phase: w.phase,
                });
            }
            let Some(task_id) = w.active_task() else {
                continue;
            };
            match w.role {
                Some(WorkerRole::Implementer) => {
                    implementers.entry(task_id).or_default().push(id.clone())
                }
                Some(WorkerRole::Reviewer) => reviewers.entry(task_id).or_default().push(id.clone()),
                None => {}
            }
        }

        for (task_id, mut workers) in implementers {
            if workers.len() > 1 {
                workers.sort();
                violations.push(InvariantViolation::MultipleImplementers {
                    task_id: task_id.to_string(),
                    workers,
                });
            }
        }
        for (task_id, mut workers) in reviewers {
            if workers.len() > 1 {
                workers.sort();
                violations.push(InvariantViolation::MultipleReviewers {
                    task_id: task_id.to_string(),
                    workers,
                });
            }
        }

        for task in state.tasks.values() {
            if task.status != TaskStatus::InReview {
                continue;
            }
            let Some(reviewer) = &task.reviewer else {
                continue;
            };
            if *reviewer == task.implementer {
                violations.push(InvariantViolation::SelfReview {
                    task_id: task.task_id.clone(),
                    worker_id: reviewer.clone(),
                });
            }
            let phase = state.phase_of(reviewer);
            if phase != WorkerPhase::Reviewing {
                violations.push(InvariantViolation::ReviewerNotReviewing {
                    task_id: task.task_id.clone(),
                    reviewer: reviewer.clone(),
                    phase,
                });
            }
        }

        violations
    }

    // ── Prechecks (read lock) ───────────────────────────────────────────

    /// Conflicts that forbid giving `task_id` to `worker_id`.
    pub async fn check_task_assignment(
        &self,
        worker_id: &str,
        task_id: &str,
    ) -> Result<(), AssignmentError> {
        self.state.read().await.check_assign_task(worker_id, task_id)
    }

    /// Store-side conflicts that forbid `reviewer_id` reviewing `task_id`.
    pub async fn check_review_assignment(
        &self,
        reviewer_id: &str,
        task_id: &str,
        implementer_id: &str,
    ) -> Result<(), AssignmentError> {
        self.state
            .read()
            .await
            .check_review(reviewer_id, task_id, implementer_id)
    }

    pub async fn check_complete_implementation(
        &self,
        worker_id: &str,
    ) -> Result<String, AssignmentError> {
        self.state.read().await.check_complete_implementation(worker_id)
    }

    pub async fn check_verdict(
        &self,
        reviewer_id: &str,
        verdict: ReviewVerdict,
    ) -> Result<VerdictOutcome, AssignmentError> {
        self.state.read().await.check_verdict(reviewer_id, verdict)
    }

    pub async fn check_feedback(
        &self,
        implementer_id: &str,
        task_id: &str,
    ) -> Result<(), AssignmentError> {
        self.state.read().await.check_feedback(implementer_id, task_id)
    }

    pub async fn check_commit(
        &self,
        implementer_id: &str,
        task_id: &str,
    ) -> Result<(), AssignmentError> {
        self.state.read().await.check_commit(implementer_id, task_id)
    }

    pub async fn check_commit_failed(
        &self,
        implementer_id: &str,
        task_id: &str,
    ) -> Result<(), AssignmentError> {
        self.state
            .read()
            .await
            .check_commit_failed(implementer_id, task_id)
    }

    pub async fn check_complete_task(&self, task_id: &str) -> Result<String, AssignmentError> {
        self.state.read().await.check_complete_task(task_id)
    }

    pub async fn check_fail_task(&self, task_id: &str) -> Result<ReleasedWorkers, AssignmentError> {
        self.state.read().await.check_fail_task(task_id)
    }

    // ── Mutators (write lock) ───────────────────────────────────────────

    /// Give `task_id` to `worker_id` as implementer.
    pub async fn assign_task(&self, worker_id: &str, task_id: &str) -> Result<(), AssignmentError> {
        let mut state = self.state.write().await;
        state.check_assign_task(worker_id, task_id)?;

        state
            .workers
            .insert(worker_id.to_string(), WorkerAssignment::implementer(task_id));
        let past_reviewers = state
            .tasks
            .remove(task_id)
            .map(|t| t.past_reviewers)
            .unwrap_or_default();
        let mut task = TaskAssignment::new(task_id, worker_id);
        task.past_reviewers = past_reviewers;
        state.tasks.insert(task_id.to_string(), task);
        Ok(())
    }

    /// Open a review round of `task_id` by `reviewer_id`.
    pub async fn assign_review(
        &self,
        reviewer_id: &str,
        task_id: &str,
        implementer_id: &str,
    ) -> Result<(), AssignmentError> {
        let mut state = self.state.write().await;
        state.check_review(reviewer_id, task_id, implementer_id)?;

        state.workers.insert(
            reviewer_id.to_string(),
            WorkerAssignment::reviewer(task_id, implementer_id),
        );
        if let Some(implementer) = state.workers.get_mut(implementer_id) {
            implementer.reviewer_id = Some(reviewer_id.to_string());
        }
        if let Some(task) = state.tasks.get_mut(task_id) {
            task.reviewer = Some(reviewer_id.to_string());
            task.status = TaskStatus::InReview;
            task.review_started_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Implementer reports its work ready for review. Returns the task ID.
    pub async fn complete_implementation(&self, worker_id: &str) -> Result<String, AssignmentError> {
        let mut state = self.state.write().await;
        let task_id = state.check_complete_implementation(worker_id)?;
        state.set_phase(worker_id, WorkerPhase::AwaitingReview);
        Ok(task_id)
    }

    /// Reviewer delivers a verdict; the reviewer is released.
    pub async fn record_verdict(
        &self,
        reviewer_id: &str,
        verdict: ReviewVerdict,
    ) -> Result<VerdictOutcome, AssignmentError> {
        let mut state = self.state.write().await;
        let outcome = state.check_verdict(reviewer_id, verdict)?;

        state
            .workers
            .insert(reviewer_id.to_string(), WorkerAssignment::idle());
        if let Some(implementer) = state.workers.get_mut(&outcome.implementer) {
            implementer.reviewer_id = None;
        }
        if let Some(task) = state.tasks.get_mut(&outcome.task_id) {
            task.status = outcome.status;
            task.reviewer = None;
            task.past_reviewers.push(reviewer_id.to_string());
        }
        Ok(outcome)
    }

    /// Send a denied task back to its implementer.
    pub async fn begin_feedback(
        &self,
        implementer_id: &str,
        task_id: &str,
    ) -> Result<(), AssignmentError> {
        let mut state = self.state.write().await;
        state.check_feedback(implementer_id, task_id)?;
        state.set_phase(implementer_id, WorkerPhase::AddressingFeedback);
        state.set_status(task_id, TaskStatus::Implementing);
        Ok(())
    }

    /// Let the implementer of an approved task commit.
    pub async fn begin_commit(
        &self,
        implementer_id: &str,
        task_id: &str,
    ) -> Result<(), AssignmentError> {
        let mut state = self.state.write().await;
        state.check_commit(implementer_id, task_id)?;
        state.set_phase(implementer_id, WorkerPhase::Committing);
        state.set_status(task_id, TaskStatus::Committing);
        Ok(())
    }

    /// A commit attempt failed; the implementer goes back to addressing it.
    pub async fn commit_failed(
        &self,
        implementer_id: &str,
        task_id: &str,
    ) -> Result<(), AssignmentError> {
        let mut state = self.state.write().await;
        state.check_commit_failed(implementer_id, task_id)?;
        state.set_phase(implementer_id, WorkerPhase::AddressingFeedback);
        state.set_status(task_id, TaskStatus::Implementing);
        Ok(())
    }

    /// Close a committed task. Returns the released implementer.
    pub async fn complete_task(&self, task_id: &str) -> Result<String, AssignmentError> {
        let mut state = self.state.write().await;
        let implementer = state.check_complete_task(task_id)?;
        state
            .workers
            .insert(implementer.clone(), WorkerAssignment::idle());
        if let Some(task) = state.tasks.get_mut(task_id) {
            task.status = TaskStatus::Completed;
            task.completed_at = Some(Utc::now());
        }
        Ok(implementer)
    }

    /// Abandon a task, releasing whichever workers still hold it.
    pub async fn fail_task(&self, task_id: &str) -> Result<ReleasedWorkers, AssignmentError> {
        let mut state = self.state.write().await;
        let released = state.check_fail_task(task_id)?;

        for worker_id in [&released.implementer, &released.reviewer].into_iter().flatten() {
            state
                .workers
                .insert(worker_id.clone(), WorkerAssignment::idle());
        }
        if let Some(task) = state.tasks.get_mut(task_id) {
            if let Some(reviewer) = task.reviewer.take() {
                task.past_reviewers.push(reviewer);
            }
            task.failed_at = Some(Utc::now());
        }
        Ok(released)
    }

    /// Reset a worker to idle without touching any task record. Returns the
    /// assignment it held.
    pub async fn clear_worker(&self, worker_id: &str) -> Option<WorkerAssignment> {
        self.state
            .write()
            .await
            .workers
            .insert(worker_id.to_string(), WorkerAssignment::idle())
            .filter(|previous| !previous.is_idle())
    }

    /// Record how the workflow ended.
    pub async fn record_workflow_completion(&self, completion: WorkflowCompletion) {
        self.state.write().await.workflow = Some(completion);
    }

    /// Overwrite a worker's assignment verbatim, bypassing the workflow rules.
    pub async fn restore_worker(&self, worker_id: &str, assignment: WorkerAssignment) {
        self.state
            .write()
            .await
            .workers
            .insert(worker_id.to_string(), assignment);
    }
}

impl Assignments {
    fn phase_of(&self, worker_id: &str) -> WorkerPhase {
        self.workers
            .get(worker_id)
            .map(|w| w.phase)
            .unwrap_or_default()
    }

    fn set_phase(&mut self, worker_id: &str, phase: WorkerPhase) {
        if let Some(w) = self.workers.get_mut(worker_id) {
            w.phase = phase;
        }
    }

    fn set_status(&mut self, task_id: &str, status: TaskStatus) {
        if let Some(t) = self.tasks.get_mut(task_id) {
            t.status = status;
        }
    }

    fn task_record(&self, task_id: &str) -> Result<&TaskAssignment, AssignmentError> {
        self.tasks
            .get(task_id)
            .ok_or_else(|| AssignmentError::TaskNotFound {
                task_id: task_id.to_string(),
            })
    }

    /// `worker_id` must move to `to` via exactly `expected`.
    fn check_event(
        &self,
        worker_id: &str,
        to: WorkerPhase,
        expected: PhaseEvent,
    ) -> Result<(), AssignmentError> {
        let from = self.phase_of(worker_id);
        match from.transition_event(to) {
            Some(event) if event == expected => Ok(()),
            _ => Err(AssignmentError::InvalidPhaseTransition {
                worker_id: worker_id.to_string(),
                from: from.to_string(),
                to: to.to_string(),
            }),
        }
    }

    fn check_status(&self, task: &TaskAssignment, to: TaskStatus) -> Result<(), AssignmentError> {
        if task.status.can_transition_to(to) {
            Ok(())
        } else {
            Err(AssignmentError::InvalidStatusTransition {
                task_id: task.task_id.clone(),
                from: task.status.to_string(),
                to: to.to_string(),
            })
        }
    }

    /// `implementer_id` is the implementer of `task_id` and still holds it.
    fn check_implementer_holds(
        &self,
        implementer_id: &str,
        task_id: &str,
    ) -> Result<&TaskAssignment, AssignmentError> {
        let task = self.task_record(task_id)?;
        if task.implementer != implementer_id {
            return Err(AssignmentError::TaskMismatch {
                task_id: task_id.to_string(),
                reason: format!(
                    "implementer is {}, not {}",
                    task.implementer, implementer_id
                ),
            });
        }
        let held = self
            .workers
            .get(implementer_id)
            .and_then(|w| w.active_task().map(str::to_string));
        if held.as_deref() != Some(task_id) {
            return Err(AssignmentError::TaskMismatch {
                task_id: task_id.to_string(),
                reason: format!(
                    "worker {} holds {}",
                    implementer_id,
                    held.as_deref().unwrap_or("no task")
                ),
            });
        }
        Ok(task)
    }

    fn check_assign_task(&self, worker_id: &str, task_id: &str) -> Result<(), AssignmentError> {
        // A failed task is open to any worker.
        if let Some(task) = self.tasks.get(task_id).filter(|t| !t.is_failed()) {
            if task.implementer != worker_id {
                return Err(AssignmentError::AlreadyAssigned {
                    task_id: task_id.to_string(),
                    holder: task.implementer.clone(),
                });
            }
            if task.status.is_terminal() {
                return Err(AssignmentError::InvalidStatusTransition {
                    task_id: task_id.to_string(),
                    from: task.status.to_string(),
                    to: TaskStatus::Implementing.to_string(),
                });
            }
        }
        if let Some(held) = self.workers.get(worker_id).and_then(|w| w.active_task()) {
            return Err(AssignmentError::WorkerBusy {
                worker_id: worker_id.to_string(),
                task_id: held.to_string(),
            });
        }
        self.check_event(worker_id, WorkerPhase::Implementing, PhaseEvent::AssignTask)
    }

    fn check_review(
        &self,
        reviewer_id: &str,
        task_id: &str,
        implementer_id: &str,
    ) -> Result<(), AssignmentError> {
        if reviewer_id == implementer_id {
            return Err(AssignmentError::SelfReview);
        }

        let task = self
            .tasks
            .get(task_id)
            .ok_or_else(|| AssignmentError::TaskMismatch {
                task_id: task_id.to_string(),
                reason: "no assignment exists for this task".to_string(),
            })?;
        if task.implementer != implementer_id {
            return Err(AssignmentError::TaskMismatch {
                task_id: task_id.to_string(),
                reason: format!(
                    "implementer is {}, not {}",
                    task.implementer, implementer_id
                ),
            });
        }

        let phase = self.phase_of(implementer_id);
        if phase != WorkerPhase::AwaitingReview {
            return Err(AssignmentError::NotAwaitingReview {
                worker_id: implementer_id.to_string(),
                phase: phase.to_string(),
            });
        }

        if let Some(reviewer) = &task.reviewer {
            return Err(AssignmentError::ReviewerAlreadySet {
                task_id: task_id.to_string(),
                reviewer: reviewer.clone(),
            });
        }

        if let Some(held) = self.workers.get(reviewer_id).and_then(|w| w.active_task()) {
            return Err(AssignmentError::WorkerBusy {
                worker_id: reviewer_id.to_string(),
                task_id: held.to_string(),
            });
        }

        self.check_status(task, TaskStatus::InReview)
    }

    fn check_complete_implementation(&self, worker_id: &str) -> Result<String, AssignmentError> {
        let task_id = self
            .workers
            .get(worker_id)
            .and_then(|w| w.active_task().map(str::to_string))
            .ok_or_else(|| AssignmentError::NoActiveTask {
                worker_id: worker_id.to_string(),
            })?;
        self.check_event(
            worker_id,
            WorkerPhase::AwaitingReview,
            PhaseEvent::ReportImplementationComplete,
        )?;
        Ok(task_id)
    }

    fn check_verdict(
        &self,
        reviewer_id: &str,
        verdict: ReviewVerdict,
    ) -> Result<VerdictOutcome, AssignmentError> {
        let task_id = self
            .workers
            .get(reviewer_id)
            .and_then(|w| w.active_task().map(str::to_string))
            .ok_or_else(|| AssignmentError::NoActiveTask {
                worker_id: reviewer_id.to_string(),
            })?;
        self.check_event(reviewer_id, WorkerPhase::Idle, PhaseEvent::ReportReviewVerdict)?;

        let task = self.task_record(&task_id)?;
        if task.reviewer.as_deref() != Some(reviewer_id) {
            return Err(AssignmentError::TaskMismatch {
                task_id,
                reason: format!("{reviewer_id} is not the open reviewer"),
            });
        }
        let status = verdict.resulting_status();
        self.check_status(task, status)?;

        Ok(VerdictOutcome {
            implementer: task.implementer.clone(),
            task_id,
            status,
        })
    }

    fn check_feedback(&self, implementer_id: &str, task_id: &str) -> Result<(), AssignmentError> {
        let task = self.check_implementer_holds(implementer_id, task_id)?;
        self.check_status(task, TaskStatus::Implementing)?;
        self.check_event(
            implementer_id,
            WorkerPhase::AddressingFeedback,
            PhaseEvent::ReviewDenied,
        )
    }

    fn check_commit(&self, implementer_id: &str, task_id: &str) -> Result<(), AssignmentError> {
        let task = self.check_implementer_holds(implementer_id, task_id)?;
        self.check_status(task, TaskStatus::Committing)?;
        self.check_event(
            implementer_id,
            WorkerPhase::Committing,
            PhaseEvent::ReviewApproved,
        )
    }

    fn check_commit_failed(
        &self,
        implementer_id: &str,
        task_id: &str,
    ) -> Result<(), AssignmentError> {
        let task = self.check_implementer_holds(implementer_id, task_id)?;
        self.check_status(task, TaskStatus::Implementing)?;
        self.check_event(
            implementer_id,
            WorkerPhase::AddressingFeedback,
            PhaseEvent::CommitFailed,
        )
    }

    fn check_complete_task(&self, task_id: &str) -> Result<String, AssignmentError> {
        let task = self.task_record(task_id)?;
        self.check_status(task, TaskStatus::Completed)?;
        let implementer = task.implementer.clone();
        self.check_implementer_holds(&implementer, task_id)?;
        self.check_event(&implementer, WorkerPhase::Idle, PhaseEvent::MarkTaskComplete)?;
        Ok(implementer)
    }

    fn check_fail_task(&self, task_id: &str) -> Result<ReleasedWorkers, AssignmentError> {
        let task = self.task_record(task_id)?;
        if task.is_closed() {
            let from = if task.is_failed() {
                "failed".to_string()
            } else {
                task.status.to_string()
            };
            return Err(AssignmentError::InvalidStatusTransition {
                task_id: task_id.to_string(),
                from,
                to: "failed".to_string(),
            });
        }

        let holds = |worker_id: &str| {
            self.workers
                .get(worker_id)
                .and_then(|w| w.active_task())
                == Some(task_id)
        };

        // A replaced implementer no longer holds the task; only a current
        // holder has to pass the phase table.
        let implementer = if holds(&task.implementer) {
            self.check_event(&task.implementer, WorkerPhase::Idle, PhaseEvent::TaskFailed)?;
            Some(task.implementer.clone())
        } else {
            None
        };
        let reviewer = task.reviewer.clone().filter(|r| holds(r));

        Ok(ReleasedWorkers {
            implementer,
            reviewer,
        })
    }
}
