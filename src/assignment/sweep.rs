//! Consistency sweep — orphaned tasks and stuck workers.
//!
//! Compares the assignment maps against the live process set on a timer.
//! Findings are advisory: they are logged and published, never acted on.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::store::{AssignmentStore, InvariantViolation};
use crate::process::{ProcessInfo, ProcessRuntime};

/// Findings of one sweep.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepReport {
    pub orphaned_tasks: Vec<String>,
    pub stuck_workers: Vec<String>,
    pub violations: Vec<InvariantViolation>,
    pub checked_at: DateTime<Utc>,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.orphaned_tasks.is_empty() && self.stuck_workers.is_empty() && self.violations.is_empty()
    }
}

pub struct ConsistencySweep {
    store: Arc<AssignmentStore>,
    runtime: Arc<dyn ProcessRuntime>,
    max_task_duration: Duration,
    report_tx: broadcast::Sender<SweepReport>,
}

impl ConsistencySweep {
    pub fn new(
        store: Arc<AssignmentStore>,
        runtime: Arc<dyn ProcessRuntime>,
        max_task_duration: Duration,
    ) -> Self {
        let (report_tx, _) = broadcast::channel(16);
        Self {
            store,
            runtime,
            max_task_duration,
            report_tx,
        }
    }

    /// Receive every report produced by [`spawn`](Self::spawn).
    pub fn subscribe(&self) -> broadcast::Receiver<SweepReport> {
        self.report_tx.subscribe()
    }

    /// Tasks whose implementer or open reviewer is missing from the live set
    /// or retired. Completed and failed tasks are skipped.
    pub async fn detect_orphaned_tasks(&self) -> Vec<String> {
        let live: HashMap<String, ProcessInfo> = self
            .runtime
            .list()
            .await
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();
        let gone = |id: &str| live.get(id).is_none_or(ProcessInfo::is_retired);

        let mut orphaned: Vec<String> = self
            .store
            .tasks()
            .await
            .into_iter()
            .filter(|t| !t.is_closed())
            .filter(|t| gone(&t.implementer) || t.reviewer.as_deref().is_some_and(gone))
            .map(|t| t.task_id)
            .collect();
        orphaned.sort();
        orphaned
    }

    /// Workers holding a task longer than the configured maximum.
    pub async fn check_stuck_workers(&self) -> Vec<String> {
        self.check_stuck_workers_at(Utc::now()).await
    }

    pub async fn check_stuck_workers_at(&self, now: DateTime<Utc>) -> Vec<String> {
        self.store.stuck_workers(self.max_task_duration, now).await
    }

    /// Run every check once and log the findings.
    pub async fn run_once(&self) -> SweepReport {
        let report = SweepReport {
            orphaned_tasks: self.detect_orphaned_tasks().await,
            stuck_workers: self.check_stuck_workers().await,
            violations: self.store.check_invariants().await,
            checked_at: Utc::now(),
        };

        for task_id in &report.orphaned_tasks {
            tracing::warn!(task_id = %task_id, "Orphaned task: worker missing or retired");
        }
        for worker_id in &report.stuck_workers {
            tracing::warn!(
                worker_id = %worker_id,
                max_secs = self.max_task_duration.as_secs(),
                "Worker exceeded maximum task duration"
            );
        }
        for violation in &report.violations {
            tracing::warn!(violation = ?violation, "Assignment invariant violated");
        }
        if report.is_clean() {
            tracing::debug!("Consistency sweep clean");
        }

        report
    }

    /// Spawn the periodic sweep. Runs until `cancel` fires.
    pub fn spawn(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // Skip immediate first tick
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let report = self.run_once().await;
                        // No subscribers is fine.
                        let _ = self.report_tx.send(report);
                    }
                }
            }
            tracing::debug!("Consistency sweep stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignment::model::WorkerAssignment;
    use crate::process::{InMemoryRuntime, ProcessStatus};

    async fn setup() -> (Arc<AssignmentStore>, Arc<InMemoryRuntime>, ConsistencySweep) {
        let store = Arc::new(AssignmentStore::new());
        let runtime = Arc::new(InMemoryRuntime::new());
        runtime.add_process("worker-1", ProcessStatus::Ready).await;
        runtime.add_process("worker-2", ProcessStatus::Ready).await;
        let sweep = ConsistencySweep::new(
            store.clone(),
            runtime.clone(),
            Duration::from_secs(30 * 60),
        );
        (store, runtime, sweep)
    }

    #[tokio::test]
    async fn retired_implementer_orphans_task() {
        let (store, runtime, sweep) = setup().await;
        store.assign_task("worker-1", "perles-abc.1").await.unwrap();
        assert!(sweep.detect_orphaned_tasks().await.is_empty());

        runtime.set_status("worker-1", ProcessStatus::Retired).await;
        assert_eq!(sweep.detect_orphaned_tasks().await, vec!["perles-abc.1".to_string()]);
    }

    #[tokio::test]
    async fn failed_task_not_orphaned() {
        let (store, runtime, sweep) = setup().await;
        store.assign_task("worker-1", "perles-abc.1").await.unwrap();
        store.fail_task("perles-abc.1").await.unwrap();

        runtime.set_status("worker-1", ProcessStatus::Retired).await;
        assert!(sweep.detect_orphaned_tasks().await.is_empty());
    }

    #[tokio::test]
    async fn missing_reviewer_orphans_task() {
        let (store, runtime, sweep) = setup().await;
        store.assign_task("worker-1", "perles-abc.1").await.unwrap();
        store.complete_implementation("worker-1").await.unwrap();
        store
            .assign_review("worker-2", "perles-abc.1", "worker-1")
            .await
            .unwrap();

        runtime.remove_process("worker-2").await;
        assert_eq!(sweep.detect_orphaned_tasks().await, vec!["perles-abc.1".to_string()]);
    }

    #[tokio::test]
    async fn stuck_worker_reported() {
        let (store, _, sweep) = setup().await;
        let now = Utc::now();
        let mut old = WorkerAssignment::implementer("perles-abc.1");
        old.assigned_at = now - chrono::Duration::minutes(31);
        store.restore_worker("worker-1", old).await;

        assert_eq!(sweep.check_stuck_workers_at(now).await, vec!["worker-1".to_string()]);
    }

    #[tokio::test]
    async fn sweep_is_read_only() {
        let (store, runtime, sweep) = setup().await;
        store.assign_task("worker-1", "perles-abc.1").await.unwrap();
        runtime.set_status("worker-1", ProcessStatus::Retired).await;

        let before = store.workers().await;
        let report = sweep.run_once().await;
        assert!(!report.is_clean());
        assert_eq!(store.workers().await, before);
        assert!(store.task("perles-abc.1").await.is_some());
    }

    #[tokio::test]
    async fn spawned_sweep_publishes_and_stops() {
        let (store, runtime, sweep) = setup().await;
        store.assign_task("worker-1", "perles-abc.1").await.unwrap();
        runtime.set_status("worker-1", ProcessStatus::Retired).await;

        let sweep = Arc::new(sweep);
        let mut reports = sweep.subscribe();
        let cancel = CancellationToken::new();
        let handle = sweep.clone().spawn(Duration::from_millis(10), cancel.clone());

        let report = tokio::time::timeout(Duration::from_secs(2), reports.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.orphaned_tasks, vec!["perles-abc.1".to_string()]);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
