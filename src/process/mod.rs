//! Process runtime seam — the live worker process set.
//!
//! The orchestrator never spawns processes itself. It talks to a
//! [`ProcessRuntime`] that owns the agent processes and exposes their status.

pub mod dedup;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProcessError;
use crate::workflow::WorkerPhase;

pub use dedup::MessageDeduplicator;
pub use memory::InMemoryRuntime;

/// Runtime status of a worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    /// Idle and able to accept a message.
    Ready,
    /// Currently running a turn.
    Working,
    /// Permanently shut down.
    Retired,
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Ready => "ready",
            Self::Working => "working",
            Self::Retired => "retired",
        };
        write!(f, "{s}")
    }
}

/// Snapshot of one process in the live set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub id: String,
    pub status: ProcessStatus,
    pub phase: WorkerPhase,
    pub task_id: Option<String>,
    pub session_id: Option<String>,
}

impl ProcessInfo {
    pub fn is_retired(&self) -> bool {
        self.status == ProcessStatus::Retired
    }
}

/// Parameters for spawning a worker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpawnConfig {
    /// Agent flavour requested by the coordinator (e.g. "claude", "codex").
    pub agent_type: Option<String>,
    /// Worker being replaced, if this spawn is part of a replacement.
    pub replaces: Option<String>,
}

/// Identity of a freshly spawned worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnedProcess {
    pub process_id: String,
    pub session_id: String,
}

/// Contract of the process-spawning layer.
#[async_trait]
pub trait ProcessRuntime: Send + Sync {
    /// Start a new worker process.
    async fn spawn(&self, config: SpawnConfig) -> Result<SpawnedProcess, ProcessError>;

    /// Deliver a message to a worker, resuming its session.
    async fn resume(&self, process_id: &str, message: &str) -> Result<(), ProcessError>;

    /// Stop a worker's current turn. `grace` is ignored when `force` is set.
    async fn stop(&self, process_id: &str, force: bool, grace: Duration)
    -> Result<(), ProcessError>;

    /// Permanently retire a worker.
    async fn retire(&self, process_id: &str, reason: &str) -> Result<(), ProcessError>;

    /// Mirror the orchestrator's view of the worker onto the process record.
    async fn set_assignment(
        &self,
        process_id: &str,
        phase: WorkerPhase,
        task_id: Option<&str>,
    ) -> Result<(), ProcessError>;

    /// Look up a single process.
    async fn get(&self, process_id: &str) -> Option<ProcessInfo>;

    /// Snapshot of the whole live set.
    async fn list(&self) -> Vec<ProcessInfo>;
}
