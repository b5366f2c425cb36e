//! In-memory process runtime.
//!
//! Keeps the live set in a map and records every call, so the orchestrator
//! can run headless and tests can assert on exactly what was dispatched.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ProcessInfo, ProcessRuntime, ProcessStatus, SpawnConfig, SpawnedProcess};
use crate::error::ProcessError;
use crate::workflow::WorkerPhase;

/// A call observed by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Spawn { process_id: String },
    Resume { process_id: String, message: String },
    Stop { process_id: String, force: bool },
    Retire { process_id: String, reason: String },
}

/// In-memory [`ProcessRuntime`].
pub struct InMemoryRuntime {
    processes: RwLock<BTreeMap<String, ProcessInfo>>,
    calls: RwLock<Vec<RuntimeCall>>,
    next_id: AtomicUsize,
    fail_spawn: AtomicBool,
    fail_resume: AtomicBool,
    resume_delay: RwLock<Duration>,
}

impl InMemoryRuntime {
    /// Create an empty runtime.
    pub fn new() -> Self {
        Self {
            processes: RwLock::new(BTreeMap::new()),
            calls: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(1),
            fail_spawn: AtomicBool::new(false),
            fail_resume: AtomicBool::new(false),
            resume_delay: RwLock::new(Duration::ZERO),
        }
    }

    /// Register a process directly, bypassing `spawn`.
    pub async fn add_process(&self, id: impl Into<String>, status: ProcessStatus) {
        let id = id.into();
        self.processes.write().await.insert(
            id.clone(),
            ProcessInfo {
                id,
                status,
                phase: WorkerPhase::Idle,
                task_id: None,
                session_id: Some(Uuid::new_v4().to_string()),
            },
        );
    }

    /// Overwrite a process status. Returns false if the process is unknown.
    pub async fn set_status(&self, id: &str, status: ProcessStatus) -> bool {
        match self.processes.write().await.get_mut(id) {
            Some(info) => {
                info.status = status;
                true
            }
            None => false,
        }
    }

    /// Drop a process from the live set entirely.
    pub async fn remove_process(&self, id: &str) -> Option<ProcessInfo> {
        self.processes.write().await.remove(id)
    }

    /// Make subsequent `spawn` calls fail.
    pub fn fail_spawns(&self, fail: bool) {
        self.fail_spawn.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `resume` calls fail.
    pub fn fail_resumes(&self, fail: bool) {
        self.fail_resume.store(fail, Ordering::SeqCst);
    }

    /// Delay every `resume` call, to simulate a slow process.
    pub async fn set_resume_delay(&self, delay: Duration) {
        *self.resume_delay.write().await = delay;
    }

    /// All calls observed so far, in order.
    pub async fn calls(&self) -> Vec<RuntimeCall> {
        self.calls.read().await.clone()
    }

    /// Number of resume calls delivered to `process_id`.
    pub async fn resume_count(&self, process_id: &str) -> usize {
        self.calls
            .read()
            .await
            .iter()
            .filter(|c| matches!(c, RuntimeCall::Resume { process_id: p, .. } if p == process_id))
            .count()
    }

    /// Number of spawn calls that succeeded.
    pub async fn spawn_count(&self) -> usize {
        self.calls
            .read()
            .await
            .iter()
            .filter(|c| matches!(c, RuntimeCall::Spawn { .. }))
            .count()
    }

    async fn record(&self, call: RuntimeCall) {
        self.calls.write().await.push(call);
    }

    async fn live(&self, process_id: &str) -> Result<(), ProcessError> {
        match self.processes.read().await.get(process_id) {
            None => Err(ProcessError::NotFound {
                id: process_id.to_string(),
            }),
            Some(info) if info.is_retired() => Err(ProcessError::Retired {
                id: process_id.to_string(),
            }),
            Some(_) => Ok(()),
        }
    }
}

impl Default for InMemoryRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessRuntime for InMemoryRuntime {
    async fn spawn(&self, config: SpawnConfig) -> Result<SpawnedProcess, ProcessError> {
        if self.fail_spawn.load(Ordering::SeqCst) {
            return Err(ProcessError::SpawnFailed {
                reason: "spawn disabled".to_string(),
            });
        }

        let mut processes = self.processes.write().await;
        let process_id = loop {
            let n = self.next_id.fetch_add(1, Ordering::SeqCst);
            let candidate = format!("worker-{n}");
            if !processes.contains_key(&candidate) {
                break candidate;
            }
        };
        let session_id = Uuid::new_v4().to_string();
        processes.insert(
            process_id.clone(),
            ProcessInfo {
                id: process_id.clone(),
                status: ProcessStatus::Ready,
                phase: WorkerPhase::Idle,
                task_id: None,
                session_id: Some(session_id.clone()),
            },
        );
        drop(processes);

        tracing::debug!(
            process_id = %process_id,
            agent_type = ?config.agent_type,
            "Spawned in-memory process"
        );
        self.record(RuntimeCall::Spawn {
            process_id: process_id.clone(),
        })
        .await;

        Ok(SpawnedProcess {
            process_id,
            session_id,
        })
    }

    async fn resume(&self, process_id: &str, message: &str) -> Result<(), ProcessError> {
        self.live(process_id).await?;

        let delay = *self.resume_delay.read().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.fail_resume.load(Ordering::SeqCst) {
            return Err(ProcessError::ResumeFailed {
                id: process_id.to_string(),
                reason: "resume disabled".to_string(),
            });
        }

        self.record(RuntimeCall::Resume {
            process_id: process_id.to_string(),
            message: message.to_string(),
        })
        .await;
        Ok(())
    }

    async fn stop(
        &self,
        process_id: &str,
        force: bool,
        _grace: Duration,
    ) -> Result<(), ProcessError> {
        self.live(process_id).await?;
        self.record(RuntimeCall::Stop {
            process_id: process_id.to_string(),
            force,
        })
        .await;
        Ok(())
    }

    async fn retire(&self, process_id: &str, reason: &str) -> Result<(), ProcessError> {
        {
            let mut processes = self.processes.write().await;
            let info = processes
                .get_mut(process_id)
                .ok_or_else(|| ProcessError::NotFound {
                    id: process_id.to_string(),
                })?;
            info.status = ProcessStatus::Retired;
            info.phase = WorkerPhase::Idle;
            info.task_id = None;
        }
        self.record(RuntimeCall::Retire {
            process_id: process_id.to_string(),
            reason: reason.to_string(),
        })
        .await;
        Ok(())
    }

    async fn set_assignment(
        &self,
        process_id: &str,
        phase: WorkerPhase,
        task_id: Option<&str>,
    ) -> Result<(), ProcessError> {
        let mut processes = self.processes.write().await;
        let info = processes
            .get_mut(process_id)
            .ok_or_else(|| ProcessError::NotFound {
                id: process_id.to_string(),
            })?;
        info.phase = phase;
        info.task_id = task_id.map(str::to_string);
        Ok(())
    }

    async fn get(&self, process_id: &str) -> Option<ProcessInfo> {
        self.processes.read().await.get(process_id).cloned()
    }

    async fn list(&self) -> Vec<ProcessInfo> {
        self.processes.read().await.values().cloned().collect()
    }
}
