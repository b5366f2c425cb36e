//! Worker lifecycle and messaging: spawn, replace, retire, send, broadcast, stop.

use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::json;

use super::HandlerDeps;
use crate::assignment::WorkerAssignment;
use crate::command::registry::CommandHandler;
use crate::command::types::{Command, CommandOutput};
use crate::error::{CommandError, ProcessError};
use crate::process::SpawnConfig;

pub struct WorkerHandler {
    deps: HandlerDeps,
}

impl WorkerHandler {
    pub fn new(deps: HandlerDeps) -> Self {
        Self { deps }
    }

    async fn spawn_worker(&self, agent_type: Option<String>) -> Result<CommandOutput, CommandError> {
        let spawned = self
            .deps
            .runtime
            .spawn(SpawnConfig {
                agent_type,
                replaces: None,
            })
            .await?;

        Ok(CommandOutput::new(format!("Spawned worker {}", spawned.process_id)).with_data(json!({
            "worker_id": spawned.process_id,
            "session_id": spawned.session_id,
        })))
    }

    /// Release the worker's assignment, then retire its process. A process
    /// that has already vanished or been retired counts as retired.
    async fn release_and_retire(
        &self,
        worker_id: &str,
        reason: &str,
    ) -> Result<(Option<WorkerAssignment>, bool), CommandError> {
        let previous = self.deps.store.clear_worker(worker_id).await;
        self.deps.dedup.forget(worker_id);

        let live = match self.deps.runtime.retire(worker_id, reason).await {
            Ok(()) => true,
            Err(ProcessError::NotFound { .. } | ProcessError::Retired { .. }) => {
                tracing::warn!(
                    worker_id = %worker_id,
                    released_task = previous.as_ref().map(|p| p.task_id.as_str()),
                    "Worker process already gone; treating as retired"
                );
                false
            }
            Err(e) => return Err(e.into()),
        };
        Ok((previous, live))
    }

    async fn replace_worker(
        &self,
        worker_id: String,
        reason: Option<String>,
    ) -> Result<CommandOutput, CommandError> {
        let reason = reason.unwrap_or_else(|| "replaced by coordinator".to_string());

        // The assignment is released before spawning, so a failed spawn cannot
        // leave it pointing at a retired process. The task record stays behind
        // and shows up as orphaned.
        let (previous, _) = self.release_and_retire(&worker_id, &reason).await?;
        if let Some(previous) = &previous {
            tracing::warn!(
                worker_id = %worker_id,
                task_id = %previous.task_id,
                "Replaced worker held a task; it must be reassigned"
            );
        }

        let spawned = self
            .deps
            .runtime
            .spawn(SpawnConfig {
                agent_type: None,
                replaces: Some(worker_id.clone()),
            })
            .await?;

        Ok(CommandOutput::new(format!(
            "Replaced worker {} with {}",
            worker_id, spawned.process_id
        ))
        .with_data(json!({
            "retired": worker_id,
            "worker_id": spawned.process_id,
            "session_id": spawned.session_id,
            "released_task": previous.map(|p| p.task_id),
        })))
    }

    async fn retire_worker(
        &self,
        worker_id: String,
        reason: Option<String>,
    ) -> Result<CommandOutput, CommandError> {
        let reason = reason.unwrap_or_else(|| "retired by coordinator".to_string());
        let (previous, live) = self.release_and_retire(&worker_id, &reason).await?;

        Ok(CommandOutput::new(format!("Retired worker {worker_id}")).with_data(json!({
            "worker_id": worker_id,
            "reason": reason,
            "process_found": live,
            "released_task": previous.map(|p| p.task_id),
        })))
    }

    async fn send_to_worker(
        &self,
        worker_id: String,
        message: String,
    ) -> Result<CommandOutput, CommandError> {
        if self.deps.dedup.is_duplicate(&worker_id, &message) {
            return Ok(
                CommandOutput::new(format!("Message already delivered to {worker_id}"))
                    .with_data(json!({ "worker_id": worker_id, "duplicate": true })),
            );
        }

        if let Err(e) = self.deps.runtime.resume(&worker_id, &message).await {
            // Let a retry through.
            self.deps.dedup.forget(&worker_id);
            return Err(e.into());
        }

        Ok(CommandOutput::new(format!("Message sent to {worker_id}"))
            .with_data(json!({ "worker_id": worker_id, "duplicate": false })))
    }

    async fn broadcast(
        &self,
        message: String,
        exclude: Vec<String>,
    ) -> Result<CommandOutput, CommandError> {
        let targets: Vec<String> = self
            .deps
            .runtime
            .list()
            .await
            .into_iter()
            .filter(|p| !p.is_retired() && !exclude.contains(&p.id))
            .map(|p| p.id)
            .collect();

        let (duplicates, fresh): (Vec<String>, Vec<String>) = targets
            .into_iter()
            .partition(|id| self.deps.dedup.is_duplicate(id, &message));

        let results = join_all(fresh.iter().map(|id| {
            let runtime = self.deps.runtime.clone();
            let message = message.clone();
            async move { runtime.resume(id, &message).await }
        }))
        .await;

        let mut delivered = Vec::new();
        let mut failed = Vec::new();
        for (id, result) in fresh.into_iter().zip(results) {
            match result {
                Ok(()) => delivered.push(id),
                Err(e) => {
                    self.deps.dedup.forget(&id);
                    failed.push(json!({ "worker_id": id, "error": e.to_string() }));
                }
            }
        }

        if delivered.is_empty() && !failed.is_empty() {
            return Err(ProcessError::ResumeFailed {
                id: "broadcast".to_string(),
                reason: format!("all {} deliveries failed", failed.len()),
            }
            .into());
        }

        Ok(CommandOutput::new(format!(
            "Broadcast delivered to {} workers",
            delivered.len()
        ))
        .with_data(json!({
            "delivered": delivered,
            "duplicates": duplicates,
            "failed": failed,
        })))
    }

    async fn stop_worker(
        &self,
        worker_id: String,
        force: bool,
        reason: Option<String>,
    ) -> Result<CommandOutput, CommandError> {
        let grace = if force {
            Duration::ZERO
        } else {
            self.deps.config.stop_grace_period
        };
        self.deps.runtime.stop(&worker_id, force, grace).await?;

        tracing::info!(
            worker_id = %worker_id,
            force,
            reason = reason.as_deref().unwrap_or("none"),
            "Worker stopped"
        );
        Ok(CommandOutput::new(format!("Stopped worker {worker_id}")).with_data(json!({
            "worker_id": worker_id,
            "force": force,
            "reason": reason,
        })))
    }
}

#[async_trait]
impl CommandHandler for WorkerHandler {
    async fn handle(&self, command: Command) -> Result<CommandOutput, CommandError> {
        match command {
            Command::SpawnWorker { agent_type } => self.spawn_worker(agent_type).await,
            Command::ReplaceWorker { worker_id, reason } => {
                self.replace_worker(worker_id, reason).await
            }
            Command::RetireWorker { worker_id, reason } => {
                self.retire_worker(worker_id, reason).await
            }
            Command::SendToWorker { worker_id, message } => {
                self.send_to_worker(worker_id, message).await
            }
            Command::Broadcast { message, exclude } => self.broadcast(message, exclude).await,
            Command::StopWorker {
                worker_id,
                force,
                reason,
            } => self.stop_worker(worker_id, force, reason).await,
            other => Err(CommandError::UnexpectedCommand {
                handler: "worker",
                received: other.kind(),
            }),
        }
    }
}
