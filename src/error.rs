//! Error types for the orchestrator.

use std::time::Duration;

use crate::command::CommandKind;

/// Top-level error type for the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid input: {0}")]
    Input(#[from] InputError),

    #[error("{0}")]
    Assignment(#[from] AssignmentError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),
}

/// Malformed tool arguments, rejected before any store access.
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("invalid task ID {task_id:?}: {reason}")]
    InvalidTaskId { task_id: String, reason: String },

    #[error("invalid worker ID {worker_id:?}: {reason}")]
    InvalidWorkerId { worker_id: String, reason: String },

    #[error("{field} is required")]
    MissingField { field: &'static str },
}

/// Assignment validation and workflow transition failures.
///
/// Display strings are surfaced verbatim to the tool layer, so each one names
/// the conflicting entity.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssignmentError {
    #[error("task {task_id} already assigned to {holder}")]
    AlreadyAssigned { task_id: String, holder: String },

    #[error("worker {worker_id} already assigned to task {task_id}")]
    WorkerBusy { worker_id: String, task_id: String },

    #[error("worker {worker_id} not found")]
    NotFound { worker_id: String },

    #[error("worker {worker_id} is not ready (status: {status})")]
    NotReady { worker_id: String, status: String },

    #[error("reviewer cannot be the same as implementer")]
    SelfReview,

    #[error("task mismatch for {task_id}: {reason}")]
    TaskMismatch { task_id: String, reason: String },

    #[error("implementer {worker_id} is not awaiting review (phase: {phase})")]
    NotAwaitingReview { worker_id: String, phase: String },

    #[error("task {task_id} already has reviewer {reviewer}")]
    ReviewerAlreadySet { task_id: String, reviewer: String },

    #[error("reviewer {worker_id} is not ready (status: {status})")]
    ReviewerNotReady { worker_id: String, status: String },

    #[error("task {task_id} has no assignment")]
    TaskNotFound { task_id: String },

    #[error("worker {worker_id} has no active task")]
    NoActiveTask { worker_id: String },

    #[error("worker {worker_id} cannot move from phase {from} to {to}")]
    InvalidPhaseTransition {
        worker_id: String,
        from: String,
        to: String,
    },

    #[error("task {task_id} cannot move from status {from} to {to}")]
    InvalidStatusTransition {
        task_id: String,
        from: String,
        to: String,
    },
}

/// Command submission and execution errors.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("command processor is not accepting commands")]
    QueueClosed,

    #[error("command {kind} timed out after {timeout:?}")]
    Timeout { kind: CommandKind, timeout: Duration },

    #[error("command processor stopped before {kind} completed")]
    Dropped { kind: CommandKind },

    #[error("no handler registered for command {kind}")]
    NoHandler { kind: CommandKind },

    #[error("handler for {kind} panicked: {reason}")]
    HandlerPanicked { kind: CommandKind, reason: String },

    #[error("{handler} handler cannot process {received} commands")]
    UnexpectedCommand {
        handler: &'static str,
        received: CommandKind,
    },

    #[error("{0}")]
    Assignment(#[from] AssignmentError),

    #[error("{0}")]
    Process(#[from] ProcessError),

    #[error("{0}")]
    Tracker(#[from] TrackerError),
}

/// Process runtime errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProcessError {
    #[error("process {id} not found")]
    NotFound { id: String },

    #[error("process {id} is retired")]
    Retired { id: String },

    #[error("failed to spawn worker: {reason}")]
    SpawnFailed { reason: String },

    #[error("failed to resume process {id}: {reason}")]
    ResumeFailed { id: String, reason: String },

    #[error("failed to stop process {id}: {reason}")]
    StopFailed { id: String, reason: String },
}

/// Task tracker errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TrackerError {
    #[error("issue {task_id} not found")]
    IssueNotFound { task_id: String },

    #[error("tracker {operation} failed for {task_id}: {reason}")]
    RequestFailed {
        operation: &'static str,
        task_id: String,
        reason: String,
    },
}

/// Result type alias for the orchestrator.
pub type Result<T> = std::result::Result<T, Error>;
