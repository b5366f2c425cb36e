//! Workflow state machines — worker phases and task statuses.
//!
//! - `phase` — per-worker phase table (Idle → Implementing → AwaitingReview → ...)
//! - `status` — per-task status table (Implementing → InReview → Approved/Denied → ...)

pub mod phase;
pub mod status;

pub use phase::{PhaseEvent, WorkerPhase, WorkerRole};
pub use status::{ReviewVerdict, TaskStatus};
