//! Worker and task assignments.
//!
//! - [`AssignmentStore`] owns both maps and applies workflow transitions.
//! - [`AssignmentValidator`] joins store checks with the live process set.
//! - [`ConsistencySweep`] reports orphaned tasks and stuck workers.

pub mod model;
pub mod store;
pub mod sweep;
pub mod validator;

pub use model::{TaskAssignment, WorkerAssignment, WorkflowCompletion, WorkflowOutcome};
pub use store::{AssignmentStore, InvariantViolation, ReleasedWorkers, VerdictOutcome};
pub use sweep::{ConsistencySweep, SweepReport};
pub use validator::AssignmentValidator;
