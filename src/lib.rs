//! AI Orchestrator — task/worker assignment and serialized command processing
//! for a pool of coding-agent workers.

pub mod assignment;
pub mod command;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod process;
pub mod safety;
pub mod tracker;
pub mod workflow;

pub use config::OrchestratorConfig;
pub use coordinator::{Coordinator, ToolResponse};
pub use error::{Error, Result};
