//! Command processing — typed commands, handler registry, and the
//! single-consumer processor that serializes every state change.

pub mod handlers;
pub mod processor;
pub mod registry;
pub mod types;

pub use handlers::{HandlerDeps, register_builtin_handlers};
pub use processor::CommandProcessor;
pub use registry::{CommandHandler, HandlerRegistry};
pub use types::{Command, CommandKind, CommandOutput, CommandResult};
