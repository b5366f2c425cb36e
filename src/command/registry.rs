//! Handler registry — command kind to handler.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::types::{Command, CommandKind, CommandOutput};
use crate::error::CommandError;

/// Executes commands of one or more kinds.
///
/// A handler either applies a command fully or returns an error before it
/// writes to the assignment store.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, command: Command) -> Result<CommandOutput, CommandError>;
}

/// Static dispatch table, built once before the processor starts.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<CommandKind, Arc<dyn CommandHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `kind`, replacing any previous one.
    pub fn register(&mut self, kind: CommandKind, handler: Arc<dyn CommandHandler>) {
        if self.handlers.insert(kind, handler).is_some() {
            tracing::warn!(kind = %kind, "Replaced existing command handler");
        }
        tracing::debug!("Registered command handler: {}", kind);
    }

    pub fn get(&self, kind: CommandKind) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn has(&self, kind: CommandKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Kinds with no registered handler.
    pub fn missing(&self) -> Vec<CommandKind> {
        CommandKind::ALL
            .into_iter()
            .filter(|kind| !self.has(*kind))
            .collect()
    }

    pub fn count(&self) -> usize {
        self.handlers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl CommandHandler for Echo {
        async fn handle(&self, command: Command) -> Result<CommandOutput, CommandError> {
            Ok(CommandOutput::new(command.kind().to_string()))
        }
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = HandlerRegistry::new();
        assert_eq!(registry.missing().len(), CommandKind::ALL.len());

        registry.register(CommandKind::SpawnWorker, Arc::new(Echo));
        assert!(registry.has(CommandKind::SpawnWorker));
        assert!(registry.get(CommandKind::StopWorker).is_none());
        assert_eq!(registry.count(), 1);
        assert!(!registry.missing().contains(&CommandKind::SpawnWorker));
    }
}
