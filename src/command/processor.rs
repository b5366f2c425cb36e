//! Command processor — bounded FIFO queue with a single consumer.
//!
//! Every state-changing operation is funnelled through here, so handlers run
//! one at a time in submission order and never contend with each other.
//!
//! Timeouts: a `submit_and_wait` caller that gives up drops its completion
//! channel. The consumer checks that channel before starting a command and
//! skips it if nobody is waiting. A command that already started runs to
//! completion and its result is discarded.

use std::time::{Duration, Instant};

use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::registry::HandlerRegistry;
use super::types::{Command, CommandResult};
use crate::error::CommandError;

struct Envelope {
    id: Uuid,
    command: Command,
    reply: Option<oneshot::Sender<CommandResult>>,
}

pub struct CommandProcessor {
    tx: mpsc::Sender<Envelope>,
    cancel: CancellationToken,
    consumer: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl CommandProcessor {
    /// Start the consumer loop with a queue of `capacity` commands.
    pub fn start(capacity: usize, registry: HandlerRegistry) -> Self {
        let missing = registry.missing();
        if !missing.is_empty() {
            tracing::warn!(missing = ?missing, "Command processor started without some handlers");
        }

        let (tx, rx) = mpsc::channel(capacity.max(1));
        let cancel = CancellationToken::new();
        let consumer = tokio::spawn(run(rx, registry, cancel.clone()));

        Self {
            tx,
            cancel,
            consumer: Mutex::new(Some(consumer)),
        }
    }

    /// Enqueue without waiting for the result. Waits only while the queue is
    /// full.
    pub async fn submit(&self, command: Command) -> Result<Uuid, CommandError> {
        let id = Uuid::new_v4();
        self.enqueue(Envelope {
            id,
            command,
            reply: None,
        })
        .await?;
        Ok(id)
    }

    /// Enqueue and wait for the result, up to `timeout` in total.
    pub async fn submit_and_wait(
        &self,
        command: Command,
        timeout: Duration,
    ) -> Result<CommandResult, CommandError> {
        let kind = command.kind();
        let (reply_tx, reply_rx) = oneshot::channel();
        let envelope = Envelope {
            id: Uuid::new_v4(),
            command,
            reply: Some(reply_tx),
        };

        let outcome = tokio::time::timeout(timeout, async {
            self.enqueue(envelope).await?;
            reply_rx.await.map_err(|_| CommandError::Dropped { kind })
        })
        .await;

        match outcome {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(kind = %kind, timeout_ms = timeout.as_millis() as u64, "Command timed out");
                Err(CommandError::Timeout { kind, timeout })
            }
        }
    }

    /// Stop the consumer. The command being handled finishes; anything still
    /// queued is dropped and its waiters see [`CommandError::Dropped`].
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(consumer) = self.consumer.lock().await.take()
            && let Err(e) = consumer.await
        {
            tracing::error!("Command processor task failed: {}", e);
        }
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && !self.tx.is_closed()
    }

    async fn enqueue(&self, envelope: Envelope) -> Result<(), CommandError> {
        if self.cancel.is_cancelled() {
            return Err(CommandError::QueueClosed);
        }
        let kind = envelope.command.kind();
        self.tx
            .send(envelope)
            .await
            .map_err(|_| CommandError::QueueClosed)?;
        tracing::debug!(kind = %kind, "Command queued");
        Ok(())
    }
}

async fn run(
    mut rx: mpsc::Receiver<Envelope>,
    registry: HandlerRegistry,
    cancel: CancellationToken,
) {
    tracing::info!("Command processor started");
    loop {
        let envelope = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(envelope) => envelope,
                None => break,
            },
        };

        if envelope.reply.as_ref().is_some_and(|reply| reply.is_closed()) {
            tracing::debug!(
                command_id = %envelope.id,
                kind = %envelope.command.kind(),
                "Skipping command abandoned by its caller"
            );
            continue;
        }

        let result = dispatch(&registry, envelope.id, envelope.command).await;
        if let Some(reply) = envelope.reply
            && reply.send(result).is_err()
        {
            tracing::debug!(command_id = %envelope.id, "Result discarded: caller stopped waiting");
        }
    }
    rx.close();
    tracing::info!("Command processor stopped");
}

async fn dispatch(registry: &HandlerRegistry, id: Uuid, command: Command) -> CommandResult {
    let kind = command.kind();
    let Some(handler) = registry.get(kind) else {
        let err = CommandError::NoHandler { kind };
        tracing::warn!(command_id = %id, kind = %kind, "No handler registered");
        return CommandResult::failed(id, kind, &err);
    };

    let started_at = Instant::now();
    // Run on its own task so a panicking handler fails the command, not the loop.
    let outcome = tokio::spawn(async move { handler.handle(command).await }).await;
    let duration_ms = started_at.elapsed().as_millis() as u64;

    match outcome {
        Ok(Ok(output)) => {
            tracing::info!(command_id = %id, kind = %kind, duration_ms, "{}", output.message);
            CommandResult::succeeded(id, kind, output)
        }
        Ok(Err(err)) => {
            tracing::warn!(command_id = %id, kind = %kind, duration_ms, error = %err, "Command failed");
            CommandResult::failed(id, kind, &err)
        }
        Err(join_err) => {
            let reason = panic_reason(join_err);
            tracing::error!(command_id = %id, kind = %kind, reason = %reason, "Command handler panicked");
            CommandResult::failed(id, kind, &CommandError::HandlerPanicked { kind, reason })
        }
    }
}

fn panic_reason(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::command::registry::CommandHandler;
    use crate::command::types::{CommandKind, CommandOutput};

    /// Records the order commands arrive in, optionally sleeping first.
    struct Recorder {
        seen: Arc<std::sync::Mutex<Vec<String>>>,
        delay: Duration,
    }

    #[async_trait]
    impl CommandHandler for Recorder {
        async fn handle(&self, command: Command) -> Result<CommandOutput, CommandError> {
            tokio::time::sleep(self.delay).await;
            let label = match &command {
                Command::SendToWorker { message, .. } => message.clone(),
                other => other.kind().to_string(),
            };
            self.seen.lock().unwrap().push(label.clone());
            Ok(CommandOutput::new(label))
        }
    }

    struct Panics;

    #[async_trait]
    impl CommandHandler for Panics {
        async fn handle(&self, _command: Command) -> Result<CommandOutput, CommandError> {
            panic!("handler blew up");
        }
    }

    struct Counter(AtomicUsize);

    #[async_trait]
    impl CommandHandler for Counter {
        async fn handle(&self, _command: Command) -> Result<CommandOutput, CommandError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(CommandOutput::new("counted"))
        }
    }

    fn send(message: &str) -> Command {
        Command::SendToWorker {
            worker_id: "worker-1".to_string(),
            message: message.to_string(),
        }
    }

    fn recorder(delay: Duration) -> (HandlerRegistry, Arc<std::sync::Mutex<Vec<String>>>) {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut registry = HandlerRegistry::new();
        registry.register(
            CommandKind::SendToWorker,
            Arc::new(Recorder {
                seen: seen.clone(),
                delay,
            }),
        );
        (registry, seen)
    }

    #[tokio::test]
    async fn processes_in_submission_order() {
        let (registry, seen) = recorder(Duration::from_millis(5));
        let processor = CommandProcessor::start(100, registry);

        for i in 0..5 {
            processor.submit(send(&format!("m{i}"))).await.unwrap();
        }
        let last = processor
            .submit_and_wait(send("last"), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(last.success);

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["m0", "m1", "m2", "m3", "m4", "last"]
        );
        processor.shutdown().await;
    }

    #[tokio::test]
    async fn missing_handler_is_failure_result() {
        let processor = CommandProcessor::start(10, HandlerRegistry::new());
        let result = processor
            .submit_and_wait(
                Command::MarkTaskComplete {
                    task_id: "perles-abc.1".to_string(),
                },
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.kind, CommandKind::MarkTaskComplete);
        assert!(result.error.unwrap().contains("no handler"));
        processor.shutdown().await;
    }

    #[tokio::test]
    async fn panic_becomes_failure_and_loop_survives() {
        let (mut registry, _) = recorder(Duration::ZERO);
        registry.register(CommandKind::MarkTaskComplete, Arc::new(Panics));
        let processor = CommandProcessor::start(10, registry);

        let result = processor
            .submit_and_wait(
                Command::MarkTaskComplete {
                    task_id: "perles-abc.1".to_string(),
                },
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("handler blew up"));

        let next = processor
            .submit_and_wait(send("after"), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(next.success);
        processor.shutdown().await;
    }

    #[tokio::test]
    async fn timed_out_command_never_starts() {
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let (mut registry, _) = recorder(Duration::from_millis(200));
        registry.register(CommandKind::StopWorker, counter.clone());
        let processor = CommandProcessor::start(10, registry);

        // Occupy the consumer so the next command waits in the queue.
        processor.submit(send("slow")).await.unwrap();
        let stop = Command::StopWorker {
            worker_id: "worker-1".to_string(),
            force: false,
            reason: None,
        };
        let err = processor
            .submit_and_wait(stop, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Timeout { kind: CommandKind::StopWorker, .. }));

        // Flush the queue.
        processor
            .submit_and_wait(send("flush"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
        processor.shutdown().await;
    }

    #[tokio::test]
    async fn started_command_completes_after_timeout() {
        let (registry, seen) = recorder(Duration::from_millis(100));
        let processor = CommandProcessor::start(10, registry);

        let err = processor
            .submit_and_wait(send("slow"), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Timeout { .. }));

        processor
            .submit_and_wait(send("flush"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["slow", "flush"]);
        processor.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_finishes_in_flight_and_drops_queue() {
        let (registry, seen) = recorder(Duration::from_millis(100));
        let processor = Arc::new(CommandProcessor::start(10, registry));

        let in_flight = {
            let processor = processor.clone();
            tokio::spawn(async move {
                processor
                    .submit_and_wait(send("in-flight"), Duration::from_secs(5))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let queued = {
            let processor = processor.clone();
            tokio::spawn(async move {
                processor
                    .submit_and_wait(send("queued"), Duration::from_secs(5))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        processor.shutdown().await;

        let first = in_flight.await.unwrap().unwrap();
        assert!(first.success);
        let second = queued.await.unwrap();
        assert!(matches!(second, Err(CommandError::Dropped { .. })));
        assert_eq!(*seen.lock().unwrap(), vec!["in-flight"]);

        assert!(!processor.is_running());
        assert!(matches!(
            processor.submit(send("late")).await,
            Err(CommandError::QueueClosed)
        ));
    }
}
