//! Command execution against the Postgres event store.
//!
//! A command arrives as its tagged serialized form; the executor resolves
//! the handler by the type discriminator, opens one store transaction,
//! hands the handler a transaction-scoped [`PgAccess`] handle to project
//! its decision model and produce candidate events, performs the
//! conditional append and the command audit, and classifies the outcome.
//! The executor never retries: concurrency violations and domain failures
//! are surfaced to the caller, who owns the retry strategy.
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use cordon::{
    BoxDynError, Clock, Command, CommandResult, Execution, Metric, SystemClock,
};
use cordon_serde::Serde;

use crate::event_store::PgAccess;
use crate::{Error, PgEventStore};

/// Handles one command type.
///
/// A handler projects whatever decision model it needs through the
/// transaction-scoped store handle, validates the command against it and
/// returns the candidate events together with the append condition scoped
/// to the cursor it observed. Handlers must be side-effect-free outside the
/// store handle and must return [`CommandResult::empty`] when the state
/// already reflects the command.
#[async_trait]
pub trait CommandHandler<P>: Send + Sync {
    /// The command type discriminator this handler accepts.
    fn command_type(&self) -> &'static str;

    /// Handles the command on the enclosing transaction.
    async fn handle(
        &self,
        store: &mut PgAccess<'_, P>,
        command: &Command,
    ) -> Result<CommandResult<P>, BoxDynError>;
}

/// Represents a handler registry wiring error.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// two handlers declared the same command type
    #[error("duplicate handler registered for command type {0:?}")]
    Duplicate(String),
}

/// Represents all the ways executing a command can fail.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// no handler is registered for the command type
    #[error("unknown command type: {0:?}")]
    UnknownCommand(String),
    /// the command is malformed
    #[error("invalid command: {0}")]
    InvalidCommand(String),
    /// the append condition rejected the write; the caller may re-project
    /// and retry
    #[error("concurrent modification error")]
    Concurrency,
    /// the handler raised a domain failure; propagated verbatim
    #[error("domain error: {0}")]
    Domain(#[source] BoxDynError),
    /// the store failed
    #[error(transparent)]
    Store(#[from] Error),
}

impl ExecutionError {
    /// A short stable label of the failure kind, used in metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionError::UnknownCommand(_) => "unknown_command",
            ExecutionError::InvalidCommand(_) => "invalid_command",
            ExecutionError::Concurrency => "concurrency_violation",
            ExecutionError::Domain(_) => "domain_failure",
            ExecutionError::Store(Error::Timeout) => "timeout",
            ExecutionError::Store(_) => "storage_failure",
        }
    }
}

fn map_store(err: Error) -> ExecutionError {
    match err {
        Error::Concurrency => ExecutionError::Concurrency,
        other => ExecutionError::Store(other),
    }
}

/// Builder of a [`CommandExecutor`]; rejects duplicate registrations.
pub struct CommandExecutorBuilder<P, S>
where
    S: Serde<P> + Send + Sync,
{
    store: PgEventStore<P, S>,
    handlers: HashMap<&'static str, Arc<dyn CommandHandler<P>>>,
    clock: Arc<dyn Clock>,
}

impl<P, S> std::fmt::Debug for CommandExecutorBuilder<P, S>
where
    S: Serde<P> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandExecutorBuilder")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<P, S> CommandExecutorBuilder<P, S>
where
    P: Send + Sync,
    S: Serde<P> + Send + Sync,
{
    /// Registers a handler.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] if a handler for the same
    /// command type is already registered.
    pub fn register(
        mut self,
        handler: impl CommandHandler<P> + 'static,
    ) -> Result<Self, RegistryError> {
        let command_type = handler.command_type();
        if self.handlers.contains_key(command_type) {
            return Err(RegistryError::Duplicate(command_type.to_string()));
        }
        self.handlers.insert(command_type, Arc::new(handler));
        Ok(self)
    }

    /// Replaces the clock used for durations.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn build(self) -> CommandExecutor<P, S> {
        CommandExecutor {
            store: self.store,
            handlers: self.handlers,
            clock: self.clock,
        }
    }
}

/// Executes commands in one store transaction each.
pub struct CommandExecutor<P, S>
where
    S: Serde<P> + Send + Sync,
{
    store: PgEventStore<P, S>,
    handlers: HashMap<&'static str, Arc<dyn CommandHandler<P>>>,
    clock: Arc<dyn Clock>,
}

impl<P, S> CommandExecutor<P, S>
where
    P: Send + Sync,
    S: Serde<P> + Send + Sync,
{
    /// Starts building an executor over the given store.
    pub fn builder(store: PgEventStore<P, S>) -> CommandExecutorBuilder<P, S> {
        CommandExecutorBuilder {
            store,
            handlers: HashMap::new(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Executes one command.
    ///
    /// Opens a transaction, invokes the resolved handler, then either
    /// commits the audit row alone (idempotent path) or performs the
    /// conditional append followed by the audit row. Command persistence is
    /// governed by the store configuration.
    pub async fn execute(&self, command: &Command) -> Result<Execution, ExecutionError> {
        if command.command_type.is_empty() {
            return Err(ExecutionError::InvalidCommand(
                "missing command type discriminator".to_string(),
            ));
        }
        let handler = self
            .handlers
            .get(command.command_type.as_str())
            .cloned()
            .ok_or_else(|| ExecutionError::UnknownCommand(command.command_type.clone()))?;

        self.store.metrics().publish(Metric::CommandStarted);
        let started = self.clock.now();

        let result = self.run(handler, command).await;

        let duration = (self.clock.now() - started).to_std().unwrap_or_default();
        match &result {
            Ok(Execution::Created { transaction_id }) => {
                debug!(
                    command_type = %command.command_type,
                    %transaction_id,
                    "command created events"
                );
                self.store.metrics().publish(Metric::CommandSucceeded {
                    command_type: command.command_type.clone(),
                    duration,
                });
            }
            Ok(Execution::Idempotent { reason }) => {
                debug!(command_type = %command.command_type, %reason, "command was idempotent");
                self.store.metrics().publish(Metric::IdempotentOperation {
                    command_type: command.command_type.clone(),
                });
            }
            Err(err) => {
                warn!(command_type = %command.command_type, error = %err, "command failed");
                self.store.metrics().publish(Metric::CommandFailed {
                    command_type: command.command_type.clone(),
                    error_kind: err.kind().to_string(),
                });
            }
        }
        result
    }

    async fn run(
        &self,
        handler: Arc<dyn CommandHandler<P>>,
        command: &Command,
    ) -> Result<Execution, ExecutionError> {
        let persist_commands = self.store.config().persist_commands;
        let mut tx = self.store.begin().await.map_err(map_store)?;
        let mut access = self.store.access(&mut tx);

        let outcome = handler.handle(&mut access, command).await;
        match outcome {
            Err(domain) => {
                drop(access);
                let _ = tx.rollback().await;
                Err(ExecutionError::Domain(domain))
            }
            Ok(CommandResult::NoOp { reason }) => {
                let audit = if persist_commands {
                    access.store_command(command).await
                } else {
                    Ok(())
                };
                drop(access);
                if let Err(err) = audit {
                    let _ = tx.rollback().await;
                    return Err(map_store(err));
                }
                tx.commit().await.map_err(|e| map_store(Error::Database(e)))?;
                Ok(Execution::Idempotent { reason })
            }
            Ok(CommandResult::Append { events, condition }) => {
                let appended = access.append_if(events, condition).await;
                let transaction_id = match appended {
                    Err(err) => {
                        drop(access);
                        let _ = tx.rollback().await;
                        return Err(map_store(err));
                    }
                    Ok(transaction_id) => transaction_id,
                };
                let audit = if persist_commands {
                    access.store_command(command).await
                } else {
                    Ok(())
                };
                drop(access);
                if let Err(err) = audit {
                    let _ = tx.rollback().await;
                    return Err(map_store(err));
                }
                tx.commit().await.map_err(|e| map_store(Error::Database(e)))?;
                Ok(Execution::Created { transaction_id })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cordon_serde::json::Json;
    use sqlx::PgPool;

    struct NoopHandler(&'static str);

    #[async_trait]
    impl CommandHandler<serde_json::Value> for NoopHandler {
        fn command_type(&self) -> &'static str {
            self.0
        }

        async fn handle(
            &self,
            _store: &mut PgAccess<'_, serde_json::Value>,
            _command: &Command,
        ) -> Result<CommandResult<serde_json::Value>, BoxDynError> {
            Ok(CommandResult::empty("noop"))
        }
    }

    fn lazy_store() -> PgEventStore<serde_json::Value, Json<serde_json::Value>> {
        let pool = PgPool::connect_lazy("postgres://localhost/unused").unwrap();
        PgEventStore::new_uninitialized(pool, Json::default())
    }

    #[tokio::test]
    async fn it_rejects_duplicate_handler_registrations() {
        let err = CommandExecutor::builder(lazy_store())
            .register(NoopHandler("OpenWallet"))
            .unwrap()
            .register(NoopHandler("OpenWallet"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate(t) if t == "OpenWallet"));
    }

    #[tokio::test]
    async fn it_fails_fast_on_an_unknown_command() {
        let executor = CommandExecutor::builder(lazy_store())
            .register(NoopHandler("OpenWallet"))
            .unwrap()
            .build();

        let err = executor
            .execute(&Command::new("CloseWallet", ()).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::UnknownCommand(t) if t == "CloseWallet"));
    }

    #[tokio::test]
    async fn it_rejects_a_command_without_a_discriminator() {
        let executor = CommandExecutor::builder(lazy_store()).build();

        let err = executor
            .execute(&Command::new("", ()).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidCommand(_)));
    }
}
