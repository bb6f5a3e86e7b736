//! # PostgreSQL Cordon Backend Library
mod config;
mod error;
mod event_store;
mod executor;
mod migrator;
mod outbox;

pub use crate::config::{
    EventStoreConfig, IsolationLevel, OutboxConfig, PublisherConfig, TopicConfig,
};
pub use crate::error::Error;
pub use crate::event_store::{PgAccess, PgEventStore};
pub use crate::executor::{
    CommandExecutor, CommandExecutorBuilder, CommandHandler, ExecutionError, RegistryError,
};
pub use crate::migrator::Migrator;
pub use crate::outbox::{
    OutboxAdmin, PgOutboxProcessor, ProgressRow, PublishMode, Publisher, Topic, TopicError,
    WorkerStatus,
};
