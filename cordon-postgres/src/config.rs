//! Configuration of the Postgres event store and the outbox.
//!
//! These structs are the configuration contract; parsing them from files or
//! the environment is the embedding application's job. All defaults match
//! the documented operational defaults.
use std::time::Duration;

use cordon::BackoffConfig;
use serde::Deserialize;

/// Event store configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EventStoreConfig {
    /// Whether command audit rows are persisted alongside events.
    pub persist_commands: bool,
    /// Isolation level applied to store transactions.
    pub transaction_isolation: IsolationLevel,
    /// Page size of streamed reads.
    pub fetch_size: usize,
    /// Deadline of a single database call, in milliseconds.
    pub db_timeout_ms: u64,
}

impl Default for EventStoreConfig {
    fn default() -> Self {
        Self {
            persist_commands: true,
            transaction_isolation: IsolationLevel::ReadCommitted,
            fetch_size: 1000,
            db_timeout_ms: 15_000,
        }
    }
}

impl EventStoreConfig {
    pub(crate) fn db_timeout(&self) -> Duration {
        Duration::from_millis(self.db_timeout_ms)
    }
}

/// Transaction isolation level of store transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IsolationLevel {
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub(crate) fn set_statement(&self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "SET TRANSACTION ISOLATION LEVEL READ COMMITTED",
            IsolationLevel::RepeatableRead => "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ",
            IsolationLevel::Serializable => "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE",
        }
    }
}

/// Outbox configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OutboxConfig {
    /// Whether workers are started at all.
    pub enabled: bool,
    /// Default polling interval of a worker, in milliseconds. Overridable
    /// per publisher.
    pub polling_interval_ms: u64,
    /// Events fetched per poll.
    pub batch_size: usize,
    /// Consecutive publish failures before a row is auto-paused.
    pub max_retries: u32,
    /// Delay before the next attempt after a publish failure, in
    /// milliseconds.
    pub retry_delay_ms: u64,
    /// Idle-poll backoff.
    pub backoff: BackoffConfig,
    /// Declarative topic registrations.
    pub topics: Vec<TopicConfig>,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            polling_interval_ms: 1000,
            batch_size: 100,
            max_retries: 3,
            retry_delay_ms: 5000,
            backoff: BackoffConfig::default(),
            topics: Vec::new(),
        }
    }
}

impl OutboxConfig {
    pub(crate) fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms.max(1))
    }

    pub(crate) fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// The polling interval configured for a given (topic, publisher), if
    /// one overrides the global default.
    pub fn publisher_polling_interval(&self, topic: &str, publisher: &str) -> Option<Duration> {
        self.topics
            .iter()
            .find(|t| t.name == topic)?
            .publishers
            .iter()
            .find(|p| p.name == publisher)?
            .polling_interval_ms
            .map(Duration::from_millis)
    }
}

/// A named subset of the event stream defined by tag predicates.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TopicConfig {
    pub name: String,
    /// Tag keys that must all be present on matching events.
    pub required_tags: Vec<String>,
    /// Tag keys of which at least one must be present.
    pub any_of_tags: Vec<String>,
    /// `"key=value"` pairs that must match exactly.
    pub exact_tags: Vec<String>,
    pub publishers: Vec<PublisherConfig>,
}

/// Per-publisher settings of a topic.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PublisherConfig {
    pub name: String,
    pub polling_interval_ms: Option<u64>,
}
