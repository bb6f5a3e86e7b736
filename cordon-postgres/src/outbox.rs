//! PostgreSQL outbox dispatch.
//!
//! Streams committed events to external publishers with at-least-once
//! delivery. Each (topic, publisher) registration runs as an independent
//! background worker gated by a leader lease; a worker polls for events
//! after its durable `last_position`, publishes them in position order and
//! advances the position only after the publisher reported success, so the
//! `Publisher` implementation must tolerate redelivery.
mod admin;
mod leader;
pub(crate) mod progress;
#[cfg(test)]
mod tests;
mod topic;
mod worker;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use futures::Future;
use tokio::try_join;
use tokio_util::sync::CancellationToken;
use tracing::info;

use cordon::{BoxDynError, StoredEvent};
use cordon_serde::Serde;

use crate::config::OutboxConfig;
use crate::{Error, Migrator, PgEventStore};

pub use admin::OutboxAdmin;
pub use progress::{ProgressRow, WorkerStatus};
pub use topic::{Topic, TopicError};

use worker::{OutboxWorker, WorkerSettings};

/// How a publisher prefers to receive events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublishMode {
    /// One call per fetched batch; the position advances per batch.
    #[default]
    Batch,
    /// One call per event; the position advances per event.
    Single,
}

/// An external sink receiving events from a topic.
///
/// Delivery is at-least-once: implementations must tolerate redelivery of
/// events they already processed.
#[async_trait]
pub trait Publisher<P>: Send + Sync {
    /// The publisher name; part of the progress-row key.
    fn name(&self) -> &str;

    /// Whether the sink is currently able to accept events. An unhealthy
    /// publisher skips cycles without being counted as a publish failure.
    async fn is_healthy(&self) -> bool {
        true
    }

    /// The preferred delivery mode.
    fn preferred_mode(&self) -> PublishMode {
        PublishMode::Batch
    }

    /// Delivers a batch of events, in position order.
    async fn publish_batch(&self, events: &[StoredEvent<P>]) -> Result<(), BoxDynError>;
}

struct Registration<P> {
    topic: Topic,
    publisher: Arc<dyn Publisher<P>>,
    polling_interval: Option<Duration>,
}

/// The outbox processor: spawns one worker per registration.
pub struct PgOutboxProcessor<P, S>
where
    S: Serde<P> + Send + Sync,
{
    store: PgEventStore<P, S>,
    config: OutboxConfig,
    registrations: Vec<Registration<P>>,
    shutdown: CancellationToken,
    initialize: bool,
}

impl<P, S> PgOutboxProcessor<P, S>
where
    P: Send + Sync + 'static,
    S: Serde<P> + Clone + Send + Sync + 'static,
{
    /// Creates a new `PgOutboxProcessor` over the given event store.
    pub fn builder(store: PgEventStore<P, S>, config: OutboxConfig) -> Self {
        Self {
            store,
            config,
            registrations: Vec::new(),
            shutdown: CancellationToken::new(),
            initialize: true,
        }
    }

    /// Marks the processor as uninitialized, indicating that the outbox
    /// schema is already in place.
    pub fn uninitialized(mut self) -> Self {
        self.initialize = false;
        self
    }

    /// Registers a publisher on a topic. The worker polls at the interval
    /// configured for the (topic, publisher) pair, falling back to the
    /// global default.
    pub fn register(mut self, topic: Topic, publisher: impl Publisher<P> + 'static) -> Self {
        self.registrations.push(Registration {
            topic,
            publisher: Arc::new(publisher),
            polling_interval: None,
        });
        self
    }

    /// Registers a publisher on a topic with an explicit polling interval.
    pub fn register_with_interval(
        mut self,
        topic: Topic,
        publisher: impl Publisher<P> + 'static,
        polling_interval: Duration,
    ) -> Self {
        self.registrations.push(Registration {
            topic,
            publisher: Arc::new(publisher),
            polling_interval: Some(polling_interval),
        });
        self
    }

    /// Starts every registered worker and runs until shutdown.
    pub async fn start(self) -> Result<(), Error> {
        if !self.config.enabled {
            info!("outbox is disabled, no worker started");
            return Ok(());
        }
        if self.initialize {
            Migrator::new(self.store.pool.clone()).init_outbox().await?;
        }
        let mut handles = Vec::new();
        for registration in self.registrations {
            progress::ensure_row(
                &self.store.pool,
                registration.topic.name(),
                registration.publisher.name(),
            )
            .await?;
            let polling_interval = registration
                .polling_interval
                .or_else(|| {
                    self.config.publisher_polling_interval(
                        registration.topic.name(),
                        registration.publisher.name(),
                    )
                })
                .unwrap_or_else(|| self.config.polling_interval());
            let worker = OutboxWorker {
                store: self.store.clone(),
                topic: registration.topic,
                publisher: registration.publisher,
                settings: WorkerSettings {
                    polling_interval,
                    batch_size: self.config.batch_size.max(1) as i64,
                    max_retries: self.config.max_retries,
                    retry_delay: self.config.retry_delay(),
                    backoff: self.config.backoff.clone(),
                },
                shutdown: self.shutdown.clone(),
            };
            handles.push(worker.spawn());
        }
        join_all(handles).await;
        Ok(())
    }

    /// Starts every registered worker and stops them when the given future
    /// completes. In-flight cycles finish before a worker exits.
    pub async fn start_with_shutdown<F: Future<Output = ()> + Send + 'static>(
        self,
        shutdown: F,
    ) -> Result<(), Error> {
        let shutdown_token = self.shutdown.clone();
        let shutdown_handle = async move {
            shutdown.await;
            shutdown_token.cancel();
            Ok::<(), Error>(())
        };
        try_join!(self.start(), shutdown_handle).map(|_| ())
    }
}
