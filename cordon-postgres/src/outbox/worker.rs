//! The per-(topic, publisher) worker loop.
//!
//! One cycle: consume a pending backoff skip, ensure leadership, check the
//! progress row is `ACTIVE`, fetch a batch after the last delivered
//! position, publish, advance. The position advances only after the
//! publisher reported success, so delivery is at-least-once; advancing per
//! batch (or per event in single mode) keeps it strictly position-ordered.
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use cordon::{BackoffConfig, Metric, PollBackoff, Position, StoredEvent};
use cordon_serde::Serde;

use crate::event_store::{decode_event, with_deadline, EventRow};
use crate::outbox::progress::{self, WorkerStatus};
use crate::outbox::leader::LeaderLease;
use crate::outbox::{PublishMode, Publisher, Topic};
use crate::{Error, PgEventStore};

pub(crate) struct WorkerSettings {
    pub(crate) polling_interval: std::time::Duration,
    pub(crate) batch_size: i64,
    pub(crate) max_retries: u32,
    pub(crate) retry_delay: std::time::Duration,
    pub(crate) backoff: BackoffConfig,
}

pub(crate) struct OutboxWorker<P, S>
where
    S: Serde<P> + Send + Sync,
{
    pub(crate) store: PgEventStore<P, S>,
    pub(crate) topic: Topic,
    pub(crate) publisher: Arc<dyn Publisher<P>>,
    pub(crate) settings: WorkerSettings,
    pub(crate) shutdown: CancellationToken,
}

impl<P, S> OutboxWorker<P, S>
where
    P: Send + Sync + 'static,
    S: Serde<P> + Send + Sync + 'static,
{
    /// Spawns the worker as a background task. The task observes the
    /// shutdown token at cycle boundaries and releases its lease on exit.
    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let mut backoff = PollBackoff::new(&self.settings.backoff, self.settings.polling_interval);
        let mut lease = LeaderLease::new(
            self.store.pool.clone(),
            self.topic.name().to_string(),
            self.publisher.name().to_string(),
            self.store.metrics().clone(),
            self.shutdown.clone(),
        );
        let mut poll = tokio::time::interval(self.settings.polling_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        debug!(
            topic = %self.topic.name(),
            publisher = %self.publisher.name(),
            instance = %lease.instance_id(),
            "outbox worker started"
        );

        loop {
            tokio::select! {
                _ = poll.tick() => {
                    if let Err(err) = self.cycle(&mut backoff, &mut lease).await {
                        warn!(
                            topic = %self.topic.name(),
                            publisher = %self.publisher.name(),
                            error = %err,
                            "outbox cycle failed"
                        );
                    }
                }
                _ = self.shutdown.cancelled() => {
                    lease.release().await;
                    return;
                }
            }
        }
    }

    async fn cycle(&self, backoff: &mut PollBackoff, lease: &mut LeaderLease) -> Result<(), Error> {
        if backoff.should_skip() {
            return Ok(());
        }
        if !lease.ensure().await? {
            return Ok(());
        }
        let Some(row) =
            progress::load(&self.store.pool, self.topic.name(), self.publisher.name()).await?
        else {
            return Ok(());
        };
        if row.worker_status() != Some(WorkerStatus::Active) {
            debug!(
                topic = %self.topic.name(),
                publisher = %self.publisher.name(),
                status = %row.status,
                "worker is not active, skipping cycle"
            );
            return Ok(());
        }
        if !self.publisher.is_healthy().await {
            debug!(
                publisher = %self.publisher.name(),
                "publisher reported unhealthy, skipping cycle"
            );
            return Ok(());
        }

        let events = self.fetch(row.last_position).await?;
        if events.is_empty() {
            backoff.record_empty();
            self.store.metrics().publish(Metric::ProcessingCycle);
            return Ok(());
        }

        match self.publisher.preferred_mode() {
            PublishMode::Batch => {
                self.deliver(&events, backoff).await?;
            }
            PublishMode::Single => {
                for event in &events {
                    if self.shutdown.is_cancelled() {
                        break;
                    }
                    if !self.deliver(std::slice::from_ref(event), backoff).await? {
                        break;
                    }
                }
            }
        }
        self.store.metrics().publish(Metric::ProcessingCycle);
        Ok(())
    }

    async fn fetch(&self, last: Position) -> Result<Vec<StoredEvent<P>>, Error> {
        let pool = self.store.read_pool.as_ref().unwrap_or(&self.store.pool);
        let mut fetch_query = self.topic.build_fetch_query(last, self.settings.batch_size);
        let rows = with_deadline(
            self.store.config.db_timeout(),
            fetch_query.build_query_as::<EventRow>().fetch_all(pool),
        )
        .await?;
        rows.into_iter()
            .map(|row| decode_event(row, &self.store.serde))
            .collect()
    }

    /// Publishes one batch and advances the progress row on success.
    /// Returns whether delivery succeeded; a failure is recorded on the row
    /// and paced by the retry delay.
    async fn deliver(
        &self,
        events: &[StoredEvent<P>],
        backoff: &mut PollBackoff,
    ) -> Result<bool, Error> {
        let publisher = self.publisher.name().to_string();
        let started = Instant::now();
        match self.publisher.publish_batch(events).await {
            Ok(()) => {
                let last = events
                    .last()
                    .expect("delivered batch is never empty")
                    .position();
                progress::advance(&self.store.pool, self.topic.name(), &publisher, last).await?;
                self.store.metrics().publish(Metric::EventsPublished {
                    publisher: publisher.clone(),
                    count: events.len(),
                });
                self.store.metrics().publish(Metric::PublishingDuration {
                    publisher,
                    duration: started.elapsed(),
                });
                backoff.record_success();
                Ok(true)
            }
            Err(err) => {
                warn!(
                    topic = %self.topic.name(),
                    publisher = %publisher,
                    error = %err,
                    "publish failed"
                );
                self.store.metrics().publish(Metric::OutboxError {
                    publisher: publisher.clone(),
                });
                let status = progress::record_failure(
                    &self.store.pool,
                    self.topic.name(),
                    &publisher,
                    &err.to_string(),
                    self.settings.max_retries,
                )
                .await?;
                if status == WorkerStatus::Failed {
                    error!(
                        topic = %self.topic.name(),
                        publisher = %publisher,
                        "publisher exceeded max retries, worker auto-paused"
                    );
                } else {
                    tokio::select! {
                        _ = tokio::time::sleep(self.settings.retry_delay) => {}
                        _ = self.shutdown.cancelled() => {}
                    }
                }
                Ok(false)
            }
        }
    }
}
