//! PostgreSQL Event Store
//!
//! This module provides an implementation of the `EventStore` trait using
//! PostgreSQL as the underlying storage. Appends run through the
//! `append_events_if` stored routine so the dynamic-consistency check and
//! the insert happen in a single round trip; reads stream in position order
//! with keyset pagination bounded by the configured fetch size.
mod criteria;

use std::marker::PhantomData;
use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{Future, StreamExt};
use sqlx::postgres::PgPool;
use sqlx::{Postgres, Transaction};

use cordon::{
    AppendCondition, AppendEvent, Command, Cursor, DecisionModel, EventStore, Metric, MetricsBus,
    Position, Query, StoredEvent, Tag,
};
use cordon_serde::Serde;

use crate::config::EventStoreConfig;
use crate::{Error, Migrator};

use criteria::build_page_query;

/// PostgreSQL event store implementation.
pub struct PgEventStore<P, S>
where
    S: Serde<P> + Send + Sync,
{
    pub(crate) pool: PgPool,
    pub(crate) read_pool: Option<PgPool>,
    pub(crate) serde: S,
    pub(crate) config: EventStoreConfig,
    pub(crate) metrics: MetricsBus,
    payload_type: PhantomData<P>,
}

impl<P, S> Clone for PgEventStore<P, S>
where
    S: Serde<P> + Send + Sync + Clone,
{
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            read_pool: self.read_pool.clone(),
            serde: self.serde.clone(),
            config: self.config.clone(),
            metrics: self.metrics.clone(),
            payload_type: PhantomData,
        }
    }
}

impl<P, S> PgEventStore<P, S>
where
    S: Serde<P> + Send + Sync,
{
    /// Initializes the PostgreSQL DB and returns a new instance of
    /// `PgEventStore`.
    ///
    /// # Arguments
    ///
    /// * `pool` - The PostgreSQL connection pool.
    /// * `serde` - The serialization implementation for the event payload.
    pub async fn try_new(pool: PgPool, serde: S) -> Result<Self, Error> {
        Migrator::new(pool.clone()).init_event_store().await?;
        Ok(Self::new_uninitialized(pool, serde))
    }

    /// Creates a new instance of `PgEventStore` without initializing the
    /// database.
    ///
    /// If you use this constructor, ensure that the schema is already in
    /// place. Refer to the SQL files in the "event_store/sql" directory, or
    /// run [`Migrator::init_event_store`].
    pub fn new_uninitialized(pool: PgPool, serde: S) -> Self {
        Self {
            pool,
            read_pool: None,
            serde,
            config: EventStoreConfig::default(),
            metrics: MetricsBus::default(),
            payload_type: PhantomData,
        }
    }

    /// Replaces the store configuration.
    pub fn with_config(mut self, config: EventStoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Directs streamed reads to a replica pool. Writes and transactions
    /// stay on the primary pool.
    pub fn with_read_pool(mut self, read_pool: PgPool) -> Self {
        self.read_pool = Some(read_pool);
        self
    }

    /// Replaces the metrics bus the store publishes to.
    pub fn with_metrics(mut self, metrics: MetricsBus) -> Self {
        self.metrics = metrics;
        self
    }

    /// The metrics bus of the store.
    pub fn metrics(&self) -> &MetricsBus {
        &self.metrics
    }

    /// The store configuration.
    pub fn config(&self) -> &EventStoreConfig {
        &self.config
    }

    fn read_pool(&self) -> &PgPool {
        self.read_pool.as_ref().unwrap_or(&self.pool)
    }
}

impl<P, S> PgEventStore<P, S>
where
    P: Send + Sync,
    S: Serde<P> + Send + Sync,
{
    /// Streams events from the given pool in ascending position order, one
    /// page of `fetch_size` rows at a time.
    fn stream_pool<'a>(
        &'a self,
        pool: &'a PgPool,
        query: &'a Query,
        after: Cursor,
    ) -> BoxStream<'a, Result<StoredEvent<P>, Error>> {
        let fetch_size = self.config.fetch_size.max(1) as i64;
        let deadline = self.config.db_timeout();
        Box::pin(stream! {
            let mut last = after.position();
            loop {
                let mut page_query = build_page_query(query, last, fetch_size);
                let page = match with_deadline(
                    deadline,
                    page_query.build_query_as::<EventRow>().fetch_all(pool),
                )
                .await
                {
                    Ok(page) => page,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                let fetched = page.len() as i64;
                for row in page {
                    last = row.position;
                    match decode_event(row, &self.serde) {
                        Ok(event) => yield Ok(event),
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
                if fetched < fetch_size {
                    break;
                }
            }
        })
    }

    /// Drives a decision model over a single pass of the stream and returns
    /// it hydrated. The model's cursor is the reference point for a
    /// subsequent conditional append.
    pub async fn project<M>(&self, mut model: M) -> Result<M, Error>
    where
        M: DecisionModel<P>,
    {
        let query = model.query_all();
        let origin = model.origin();
        {
            let mut stream = self.stream_pool(self.read_pool(), &query, origin);
            while let Some(event) = stream.next().await {
                model.apply_all(&event?);
            }
        }
        Ok(model)
    }

    /// Opens a transaction and hands the closure a transaction-scoped
    /// [`PgAccess`] handle.
    ///
    /// The configured isolation level is applied to the transaction. On
    /// `Ok` the transaction commits and the result is propagated; on `Err`
    /// it rolls back and the failure is re-surfaced. The handle cannot open
    /// a nested transaction: everything it does runs on the enclosing one.
    pub async fn execute_in_transaction<R, E, F>(&self, f: F) -> Result<R, E>
    where
        F: for<'t> FnOnce(PgAccess<'t, P>) -> BoxFuture<'t, Result<R, E>>,
        E: From<Error>,
    {
        let mut tx = self.begin().await.map_err(E::from)?;
        let access = self.access(&mut tx);
        let result = f(access).await;
        match result {
            Ok(value) => {
                tx.commit()
                    .await
                    .map_err(|e| E::from(Error::Database(e)))?;
                Ok(value)
            }
            Err(err) => {
                let _ = tx.rollback().await;
                Err(err)
            }
        }
    }

    pub(crate) async fn begin(&self) -> Result<Transaction<'static, Postgres>, Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(self.config.transaction_isolation.set_statement())
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }

    pub(crate) fn access<'t>(
        &'t self,
        tx: &'t mut Transaction<'static, Postgres>,
    ) -> PgAccess<'t, P> {
        PgAccess {
            tx,
            serde: &self.serde,
            metrics: &self.metrics,
            config: &self.config,
        }
    }
}

/// Implementation of the event store using PostgreSQL.
#[async_trait]
impl<P, S> EventStore<P> for PgEventStore<P, S>
where
    P: Send + Sync,
    S: Serde<P> + Send + Sync,
{
    type Error = Error;

    /// Streams events matching the query after the cursor, in ascending
    /// position order, from the read pool when one is configured.
    fn stream<'a>(
        &'a self,
        query: &'a Query,
        after: Cursor,
    ) -> BoxStream<'a, Result<StoredEvent<P>, Self::Error>> {
        self.stream_pool(self.read_pool(), query, after)
    }

    /// Atomically appends the events, provided the condition holds.
    ///
    /// The check and the insert run in one round trip through the
    /// `append_events_if` stored routine. A rejected condition surfaces as
    /// [`Error::Concurrency`] and writes nothing.
    async fn append_if(
        &self,
        events: Vec<AppendEvent<P>>,
        condition: AppendCondition,
    ) -> Result<String, Self::Error>
    where
        P: 'async_trait,
    {
        let call = prepare_append(&events, &condition, &self.serde)?;
        let row = with_deadline(self.config.db_timeout(), execute_append(&self.pool, &call)).await?;
        finish_append(&self.metrics, &call.types, row)
    }
}

/// A transaction-scoped handle on the event store.
///
/// Handed to command handlers and `execute_in_transaction` closures for the
/// duration of the operation; every call runs on the enclosing transaction
/// and becomes visible at its commit.
pub struct PgAccess<'t, P> {
    pub(crate) tx: &'t mut Transaction<'static, Postgres>,
    pub(crate) serde: &'t (dyn Serde<P> + Send + Sync),
    pub(crate) metrics: &'t MetricsBus,
    pub(crate) config: &'t EventStoreConfig,
}

impl<'t, P> PgAccess<'t, P>
where
    P: Send + Sync,
{
    /// Streams events matching the query after the cursor on the enclosing
    /// transaction.
    pub fn stream<'a>(
        &'a mut self,
        query: &'a Query,
        after: Cursor,
    ) -> BoxStream<'a, Result<StoredEvent<P>, Error>> {
        let fetch_size = self.config.fetch_size.max(1) as i64;
        Box::pin(stream! {
            let mut last = after.position();
            loop {
                let mut page_query = build_page_query(query, last, fetch_size);
                let page = match page_query
                    .build_query_as::<EventRow>()
                    .fetch_all(&mut **self.tx)
                    .await
                {
                    Ok(page) => page,
                    Err(e) => {
                        yield Err(Error::Database(e));
                        return;
                    }
                };
                let fetched = page.len() as i64;
                for row in page {
                    last = row.position;
                    match decode_event(row, self.serde) {
                        Ok(event) => yield Ok(event),
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
                if fetched < fetch_size {
                    break;
                }
            }
        })
    }

    /// Drives a decision model over a single stream pass on the enclosing
    /// transaction.
    pub async fn project<M>(&mut self, mut model: M) -> Result<M, Error>
    where
        M: DecisionModel<P>,
    {
        let query = model.query_all();
        let origin = model.origin();
        {
            let mut stream = self.stream(&query, origin);
            while let Some(event) = stream.next().await {
                model.apply_all(&event?);
            }
        }
        Ok(model)
    }

    /// Atomically appends the events on the enclosing transaction, provided
    /// the condition holds.
    pub async fn append_if(
        &mut self,
        events: Vec<AppendEvent<P>>,
        condition: AppendCondition,
    ) -> Result<String, Error> {
        let call = prepare_append(&events, &condition, self.serde)?;
        let row = execute_append(&mut **self.tx, &call).await.map_err(Error::Database)?;
        finish_append(self.metrics, &call.types, row)
    }

    /// Appends a command audit row keyed by the transaction id of the
    /// enclosing transaction. Idempotent per transaction.
    pub async fn store_command(&mut self, command: &Command) -> Result<(), Error> {
        let data = serde_json::to_vec(&command.payload)
            .map_err(|e| Error::InvalidArgument(format!("unserializable command payload: {e}")))?;
        sqlx::query(
            "INSERT INTO commands (transaction_id, type, data, metadata, occurred_at) \
             VALUES (pg_current_xact_id()::TEXT, $1, $2, $3, now()) \
             ON CONFLICT (transaction_id) DO NOTHING",
        )
        .bind(&command.command_type)
        .bind(&data)
        .bind(serde_json::Value::Object(command.metadata.clone()))
        .execute(&mut **self.tx)
        .await?;
        Ok(())
    }
}

/// A stored-event row as it comes back from the `events` table.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct EventRow {
    pub(crate) position: i64,
    pub(crate) transaction_id: String,
    #[sqlx(rename = "type")]
    pub(crate) event_type: String,
    pub(crate) tags: Vec<String>,
    pub(crate) data: Vec<u8>,
    pub(crate) occurred_at: DateTime<Utc>,
}

pub(crate) fn decode_event<P>(
    row: EventRow,
    serde: &(dyn Serde<P> + Send + Sync),
) -> Result<StoredEvent<P>, Error> {
    let tags = row
        .tags
        .iter()
        .map(|t| Tag::parse(t))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| Error::Decode(e.to_string()))?;
    let payload = serde.deserialize(&row.data)?;
    Ok(StoredEvent::new(
        row.position,
        row.transaction_id,
        row.event_type,
        tags,
        payload,
        row.occurred_at,
    ))
}

/// The bound arguments of one `append_events_if` invocation.
pub(crate) struct AppendCall {
    pub(crate) types: Vec<String>,
    pub(crate) tags: serde_json::Value,
    pub(crate) payloads: Vec<Vec<u8>>,
    pub(crate) fail_if: serde_json::Value,
    pub(crate) after: Position,
}

pub(crate) fn prepare_append<P>(
    events: &[AppendEvent<P>],
    condition: &AppendCondition,
    serde: &(dyn Serde<P> + Send + Sync),
) -> Result<AppendCall, Error> {
    if events.is_empty() {
        return Err(Error::InvalidArgument(
            "append_if requires at least one event".to_string(),
        ));
    }
    let mut types = Vec::with_capacity(events.len());
    let mut tags = Vec::with_capacity(events.len());
    let mut payloads = Vec::with_capacity(events.len());
    for event in events {
        types.push(event.event_type().to_string());
        tags.push(serde_json::Value::from(
            event.tags().iter().map(Tag::encode).collect::<Vec<_>>(),
        ));
        payloads.push(serde.serialize(event.payload())?);
    }

    let fail_if = if condition.fail_if_matches().is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::Value::from(
            condition
                .fail_if_matches()
                .items()
                .iter()
                .map(|item| {
                    serde_json::json!({
                        "types": item.types().iter().collect::<Vec<_>>(),
                        "tags": item.tags().iter().map(Tag::encode).collect::<Vec<_>>(),
                    })
                })
                .collect::<Vec<_>>(),
        )
    };

    Ok(AppendCall {
        types,
        tags: serde_json::Value::from(tags),
        payloads,
        fail_if,
        after: condition.after().position(),
    })
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct AppendRow {
    pub(crate) success: bool,
    #[allow(dead_code)]
    pub(crate) violation_count: i64,
    pub(crate) transaction_id: Option<String>,
    #[allow(dead_code)]
    pub(crate) positions: Option<Vec<i64>>,
}

pub(crate) async fn execute_append<'e, E>(executor: E, call: &AppendCall) -> Result<AppendRow, sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query_as::<_, AppendRow>(
        "SELECT success, violation_count, transaction_id, positions \
         FROM append_events_if($1, $2, $3, $4, $5)",
    )
    .bind(&call.types)
    .bind(&call.tags)
    .bind(&call.payloads)
    .bind(&call.fail_if)
    .bind(call.after)
    .fetch_one(executor)
    .await
}

pub(crate) fn finish_append(
    metrics: &MetricsBus,
    types: &[String],
    row: AppendRow,
) -> Result<String, Error> {
    if !row.success {
        metrics.publish(Metric::ConcurrencyViolation);
        return Err(Error::Concurrency);
    }
    let transaction_id = row
        .transaction_id
        .ok_or_else(|| Error::Decode("append_events_if returned no transaction id".to_string()))?;
    metrics.publish(Metric::EventsAppended { count: types.len() });
    for event_type in types {
        metrics.publish(Metric::EventType {
            event_type: event_type.clone(),
        });
    }
    Ok(transaction_id)
}

pub(crate) async fn with_deadline<T, F>(deadline: Duration, fut: F) -> Result<T, Error>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result.map_err(Error::Database),
        Err(_) => Err(Error::Timeout),
    }
}
