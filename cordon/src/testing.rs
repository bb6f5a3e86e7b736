//! Utilities for testing decision logic without a database.
//!
//! [`InMemoryEventStore`] is a complete in-process implementation of the
//! [`EventStore`](crate::EventStore) trait, including the append-condition
//! semantics, so the optimistic-concurrency behavior of handlers can be
//! exercised in unit tests. [`TestHarness`] sets up a history of events,
//! projects a decision model, runs the decision and asserts on the resulting
//! changes.
use std::fmt::Debug;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, BoxStream};

use crate::{
    AppendCondition, AppendEvent, Cursor, DecisionModel, EventStore, Query, StoredEvent,
};

/// Failure surface of the in-memory store, mirroring the variants a storage
/// backend distinguishes.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// the append condition rejected the write
    #[error("concurrent modification error")]
    Concurrency,
    /// the call was malformed
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Debug)]
struct Inner<P> {
    events: Vec<StoredEvent<P>>,
    transactions: u64,
}

/// An in-memory event store with full append-condition semantics.
///
/// Positions start at 1 and increase by one per event; every `append_if`
/// call commits under its own transaction id.
#[derive(Debug, Clone)]
pub struct InMemoryEventStore<P> {
    inner: Arc<Mutex<Inner<P>>>,
}

impl<P> Default for InMemoryEventStore<P> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                events: Vec::new(),
                transactions: 0,
            })),
        }
    }
}

impl<P: Clone> InMemoryEventStore<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// A snapshot of every committed event, in position order.
    pub fn events(&self) -> Vec<StoredEvent<P>> {
        self.inner.lock().expect("store lock poisoned").events.clone()
    }
}

#[async_trait]
impl<P> EventStore<P> for InMemoryEventStore<P>
where
    P: Clone + Send + Sync,
{
    type Error = Error;

    fn stream<'a>(
        &'a self,
        query: &'a Query,
        after: Cursor,
    ) -> BoxStream<'a, Result<StoredEvent<P>, Self::Error>> {
        let matching: Vec<_> = self
            .inner
            .lock()
            .expect("store lock poisoned")
            .events
            .iter()
            .filter(|e| {
                e.position() > after.position() && query.matches(e.event_type(), e.tags())
            })
            .cloned()
            .map(Ok)
            .collect();
        Box::pin(stream::iter(matching))
    }

    async fn append_if(
        &self,
        events: Vec<AppendEvent<P>>,
        condition: AppendCondition,
    ) -> Result<String, Self::Error>
    where
        P: 'async_trait,
    {
        if events.is_empty() {
            return Err(Error::InvalidArgument(
                "append_if requires at least one event".to_string(),
            ));
        }
        let mut inner = self.inner.lock().expect("store lock poisoned");

        let fail_if = condition.fail_if_matches();
        if !fail_if.is_empty() {
            let after = condition.after().position();
            let violated = inner
                .events
                .iter()
                .any(|e| e.position() > after && fail_if.matches(e.event_type(), e.tags()));
            if violated {
                return Err(Error::Concurrency);
            }
        }

        inner.transactions += 1;
        let transaction_id = format!("{:08}", inner.transactions);
        let occurred_at = Utc::now();
        let mut next_position = inner.events.last().map(|e| e.position()).unwrap_or(0);
        for event in events {
            next_position += 1;
            let (event_type, tags, payload) = event.into_parts();
            inner.events.push(StoredEvent::new(
                next_position,
                transaction_id.clone(),
                event_type,
                tags,
                payload,
                occurred_at,
            ));
        }
        Ok(transaction_id)
    }
}

/// Test harness for decision logic.
///
/// Sets up a history of events, hydrates a decision model from it, runs the
/// decision and asserts on the produced changes.
pub struct TestHarness;

impl TestHarness {
    /// Sets up a history of events. Positions are assigned in order,
    /// starting at 1.
    pub fn given<P>(history: impl Into<Vec<AppendEvent<P>>>) -> TestHarnessStep<P, Given> {
        let history = history
            .into()
            .into_iter()
            .enumerate()
            .map(|(i, event)| {
                let (event_type, tags, payload) = event.into_parts();
                StoredEvent::new(
                    (i + 1) as i64,
                    "given",
                    event_type,
                    tags,
                    payload,
                    Utc::now(),
                )
            })
            .collect();
        TestHarnessStep {
            history,
            _step: Given,
        }
    }
}

/// Represents the given step of the test harness.
pub struct Given;

/// Represents the when step of the test harness.
pub struct When<P, ERR> {
    result: Result<Vec<AppendEvent<P>>, ERR>,
}

pub struct TestHarnessStep<P, ST> {
    history: Vec<StoredEvent<P>>,
    _step: ST,
}

impl<P> TestHarnessStep<P, Given> {
    /// Hydrates the model from the history and runs the decision on it.
    pub fn when<M, ERR, F>(self, mut model: M, decide: F) -> TestHarnessStep<P, When<P, ERR>>
    where
        M: DecisionModel<P>,
        F: FnOnce(&M) -> Result<Vec<AppendEvent<P>>, ERR>,
    {
        for event in &self.history {
            model.apply_all(event);
        }
        let result = decide(&model);
        TestHarnessStep {
            history: self.history,
            _step: When { result },
        }
    }
}

impl<P, ERR> TestHarnessStep<P, When<P, ERR>>
where
    P: Debug + PartialEq,
    ERR: Debug + PartialEq,
{
    /// Asserts the decision produced the expected changes.
    ///
    /// # Panics
    ///
    /// Panics if the decision failed or the changes differ.
    #[track_caller]
    pub fn then(self, expected: impl Into<Vec<AppendEvent<P>>>) {
        assert_eq!(Ok(expected.into()), self._step.result);
    }

    /// Asserts the decision failed with the expected error.
    ///
    /// # Panics
    ///
    /// Panics if the decision succeeded or the error differs.
    #[track_caller]
    pub fn then_err(self, expected: ERR) {
        let err = self._step.result.unwrap_err();
        assert_eq!(err, expected);
    }
}
