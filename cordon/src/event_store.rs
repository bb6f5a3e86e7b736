//! Event store is responsible for storing and retrieving events.
//!
//! It is designed to be implemented by different storage backends. An
//! implementation must guarantee that positions are strictly increasing in
//! commit order, that events written in one call share a transaction id, and
//! that the append condition is evaluated atomically with the write.
//!
//! For specific implementations, refer to the `cordon-postgres` crate and to
//! [`testing::InMemoryEventStore`](crate::testing::InMemoryEventStore).
use crate::{
    condition::AppendCondition,
    cursor::Cursor,
    event::{AppendEvent, StoredEvent},
    query::Query,
};

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;

/// An event store.
///
/// This trait provides methods for streaming events and conditionally
/// appending events to the event store.
#[async_trait]
pub trait EventStore<P>: Send + Sync {
    type Error: Send + Sync;

    /// Streams events matching the query with a position greater than the
    /// cursor, in ascending position order.
    ///
    /// # Arguments
    ///
    /// * `query` - The query specifying the filtering conditions. A query
    ///   with no items selects every event.
    /// * `after` - Only events after this cursor are yielded.
    ///
    /// # Returns
    ///
    /// A boxed stream of `StoredEvent` matching the query, or an error.
    fn stream<'a>(
        &'a self,
        query: &'a Query,
        after: Cursor,
    ) -> BoxStream<'a, Result<StoredEvent<P>, Self::Error>>;

    /// Atomically appends a batch of events, provided the condition holds.
    ///
    /// # Arguments
    ///
    /// * `events` - A non-empty list of candidate events.
    /// * `condition` - The append condition. The write is rejected if any
    ///   stored event matching `condition.fail_if_matches()` exists with a
    ///   position greater than `condition.after()`.
    ///
    /// # Returns
    ///
    /// The transaction id shared by the appended events, or an error. When
    /// the condition rejects the write, no event from the call is written
    /// and the error is the implementation's concurrency-violation variant.
    async fn append_if(
        &self,
        events: Vec<AppendEvent<P>>,
        condition: AppendCondition,
    ) -> Result<String, Self::Error>
    where
        P: 'async_trait;

    /// Folds every event matching the query after the cursor into a final
    /// state, in ascending position order.
    ///
    /// # Returns
    ///
    /// The final state together with the cursor of the last consumed event,
    /// or the starting cursor when nothing matched. The returned cursor is
    /// the reference point for a subsequent conditional append.
    async fn fold<T, F>(
        &self,
        query: &Query,
        after: Cursor,
        initial: T,
        mut f: F,
    ) -> Result<(T, Cursor), Self::Error>
    where
        T: Send,
        F: FnMut(T, &StoredEvent<P>) -> T + Send,
        P: Send + Sync + 'async_trait,
    {
        let mut state = initial;
        let mut cursor = after;
        {
            let mut stream = self.stream(query, after);
            while let Some(event) = stream.next().await {
                let event = event?;
                state = f(state, &event);
                cursor = Cursor::at(event.position()).with_timestamp(event.occurred_at());
            }
        }
        Ok((state, cursor))
    }
}
