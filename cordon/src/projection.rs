//! Projections build decision state from a filtered event stream.
//!
//! A [`Projection`] declares the query selecting the events it is interested
//! in and folds those events into itself; the projection value is its own
//! state. A [`ProjectionPart`] wraps a projection with the cursor of the last
//! event it consumed. A [`DecisionModel`] groups one or more parts so they
//! can be driven over a single pass of the stream: the unified query is the
//! union of the part queries, each event is routed to every interested part,
//! and the model's cursor is the reference point for the subsequent
//! conditional append.
use std::ops::Deref;

use futures::StreamExt;
use paste::paste;

use crate::all_the_tuples;
use crate::cursor::Cursor;
use crate::event::{Position, StoredEvent};
use crate::event_store::EventStore;
use crate::query::Query;

/// A projection over a filtered event stream.
///
/// The implementing value is the state: it starts as constructed and is
/// mutated by every matching event, in position order. Implementations must
/// tolerate event types they do not know; the runtime already filters by the
/// declared query.
pub trait Projection<P>: Clone + Send + Sync {
    /// The unique name of the projection.
    const NAME: &'static str;

    /// Returns the query selecting the events this projection consumes.
    /// A query with no items selects every event.
    fn query(&self) -> Query;

    /// Applies one event to the projection state.
    fn apply(&mut self, event: &StoredEvent<P>);
}

/// A projection together with the cursor of the last event it consumed.
///
/// Parts are the unit a [`DecisionModel`] routes events to: an event is
/// applied only if it is newer than the part's cursor and matches the
/// part's query.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionPart<V> {
    cursor: Position,
    applied_events: u64,
    inner: V,
}

impl<V> ProjectionPart<V> {
    /// Wraps a projection with a zero cursor.
    pub fn new(inner: V) -> Self {
        Self {
            cursor: 0,
            applied_events: 0,
            inner,
        }
    }

    /// The position of the last event applied to this part.
    pub fn cursor(&self) -> Cursor {
        Cursor::at(self.cursor)
    }

    /// The count of events applied to this part.
    pub fn applied_events(&self) -> u64 {
        self.applied_events
    }

    /// The part's query, normalized so that a select-everything projection
    /// contributes an unrestricted item to query unions.
    pub fn query_part<P>(&self) -> Query
    where
        V: Projection<P>,
    {
        let query = self.inner.query();
        if query.is_empty() {
            Query::match_all()
        } else {
            query
        }
    }

    /// Applies the event if it is newer than the part's cursor and matches
    /// the part's query.
    pub fn apply_if_matches<P>(&mut self, event: &StoredEvent<P>)
    where
        V: Projection<P>,
    {
        if event.position() > self.cursor
            && self
                .inner
                .query()
                .matches(event.event_type(), event.tags())
        {
            self.inner.apply(event);
            self.cursor = event.position();
            self.applied_events += 1;
        }
    }

    /// Returns the inner projection state.
    pub fn into_inner(self) -> V {
        self.inner
    }
}

impl<V> Deref for ProjectionPart<V> {
    type Target = V;

    fn deref(&self) -> &V {
        &self.inner
    }
}

/// A group of projection parts driven together over one stream pass.
///
/// The decision model is what a command handler projects before appending:
/// its unified query selects every event any part cares about, and its
/// cursor is the reference point captured for the append condition.
pub trait DecisionModel<P>: Send + Sync {
    /// Routes one event to every interested part.
    fn apply_all(&mut self, event: &StoredEvent<P>);

    /// The union of the part queries.
    fn query_all(&self) -> Query;

    /// The position the stream pass must start from: the minimum part
    /// cursor.
    fn origin(&self) -> Cursor;

    /// The reference cursor of the model: the maximum part cursor.
    fn cursor(&self) -> Cursor;
}

impl<P, V> DecisionModel<P> for ProjectionPart<V>
where
    V: Projection<P>,
    P: Send + Sync,
{
    fn apply_all(&mut self, event: &StoredEvent<P>) {
        self.apply_if_matches(event);
    }

    fn query_all(&self) -> Query {
        self.query_part::<P>()
    }

    fn origin(&self) -> Cursor {
        ProjectionPart::cursor(self)
    }

    fn cursor(&self) -> Cursor {
        ProjectionPart::cursor(self)
    }
}

macro_rules! impl_decision_model {
    (
        [$($ty:ident),*], $last:ident
    ) => {
        impl<P, $($ty,)* $last> DecisionModel<P> for ($(ProjectionPart<$ty>,)* ProjectionPart<$last>,)
        where
            P: Send + Sync,
            $($ty: Projection<P>,)*
            $last: Projection<P>,
        {
            fn apply_all(&mut self, event: &StoredEvent<P>) {
                paste! {
                    let ($([<part_ $ty:lower>],)* [<part_ $last:lower>],) = self;
                    $([<part_ $ty:lower>].apply_if_matches(event);)*
                    [<part_ $last:lower>].apply_if_matches(event);
                }
            }

            fn query_all(&self) -> Query {
                paste! {
                    let ($([<part_ $ty:lower>],)* [<part_ $last:lower>],) = self;
                    let query = Query::empty();
                    $(let query = query.union([<part_ $ty:lower>].query_part::<P>());)*
                    query.union([<part_ $last:lower>].query_part::<P>())
                }
            }

            fn origin(&self) -> Cursor {
                paste! {
                    let ($([<part_ $ty:lower>],)* [<part_ $last:lower>],) = self;
                    let origin = [<part_ $last:lower>].cursor();
                    $(let origin = origin.min([<part_ $ty:lower>].cursor());)*
                    origin
                }
            }

            fn cursor(&self) -> Cursor {
                paste! {
                    let ($([<part_ $ty:lower>],)* [<part_ $last:lower>],) = self;
                    let cursor = [<part_ $last:lower>].cursor();
                    $(let cursor = cursor.max([<part_ $ty:lower>].cursor());)*
                    cursor
                }
            }
        }
    };
}

all_the_tuples!(impl_decision_model);

/// Converts a tuple of projections into a tuple of parts.
pub trait IntoProjectionParts: Sized {
    type Target;

    /// Wraps every projection of the tuple in a [`ProjectionPart`] with a
    /// zero cursor.
    fn into_parts(self) -> Self::Target;
}

/// Extracts the projection states from a tuple of parts.
pub trait IntoProjections<T>: Sized {
    /// Unwraps every part of the tuple into its projection state.
    fn into_projections(self) -> T;
}

macro_rules! impl_into_parts {
    (
        [$($ty:ident),*], $last:ident
    ) => {
        impl<$($ty,)* $last> IntoProjectionParts for ($($ty,)* $last,) {
            type Target = ($(ProjectionPart<$ty>,)* ProjectionPart<$last>,);

            paste! {
                fn into_parts(self) -> Self::Target {
                    let ($([<part_ $ty:lower>],)* [<part_ $last:lower>],) = self;
                    ($(ProjectionPart::new([<part_ $ty:lower>]),)* ProjectionPart::new([<part_ $last:lower>]),)
                }
            }
        }

        impl<$($ty,)* $last> IntoProjections<($($ty,)* $last,)> for ($(ProjectionPart<$ty>,)* ProjectionPart<$last>,) {
            paste! {
                fn into_projections(self) -> ($($ty,)* $last,) {
                    let ($([<part_ $ty:lower>],)* [<part_ $last:lower>],) = self;
                    ($([<part_ $ty:lower>].into_inner(),)* [<part_ $last:lower>].into_inner(),)
                }
            }
        }
    };
}

all_the_tuples!(impl_into_parts);

/// Drives a decision model over the store in a single stream pass.
///
/// Streams every event matching the model's unified query after the model's
/// origin, routes each event to the interested parts, and returns the
/// hydrated model. The model's [`cursor`](DecisionModel::cursor) is then the
/// reference point for a conditional append.
pub async fn project<P, ES, M>(store: &ES, mut model: M) -> Result<M, ES::Error>
where
    P: Send + Sync,
    ES: EventStore<P>,
    M: DecisionModel<P>,
{
    let query = model.query_all();
    let origin = model.origin();
    let mut stream = store.stream(&query, origin);
    while let Some(event) = stream.next().await {
        model.apply_all(&event?);
    }
    drop(stream);
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryItem;
    use crate::tag::Tag;
    use crate::tags;
    use chrono::Utc;
    use futures::stream::{self, BoxStream};

    #[derive(Debug, Clone, PartialEq)]
    enum WalletPayload {
        Opened { owner: String, balance: i64 },
        Deposited { amount: i64 },
    }

    fn stored(position: Position, event_type: &str, tags: Vec<Tag>, payload: WalletPayload) -> StoredEvent<WalletPayload> {
        StoredEvent::new(position, "tx-1", event_type, tags, payload, Utc::now())
    }

    #[derive(Debug, Clone, Default, PartialEq)]
    struct WalletBalance {
        wallet_id: String,
        exists: bool,
        balance: i64,
    }

    impl WalletBalance {
        fn new(wallet_id: &str) -> Self {
            Self {
                wallet_id: wallet_id.to_string(),
                ..Default::default()
            }
        }
    }

    impl Projection<WalletPayload> for WalletBalance {
        const NAME: &'static str = "WalletBalance";

        fn query(&self) -> Query {
            Query::item(
                QueryItem::unrestricted()
                    .with_types(["WalletOpened", "DepositMade"])
                    .with_tag(Tag::new("wallet_id", &self.wallet_id).unwrap()),
            )
        }

        fn apply(&mut self, event: &StoredEvent<WalletPayload>) {
            match event.payload() {
                WalletPayload::Opened { balance, .. } => {
                    self.exists = true;
                    self.balance = *balance;
                }
                WalletPayload::Deposited { amount } => {
                    self.balance += amount;
                }
            }
        }
    }

    #[test]
    fn it_applies_matching_events_and_tracks_the_cursor() {
        let mut part = ProjectionPart::new(WalletBalance::new("w1"));
        part.apply_if_matches(&stored(
            1,
            "WalletOpened",
            tags! {wallet_id: "w1"},
            WalletPayload::Opened {
                owner: "alice".into(),
                balance: 100,
            },
        ));
        part.apply_if_matches(&stored(
            2,
            "DepositMade",
            tags! {wallet_id: "w2"},
            WalletPayload::Deposited { amount: 10 },
        ));
        part.apply_if_matches(&stored(
            3,
            "DepositMade",
            tags! {wallet_id: "w1"},
            WalletPayload::Deposited { amount: 50 },
        ));

        assert_eq!(part.balance, 150);
        assert_eq!(part.applied_events(), 2);
        assert_eq!(part.cursor(), Cursor::at(3));
    }

    #[test]
    fn it_skips_events_at_or_before_the_cursor() {
        let mut part = ProjectionPart::new(WalletBalance::new("w1"));
        let event = stored(
            1,
            "WalletOpened",
            tags! {wallet_id: "w1"},
            WalletPayload::Opened {
                owner: "alice".into(),
                balance: 100,
            },
        );
        part.apply_if_matches(&event);
        part.apply_if_matches(&event);

        assert_eq!(part.applied_events(), 1);
        assert_eq!(part.balance, 100);
    }

    #[test]
    fn it_routes_events_to_every_interested_part() {
        let mut model = (WalletBalance::new("w1"), WalletBalance::new("w2")).into_parts();
        model.apply_all(&stored(
            1,
            "WalletOpened",
            tags! {wallet_id: "w1"},
            WalletPayload::Opened {
                owner: "alice".into(),
                balance: 100,
            },
        ));
        model.apply_all(&stored(
            2,
            "WalletOpened",
            tags! {wallet_id: "w2"},
            WalletPayload::Opened {
                owner: "bob".into(),
                balance: 20,
            },
        ));

        assert_eq!(model.cursor(), Cursor::at(2));
        assert_eq!(model.origin(), Cursor::at(1));
        let (w1, w2) = model.into_projections();
        assert_eq!(w1.balance, 100);
        assert_eq!(w2.balance, 20);
    }

    #[test]
    fn it_unions_the_part_queries() {
        let model = (WalletBalance::new("w1"), WalletBalance::new("w2")).into_parts();
        let query = model.query_all();
        assert_eq!(query.items().len(), 2);
        assert!(query.matches("WalletOpened", &tags! {wallet_id: "w1"}));
        assert!(query.matches("WalletOpened", &tags! {wallet_id: "w2"}));
        assert!(!query.matches("WalletOpened", &tags! {wallet_id: "w3"}));
    }

    struct FixedEventStore {
        events: Vec<StoredEvent<WalletPayload>>,
    }

    #[derive(Debug, PartialEq)]
    struct NoError;

    #[async_trait::async_trait]
    impl EventStore<WalletPayload> for FixedEventStore {
        type Error = NoError;

        fn stream<'a>(
            &'a self,
            query: &'a Query,
            after: Cursor,
        ) -> BoxStream<'a, Result<StoredEvent<WalletPayload>, Self::Error>> {
            Box::pin(stream::iter(
                self.events
                    .iter()
                    .filter(move |e| {
                        e.position() > after.position()
                            && query.matches(e.event_type(), e.tags())
                    })
                    .cloned()
                    .map(Ok)
                    .collect::<Vec<_>>(),
            ))
        }

        async fn append_if(
            &self,
            _events: Vec<crate::AppendEvent<WalletPayload>>,
            _condition: crate::AppendCondition,
        ) -> Result<String, Self::Error> {
            unimplemented!("not exercised by projection tests")
        }
    }

    #[tokio::test]
    async fn it_hydrates_a_model_from_the_store() {
        let store = FixedEventStore {
            events: vec![
                stored(
                    1,
                    "WalletOpened",
                    tags! {wallet_id: "w1"},
                    WalletPayload::Opened {
                        owner: "alice".into(),
                        balance: 100,
                    },
                ),
                stored(
                    2,
                    "DepositMade",
                    tags! {wallet_id: "w1"},
                    WalletPayload::Deposited { amount: 50 },
                ),
            ],
        };

        let model = project(&store, ProjectionPart::new(WalletBalance::new("w1")))
            .await
            .unwrap();

        assert_eq!(model.balance, 150);
        assert!(model.exists);
        assert_eq!(model.cursor(), Cursor::at(2));
    }
}
