//! # Cordon
//!
//! Cordon is an event-sourcing library built around the **dynamic
//! consistency boundary**: consistency is not anchored to a per-aggregate
//! stream but to an ad-hoc decision model, a set of (event-type, tag)
//! predicates captured as a cursor at read time and enforced atomically at
//! write time. Clients assemble minimal projections across arbitrary tag
//! intersections and append new events with a cursor-scoped optimistic
//! check.
//!
//! This crate is the pure core: the data model (tags, events, cursors,
//! queries, append conditions), the projection runtime, the command
//! contracts, the polling backoff controller, the metrics bus and an
//! in-memory store for tests. The PostgreSQL backend, the command executor
//! and the outbox live in the `cordon-postgres` crate; payload codecs live
//! in `cordon-serde`.
mod backoff;
mod clock;
mod command;
mod condition;
mod cursor;
mod event;
mod event_store;
mod metrics;
mod projection;
mod query;
mod tag;
pub mod testing;

#[doc(inline)]
pub use crate::backoff::{BackoffConfig, PollBackoff};
#[doc(inline)]
pub use crate::clock::{Clock, FixedClock, SystemClock};
#[doc(inline)]
pub use crate::command::{Command, CommandResult, Execution};
#[doc(inline)]
pub use crate::condition::AppendCondition;
#[doc(inline)]
pub use crate::cursor::Cursor;
#[doc(inline)]
pub use crate::event::{
    AppendEvent, EventTypeError, Position, StoredEvent, EVENT_TYPE_MAX_LEN,
};
#[doc(inline)]
pub use crate::event_store::EventStore;
#[doc(inline)]
pub use crate::metrics::{Metric, MetricsBus};
#[doc(inline)]
pub use crate::projection::{
    project, DecisionModel, IntoProjectionParts, IntoProjections, Projection, ProjectionPart,
};
#[doc(inline)]
pub use crate::query::{Query, QueryItem};
#[doc(inline)]
pub use crate::tag::{Tag, TagError};

pub type BoxDynError = Box<dyn std::error::Error + 'static + Send + Sync>;

#[doc(hidden)]
#[macro_export]
macro_rules! all_the_tuples {
    ($name:ident) => {
        $name!([], T1);
        $name!([T1], T2);
        $name!([T1, T2], T3);
        $name!([T1, T2, T3], T4);
        $name!([T1, T2, T3, T4], T5);
    };
}
