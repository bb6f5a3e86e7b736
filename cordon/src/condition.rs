//! Append conditions are the write-side half of the dynamic consistency
//! boundary.
//!
//! A condition pairs a `fail_if_matches` query with the cursor obtained when
//! the decision model was read. The store evaluates the pair atomically with
//! the append: if any stored event matches the query at a position greater
//! than the cursor, the append is rejected with a concurrency violation.
//!
//! This module is pure. It constructs and composes conditions; the stores
//! execute them.
use crate::cursor::Cursor;
use crate::query::Query;
use crate::tag::TagError;

/// The precondition evaluated atomically with an append.
///
/// Semantics: the append is rejected if any event matching `fail_if_matches`
/// exists with a position greater than `after`. The candidate events being
/// appended are not restricted by the condition; it is purely a read
/// predicate.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AppendCondition {
    fail_if_matches: Query,
    after: Cursor,
}

impl AppendCondition {
    /// The condition that never rejects.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The condition that rejects if any event exists at all.
    ///
    /// Used by commands that create unique streams from nothing.
    pub fn expect_empty_stream() -> Self {
        Self {
            fail_if_matches: Query::match_all(),
            after: Cursor::zero(),
        }
    }

    /// Builds the condition from a projected decision model.
    ///
    /// Rejects if any event matching the decision-model query was committed
    /// after the cursor the projection observed.
    pub fn from_decision_model(query: Query, cursor: Cursor) -> Self {
        Self {
            fail_if_matches: query,
            after: cursor,
        }
    }

    /// Unions an idempotency item into the condition.
    ///
    /// The added item selects `event_type` carrying the `(key, value)` tag,
    /// checked from the beginning of the stream regardless of the condition's
    /// cursor; combined with a zero cursor this rejects any second attempt to
    /// create the same entity without needing a projection.
    ///
    /// # Errors
    ///
    /// Returns a `TagError` if the tag fails validation.
    pub fn with_idempotency_check(
        mut self,
        event_type: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self, TagError> {
        self.fail_if_matches = self
            .fail_if_matches
            .union(Query::for_event_and_tag(event_type, key, value)?);
        Ok(self)
    }

    /// The query whose matches after the cursor reject the append.
    pub fn fail_if_matches(&self) -> &Query {
        &self.fail_if_matches
    }

    /// The reference cursor of the optimistic check.
    pub fn after(&self) -> Cursor {
        self.after
    }
}
