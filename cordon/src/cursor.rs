//! A cursor marks a read-time position in the event stream.
//!
//! Cursors are obtained by reading (a query or projection reports the
//! position of the last consumed event) and consumed by append conditions as
//! the reference point of the optimistic check. They are never persisted and
//! never fabricated.
use chrono::{DateTime, Utc};

use crate::event::Position;

/// A snapshot marker over the event stream.
///
/// Effectively a single position value, with an optional timestamp carried
/// for logging. Ordering and equality consider the position only.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cursor {
    position: Position,
    occurred_at: Option<DateTime<Utc>>,
}

impl Cursor {
    /// The cursor before any event.
    pub fn zero() -> Self {
        Self::default()
    }

    /// Creates a cursor at the given position.
    pub fn at(position: Position) -> Self {
        Self {
            position,
            occurred_at: None,
        }
    }

    /// Attaches the timestamp of the event the cursor points at.
    pub fn with_timestamp(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(occurred_at);
        self
    }

    /// The position of the last consumed event, or 0 before any event.
    pub fn position(&self) -> Position {
        self.position
    }

    /// The timestamp of the event the cursor points at, if known.
    pub fn occurred_at(&self) -> Option<DateTime<Utc>> {
        self.occurred_at
    }
}

impl PartialEq for Cursor {
    fn eq(&self, other: &Self) -> bool {
        self.position == other.position
    }
}

impl Eq for Cursor {}

impl PartialOrd for Cursor {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cursor {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.position.cmp(&other.position)
    }
}
