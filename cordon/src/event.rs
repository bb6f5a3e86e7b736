//! Events are the immutable records of the store.
//!
//! This module defines the two sides of an event's life: [`AppendEvent`], a
//! candidate produced by application code, and [`StoredEvent`], the committed
//! record with its position, transaction id and timestamp assigned by the
//! event store. Payloads are typed as `P` in application code; the store
//! serializes them with its configured codec.
use chrono::{DateTime, Utc};

use crate::tag::Tag;

/// The position of a committed event: a strictly increasing 64-bit integer
/// assigned at commit, globally unique within one event store.
pub type Position = i64;

/// Maximum length of an event type name.
pub const EVENT_TYPE_MAX_LEN: usize = 64;

/// Represents an error that can occur when constructing a candidate event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventTypeError {
    /// the event type is empty
    #[error("event type must not be empty")]
    Empty,
    /// the event type exceeds `EVENT_TYPE_MAX_LEN` characters
    #[error("event type exceeds {EVENT_TYPE_MAX_LEN} characters: {0:?}")]
    TooLong(String),
}

fn validate_event_type(event_type: &str) -> Result<(), EventTypeError> {
    if event_type.is_empty() {
        return Err(EventTypeError::Empty);
    }
    if event_type.chars().count() > EVENT_TYPE_MAX_LEN {
        return Err(EventTypeError::TooLong(event_type.to_string()));
    }
    Ok(())
}

/// A candidate event to be written to the event store.
///
/// Carries the event type, the tags that address the event, and a typed
/// payload. Positions and transaction ids do not exist yet; they are
/// assigned when the append commits.
#[derive(Debug, Clone, PartialEq)]
pub struct AppendEvent<P> {
    event_type: String,
    tags: Vec<Tag>,
    payload: P,
}

impl<P> AppendEvent<P> {
    /// Creates a new candidate event.
    ///
    /// # Errors
    ///
    /// Returns an `EventTypeError` if the event type is empty or longer than
    /// [`EVENT_TYPE_MAX_LEN`] characters. Tags are validated at their own
    /// construction.
    pub fn new(
        event_type: impl Into<String>,
        tags: Vec<Tag>,
        payload: P,
    ) -> Result<Self, EventTypeError> {
        let event_type = event_type.into();
        validate_event_type(&event_type)?;
        Ok(Self {
            event_type,
            tags,
            payload,
        })
    }

    /// The type name of the event.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// The tags addressing the event.
    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    /// The typed payload.
    pub fn payload(&self) -> &P {
        &self.payload
    }

    /// Consumes the candidate and returns its parts.
    pub fn into_parts(self) -> (String, Vec<Tag>, P) {
        (self.event_type, self.tags, self.payload)
    }
}

/// A committed event retrieved from the event store.
///
/// Never mutated, never deleted. The position is strictly increasing across
/// the store's lifetime; events committed in one transaction share a
/// transaction id and hold contiguous positions at commit time.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent<P> {
    position: Position,
    transaction_id: String,
    event_type: String,
    tags: Vec<Tag>,
    payload: P,
    occurred_at: DateTime<Utc>,
}

impl<P> StoredEvent<P> {
    /// Creates a new `StoredEvent` instance from its committed parts.
    pub fn new(
        position: Position,
        transaction_id: impl Into<String>,
        event_type: impl Into<String>,
        tags: Vec<Tag>,
        payload: P,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            position,
            transaction_id: transaction_id.into(),
            event_type: event_type.into(),
            tags,
            payload,
            occurred_at,
        }
    }

    /// The position assigned by the event store at commit.
    pub fn position(&self) -> Position {
        self.position
    }

    /// The identifier shared by all events written in the same transaction.
    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    /// The type name of the event.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// The tags addressing the event.
    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    /// The typed payload, decoded by the store's codec.
    pub fn payload(&self) -> &P {
        &self.payload
    }

    /// The commit timestamp.
    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    /// Consumes the event and returns the payload.
    pub fn into_payload(self) -> P {
        self.payload
    }
}
