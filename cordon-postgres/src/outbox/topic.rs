//! Topics are named, tag-defined subsets of the event stream.
use cordon::{Position, Tag, TagError};
use sqlx::{Postgres, QueryBuilder};

use crate::config::TopicConfig;

const SELECT_EVENTS: &str =
    "SELECT position, transaction_id, type, tags, data, occurred_at FROM events WHERE position > ";

/// A named subset of the event stream consumed by one or more publishers.
///
/// An event belongs to the topic if it carries all the `required` tag keys,
/// at least one of the `any_of` tag keys (when any are declared), and every
/// `exact` `(key, value)` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Topic {
    name: String,
    required_tags: Vec<String>,
    any_of_tags: Vec<String>,
    exact_tags: Vec<Tag>,
}

/// Represents an error that can occur when declaring a topic.
#[derive(Debug, thiserror::Error)]
pub enum TopicError {
    /// the topic name is empty
    #[error("topic name must not be empty")]
    EmptyName,
    /// a predicate key is not a valid tag key
    #[error("invalid tag key: {0:?}")]
    InvalidKey(String),
    /// an exact predicate is not a valid tag
    #[error(transparent)]
    Tag(#[from] TagError),
}

impl Topic {
    /// Creates a topic with no predicates: it matches every event.
    pub fn new(name: impl Into<String>) -> Result<Self, TopicError> {
        let name = name.into();
        if name.is_empty() {
            return Err(TopicError::EmptyName);
        }
        Ok(Self {
            name,
            required_tags: Vec::new(),
            any_of_tags: Vec::new(),
            exact_tags: Vec::new(),
        })
    }

    /// Builds a topic from its configuration form.
    pub fn from_config(config: &TopicConfig) -> Result<Self, TopicError> {
        let mut topic = Topic::new(config.name.clone())?;
        for key in &config.required_tags {
            topic = topic.require_tag(key)?;
        }
        for key in &config.any_of_tags {
            topic = topic.any_of_tag(key)?;
        }
        for encoded in &config.exact_tags {
            topic = topic.exact_tag(Tag::parse(encoded)?);
        }
        Ok(topic)
    }

    /// Requires a tag key to be present on matching events.
    pub fn require_tag(mut self, key: impl Into<String>) -> Result<Self, TopicError> {
        let key = key.into();
        if !Tag::is_valid_key(&key) {
            return Err(TopicError::InvalidKey(key));
        }
        self.required_tags.push(key);
        Ok(self)
    }

    /// Adds a tag key of which at least one must be present.
    pub fn any_of_tag(mut self, key: impl Into<String>) -> Result<Self, TopicError> {
        let key = key.into();
        if !Tag::is_valid_key(&key) {
            return Err(TopicError::InvalidKey(key));
        }
        self.any_of_tags.push(key);
        Ok(self)
    }

    /// Requires an exact `(key, value)` pair on matching events.
    pub fn exact_tag(mut self, tag: Tag) -> Self {
        self.exact_tags.push(tag);
        self
    }

    /// The topic name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Evaluates the topic predicate against an event's tags.
    pub fn matches(&self, tags: &[Tag]) -> bool {
        self.required_tags
            .iter()
            .all(|key| tags.iter().any(|tag| tag.key() == key))
            && (self.any_of_tags.is_empty()
                || self
                    .any_of_tags
                    .iter()
                    .any(|key| tags.iter().any(|tag| tag.key() == key)))
            && self.exact_tags.iter().all(|exact| tags.contains(exact))
    }

    /// Builds one outbox fetch: events after `last` matching the topic, in
    /// ascending position order, at most `batch` rows.
    pub(crate) fn build_fetch_query(
        &self,
        last: Position,
        batch: i64,
    ) -> QueryBuilder<'static, Postgres> {
        let mut builder = QueryBuilder::new(SELECT_EVENTS);
        builder.push_bind(last);
        for key in &self.required_tags {
            builder.push(
                " AND EXISTS (SELECT 1 FROM unnest(tags) AS t(v) WHERE split_part(t.v, '=', 1) = ",
            );
            builder.push_bind(key.clone());
            builder.push(")");
        }
        if !self.any_of_tags.is_empty() {
            builder.push(" AND (");
            let mut keys = self.any_of_tags.iter().peekable();
            while let Some(key) = keys.next() {
                builder.push(
                    "EXISTS (SELECT 1 FROM unnest(tags) AS t(v) WHERE split_part(t.v, '=', 1) = ",
                );
                builder.push_bind(key.clone());
                builder.push(")");
                if keys.peek().is_some() {
                    builder.push(" OR ");
                }
            }
            builder.push(")");
        }
        if !self.exact_tags.is_empty() {
            builder.push(" AND tags @> ");
            builder.push_bind(self.exact_tags.iter().map(Tag::encode).collect::<Vec<_>>());
        }
        builder.push(" ORDER BY position ASC LIMIT ");
        builder.push_bind(batch);
        builder
    }
}
