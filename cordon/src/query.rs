//! Queries select events by type and tags.
//!
//! A [`Query`] is a disjunction of [`QueryItem`]s. A stored event matches an
//! item if its type is one of the item's types (or the item names no types)
//! and it carries every tag the item requires. An event matches the query if
//! it matches at least one item; a query with no items matches every event.
//!
//! Queries play two roles: they filter reads (streaming and projection), and
//! they act as the `fail_if_matches` predicate of an
//! [`AppendCondition`](crate::AppendCondition). The pure evaluation here is
//! the reference semantics; storage backends render the same predicate into
//! SQL.
use std::collections::BTreeSet;

use crate::tag::{Tag, TagError};

/// A single conjunction of type and tag requirements.
///
/// An empty type set means "any type"; tags are all required.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryItem {
    types: BTreeSet<String>,
    tags: BTreeSet<Tag>,
}

impl QueryItem {
    /// An item with no restriction: matches every event.
    pub fn unrestricted() -> Self {
        Self::default()
    }

    /// Adds an event type to the item's type disjunction.
    pub fn with_type(mut self, event_type: impl Into<String>) -> Self {
        self.types.insert(event_type.into());
        self
    }

    /// Adds event types to the item's type disjunction.
    pub fn with_types<I, T>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.types.extend(types.into_iter().map(Into::into));
        self
    }

    /// Adds a required tag.
    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tags.insert(tag);
        self
    }

    /// Adds required tags.
    pub fn with_tags<I>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = Tag>,
    {
        self.tags.extend(tags);
        self
    }

    /// The types this item accepts. Empty means any type.
    pub fn types(&self) -> &BTreeSet<String> {
        &self.types
    }

    /// The tags this item requires. All must be present on a matching event.
    pub fn tags(&self) -> &BTreeSet<Tag> {
        &self.tags
    }

    /// Evaluates the item against an event's type and tags.
    pub fn matches(&self, event_type: &str, tags: &[Tag]) -> bool {
        (self.types.is_empty() || self.types.contains(event_type))
            && self.tags.iter().all(|required| tags.contains(required))
    }
}

/// A disjunction of query items.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Query {
    items: Vec<QueryItem>,
}

impl Query {
    /// The query with no items.
    ///
    /// In read position it selects every event; as a `fail_if_matches`
    /// predicate it is the "no check" form and never rejects.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The query that explicitly matches every event: one unrestricted item.
    pub fn match_all() -> Self {
        Self {
            items: vec![QueryItem::unrestricted()],
        }
    }

    /// Creates a query from a single item.
    pub fn item(item: QueryItem) -> Self {
        Self { items: vec![item] }
    }

    /// Creates a query from a list of items.
    pub fn items_from<I>(items: I) -> Self
    where
        I: IntoIterator<Item = QueryItem>,
    {
        Self {
            items: items.into_iter().collect(),
        }
    }

    /// Creates a query selecting one event type carrying one tag.
    ///
    /// This is the shape used by idempotency checks on unique entities.
    ///
    /// # Errors
    ///
    /// Returns a `TagError` if the tag fails validation.
    pub fn for_event_and_tag(
        event_type: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self, TagError> {
        Ok(Self::item(
            QueryItem::unrestricted()
                .with_type(event_type)
                .with_tag(Tag::new(key, value)?),
        ))
    }

    /// Unions another query into this one.
    pub fn union(mut self, other: Query) -> Self {
        self.items.extend(other.items);
        self
    }

    /// Adds an item to the disjunction.
    pub fn or(mut self, item: QueryItem) -> Self {
        self.items.push(item);
        self
    }

    /// The items of the disjunction.
    pub fn items(&self) -> &[QueryItem] {
        &self.items
    }

    /// Returns true if the query has no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Evaluates the query in read position: a query with no items selects
    /// every event, otherwise at least one item must match.
    pub fn matches(&self, event_type: &str, tags: &[Tag]) -> bool {
        self.items.is_empty() || self.items.iter().any(|item| item.matches(event_type, tags))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags;

    #[test]
    fn it_matches_every_event_when_empty() {
        let query = Query::empty();
        assert!(query.matches("Anything", &tags! {wallet_id: "w1"}));
        assert!(query.matches("Other", &[]));
    }

    #[test]
    fn it_matches_by_type() {
        let query = Query::item(QueryItem::unrestricted().with_type("WalletOpened"));
        assert!(query.matches("WalletOpened", &[]));
        assert!(!query.matches("DepositMade", &[]));
    }

    #[test]
    fn it_requires_all_tags_of_an_item() {
        let query = Query::item(
            QueryItem::unrestricted().with_tags(tags! {course_id: "c1", student_id: "s1"}),
        );
        assert!(query.matches(
            "StudentSubscribedToCourse",
            &tags! {course_id: "c1", student_id: "s1", extra: "x"}
        ));
        assert!(!query.matches("StudentSubscribedToCourse", &tags! {course_id: "c1"}));
    }

    #[test]
    fn it_accepts_any_type_when_item_types_are_empty() {
        let query = Query::item(QueryItem::unrestricted().with_tags(tags! {wallet_id: "w1"}));
        assert!(query.matches("WalletOpened", &tags! {wallet_id: "w1"}));
        assert!(query.matches("DepositMade", &tags! {wallet_id: "w1"}));
    }

    #[test]
    fn it_matches_when_any_item_matches() {
        let query = Query::item(
            QueryItem::unrestricted()
                .with_type("CourseDefined")
                .with_tags(tags! {course_id: "c1"}),
        )
        .or(QueryItem::unrestricted()
            .with_type("StudentSubscribedToCourse")
            .with_tags(tags! {student_id: "s1"}));

        assert!(query.matches("CourseDefined", &tags! {course_id: "c1"}));
        assert!(query.matches("StudentSubscribedToCourse", &tags! {student_id: "s1"}));
        assert!(!query.matches("CourseDefined", &tags! {course_id: "c2"}));
    }

    #[test]
    fn it_builds_the_idempotency_shape() {
        let query = Query::for_event_and_tag("WalletOpened", "wallet_id", "w1").unwrap();
        assert!(query.matches("WalletOpened", &tags! {wallet_id: "w1"}));
        assert!(!query.matches("WalletOpened", &tags! {wallet_id: "w2"}));
        assert!(!query.matches("DepositMade", &tags! {wallet_id: "w1"}));
    }

    #[test]
    fn it_unions_queries() {
        let query = Query::for_event_and_tag("A", "k", "1")
            .unwrap()
            .union(Query::for_event_and_tag("B", "k", "2").unwrap());
        assert_eq!(query.items().len(), 2);
        assert!(query.matches("A", &tags! {k: "1"}));
        assert!(query.matches("B", &tags! {k: "2"}));
    }

    #[test]
    fn it_distinguishes_match_all_from_empty() {
        assert!(Query::empty().is_empty());
        assert!(!Query::match_all().is_empty());
        assert!(Query::match_all().matches("Anything", &[]));
    }
}
