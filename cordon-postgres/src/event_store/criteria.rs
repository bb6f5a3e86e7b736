//! SQL rendering of event queries.
//!
//! The pure matching semantics live in `cordon::Query`; this module renders
//! the same predicate into a parameterized page query. Tag values are caller
//! data, so everything variable is bound, never interpolated.
use cordon::{Position, Query, Tag};
use sqlx::{Postgres, QueryBuilder};

const SELECT_EVENTS: &str =
    "SELECT position, transaction_id, type, tags, data, occurred_at FROM events WHERE position > ";

/// Builds one page of the event stream: events after `after` matching
/// `query`, in ascending position order, at most `limit` rows.
pub(crate) fn build_page_query(
    query: &Query,
    after: Position,
    limit: i64,
) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new(SELECT_EVENTS);
    builder.push_bind(after);
    push_criteria(&mut builder, query);
    builder.push(" ORDER BY position ASC LIMIT ");
    builder.push_bind(limit);
    builder
}

/// Appends the query criteria as `AND (item OR item ...)`. A query with no
/// items selects every event and contributes nothing.
pub(crate) fn push_criteria(builder: &mut QueryBuilder<'static, Postgres>, query: &Query) {
    if query.is_empty() {
        return;
    }
    builder.push(" AND (");
    let mut items = query.items().iter().peekable();
    while let Some(item) = items.next() {
        builder.push("(");
        let mut restricted = false;
        if !item.types().is_empty() {
            builder.push("type = ANY(");
            builder.push_bind(item.types().iter().cloned().collect::<Vec<String>>());
            builder.push(")");
            restricted = true;
        }
        if !item.tags().is_empty() {
            if restricted {
                builder.push(" AND ");
            }
            builder.push("tags @> ");
            builder.push_bind(item.tags().iter().map(Tag::encode).collect::<Vec<String>>());
            restricted = true;
        }
        if !restricted {
            builder.push("TRUE");
        }
        builder.push(")");
        if items.peek().is_some() {
            builder.push(" OR ");
        }
    }
    builder.push(")");
}
