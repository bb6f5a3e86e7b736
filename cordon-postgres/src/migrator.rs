//! Database initialization utilities for the `PgEventStore` and the outbox.
//!
//! The migrator applies the schema from the SQL files shipped with this
//! crate. It is typically executed during application startup or via
//! dedicated administrative tooling.
use sqlx::PgPool;

use crate::Error;

/// Helper for initializing the database schema.
///
/// `Migrator` encapsulates the DDL required by the event store (the
/// `events` and `commands` tables, their indexes and the `append_events_if`
/// routine) and by the outbox (the `outbox_topic_progress` table). Every
/// statement is idempotent, so re-running an initialization is safe.
pub struct Migrator {
    pool: PgPool,
}

impl Migrator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Init the event store schema.
    pub async fn init_event_store(&self) -> Result<(), Error> {
        sqlx::query(include_str!("event_store/sql/table_events.sql"))
            .execute(&self.pool)
            .await?;
        sqlx::query(include_str!("event_store/sql/idx_events_tags.sql"))
            .execute(&self.pool)
            .await?;
        sqlx::query(include_str!("event_store/sql/idx_events_type.sql"))
            .execute(&self.pool)
            .await?;
        sqlx::query(include_str!("event_store/sql/idx_events_transaction.sql"))
            .execute(&self.pool)
            .await?;
        sqlx::query(include_str!("event_store/sql/fn_append_events_if.sql"))
            .execute(&self.pool)
            .await?;
        sqlx::query(include_str!("event_store/sql/table_commands.sql"))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Init the outbox progress schema.
    pub async fn init_outbox(&self) -> Result<(), Error> {
        sqlx::query(include_str!("outbox/sql/table_outbox_topic_progress.sql"))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
