//! Management surface over the outbox progress table.
//!
//! A thin adapter keyed by (topic, publisher). `pause` is honored by the
//! worker at the start of its next cycle, never mid-publish.
use cordon::Position;
use sqlx::PgPool;

use crate::outbox::progress::{self, ProgressRow};
use crate::Error;

/// Inspects and controls outbox workers through their progress rows.
#[derive(Clone)]
pub struct OutboxAdmin {
    pool: PgPool,
}

impl OutboxAdmin {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The progress row of a worker, if it exists.
    pub async fn status(&self, topic: &str, publisher: &str) -> Result<Option<ProgressRow>, Error> {
        progress::load(&self.pool, topic, publisher).await
    }

    /// How far the worker is behind the head of the event stream.
    pub async fn lag(&self, topic: &str, publisher: &str) -> Result<Option<i64>, Error> {
        Ok(sqlx::query_scalar(
            "SELECT COALESCE((SELECT MAX(position) FROM events), 0) - last_position \
             FROM outbox_topic_progress WHERE topic = $1 AND publisher = $2",
        )
        .bind(topic)
        .bind(publisher)
        .fetch_optional(&self.pool)
        .await?)
    }

    /// Pauses an `ACTIVE` worker. Returns whether a row transitioned.
    pub async fn pause(&self, topic: &str, publisher: &str) -> Result<bool, Error> {
        let result = sqlx::query(
            "UPDATE outbox_topic_progress SET status = 'PAUSED' \
             WHERE topic = $1 AND publisher = $2 AND status = 'ACTIVE'",
        )
        .bind(topic)
        .bind(publisher)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Resumes a `PAUSED` or `FAILED` worker, clearing the error
    /// bookkeeping. Returns whether a row transitioned.
    pub async fn resume(&self, topic: &str, publisher: &str) -> Result<bool, Error> {
        let result = sqlx::query(
            "UPDATE outbox_topic_progress \
             SET status = 'ACTIVE', error_count = 0, last_error = NULL \
             WHERE topic = $1 AND publisher = $2 AND status IN ('PAUSED', 'FAILED')",
        )
        .bind(topic)
        .bind(publisher)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Like [`resume`](Self::resume) but unconditional on the current
    /// status, keeping `last_position` unchanged. Use to recover from
    /// persistent publisher errors.
    pub async fn reset(&self, topic: &str, publisher: &str) -> Result<bool, Error> {
        let result = sqlx::query(
            "UPDATE outbox_topic_progress \
             SET status = 'ACTIVE', error_count = 0, last_error = NULL \
             WHERE topic = $1 AND publisher = $2",
        )
        .bind(topic)
        .bind(publisher)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Resets the worker to an explicit position for a replay. This is the
    /// only operation allowed to move `last_position` backwards; consumers
    /// must tolerate the redelivery it causes.
    pub async fn reset_to(
        &self,
        topic: &str,
        publisher: &str,
        position: Position,
    ) -> Result<bool, Error> {
        let result = sqlx::query(
            "UPDATE outbox_topic_progress \
             SET status = 'ACTIVE', error_count = 0, last_error = NULL, last_position = $3 \
             WHERE topic = $1 AND publisher = $2",
        )
        .bind(topic)
        .bind(publisher)
        .bind(position)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
