//! The durable per-(topic, publisher) progress rows.
//!
//! One row records the last delivered position, delivery bookkeeping and
//! leader metadata of each worker. Rows are created on first worker startup
//! and mutated only by the current leader; `last_position` never decreases
//! except via an explicit reset through the management surface.
use chrono::{DateTime, Utc};
use cordon::Position;
use sqlx::PgPool;

use crate::Error;

/// Lifecycle state of a worker's progress row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Active,
    Paused,
    Failed,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Active => "ACTIVE",
            WorkerStatus::Paused => "PAUSED",
            WorkerStatus::Failed => "FAILED",
        }
    }

    pub fn parse(status: &str) -> Option<Self> {
        match status {
            "ACTIVE" => Some(WorkerStatus::Active),
            "PAUSED" => Some(WorkerStatus::Paused),
            "FAILED" => Some(WorkerStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One (topic, publisher) progress row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProgressRow {
    pub topic: String,
    pub publisher: String,
    pub last_position: Position,
    pub last_published_at: Option<DateTime<Utc>>,
    pub status: String,
    pub error_count: i32,
    pub last_error: Option<String>,
    pub leader_instance: Option<String>,
    pub leader_since: Option<DateTime<Utc>>,
    pub leader_heartbeat: Option<DateTime<Utc>>,
}

impl ProgressRow {
    /// The parsed status, if the stored value is a known one.
    pub fn worker_status(&self) -> Option<WorkerStatus> {
        WorkerStatus::parse(&self.status)
    }
}

const ALL_COLUMNS: &str = "topic, publisher, last_position, last_published_at, status, \
                           error_count, last_error, leader_instance, leader_since, leader_heartbeat";

/// Creates the row on first worker startup. Existing rows are untouched.
pub(crate) async fn ensure_row(pool: &PgPool, topic: &str, publisher: &str) -> Result<(), Error> {
    sqlx::query(
        "INSERT INTO outbox_topic_progress (topic, publisher) VALUES ($1, $2) \
         ON CONFLICT (topic, publisher) DO NOTHING",
    )
    .bind(topic)
    .bind(publisher)
    .execute(pool)
    .await?;
    Ok(())
}

pub(crate) async fn load(
    pool: &PgPool,
    topic: &str,
    publisher: &str,
) -> Result<Option<ProgressRow>, Error> {
    Ok(sqlx::query_as::<_, ProgressRow>(&format!(
        "SELECT {ALL_COLUMNS} FROM outbox_topic_progress WHERE topic = $1 AND publisher = $2"
    ))
    .bind(topic)
    .bind(publisher)
    .fetch_optional(pool)
    .await?)
}

/// Advances the delivered position and clears the error bookkeeping.
/// The position never moves backwards.
pub(crate) async fn advance(
    pool: &PgPool,
    topic: &str,
    publisher: &str,
    position: Position,
) -> Result<(), Error> {
    sqlx::query(
        "UPDATE outbox_topic_progress \
         SET last_position = GREATEST(last_position, $3), last_published_at = now(), \
             error_count = 0, last_error = NULL \
         WHERE topic = $1 AND publisher = $2",
    )
    .bind(topic)
    .bind(publisher)
    .bind(position)
    .execute(pool)
    .await?;
    Ok(())
}

/// Records a publish failure. Past `max_retries` consecutive failures the
/// row auto-pauses with status `FAILED`.
pub(crate) async fn record_failure(
    pool: &PgPool,
    topic: &str,
    publisher: &str,
    error: &str,
    max_retries: u32,
) -> Result<WorkerStatus, Error> {
    let status: String = sqlx::query_scalar(
        "UPDATE outbox_topic_progress \
         SET error_count = error_count + 1, last_error = $3, \
             status = CASE WHEN error_count + 1 > $4 AND status = 'ACTIVE' \
                           THEN 'FAILED' ELSE status END \
         WHERE topic = $1 AND publisher = $2 \
         RETURNING status",
    )
    .bind(topic)
    .bind(publisher)
    .bind(error)
    .bind(max_retries as i32)
    .fetch_one(pool)
    .await?;
    WorkerStatus::parse(&status)
        .ok_or_else(|| Error::Decode(format!("unknown worker status {status:?}")))
}

pub(crate) async fn set_leader(
    pool: &PgPool,
    topic: &str,
    publisher: &str,
    instance: &str,
) -> Result<(), Error> {
    sqlx::query(
        "UPDATE outbox_topic_progress \
         SET leader_instance = $3, leader_since = now(), leader_heartbeat = now() \
         WHERE topic = $1 AND publisher = $2",
    )
    .bind(topic)
    .bind(publisher)
    .bind(instance)
    .execute(pool)
    .await?;
    Ok(())
}

pub(crate) async fn heartbeat(
    pool: &PgPool,
    topic: &str,
    publisher: &str,
    instance: &str,
) -> Result<(), Error> {
    sqlx::query(
        "UPDATE outbox_topic_progress SET leader_heartbeat = now() \
         WHERE topic = $1 AND publisher = $2 AND leader_instance = $3",
    )
    .bind(topic)
    .bind(publisher)
    .bind(instance)
    .execute(pool)
    .await?;
    Ok(())
}

pub(crate) async fn clear_leader(
    pool: &PgPool,
    topic: &str,
    publisher: &str,
    instance: &str,
) -> Result<(), Error> {
    sqlx::query(
        "UPDATE outbox_topic_progress SET leader_instance = NULL \
         WHERE topic = $1 AND publisher = $2 AND leader_instance = $3",
    )
    .bind(topic)
    .bind(publisher)
    .bind(instance)
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_parses_known_statuses() {
        assert_eq!(WorkerStatus::parse("ACTIVE"), Some(WorkerStatus::Active));
        assert_eq!(WorkerStatus::parse("PAUSED"), Some(WorkerStatus::Paused));
        assert_eq!(WorkerStatus::parse("FAILED"), Some(WorkerStatus::Failed));
        assert_eq!(WorkerStatus::parse("other"), None);
        assert_eq!(WorkerStatus::Failed.as_str(), "FAILED");
    }
}
