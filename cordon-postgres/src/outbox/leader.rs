//! Leader election over a session-scoped advisory lock.
//!
//! One leader per (topic, publisher) across a process fleet. The lock lives
//! on a dedicated database session held for the duration of the lease, so a
//! crashed or partitioned leader loses it the moment its session ends and a
//! surviving instance takes over on its next poll. The heartbeat column is
//! informational; it powers the management surface, not the failover.
use std::time::Duration;

use md5::{Digest, Md5};
use sqlx::{Connection, PgConnection, PgPool};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use cordon::{Metric, MetricsBus};

use crate::outbox::progress;
use crate::Error;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Derives the 64-bit advisory-lock key of a (topic, publisher) pair.
pub(crate) fn lease_key(topic: &str, publisher: &str) -> i64 {
    let mut hasher = Md5::new();
    hasher.update(topic.as_bytes());
    hasher.update(b"/");
    hasher.update(publisher.as_bytes());
    let digest = hasher.finalize();
    i64::from_be_bytes(digest[..8].try_into().expect("md5 digest is 16 bytes"))
}

/// The advisory-lock lease of one worker.
pub(crate) struct LeaderLease {
    pool: PgPool,
    topic: String,
    publisher: String,
    instance_id: String,
    key: i64,
    metrics: MetricsBus,
    shutdown: CancellationToken,
    conn: Option<PgConnection>,
    heartbeat: Option<(CancellationToken, JoinHandle<()>)>,
}

impl LeaderLease {
    pub(crate) fn new(
        pool: PgPool,
        topic: String,
        publisher: String,
        metrics: MetricsBus,
        shutdown: CancellationToken,
    ) -> Self {
        let key = lease_key(&topic, &publisher);
        Self {
            pool,
            topic,
            publisher,
            instance_id: Uuid::now_v7().to_string(),
            key,
            metrics,
            shutdown,
            conn: None,
            heartbeat: None,
        }
    }

    pub(crate) fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Returns true if this instance holds the lease, acquiring it when it
    /// is free. A held lease is verified by pinging its session; a dead
    /// session drops the lease locally (the server already released the
    /// lock with the session).
    pub(crate) async fn ensure(&mut self) -> Result<bool, Error> {
        if let Some(conn) = self.conn.as_mut() {
            if sqlx::query("SELECT 1").execute(&mut *conn).await.is_ok() {
                return Ok(true);
            }
            warn!(
                topic = %self.topic,
                publisher = %self.publisher,
                "leader session lost, releasing lease"
            );
            self.drop_lease().await;
        }

        let mut conn = self.pool.acquire().await?.detach();
        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(self.key)
            .fetch_one(&mut conn)
            .await?;
        if !acquired {
            let _ = conn.close().await;
            return Ok(false);
        }

        progress::set_leader(&self.pool, &self.topic, &self.publisher, &self.instance_id).await?;
        info!(
            topic = %self.topic,
            publisher = %self.publisher,
            instance = %self.instance_id,
            "acquired outbox leadership"
        );
        self.metrics.publish(Metric::Leadership {
            instance_id: self.instance_id.clone(),
            is_leader: true,
        });

        let token = self.shutdown.child_token();
        let handle = tokio::spawn(heartbeat_loop(
            self.pool.clone(),
            self.topic.clone(),
            self.publisher.clone(),
            self.instance_id.clone(),
            token.clone(),
        ));
        self.heartbeat = Some((token, handle));
        self.conn = Some(conn);
        Ok(true)
    }

    /// Releases the lease: unlocks, closes the session and clears the
    /// leader columns.
    pub(crate) async fn release(&mut self) {
        if self.conn.is_none() {
            return;
        }
        if let Some(mut conn) = self.conn.take() {
            let _ = sqlx::query("SELECT pg_advisory_unlock($1)")
                .bind(self.key)
                .execute(&mut conn)
                .await;
            let _ = conn.close().await;
        }
        self.stop_heartbeat().await;
        let _ =
            progress::clear_leader(&self.pool, &self.topic, &self.publisher, &self.instance_id)
                .await;
        self.metrics.publish(Metric::Leadership {
            instance_id: self.instance_id.clone(),
            is_leader: false,
        });
    }

    /// Drops the lease without unlocking: the session is already gone and
    /// took the lock with it.
    async fn drop_lease(&mut self) {
        self.conn = None;
        self.stop_heartbeat().await;
        self.metrics.publish(Metric::Leadership {
            instance_id: self.instance_id.clone(),
            is_leader: false,
        });
    }

    async fn stop_heartbeat(&mut self) {
        if let Some((token, handle)) = self.heartbeat.take() {
            token.cancel();
            let _ = handle.await;
        }
    }
}

async fn heartbeat_loop(
    pool: PgPool,
    topic: String,
    publisher: String,
    instance: String,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = progress::heartbeat(&pool, &topic, &publisher, &instance).await {
                    warn!(
                        %topic,
                        %publisher,
                        error = %err,
                        "leader heartbeat failed"
                    );
                }
            }
            _ = token.cancelled() => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_derives_a_stable_lease_key() {
        let key = lease_key("default", "KafkaPublisher");
        assert_eq!(key, lease_key("default", "KafkaPublisher"));
        assert_ne!(key, lease_key("default", "OtherPublisher"));
        assert_ne!(key, lease_key("other", "KafkaPublisher"));
    }
}
