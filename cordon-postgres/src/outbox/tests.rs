use super::*;
use crate::PgEventStore;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cordon::{tags, AppendCondition, AppendEvent, BackoffConfig, EventStore};
use cordon_serde::json::Json;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Note {
    text: String,
}

type NoteStore = PgEventStore<Note, Json<Note>>;

async fn note_store(pool: PgPool) -> NoteStore {
    PgEventStore::try_new(pool, Json::default()).await.unwrap()
}

fn wallet_note(text: &str) -> AppendEvent<Note> {
    AppendEvent::new(
        "NoteTaken",
        tags! {wallet_id: "w1"},
        Note {
            text: text.to_string(),
        },
    )
    .unwrap()
}

fn untagged_note(text: &str) -> AppendEvent<Note> {
    AppendEvent::new(
        "NoteTaken",
        vec![],
        Note {
            text: text.to_string(),
        },
    )
    .unwrap()
}

fn fast_config() -> OutboxConfig {
    OutboxConfig {
        polling_interval_ms: 20,
        retry_delay_ms: 10,
        backoff: BackoffConfig {
            enabled: false,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn wallet_topic() -> Topic {
    Topic::new("wallets").unwrap().require_tag("wallet_id").unwrap()
}

struct RecordingPublisher {
    name: String,
    delivered: Arc<Mutex<Vec<i64>>>,
}

#[async_trait]
impl Publisher<Note> for RecordingPublisher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish_batch(&self, events: &[StoredEvent<Note>]) -> Result<(), BoxDynError> {
        self.delivered
            .lock()
            .unwrap()
            .extend(events.iter().map(|e| e.position()));
        Ok(())
    }
}

struct FailingPublisher {
    name: String,
    attempts: Arc<AtomicUsize>,
}

#[async_trait]
impl Publisher<Note> for FailingPublisher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish_batch(&self, _events: &[StoredEvent<Note>]) -> Result<(), BoxDynError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err("sink unavailable".into())
    }
}

/// Delivers one event per call and always fails at a fixed position.
struct SingleModePublisher {
    name: String,
    delivered: Arc<Mutex<Vec<i64>>>,
    poison_position: i64,
}

#[async_trait]
impl Publisher<Note> for SingleModePublisher {
    fn name(&self) -> &str {
        &self.name
    }

    fn preferred_mode(&self) -> PublishMode {
        PublishMode::Single
    }

    async fn publish_batch(&self, events: &[StoredEvent<Note>]) -> Result<(), BoxDynError> {
        if events.iter().any(|e| e.position() == self.poison_position) {
            return Err("poisoned event".into());
        }
        self.delivered
            .lock()
            .unwrap()
            .extend(events.iter().map(|e| e.position()));
        Ok(())
    }
}

#[sqlx::test]
async fn it_delivers_matching_events_in_position_order(pool: PgPool) {
    let store = note_store(pool.clone()).await;
    store
        .append_if(
            vec![
                wallet_note("a"),
                wallet_note("b"),
                wallet_note("c"),
                untagged_note("not for this topic"),
            ],
            AppendCondition::empty(),
        )
        .await
        .unwrap();

    let delivered = Arc::new(Mutex::new(Vec::new()));
    PgOutboxProcessor::builder(store, fast_config())
        .register(
            wallet_topic(),
            RecordingPublisher {
                name: "recorder".to_string(),
                delivered: delivered.clone(),
            },
        )
        .start_with_shutdown(tokio::time::sleep(Duration::from_millis(400)))
        .await
        .unwrap();

    assert_eq!(*delivered.lock().unwrap(), vec![1, 2, 3]);

    let row = progress::load(&pool, "wallets", "recorder")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.last_position, 3);
    assert_eq!(row.worker_status(), Some(WorkerStatus::Active));
    assert!(row.last_published_at.is_some());
    assert!(row.leader_heartbeat.is_some());
}

#[sqlx::test]
async fn it_resumes_from_the_committed_position(pool: PgPool) {
    let store = note_store(pool.clone()).await;
    store
        .append_if(
            vec![wallet_note("a"), wallet_note("b"), wallet_note("c")],
            AppendCondition::empty(),
        )
        .await
        .unwrap();

    // The previous run committed position 1 before crashing mid-publish.
    Migrator::new(pool.clone()).init_outbox().await.unwrap();
    progress::ensure_row(&pool, "wallets", "recorder").await.unwrap();
    sqlx::query(
        "UPDATE outbox_topic_progress SET last_position = 1 \
         WHERE topic = 'wallets' AND publisher = 'recorder'",
    )
    .execute(&pool)
    .await
    .unwrap();

    let delivered = Arc::new(Mutex::new(Vec::new()));
    PgOutboxProcessor::builder(store, fast_config())
        .register(
            wallet_topic(),
            RecordingPublisher {
                name: "recorder".to_string(),
                delivered: delivered.clone(),
            },
        )
        .start_with_shutdown(tokio::time::sleep(Duration::from_millis(300)))
        .await
        .unwrap();

    assert_eq!(*delivered.lock().unwrap(), vec![2, 3]);
}

#[sqlx::test]
async fn it_auto_pauses_a_publisher_that_keeps_failing(pool: PgPool) {
    let store = note_store(pool.clone()).await;
    store
        .append_if(vec![wallet_note("a")], AppendCondition::empty())
        .await
        .unwrap();

    let attempts = Arc::new(AtomicUsize::new(0));
    let config = OutboxConfig {
        max_retries: 0,
        ..fast_config()
    };
    PgOutboxProcessor::builder(store, config)
        .register(
            wallet_topic(),
            FailingPublisher {
                name: "flaky".to_string(),
                attempts: attempts.clone(),
            },
        )
        .start_with_shutdown(tokio::time::sleep(Duration::from_millis(300)))
        .await
        .unwrap();

    assert!(attempts.load(Ordering::SeqCst) >= 1);
    let row = progress::load(&pool, "wallets", "flaky")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.worker_status(), Some(WorkerStatus::Failed));
    assert_eq!(row.last_position, 0);
    assert_eq!(row.last_error.as_deref(), Some("sink unavailable"));
}

#[sqlx::test]
async fn it_advances_per_event_in_single_mode(pool: PgPool) {
    let store = note_store(pool.clone()).await;
    store
        .append_if(
            vec![wallet_note("a"), wallet_note("b"), wallet_note("c")],
            AppendCondition::empty(),
        )
        .await
        .unwrap();

    let delivered = Arc::new(Mutex::new(Vec::new()));
    PgOutboxProcessor::builder(store, fast_config())
        .register(
            wallet_topic(),
            SingleModePublisher {
                name: "single".to_string(),
                delivered: delivered.clone(),
                poison_position: 3,
            },
        )
        .start_with_shutdown(tokio::time::sleep(Duration::from_millis(300)))
        .await
        .unwrap();

    assert_eq!(*delivered.lock().unwrap(), vec![1, 2]);
    let row = progress::load(&pool, "wallets", "single")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.last_position, 2);
    assert!(row.error_count >= 1);
}

#[sqlx::test]
async fn it_skips_cycles_while_paused(pool: PgPool) {
    let store = note_store(pool.clone()).await;
    store
        .append_if(vec![wallet_note("a")], AppendCondition::empty())
        .await
        .unwrap();

    Migrator::new(pool.clone()).init_outbox().await.unwrap();
    progress::ensure_row(&pool, "wallets", "recorder").await.unwrap();
    OutboxAdmin::new(pool.clone())
        .pause("wallets", "recorder")
        .await
        .unwrap();

    let delivered = Arc::new(Mutex::new(Vec::new()));
    PgOutboxProcessor::builder(store, fast_config())
        .register(
            wallet_topic(),
            RecordingPublisher {
                name: "recorder".to_string(),
                delivered: delivered.clone(),
            },
        )
        .start_with_shutdown(tokio::time::sleep(Duration::from_millis(200)))
        .await
        .unwrap();

    assert!(delivered.lock().unwrap().is_empty());
}

#[sqlx::test]
async fn it_reports_status_and_lag_and_recovers_rows(pool: PgPool) {
    let store = note_store(pool.clone()).await;
    store
        .append_if(
            vec![wallet_note("a"), wallet_note("b"), wallet_note("c")],
            AppendCondition::empty(),
        )
        .await
        .unwrap();

    Migrator::new(pool.clone()).init_outbox().await.unwrap();
    progress::ensure_row(&pool, "wallets", "recorder").await.unwrap();
    let admin = OutboxAdmin::new(pool.clone());

    assert_eq!(admin.lag("wallets", "recorder").await.unwrap(), Some(3));
    assert_eq!(admin.lag("wallets", "unknown").await.unwrap(), None);

    assert!(admin.pause("wallets", "recorder").await.unwrap());
    // Pausing an already paused worker is a no-op.
    assert!(!admin.pause("wallets", "recorder").await.unwrap());
    let row = admin.status("wallets", "recorder").await.unwrap().unwrap();
    assert_eq!(row.worker_status(), Some(WorkerStatus::Paused));

    assert!(admin.resume("wallets", "recorder").await.unwrap());
    let row = admin.status("wallets", "recorder").await.unwrap().unwrap();
    assert_eq!(row.worker_status(), Some(WorkerStatus::Active));

    assert!(admin.reset_to("wallets", "recorder", 1).await.unwrap());
    let row = admin.status("wallets", "recorder").await.unwrap().unwrap();
    assert_eq!(row.last_position, 1);
    assert_eq!(admin.lag("wallets", "recorder").await.unwrap(), Some(2));

    // A plain reset reactivates without touching the position.
    assert!(admin.pause("wallets", "recorder").await.unwrap());
    assert!(admin.reset("wallets", "recorder").await.unwrap());
    let row = admin.status("wallets", "recorder").await.unwrap().unwrap();
    assert_eq!(row.worker_status(), Some(WorkerStatus::Active));
    assert_eq!(row.last_position, 1);
}

#[sqlx::test]
async fn it_hands_leadership_over_when_the_leader_stops(pool: PgPool) {
    let store = note_store(pool.clone()).await;
    store
        .append_if(
            vec![
                wallet_note("a"),
                wallet_note("b"),
                wallet_note("c"),
                wallet_note("d"),
                wallet_note("e"),
            ],
            AppendCondition::empty(),
        )
        .await
        .unwrap();

    // The schema is initialized once up front so the two concurrently
    // starting instances skip their own DDL.
    Migrator::new(pool.clone()).init_outbox().await.unwrap();

    let delivered = Arc::new(Mutex::new(Vec::new()));
    let first = PgOutboxProcessor::builder(store.clone(), fast_config())
        .uninitialized()
        .register(
            wallet_topic(),
            RecordingPublisher {
                name: "recorder".to_string(),
                delivered: delivered.clone(),
            },
        );
    let second = PgOutboxProcessor::builder(store.clone(), fast_config())
        .uninitialized()
        .register(
            wallet_topic(),
            RecordingPublisher {
                name: "recorder".to_string(),
                delivered: delivered.clone(),
            },
        );

    let first = tokio::spawn(
        first.start_with_shutdown(tokio::time::sleep(Duration::from_millis(250))),
    );
    let second = tokio::spawn(
        second.start_with_shutdown(tokio::time::sleep(Duration::from_millis(900))),
    );

    // Wait until the first instance has shut down and released its lock,
    // then commit more events for the surviving instance.
    tokio::time::sleep(Duration::from_millis(450)).await;
    store
        .append_if(
            vec![wallet_note("f"), wallet_note("g")],
            AppendCondition::empty(),
        )
        .await
        .unwrap();

    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    // Every event was delivered exactly once and in order: the advisory
    // lock never let both instances advance the same row.
    assert_eq!(*delivered.lock().unwrap(), vec![1, 2, 3, 4, 5, 6, 7]);
}
