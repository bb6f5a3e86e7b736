//! A broadcast bus of typed metric events.
//!
//! Producers publish fire-and-forget; subscribers (a Prometheus adapter, a
//! test probe) consume at their own pace. Delivery is lossy under lag, which
//! is acceptable for counters and timers. The bus is passed in explicitly at
//! construction; there is no process-wide sink.
use std::time::Duration;

use tokio::sync::broadcast;

/// A typed metric event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Metric {
    /// Events were appended to the store.
    EventsAppended { count: usize },
    /// One appended event of the given type.
    EventType { event_type: String },
    /// An append was rejected by its condition.
    ConcurrencyViolation,
    /// Command execution started.
    CommandStarted,
    /// A command completed successfully.
    CommandSucceeded {
        command_type: String,
        duration: Duration,
    },
    /// A command failed.
    CommandFailed {
        command_type: String,
        error_kind: String,
    },
    /// A command took the idempotent path.
    IdempotentOperation { command_type: String },
    /// Events were delivered to a publisher.
    EventsPublished { publisher: String, count: usize },
    /// Wall-clock time of one publish call.
    PublishingDuration {
        publisher: String,
        duration: Duration,
    },
    /// A publisher failed.
    OutboxError { publisher: String },
    /// One outbox worker cycle completed.
    ProcessingCycle,
    /// A leadership change was observed.
    Leadership {
        instance_id: String,
        is_leader: bool,
    },
}

const DEFAULT_CAPACITY: usize = 256;

/// Multi-producer, multi-consumer metric channel.
#[derive(Debug, Clone)]
pub struct MetricsBus {
    sender: broadcast::Sender<Metric>,
}

impl MetricsBus {
    /// Creates a bus buffering up to `capacity` metrics per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes a metric. Never blocks; a bus without subscribers drops
    /// the metric.
    pub fn publish(&self, metric: Metric) {
        let _ = self.sender.send(metric);
    }

    /// Subscribes to all metrics published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Metric> {
        self.sender.subscribe()
    }
}

impl Default for MetricsBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
