//! Exponential skip-based backoff for polling workers.
//!
//! An idle worker should not hammer the database. The controller counts
//! consecutive empty polls; past a threshold it tells the worker to skip a
//! growing number of polling ticks, doubling (or whatever the multiplier
//! says) per additional empty poll, capped so the worker never sleeps longer
//! than a configured number of seconds. Any progress resets it instantly.
use std::time::Duration;

use serde::Deserialize;

/// Backoff configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BackoffConfig {
    /// Whether backoff is applied at all.
    pub enabled: bool,
    /// Consecutive empty polls before backoff begins.
    pub threshold: u32,
    /// Growth factor of the skip count per additional empty poll.
    pub multiplier: u32,
    /// Upper bound of the skipped time, in seconds.
    pub max_seconds: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 3,
            multiplier: 2,
            max_seconds: 60,
        }
    }
}

/// Per-worker backoff state machine.
#[derive(Debug, Clone)]
pub struct PollBackoff {
    enabled: bool,
    threshold: u32,
    multiplier: u32,
    max_skips: u64,
    empty_polls: u32,
    skip_counter: u64,
}

impl PollBackoff {
    /// Creates the controller for a worker polling at the given interval.
    ///
    /// The maximum number of skipped ticks is derived from the configured
    /// cap: `max_seconds * 1000 / polling_interval_ms`.
    pub fn new(config: &BackoffConfig, polling_interval: Duration) -> Self {
        let interval_ms = polling_interval.as_millis().max(1) as u64;
        Self {
            enabled: config.enabled,
            threshold: config.threshold,
            multiplier: config.multiplier.max(1),
            max_skips: config.max_seconds.saturating_mul(1000) / interval_ms,
            empty_polls: 0,
            skip_counter: 0,
        }
    }

    /// Records an empty poll; past the threshold the skip counter grows
    /// exponentially up to the cap.
    pub fn record_empty(&mut self) {
        if !self.enabled {
            return;
        }
        self.empty_polls = self.empty_polls.saturating_add(1);
        if self.empty_polls > self.threshold {
            let exponent = self.empty_polls - self.threshold;
            let skips = (self.multiplier as u64)
                .checked_pow(exponent)
                .map(|n| n.saturating_sub(1))
                .unwrap_or(u64::MAX);
            self.skip_counter = skips.min(self.max_skips);
        }
    }

    /// Records progress: both counters reset immediately.
    pub fn record_success(&mut self) {
        self.empty_polls = 0;
        self.skip_counter = 0;
    }

    /// Returns true if the current polling tick should be skipped, consuming
    /// one pending skip.
    pub fn should_skip(&mut self) -> bool {
        if self.skip_counter > 0 {
            self.skip_counter -= 1;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff() -> PollBackoff {
        PollBackoff::new(
            &BackoffConfig {
                enabled: true,
                threshold: 3,
                multiplier: 2,
                max_seconds: 60,
            },
            Duration::from_millis(1000),
        )
    }

    #[test]
    fn it_does_not_skip_below_the_threshold() {
        let mut backoff = backoff();
        for _ in 0..3 {
            backoff.record_empty();
            assert!(!backoff.should_skip());
        }
    }

    #[test]
    fn it_grows_the_skip_count_exponentially() {
        let mut backoff = backoff();
        for _ in 0..4 {
            backoff.record_empty();
        }
        // 2^1 - 1
        assert!(backoff.should_skip());
        assert!(!backoff.should_skip());

        backoff.record_empty();
        // 2^2 - 1
        for _ in 0..3 {
            assert!(backoff.should_skip());
        }
        assert!(!backoff.should_skip());
    }

    #[test]
    fn it_caps_the_skip_count() {
        let mut backoff = PollBackoff::new(
            &BackoffConfig {
                enabled: true,
                threshold: 0,
                multiplier: 2,
                max_seconds: 5,
            },
            Duration::from_millis(1000),
        );
        for _ in 0..40 {
            backoff.record_empty();
        }
        let mut skips = 0;
        while backoff.should_skip() {
            skips += 1;
        }
        assert_eq!(skips, 5);
    }

    #[test]
    fn it_resets_on_success() {
        let mut backoff = backoff();
        for _ in 0..6 {
            backoff.record_empty();
        }
        backoff.record_success();
        assert!(!backoff.should_skip());
        backoff.record_empty();
        assert!(!backoff.should_skip());
    }

    #[test]
    fn it_is_inert_when_disabled() {
        let mut backoff = PollBackoff::new(
            &BackoffConfig {
                enabled: false,
                ..Default::default()
            },
            Duration::from_millis(1000),
        );
        for _ in 0..100 {
            backoff.record_empty();
        }
        assert!(!backoff.should_skip());
    }
}
