//! Reconnect pacing: exponential backoff and the abnormal-closure breaker.
//!
//! DESIGN
//! ======
//! The breaker is a sliding window of closure instants backed by a
//! `VecDeque<Instant>`. Closures older than the window are pruned before each
//! check, so the threshold only counts closures that are close together.
//! Timestamps are passed in explicitly so the policy can be tested without a
//! clock.

use std::collections::VecDeque;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

/// Exponential reconnect delay: `base * 2^attempt`, capped at `ceiling`,
/// plus up to `jitter` of the capped delay at random.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Backoff {
    base: Duration,
    ceiling: Duration,
    jitter: f64,
}

impl Backoff {
    pub(crate) fn new(base: Duration, ceiling: Duration, jitter: f64) -> Self {
        Self { base, ceiling, jitter: jitter.clamp(0.0, 1.0) }
    }

    /// Delay before reconnect attempt number `attempt` (0-based), without jitter.
    pub(crate) fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(20));
        self.base.saturating_mul(factor).min(self.ceiling)
    }

    /// Delay before reconnect attempt number `attempt`, including jitter.
    pub(crate) fn delay(&self, attempt: u32) -> Duration {
        let delay = self.base_delay(attempt);
        delay + self.jitter_for(delay)
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    fn jitter_for(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return Duration::ZERO;
        }
        let max_ms = (delay.as_millis() as f64 * self.jitter) as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=max_ms))
    }
}

/// Counts abnormal closures inside a sliding observation window.
#[derive(Debug)]
pub(crate) struct CircuitBreaker {
    threshold: usize,
    window: Duration,
    closures: VecDeque<Instant>,
}

impl CircuitBreaker {
    pub(crate) fn new(threshold: usize, window: Duration) -> Self {
        Self { threshold: threshold.max(1), window, closures: VecDeque::new() }
    }

    /// Record an abnormal closure at `now`. Returns `true` when the breaker trips.
    pub(crate) fn record(&mut self, now: Instant) -> bool {
        prune_window(&mut self.closures, now, self.window);
        self.closures.push_back(now);
        self.closures.len() >= self.threshold
    }

    /// Closures currently inside the window as of the last `record`.
    pub(crate) fn count(&self) -> usize {
        self.closures.len()
    }

    pub(crate) fn reset(&mut self) {
        self.closures.clear();
    }
}

/// Remove entries older than `window` from the front of the deque.
fn prune_window(deque: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&front) = deque.front() {
        if now.duration_since(front) >= window {
            deque.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
#[path = "backoff_test.rs"]
mod tests;
