//! Backoff and adapter-health primitives shared by the source adapters and
//! the supervisor restart loop.

use std::time::Duration;

use rand::Rng;

/// Capped exponential backoff with jitter. Carried as a local inside the
/// owning task; `reset()` after the first success.
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            attempt: 0,
        }
    }

    /// Default profile for scan-API polling errors (1s → 30s).
    pub fn for_polling() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }

    /// Default profile for websocket reconnects (2s → 30s).
    pub fn for_websocket() -> Self {
        Self::new(Duration::from_secs(2), Duration::from_secs(30))
    }

    pub fn next_delay(&mut self) -> Duration {
        let exp = (self.base.as_millis() as u64)
            .saturating_mul(2u64.saturating_pow(self.attempt.min(20)));
        self.attempt = self.attempt.saturating_add(1);
        let capped = exp.min(self.cap.as_millis() as u64);
        // Up to 20% jitter so reconnect storms spread out.
        let jitter = rand::rng().random_range(0.0..0.2);
        Duration::from_millis(capped + (capped as f64 * jitter) as u64)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// Consecutive-failure tracker deciding when an adapter is degraded. The
/// supervisor stops restarting a degraded adapter and keeps serving the
/// rest of the pipeline.
#[derive(Debug)]
pub struct FailureTracker {
    consecutive: u32,
    threshold: u32,
}

impl FailureTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            consecutive: 0,
            threshold,
        }
    }

    pub fn record_failure(&mut self) {
        self.consecutive = self.consecutive.saturating_add(1);
    }

    pub fn record_success(&mut self) {
        self.consecutive = 0;
    }

    pub fn is_degraded(&self) -> bool {
        self.consecutive >= self.threshold
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
        let first = backoff.next_delay();
        let second = backoff.next_delay();
        assert!(first >= Duration::from_secs(1));
        assert!(second >= Duration::from_secs(2));

        for _ in 0..10 {
            backoff.next_delay();
        }
        // 20% jitter headroom above the cap
        assert!(backoff.next_delay() <= Duration::from_secs(36));
    }

    #[test]
    fn test_backoff_reset() {
        let mut backoff = Backoff::for_polling();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
    }

    #[test]
    fn test_failure_tracker_degrades_at_threshold() {
        let mut tracker = FailureTracker::new(3);
        tracker.record_failure();
        tracker.record_failure();
        assert!(!tracker.is_degraded());
        tracker.record_failure();
        assert!(tracker.is_degraded());

        tracker.record_success();
        assert!(!tracker.is_degraded());
    }
}
