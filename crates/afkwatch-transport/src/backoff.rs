//! Exponential reconnection backoff with jitter.
//!
//! ```text
//! attempt:  1      2      3      4      5     ...
//! base:     1s     2s     4s     8s     16s   30s 30s (ceiling)
//! delay:    base ± 25 %, clamped to [floor, ceiling]
//! ```
//!
//! A link that stays up for `reset_after` puts the delay back to the floor.
//! A link that flaps (connects, then dies quickly) keeps growing it.

use rand::Rng;
use tokio::time::{Duration, Instant};

use crate::config::BackoffConfig;

/// Reconnection delay state for one node client.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
    live_since: Option<Instant>,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        let current = config.floor;
        Self {
            config,
            current,
            live_since: None,
        }
    }

    /// Returns the delay before the next attempt and grows the base.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        let jittered = if self.config.jitter > 0.0 {
            let factor = rand::rng()
                .random_range((1.0 - self.config.jitter)..=(1.0 + self.config.jitter));
            base.mul_f64(factor)
        } else {
            base
        };

        let grown = self.current.mul_f64(self.config.multiplier);
        self.current = grown.clamp(self.config.floor, self.config.ceiling);

        jittered.clamp(self.config.floor, self.config.ceiling)
    }

    /// Records that a connection came up.
    pub fn mark_live(&mut self, now: Instant) {
        self.live_since = Some(now);
    }

    /// Records that the connection went down. Resets the delay if it had
    /// stayed up for at least `reset_after`.
    pub fn mark_down(&mut self, now: Instant) {
        if let Some(since) = self.live_since.take() {
            if now.saturating_duration_since(since) >= self.config.reset_after {
                self.reset();
            }
        }
    }

    /// Puts the delay back to the floor.
    pub fn reset(&mut self) {
        self.current = self.config.floor;
    }

    /// The un-jittered base for the next attempt.
    pub fn current(&self) -> Duration {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(jitter: f64) -> BackoffConfig {
        BackoffConfig {
            floor: Duration::from_secs(1),
            ceiling: Duration::from_secs(10),
            multiplier: 2.0,
            jitter,
            reset_after: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_next_delay_doubles_until_ceiling() {
        let mut backoff = Backoff::new(config(0.0));
        let delays: Vec<u64> = (0..6).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10]);
    }

    #[test]
    fn test_next_delay_with_jitter_stays_within_bounds() {
        let mut backoff = Backoff::new(config(0.25));
        for _ in 0..200 {
            let delay = backoff.next_delay();
            assert!(delay >= Duration::from_secs(1), "below floor: {delay:?}");
            assert!(delay <= Duration::from_secs(10), "above ceiling: {delay:?}");
        }
    }

    #[test]
    fn test_next_delay_jitter_spreads_around_base() {
        let mut seen_low = false;
        let mut seen_high = false;
        for _ in 0..200 {
            let mut backoff = Backoff::new(config(0.25));
            backoff.next_delay();
            // Base is now 2s; jittered range is [1.5s, 2.5s].
            let delay = backoff.next_delay();
            assert!(delay >= Duration::from_millis(1500));
            assert!(delay <= Duration::from_millis(2500));
            seen_low |= delay < Duration::from_secs(2);
            seen_high |= delay > Duration::from_secs(2);
        }
        assert!(seen_low && seen_high, "jitter should go both ways");
    }

    #[test]
    fn test_mark_down_after_long_uptime_resets() {
        let mut backoff = Backoff::new(config(0.0));
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.current(), Duration::from_secs(4));

        let t0 = Instant::now();
        backoff.mark_live(t0);
        backoff.mark_down(t0 + Duration::from_secs(61));
        assert_eq!(backoff.current(), Duration::from_secs(1));
    }

    #[test]
    fn test_mark_down_after_flap_keeps_growing() {
        let mut backoff = Backoff::new(config(0.0));
        backoff.next_delay();
        let t0 = Instant::now();
        backoff.mark_live(t0);
        backoff.mark_down(t0 + Duration::from_secs(5));
        assert_eq!(backoff.current(), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
    }

    #[test]
    fn test_mark_down_without_live_is_noop() {
        let mut backoff = Backoff::new(config(0.0));
        backoff.next_delay();
        backoff.mark_down(Instant::now());
        assert_eq!(backoff.current(), Duration::from_secs(2));
    }
}
