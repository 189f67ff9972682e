//! Timing and queue settings for node links.

use std::time::Duration;

use crate::TransportError;

/// Reconnection backoff settings (node side).
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Shortest delay between attempts, and the value after a reset.
    pub floor: Duration,
    /// Longest delay between attempts.
    pub ceiling: Duration,
    /// Growth factor per failed attempt.
    pub multiplier: f64,
    /// Fractional jitter applied as ± to each delay (0.0 to 1.0).
    pub jitter: f64,
    /// A link that stayed up at least this long resets the delay to `floor`.
    pub reset_after: Duration,
}

impl BackoffConfig {
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.floor.is_zero() {
            return Err(invalid("backoff floor must be greater than zero"));
        }
        if self.ceiling < self.floor {
            return Err(invalid(format!(
                "backoff ceiling {:?} is below floor {:?}",
                self.ceiling, self.floor
            )));
        }
        if !(self.multiplier >= 1.0 && self.multiplier.is_finite()) {
            return Err(invalid(format!(
                "backoff multiplier {} must be at least 1.0",
                self.multiplier
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(invalid(format!(
                "backoff jitter {} must be within 0.0..=1.0",
                self.jitter
            )));
        }
        if self.reset_after.is_zero() {
            return Err(invalid("backoff reset_after must be greater than zero"));
        }
        Ok(())
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            floor: Duration::from_secs(1),
            ceiling: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.25,
            reset_after: Duration::from_secs(60),
        }
    }
}

/// Settings shared by the proxy listener and the node client.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportConfig {
    /// How often each side sends HEARTBEAT.
    pub heartbeat_interval: Duration,
    /// How long the proxy waits for HELLO (and the node for TCP connect).
    pub handshake_timeout: Duration,
    /// Capacity of each connection's bounded outbound queue.
    pub outbound_queue: usize,
    pub backoff: BackoffConfig,
}

impl TransportConfig {
    /// Rejects values that would panic or spin at runtime: zero durations,
    /// an empty queue, and backoff settings outside their ranges.
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.heartbeat_interval.is_zero() {
            return Err(invalid("heartbeat interval must be greater than zero"));
        }
        if self.handshake_timeout.is_zero() {
            return Err(invalid("handshake timeout must be greater than zero"));
        }
        if self.outbound_queue == 0 {
            return Err(invalid("outbound queue must hold at least one frame"));
        }
        self.backoff.validate()
    }

    /// Silence longer than this means the link is dead.
    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_interval * 3
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(5),
            outbound_queue: 256,
            backoff: BackoffConfig::default(),
        }
    }
}

fn invalid(reason: impl Into<String>) -> TransportError {
    TransportError::InvalidConfig(reason.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_timeout_is_three_intervals() {
        let config = TransportConfig {
            heartbeat_interval: Duration::from_millis(200),
            ..TransportConfig::default()
        };
        assert_eq!(config.heartbeat_timeout(), Duration::from_millis(600));
    }

    #[test]
    fn test_validate_default_ok() {
        assert!(TransportConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_zero_queue_rejected() {
        let config = TransportConfig {
            outbound_queue: 0,
            ..TransportConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TransportError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validate_zero_heartbeat_rejected() {
        let config = TransportConfig {
            heartbeat_interval: Duration::ZERO,
            ..TransportConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_backoff_out_of_range_rejected() {
        let cases = [
            BackoffConfig { jitter: 1.5, ..BackoffConfig::default() },
            BackoffConfig { jitter: -0.1, ..BackoffConfig::default() },
            BackoffConfig { jitter: f64::NAN, ..BackoffConfig::default() },
            BackoffConfig { multiplier: 0.5, ..BackoffConfig::default() },
            BackoffConfig { multiplier: f64::INFINITY, ..BackoffConfig::default() },
            BackoffConfig { floor: Duration::ZERO, ..BackoffConfig::default() },
            BackoffConfig {
                floor: Duration::from_secs(10),
                ceiling: Duration::from_secs(5),
                ..BackoffConfig::default()
            },
        ];
        for backoff in cases {
            let config = TransportConfig {
                backoff: backoff.clone(),
                ..TransportConfig::default()
            };
            assert!(config.validate().is_err(), "accepted {backoff:?}");
        }
    }

    #[test]
    fn test_validate_jitter_bounds_inclusive() {
        for jitter in [0.0, 1.0] {
            let backoff = BackoffConfig { jitter, ..BackoffConfig::default() };
            assert!(backoff.validate().is_ok());
        }
    }
}
