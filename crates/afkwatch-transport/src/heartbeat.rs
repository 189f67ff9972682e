//! Link liveness tracking.

use std::fmt;

use tokio::time::{Duration, Instant};

/// The state of one node link as seen by its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Liveness {
    /// Handshake done, frames flowing.
    Connected,
    /// The link was lost (timeout, I/O error) and may come back.
    Degraded,
    /// The link was closed on purpose and is not coming back.
    Closed,
}

impl fmt::Display for Liveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => f.write_str("connected"),
            Self::Degraded => f.write_str("degraded"),
            Self::Closed => f.write_str("closed"),
        }
    }
}

/// Tracks when a frame was last received on a connection.
///
/// Any frame counts, not just HEARTBEAT: a busy link never needs an
/// explicit heartbeat to stay alive.
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    timeout: Duration,
    last_seen: Instant,
}

impl HeartbeatMonitor {
    pub fn new(timeout: Duration, now: Instant) -> Self {
        Self {
            timeout,
            last_seen: now,
        }
    }

    /// Records a received frame.
    pub fn record(&mut self, now: Instant) {
        self.last_seen = now;
    }

    /// Whether the link has been silent for the whole timeout.
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_seen) >= self.timeout
    }

    /// The instant the link expires if nothing else arrives.
    pub fn deadline(&self) -> Instant {
        self.last_seen + self.timeout
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
