//! Transport layer for afkwatch.
//!
//! Carries protocol messages over framed TCP between backend nodes and the
//! proxy, and keeps each link honest:
//!
//! - [`FrameReader`] / [`FrameWriter`]: message I/O over any tokio stream.
//! - [`NodeListener`]: proxy side. Handshake, heartbeat timeout, per-link
//!   outbound queue, all surfaced as [`TransportEvent`]s.
//! - [`NodeClient`]: node side. Reconnects with [`Backoff`], resyncs its
//!   hosted players, hands incoming commands to a [`CommandSink`].
//!
//! Delivery is at-most-once per physical connection. Nothing is acked or
//! replayed; a dropped link loses whatever was in flight.

mod backoff;
mod client;
mod config;
mod error;
mod framed;
mod heartbeat;
mod listener;

pub use backoff::Backoff;
pub use client::{CommandSink, NodeClient};
pub use config::{BackoffConfig, TransportConfig};
pub use error::TransportError;
pub use framed::{FrameReader, FrameWriter};
pub use heartbeat::{HeartbeatMonitor, Liveness};
pub use listener::{DownReason, NodeListener, TransportEvent, accept_handshake};

use std::fmt;

/// Opaque identifier for one physical connection.
///
/// A node that reconnects keeps its [`NodeId`](afkwatch_protocol::NodeId)
/// but gets a fresh `ConnectionId`, which is how stale events from the old
/// connection are told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}
