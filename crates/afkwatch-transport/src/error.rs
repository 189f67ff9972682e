use std::time::Duration;

use afkwatch_protocol::ProtocolError;

/// Errors that can occur in the transport layer.
///
/// Apart from `InvalidConfig`, none of these are fatal to the process. On the node side they trigger
/// a reconnect with backoff; on the proxy side they mark the node degraded.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// A [`TransportConfig`](crate::TransportConfig) value is unusable.
    #[error("invalid transport config: {0}")]
    InvalidConfig(String),

    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Binding or accepting connections failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// Opening an outbound connection failed.
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] std::io::Error),

    /// No frame arrived within the heartbeat timeout.
    #[error("no frame received for {0:?}")]
    HeartbeatTimeout(Duration),

    /// The peer did not complete the handshake in time.
    #[error("handshake not completed within {0:?}")]
    HandshakeTimeout(Duration),

    /// A report was made while the link to the proxy is down.
    #[error("not connected to proxy")]
    NotConnected,

    /// The bounded outbound queue is full.
    #[error("outbound queue full")]
    QueueFull,

    /// The peer broke the wire protocol.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The transport was shut down.
    #[error("transport shut down")]
    Shutdown,
}
