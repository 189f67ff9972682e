//! Proxy side: accept node connections and turn them into events.
//!
//! ```text
//!             accept
//! NodeListener ─────▶ per-connection task
//!                       ├─ handshake (HELLO within handshake_timeout)
//!                       ├─ NodeUp ───────────────┐
//!                       ├─ reader loop ─ Inbound ├──▶ events (bounded mpsc)
//!                       │     └ heartbeat timeout │        │
//!                       ├─ writer task            │        ▼
//!                       │     ├ Command queue ◀───┼── proxy loop
//!                       │     └ HEARTBEAT ticks   │
//!                       └─ NodeDown ──────────────┘
//! ```
//!
//! The per-connection task owns all I/O. The proxy loop only ever holds
//! the outbound `Sender<Command>` handed over in [`TransportEvent::NodeUp`].

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use afkwatch_protocol::{
    Command, Event, Message, NodeId, NodeRole, ProtocolError, now_millis,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant, MissedTickBehavior};

use crate::framed::{FrameReader, FrameWriter};
use crate::heartbeat::HeartbeatMonitor;
use crate::{ConnectionId, TransportConfig, TransportError};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Why a node connection ended.
#[derive(Debug)]
pub enum DownReason {
    /// The peer closed the stream, or the proxy dropped the link.
    Closed,
    /// Nothing arrived within the heartbeat timeout.
    HeartbeatTimeout,
    /// I/O or protocol failure.
    Error(TransportError),
}

impl DownReason {
    /// A clean close is not expected to come back; anything else might.
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for DownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => f.write_str("closed"),
            Self::HeartbeatTimeout => f.write_str("heartbeat timeout"),
            Self::Error(e) => write!(f, "{e}"),
        }
    }
}

/// What the listener reports to the proxy loop.
#[derive(Debug)]
pub enum TransportEvent {
    /// A node completed its handshake.
    NodeUp {
        node: NodeId,
        role: NodeRole,
        conn: ConnectionId,
        /// Commands sent here are written by the connection's writer task.
        outbound: mpsc::Sender<Command>,
    },
    /// A node reported something about a player.
    Inbound {
        node: NodeId,
        conn: ConnectionId,
        event: Event,
    },
    /// A node connection ended.
    NodeDown {
        node: NodeId,
        conn: ConnectionId,
        reason: DownReason,
    },
}

/// Accepts node connections for the proxy.
pub struct NodeListener {
    listener: TcpListener,
    config: TransportConfig,
    events: mpsc::Sender<TransportEvent>,
}

impl NodeListener {
    /// Binds the listener. Connections are not accepted until [`run`](Self::run).
    pub async fn bind(
        addr: &str,
        config: TransportConfig,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Self, TransportError> {
        config.validate()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(addr, "node listener bound");
        Ok(Self {
            listener,
            config,
            events,
        })
    }

    /// Returns the local address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.listener
            .local_addr()
            .map_err(TransportError::AcceptFailed)
    }

    /// Runs the accept loop until the event receiver is dropped.
    pub async fn run(self) -> Result<(), TransportError> {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let conn = ConnectionId::new(
                            NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
                        );
                        tracing::debug!(%conn, %peer, "accepted node connection");
                        let _ = stream.set_nodelay(true);
                        tokio::spawn(serve_connection(
                            stream,
                            peer,
                            conn,
                            self.config.clone(),
                            self.events.clone(),
                        ));
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                },
                _ = self.events.closed() => {
                    tracing::info!("node listener stopping");
                    return Ok(());
                }
            }
        }
    }
}

/// Waits for the HELLO that must open every node connection.
///
/// Fails with `HandshakeTimeout` if nothing arrives in time, with
/// `HandshakeExpected` if the first frame is anything else, and with
/// `InvalidHandshake` for an empty node name. Unsupported versions are
/// rejected by the decoder.
pub async fn accept_handshake<R: AsyncRead + Unpin>(
    reader: &mut FrameReader<R>,
    timeout: Duration,
) -> Result<(NodeId, NodeRole), TransportError> {
    let first = tokio::time::timeout(timeout, reader.read_message())
        .await
        .map_err(|_| TransportError::HandshakeTimeout(timeout))??;

    match first {
        Some(Message::Hello { node, role, .. }) => {
            if node.is_empty() {
                return Err(ProtocolError::InvalidHandshake(
                    "empty node name".to_string(),
                )
                .into());
            }
            Ok((node, role))
        }
        Some(other) => Err(ProtocolError::HandshakeExpected(other.kind()).into()),
        None => Err(TransportError::ConnectionClosed(
            "closed before handshake".to_string(),
        )),
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    conn: ConnectionId,
    config: TransportConfig,
    events: mpsc::Sender<TransportEvent>,
) {
    let (read_half, write_half) = stream.into_split();
    let mut reader = FrameReader::new(read_half);
    let writer = FrameWriter::new(write_half);

    let (node, role) = match accept_handshake(&mut reader, config.handshake_timeout).await {
        Ok(handshake) => handshake,
        Err(e) => {
            tracing::warn!(%conn, %peer, error = %e, "handshake failed");
            return;
        }
    };
    tracing::info!(%node, %role, %conn, %peer, "node registered");

    let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_queue);
    let up = TransportEvent::NodeUp {
        node: node.clone(),
        role,
        conn,
        outbound: outbound_tx,
    };
    if events.send(up).await.is_err() {
        return;
    }

    let mut writer_task = tokio::spawn(write_loop(
        writer,
        outbound_rx,
        config.heartbeat_interval,
        node.clone(),
        conn,
    ));

    let reason = tokio::select! {
        reason = read_loop(&mut reader, &node, conn, config.heartbeat_timeout(), &events) => reason,
        finished = &mut writer_task => match finished {
            Ok(Err(e)) => DownReason::Error(e),
            _ => DownReason::Closed,
        },
    };
    writer_task.abort();

    match &reason {
        DownReason::Closed => tracing::info!(%node, %conn, "node disconnected"),
        DownReason::HeartbeatTimeout => {
            tracing::warn!(%node, %conn, "node heartbeat timed out")
        }
        DownReason::Error(e) => {
            tracing::warn!(%node, %conn, error = %e, "node connection failed")
        }
    }
    let _ = events
        .send(TransportEvent::NodeDown { node, conn, reason })
        .await;
}

async fn read_loop<R: AsyncRead + Unpin>(
    reader: &mut FrameReader<R>,
    node: &NodeId,
    conn: ConnectionId,
    timeout: Duration,
    events: &mpsc::Sender<TransportEvent>,
) -> DownReason {
    let mut monitor = HeartbeatMonitor::new(timeout, Instant::now());
    let mut last_seq = 0u64;

    loop {
        let message =
            match tokio::time::timeout_at(monitor.deadline(), reader.read_message()).await {
                Err(_) => return DownReason::HeartbeatTimeout,
                Ok(Ok(None)) => return DownReason::Closed,
                Ok(Err(e)) => return DownReason::Error(e),
                Ok(Ok(Some(message))) => message,
            };
        monitor.record(Instant::now());

        match message {
            Message::Heartbeat { seq, .. } => {
                tracing::trace!(%node, %conn, seq, "heartbeat");
                last_seq = last_seq.max(seq);
            }
            Message::Event(event) => {
                if event.seq <= last_seq {
                    tracing::warn!(
                        %node, %conn, seq = event.seq, last_seq,
                        "dropping event with non-increasing seq"
                    );
                    continue;
                }
                last_seq = event.seq;
                tracing::debug!(%node, %conn, player = %event.player, kind = ?event.kind, "event");
                let inbound = TransportEvent::Inbound {
                    node: node.clone(),
                    conn,
                    event,
                };
                if events.send(inbound).await.is_err() {
                    return DownReason::Closed;
                }
            }
            other @ (Message::Hello { .. } | Message::Command { .. }) => {
                return DownReason::Error(
                    ProtocolError::UnexpectedMessage(other.kind()).into(),
                );
            }
        }
    }
}

async fn write_loop<W: AsyncWrite + Unpin>(
    mut writer: FrameWriter<W>,
    mut outbound: mpsc::Receiver<Command>,
    heartbeat_interval: Duration,
    node: NodeId,
    conn: ConnectionId,
) -> Result<(), TransportError> {
    let mut seq = 0u64;
    let mut ticker = tokio::time::interval(heartbeat_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let message = tokio::select! {
            command = outbound.recv() => match command {
                Some(command) => Message::Command { seq: seq + 1, command },
                // The proxy dropped this link.
                None => return Ok(()),
            },
            _ = ticker.tick() => Message::Heartbeat { seq: seq + 1, timestamp: now_millis() },
        };

        match writer.write_message(&message).await {
            Ok(()) => seq += 1,
            Err(TransportError::Protocol(e)) => {
                tracing::warn!(%node, %conn, error = %e, "dropping unencodable frame");
            }
            Err(e) => return Err(e),
        }
    }
}
