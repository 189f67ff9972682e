//! Command dispatcher: delivers a command to the node hosting its target.
//!
//! Routing is resolved against the registry at dispatch time, never
//! cached. A command whose target left, moved to an unknown host, or whose
//! host link is down is dropped and logged; nothing is retried or queued.
//!
//! ```text
//!   Command ──▶ host_of(target) ──▶ links[node] ──▶ try_send ──▶ writer task
//!                   │                   │               │
//!              UnknownPlayer      NoRoute/NodeNotLive   QueueFull
//!              Suspended
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use afkwatch_protocol::{Command, NodeId, NodeRole, PlayerId};
use afkwatch_session::{AfkState, Host, SessionRegistry};
use afkwatch_transport::{CommandSink, ConnectionId, Liveness};
use tokio::sync::mpsc::{self, error::TrySendError};

/// Why a command was not delivered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutingError {
    #[error("no session for player {0}")]
    UnknownPlayer(PlayerId),

    #[error("player {0} is suspended (host unknown)")]
    Suspended(PlayerId),

    #[error("no link to node {0}")]
    NoRoute(NodeId),

    #[error("node {node} is {liveness}")]
    NodeNotLive { node: NodeId, liveness: Liveness },

    #[error("outbound queue to node {0} is full")]
    QueueFull(NodeId),
}

/// Where a link's commands go.
pub enum Outbound {
    /// A node connected over the wire.
    Remote {
        conn: ConnectionId,
        sender: mpsc::Sender<Command>,
    },
    /// A node served inside the proxy process.
    Local(Arc<dyn CommandSink>),
}

impl fmt::Debug for Outbound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote { conn, .. } => f.debug_struct("Remote").field("conn", conn).finish(),
            Self::Local(_) => f.write_str("Local"),
        }
    }
}

/// The proxy's handle on one node.
#[derive(Debug)]
pub struct NodeLink {
    pub role: NodeRole,
    pub liveness: Liveness,
    pub outbound: Outbound,
}

impl NodeLink {
    /// The current connection instance, for remote links.
    pub fn conn(&self) -> Option<ConnectionId> {
        match &self.outbound {
            Outbound::Remote { conn, .. } => Some(*conn),
            Outbound::Local(_) => None,
        }
    }
}

/// Node → link map plus the routing rules.
#[derive(Debug, Default)]
pub struct CommandDispatcher {
    links: HashMap<NodeId, NodeLink>,
}

impl CommandDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a node served in-process. It is always live.
    pub fn add_local(&mut self, node: NodeId, role: NodeRole, sink: Arc<dyn CommandSink>) {
        tracing::info!(%node, %role, "local node registered");
        self.links.insert(
            node,
            NodeLink {
                role,
                liveness: Liveness::Connected,
                outbound: Outbound::Local(sink),
            },
        );
    }

    /// Installs the link for a node that completed its handshake, replacing
    /// any previous connection instance. Returns the replaced connection.
    pub fn on_node_up(
        &mut self,
        node: NodeId,
        role: NodeRole,
        conn: ConnectionId,
        sender: mpsc::Sender<Command>,
    ) -> Option<ConnectionId> {
        let previous = self
            .links
            .insert(
                node.clone(),
                NodeLink {
                    role,
                    liveness: Liveness::Connected,
                    outbound: Outbound::Remote { conn, sender },
                },
            )
            .and_then(|old| old.conn());
        tracing::info!(%node, %role, %conn, "node link up");
        previous
    }

    /// Marks the node degraded if `conn` is still its current connection.
    ///
    /// Returns `false` for a connection that was already replaced; its
    /// players belong to the newer instance and must not be touched.
    pub fn on_node_down(&mut self, node: &NodeId, conn: ConnectionId) -> bool {
        let Some(link) = self.links.get_mut(node) else {
            return false;
        };
        if link.conn() != Some(conn) {
            tracing::debug!(%node, %conn, "ignoring close of a replaced connection");
            return false;
        }
        link.liveness = Liveness::Degraded;
        tracing::warn!(%node, %conn, "node link degraded");
        true
    }

    /// `true` if `conn` is the node's current connection instance.
    pub fn is_current(&self, node: &NodeId, conn: ConnectionId) -> bool {
        self.links
            .get(node)
            .is_some_and(|link| link.conn() == Some(conn))
    }

    pub fn is_live(&self, node: &NodeId) -> bool {
        self.links
            .get(node)
            .is_some_and(|link| link.liveness == Liveness::Connected)
    }

    pub fn link(&self, node: &NodeId) -> Option<&NodeLink> {
        self.links.get(node)
    }

    /// Hands `command` to the link of the node hosting its target.
    ///
    /// Returns the node the command went to.
    pub fn dispatch(
        &self,
        registry: &SessionRegistry,
        command: Command,
    ) -> Result<NodeId, RoutingError> {
        let player = command.target;
        let session = registry
            .get(player)
            .ok_or(RoutingError::UnknownPlayer(player))?;
        let node = match &session.host {
            Host::Known(node) if session.state != AfkState::Suspended => node,
            _ => return Err(RoutingError::Suspended(player)),
        };
        let link = self
            .links
            .get(node)
            .ok_or_else(|| RoutingError::NoRoute(node.clone()))?;
        if link.liveness != Liveness::Connected {
            return Err(RoutingError::NodeNotLive {
                node: node.clone(),
                liveness: link.liveness,
            });
        }

        let action = command.action.name();
        match &link.outbound {
            Outbound::Remote { conn, sender } => {
                sender.try_send(command).map_err(|e| match e {
                    TrySendError::Full(_) => RoutingError::QueueFull(node.clone()),
                    TrySendError::Closed(_) => RoutingError::NodeNotLive {
                        node: node.clone(),
                        liveness: Liveness::Closed,
                    },
                })?;
                tracing::debug!(%player, %node, %conn, action, "command queued");
            }
            Outbound::Local(sink) => {
                sink.on_command(command);
                tracing::debug!(%player, %node, action, "command delivered locally");
            }
        }
        Ok(node.clone())
    }
}
