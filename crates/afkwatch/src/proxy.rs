//! The proxy's state: registry, AFK tracker and dispatcher in one place.
//!
//! `ProxyCore` is plain synchronous code. It is owned by the proxy loop
//! (see [`AfkProxy::run`](crate::AfkProxy::run)), which feeds it transport
//! events, local reports and sweep ticks one at a time, so nothing here
//! needs a lock and nothing here awaits I/O.

use std::sync::Arc;

use afkwatch_protocol::{Command, Event, EventKind, NodeId, NodeRole, PlayerId};
use afkwatch_session::{Membership, RegistryConfig, SessionRegistry};
use afkwatch_tracker::{AfkPolicy, AfkTracker, PlayerStatus, PolicyError};
use afkwatch_transport::{CommandSink, TransportEvent};

use crate::{CommandDispatcher, RoutingError};

/// A player report paired with the node it came from.
///
/// For remote nodes the node is the one bound at handshake, never a value
/// taken from the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEvent {
    pub node: NodeId,
    pub player: PlayerId,
    /// Sender wall-clock time, Unix milliseconds.
    pub timestamp: u64,
    pub kind: EventKind,
}

impl NodeEvent {
    pub fn new(node: NodeId, player: PlayerId, timestamp: u64, kind: EventKind) -> Self {
        Self {
            node,
            player,
            timestamp,
            kind,
        }
    }

    /// Binds a decoded wire event to its connection's node.
    pub fn from_wire(node: NodeId, event: Event) -> Self {
        Self::new(node, event.player, event.timestamp, event.kind)
    }
}

/// Everything the proxy loop owns.
pub struct ProxyCore {
    registry: SessionRegistry,
    tracker: AfkTracker,
    dispatcher: CommandDispatcher,
}

impl ProxyCore {
    pub fn new(policy: AfkPolicy, registry: RegistryConfig) -> Self {
        Self {
            registry: SessionRegistry::new(registry),
            tracker: AfkTracker::new(policy),
            dispatcher: CommandDispatcher::new(),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    pub fn policy(&self) -> &AfkPolicy {
        self.tracker.policy()
    }

    /// Registers a node served inside this process.
    pub fn add_local_node(&mut self, node: NodeId, role: NodeRole, sink: Arc<dyn CommandSink>) {
        self.dispatcher.add_local(node, role, sink);
    }

    pub fn on_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::NodeUp {
                node,
                role,
                conn,
                outbound,
            } => {
                if let Some(old) = self.dispatcher.on_node_up(node.clone(), role, conn, outbound) {
                    tracing::info!(%node, %old, %conn, "node reconnected");
                }
            }
            TransportEvent::Inbound { node, conn, event } => {
                if !self.dispatcher.is_current(&node, conn) {
                    tracing::debug!(%node, %conn, seq = event.seq, "dropping event from replaced connection");
                    return;
                }
                self.on_node_event(NodeEvent::from_wire(node, event));
            }
            TransportEvent::NodeDown { node, conn, reason } => {
                tracing::debug!(%node, %conn, %reason, clean = reason.is_clean(), "node down");
                if self.dispatcher.on_node_down(&node, conn) {
                    self.suspend_node(&node);
                }
            }
        }
    }

    /// Applies one player report.
    pub fn on_node_event(&mut self, event: NodeEvent) {
        let NodeEvent {
            node,
            player,
            timestamp,
            kind,
        } = event;

        match kind {
            EventKind::Activity(activity) => {
                let Some(session) = self.registry.get_mut(player) else {
                    tracing::debug!(%player, %node, %activity, "activity for unknown player");
                    return;
                };
                tracing::trace!(%player, %node, %activity, timestamp, "activity");
                if let Some(command) = self.tracker.on_activity(session, timestamp) {
                    self.send(command);
                }
            }
            EventKind::Join => {
                let outcome = self.registry.on_join(player, node.clone(), timestamp);
                tracing::debug!(%player, %node, ?outcome, "join applied");
            }
            EventKind::SwitchNode => {
                let outcome = self.registry.on_switch(player, node.clone(), timestamp);
                tracing::debug!(%player, %node, ?outcome, "switch applied");
            }
            EventKind::Leave => match self.registry.on_leave(player, timestamp) {
                Membership::Left(session) => {
                    tracing::debug!(%player, %node, state = %session.state, "session closed");
                }
                outcome => tracing::debug!(%player, %node, ?outcome, "leave applied"),
            },
        }
    }

    /// Runs one periodic sweep. Returns how many commands were delivered.
    pub fn sweep(&mut self, now: u64) -> usize {
        let purged = self.registry.purge_tombstones(now);
        if purged > 0 {
            tracing::trace!(purged, "tombstones expired");
        }

        let limbo_live = self.limbo_live();
        let commands = self.tracker.sweep(&mut self.registry, now, limbo_live);

        commands
            .into_iter()
            .map(|command| self.send(command))
            .filter(|sent| *sent)
            .count()
    }

    pub fn status(&self, player: PlayerId, now: u64) -> Option<PlayerStatus> {
        self.registry
            .get(player)
            .map(|session| self.tracker.status(session, now))
    }

    /// Marks `player` AFK at once and applies the AFK action.
    ///
    /// Returns `false` if the player was already AFK or sits on a node
    /// with AFK checks disabled.
    pub fn set_afk(&mut self, player: PlayerId, now: u64) -> Result<bool, RoutingError> {
        let limbo_live = self.limbo_live();
        let session = self
            .registry
            .get_mut(player)
            .ok_or(RoutingError::UnknownPlayer(player))?;
        if session.is_suspended() {
            return Err(RoutingError::Suspended(player));
        }
        match self.tracker.set_afk(session, now, limbo_live) {
            Some(command) => {
                self.send(command);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn reload_policy(&mut self, policy: AfkPolicy) -> Result<(), PolicyError> {
        self.tracker.set_policy(policy)
    }

    fn limbo_live(&self) -> bool {
        self.tracker
            .policy()
            .limbo()
            .is_some_and(|limbo| self.dispatcher.is_live(limbo))
    }

    fn suspend_node(&mut self, node: &NodeId) {
        let players = self.registry.mark_node_unknown(node);
        for player in &players {
            if let Some(session) = self.registry.get_mut(*player) {
                self.tracker.suspend(session);
            }
        }
        if !players.is_empty() {
            tracing::warn!(%node, players = players.len(), "players suspended");
        }
    }

    /// Dispatches and logs a drop. Returns whether the command went out.
    fn send(&self, command: Command) -> bool {
        let player = command.target;
        let action = command.action.name();
        match self.dispatcher.dispatch(&self.registry, command) {
            Ok(node) => {
                tracing::info!(%player, %node, action, "command sent");
                true
            }
            Err(e) => {
                tracing::warn!(%player, action, error = %e, "command dropped");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use afkwatch_protocol::ActivityKind;
    use afkwatch_session::{AfkState, Host};
    use afkwatch_tracker::AfkAction;
    use afkwatch_transport::{ConnectionId, DownReason};
    use tokio::sync::mpsc;

    use super::*;

    const SEC: u64 = 1_000;

    fn pid() -> PlayerId {
        PlayerId::from_u128(42)
    }

    fn node(name: &str) -> NodeId {
        NodeId::new(name)
    }

    fn core() -> ProxyCore {
        ProxyCore::new(
            AfkPolicy {
                idle_threshold: Duration::from_secs(60),
                afk_threshold: Duration::from_secs(300),
                action: AfkAction::TeleportLimbo { limbo: node("limbo") },
                ..AfkPolicy::default()
            },
            RegistryConfig::default(),
        )
    }

    fn node_up(core: &mut ProxyCore, name: &str, conn: u64) -> mpsc::Receiver<Command> {
        let (tx, rx) = mpsc::channel(16);
        core.on_transport(TransportEvent::NodeUp {
            node: node(name),
            role: NodeRole::Game,
            conn: ConnectionId::new(conn),
            outbound: tx,
        });
        rx
    }

    fn report(core: &mut ProxyCore, on: &str, ts: u64, kind: EventKind) {
        core.on_node_event(NodeEvent::new(node(on), pid(), ts, kind));
    }

    #[test]
    fn test_on_transport_node_down_suspends_hosted_players() {
        let mut core = core();
        let _rx = node_up(&mut core, "x", 1);
        report(&mut core, "x", 0, EventKind::Join);

        core.on_transport(TransportEvent::NodeDown {
            node: node("x"),
            conn: ConnectionId::new(1),
            reason: DownReason::HeartbeatTimeout,
        });

        let session = core.registry().get(pid()).unwrap();
        assert_eq!(session.state, AfkState::Suspended);
        assert_eq!(session.host, Host::Unknown(node("x")));
    }

    #[test]
    fn test_sweep_during_suspension_sends_nothing() {
        let mut core = core();
        let mut rx = node_up(&mut core, "x", 1);
        report(&mut core, "x", 0, EventKind::Join);
        core.on_transport(TransportEvent::NodeDown {
            node: node("x"),
            conn: ConnectionId::new(1),
            reason: DownReason::Closed,
        });

        assert_eq!(core.sweep(1_000 * SEC), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_on_node_event_switch_routes_next_command_to_new_node() {
        let mut core = core();
        let mut rx_x = node_up(&mut core, "x", 1);
        let mut rx_y = node_up(&mut core, "y", 2);
        report(&mut core, "x", 0, EventKind::Join);
        report(&mut core, "y", 10 * SEC, EventKind::SwitchNode);

        assert_eq!(core.registry().host_of(pid()), Ok(&Host::Known(node("y"))));
        assert_eq!(core.sweep(70 * SEC), 1);

        assert!(matches!(rx_y.try_recv(), Ok(cmd) if cmd.action.name() == "warn"));
        assert!(rx_x.try_recv().is_err());
    }

    #[test]
    fn test_sweep_limbo_down_disconnects() {
        let mut core = core();
        let mut rx = node_up(&mut core, "x", 1);
        report(&mut core, "x", 0, EventKind::Join);

        assert_eq!(core.sweep(301 * SEC), 2);
        let names: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|c| c.action.name())
            .collect();
        assert_eq!(names, vec!["warn", "disconnect"]);
    }

    #[test]
    fn test_sweep_limbo_live_teleports() {
        let mut core = core();
        let mut rx = node_up(&mut core, "x", 1);
        let _limbo = node_up(&mut core, "limbo", 2);
        report(&mut core, "x", 0, EventKind::Join);

        core.sweep(301 * SEC);
        let last = std::iter::from_fn(|| rx.try_recv().ok()).last().unwrap();
        assert_eq!(last, Command::teleport_limbo(pid(), node("limbo")));
    }

    #[test]
    fn test_on_node_event_activity_after_afk_sends_clear_state() {
        let mut core = core();
        let mut rx = node_up(&mut core, "x", 1);
        report(&mut core, "x", 0, EventKind::Join);
        core.sweep(301 * SEC);
        while rx.try_recv().is_ok() {}

        report(&mut core, "x", 302 * SEC, EventKind::Activity(ActivityKind::Chat));

        assert_eq!(rx.try_recv().unwrap(), Command::clear_state(pid()));
    }

    #[test]
    fn test_on_transport_inbound_from_replaced_connection_dropped() {
        let mut core = core();
        let _old = node_up(&mut core, "x", 1);
        let _new = node_up(&mut core, "x", 2);

        core.on_transport(TransportEvent::Inbound {
            node: node("x"),
            conn: ConnectionId::new(1),
            event: Event {
                seq: 1,
                timestamp: 5,
                player: pid(),
                kind: EventKind::Join,
            },
        });

        assert!(core.registry().get(pid()).is_none());
    }

    #[test]
    fn test_on_transport_stale_node_down_keeps_players() {
        let mut core = core();
        let _old = node_up(&mut core, "x", 1);
        let _new = node_up(&mut core, "x", 2);
        report(&mut core, "x", 0, EventKind::Join);

        core.on_transport(TransportEvent::NodeDown {
            node: node("x"),
            conn: ConnectionId::new(1),
            reason: DownReason::Closed,
        });

        assert_eq!(core.registry().get(pid()).unwrap().state, AfkState::Active);
    }

    #[test]
    fn test_reload_policy_invalid_rejected() {
        let mut core = core();
        let bad = AfkPolicy {
            idle_threshold: Duration::ZERO,
            ..core.policy().clone()
        };
        assert!(core.reload_policy(bad).is_err());
        assert_eq!(core.policy().idle_threshold, Duration::from_secs(60));
    }

    #[test]
    fn test_on_transport_resync_join_after_switch_is_stale() {
        let mut core = core();
        let _x = node_up(&mut core, "x", 1);
        let _y = node_up(&mut core, "y", 2);
        report(&mut core, "x", 10 * SEC, EventKind::Join);
        report(&mut core, "y", 20 * SEC, EventKind::SwitchNode);

        // x reconnects and re-announces the player with its original JOIN.
        let _x2 = node_up(&mut core, "x", 3);
        core.on_transport(TransportEvent::Inbound {
            node: node("x"),
            conn: ConnectionId::new(3),
            event: Event {
                seq: 1,
                timestamp: 10 * SEC,
                player: pid(),
                kind: EventKind::Join,
            },
        });

        assert_eq!(core.registry().host_of(pid()), Ok(&Host::Known(node("y"))));
    }

    #[test]
    fn test_sweep_disabled_node_sends_nothing() {
        let mut policy = core().policy().clone();
        policy.disabled_nodes.insert(node("lobby"));
        let mut core = ProxyCore::new(policy, RegistryConfig::default());
        let mut rx = node_up(&mut core, "lobby", 1);
        report(&mut core, "lobby", 0, EventKind::Join);

        assert_eq!(core.sweep(1_000 * SEC), 0);
        assert!(rx.try_recv().is_err());
        assert_eq!(core.registry().get(pid()).unwrap().state, AfkState::Active);
    }

    #[test]
    fn test_set_afk_unknown_player_fails() {
        let mut core = core();
        assert_eq!(
            core.set_afk(pid(), 0),
            Err(RoutingError::UnknownPlayer(pid()))
        );
    }

    #[test]
    fn test_set_afk_teleports_then_returns_to_previous_node() {
        let mut core = core();
        let mut rx_x = node_up(&mut core, "x", 1);
        let mut rx_limbo = node_up(&mut core, "limbo", 2);
        report(&mut core, "x", 1_000 * SEC, EventKind::Join);

        assert_eq!(core.set_afk(pid(), 1_010 * SEC), Ok(true));
        assert_eq!(
            rx_x.try_recv().unwrap(),
            Command::teleport_limbo(pid(), node("limbo"))
        );
        assert_eq!(core.set_afk(pid(), 1_011 * SEC), Ok(false));

        report(&mut core, "limbo", 1_012 * SEC, EventKind::SwitchNode);
        report(&mut core, "limbo", 1_013 * SEC, EventKind::Activity(ActivityKind::Movement));

        assert_eq!(
            rx_limbo.try_recv().unwrap(),
            Command::clear_state_and_return(pid(), node("x"))
        );
    }

    #[test]
    fn test_status_unknown_player_is_none() {
        let core = core();
        assert!(core.status(pid(), 0).is_none());
    }
}
