//! The session registry: which node hosts which player.
//!
//! Every membership event (JOIN, SWITCH_NODE, LEAVE) flows through here
//! before the AFK tracker sees it. The registry is the single source of
//! truth for routing: a command is only ever sent to `host_of(player)`.
//!
//! # Races
//!
//! Events from one node arrive in order, but events for the same player
//! from two different nodes can cross. A player switching from `a` to `b`
//! may produce `b: SWITCH_NODE` and then `a: LEAVE` on the wire, or the
//! reverse. Both are resolved by the sender timestamp, newest wins:
//!
//! ```text
//!   t=100  b: SWITCH_NODE   ─┐
//!   t=090  a: LEAVE          ├─ LEAVE older than the session's last update → Stale
//!                            ┘
//!   t=200  a: LEAVE          ─┐
//!   t=150  b: SWITCH_NODE     ├─ SWITCH older than the tombstone → Stale
//!                             ┘  (the player stays gone)
//! ```
//!
//! # Concurrency note
//!
//! `SessionRegistry` is a plain `HashMap` owned by the proxy loop. Nothing
//! else touches it, so there is nothing to lock.

use std::collections::HashMap;

use afkwatch_protocol::{NodeId, PlayerId};

use crate::{Host, PlayerSession, RegistryConfig, SessionError};

/// Outcome of a membership event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Membership {
    /// A new session was created.
    Joined,
    /// The event matched the current mapping; nothing changed.
    Unchanged,
    /// The player now lives on a different node. `from` is `None` when a
    /// SWITCH_NODE created the session (implicit join).
    Moved { from: Option<NodeId> },
    /// The session was removed.
    Left(PlayerSession),
    /// The event is older than what the registry already applied.
    Stale,
    /// LEAVE for a player with no session (a tombstone is still recorded).
    Absent,
}

/// Tracks every player session and recent departures.
pub struct SessionRegistry {
    sessions: HashMap<PlayerId, PlayerSession>,
    /// LEAVE timestamps, kept for `tombstone_ttl`.
    departed: HashMap<PlayerId, u64>,
    config: RegistryConfig,
}

impl SessionRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            sessions: HashMap::new(),
            departed: HashMap::new(),
            config,
        }
    }

    /// Applies a JOIN from `node`.
    ///
    /// A JOIN for a player already mapped to the same node is a no-op.
    /// A JOIN from another node moves the player, like a switch.
    pub fn on_join(&mut self, player: PlayerId, node: NodeId, timestamp: u64) -> Membership {
        self.arrive(player, node, timestamp, false)
    }

    /// Applies a SWITCH_NODE to `node`. Creates the session if needed.
    pub fn on_switch(&mut self, player: PlayerId, node: NodeId, timestamp: u64) -> Membership {
        self.arrive(player, node, timestamp, true)
    }

    fn arrive(
        &mut self,
        player: PlayerId,
        node: NodeId,
        timestamp: u64,
        switching: bool,
    ) -> Membership {
        if let Some(&left_at) = self.departed.get(&player) {
            if timestamp <= left_at {
                tracing::warn!(%player, %node, timestamp, left_at, "ignoring arrival older than leave");
                return Membership::Stale;
            }
        }

        let Some(session) = self.sessions.get_mut(&player) else {
            self.departed.remove(&player);
            self.sessions
                .insert(player, PlayerSession::new(player, node.clone(), timestamp));
            tracing::info!(%player, %node, "player joined");
            return if switching {
                Membership::Moved { from: None }
            } else {
                Membership::Joined
            };
        };

        if timestamp < session.last_update {
            tracing::warn!(
                %player, %node, timestamp, last_update = session.last_update,
                "ignoring stale membership event"
            );
            return Membership::Stale;
        }
        session.last_update = timestamp;

        if session.host.node() == &node {
            // Same node. A link that came back may have left the host
            // marked unknown; the node just vouched for the player.
            session.host = Host::Known(node);
            return Membership::Unchanged;
        }

        let from = session.host.node().clone();
        session.host = Host::Known(node.clone());
        tracing::info!(%player, %from, to = %node, "player moved");
        Membership::Moved { from: Some(from) }
    }

    /// Applies a LEAVE. Records a tombstone either way.
    pub fn on_leave(&mut self, player: PlayerId, timestamp: u64) -> Membership {
        if let Some(session) = self.sessions.get(&player) {
            if timestamp < session.last_update {
                tracing::warn!(
                    %player, timestamp, last_update = session.last_update,
                    "ignoring leave older than last arrival"
                );
                return Membership::Stale;
            }
        }

        let tombstone = self.departed.entry(player).or_insert(timestamp);
        *tombstone = (*tombstone).max(timestamp);

        match self.sessions.remove(&player) {
            Some(session) => {
                tracing::info!(%player, host = %session.host, "player left");
                Membership::Left(session)
            }
            None => Membership::Absent,
        }
    }

    /// Where the player is, if the registry knows them at all.
    pub fn host_of(&self, player: PlayerId) -> Result<&Host, SessionError> {
        self.sessions
            .get(&player)
            .map(|session| &session.host)
            .ok_or(SessionError::NotFound(player))
    }

    /// Marks every player on `node` as having an unknown host. Returns the
    /// affected players, sorted.
    pub fn mark_node_unknown(&mut self, node: &NodeId) -> Vec<PlayerId> {
        let mut affected = Vec::new();
        for session in self.sessions.values_mut() {
            if matches!(&session.host, Host::Known(n) if n == node) {
                session.host = Host::Unknown(node.clone());
                affected.push(session.player);
            }
        }
        affected.sort();
        if !affected.is_empty() {
            tracing::info!(%node, players = affected.len(), "hosts marked unknown");
        }
        affected
    }

    /// Drops tombstones older than the configured TTL.
    pub fn purge_tombstones(&mut self, now: u64) -> usize {
        let ttl = self.config.tombstone_ttl.as_millis() as u64;
        let before = self.departed.len();
        self.departed
            .retain(|_, left_at| now.saturating_sub(*left_at) < ttl);
        before - self.departed.len()
    }

    pub fn get(&self, player: PlayerId) -> Option<&PlayerSession> {
        self.sessions.get(&player)
    }

    pub fn get_mut(&mut self, player: PlayerId) -> Option<&mut PlayerSession> {
        self.sessions.get_mut(&player)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlayerSession> {
        self.sessions.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PlayerSession> {
        self.sessions.values_mut()
    }

    /// Players currently mapped (known or unknown) to `node`.
    pub fn players_on(&self, node: &NodeId) -> Vec<PlayerId> {
        let mut players: Vec<PlayerId> = self
            .sessions
            .values()
            .filter(|s| s.host.node() == node)
            .map(|s| s.player)
            .collect();
        players.sort();
        players
    }

    pub fn tombstones(&self) -> usize {
        self.departed.len()
    }

    /// Returns the number of sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns `true` if there are no sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

// =========================================================================
// Tests
// =========================================================================
