//! The AFK state machine.
//!
//! ```text
//!            idle_for ≥ idle            idle_for ≥ afk
//!   Active ────────────────▶ Idle ────────────────▶ Afk
//!     ▲        (WARN)          │     (TELEPORT_LIMBO │
//!     │                        │      or DISCONNECT) │
//!     ├──── newer ACTIVITY ────┘                     │
//!     └──── ACTIVITY at/after afk_since (CLEAR_STATE)┘
//!
//!   any ──(host unknown)──▶ Suspended ──(host known + ACTIVITY)──▶ Active
//! ```
//!
//! `idle_for = now − last_activity`. All times are Unix milliseconds.
//! The tracker only touches the AFK fields of a [`PlayerSession`]; the
//! host mapping belongs to the registry.

use std::time::Duration;

use afkwatch_protocol::{Command, CommandAction, NodeId, PlayerId};
use afkwatch_session::{AfkState, Host, PlayerSession, SessionRegistry};

use crate::{AfkAction, AfkPolicy, PolicyError};

/// A read-only snapshot of one player's AFK status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerStatus {
    pub player: PlayerId,
    pub host: Host,
    pub state: AfkState,
    pub last_activity: u64,
    /// How long since the last activity.
    pub idle_for: Duration,
    /// Time left before the AFK action, if the player is being timed.
    pub afk_in: Option<Duration>,
}

/// Applies an [`AfkPolicy`] to player sessions.
#[derive(Debug, Clone)]
pub struct AfkTracker {
    policy: AfkPolicy,
}

impl AfkTracker {
    pub fn new(policy: AfkPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &AfkPolicy {
        &self.policy
    }

    /// Replaces the policy. The new thresholds apply from the next sweep.
    pub fn set_policy(&mut self, policy: AfkPolicy) -> Result<(), PolicyError> {
        policy.validate()?;
        tracing::info!(
            idle = ?policy.idle_threshold,
            afk = ?policy.afk_threshold,
            action = ?policy.action,
            "afk policy updated"
        );
        self.policy = policy;
        Ok(())
    }

    /// Applies an ACTIVITY stamped `timestamp`.
    ///
    /// Activity older than the recorded last activity is ignored. Returns
    /// `CLEAR_STATE` when the player comes back from AFK.
    pub fn on_activity(&self, session: &mut PlayerSession, timestamp: u64) -> Option<Command> {
        if timestamp < session.last_activity {
            tracing::debug!(
                player = %session.player, timestamp,
                last_activity = session.last_activity,
                "ignoring out-of-order activity"
            );
            return None;
        }
        session.last_activity = timestamp;

        match session.state {
            AfkState::Active => None,
            AfkState::Idle => {
                session.state = AfkState::Active;
                tracing::debug!(player = %session.player, "idle player active again");
                None
            }
            AfkState::Afk => {
                if !returned_after_afk(session, timestamp) {
                    return None;
                }
                session.state = AfkState::Active;
                session.afk_since = None;
                tracing::info!(player = %session.player, "player back from afk");
                Some(self.clear_command(session))
            }
            AfkState::Suspended => {
                if !session.host.is_known() {
                    return None;
                }
                let before = session.suspended_from.take();
                if before == Some(AfkState::Afk) && !returned_after_afk(session, timestamp) {
                    // Older than the AFK decision: stay AFK, just not suspended.
                    session.state = AfkState::Afk;
                    return None;
                }
                session.state = AfkState::Active;
                tracing::info!(player = %session.player, host = %session.host, "player resumed");
                if before == Some(AfkState::Afk) {
                    session.afk_since = None;
                    Some(self.clear_command(session))
                } else {
                    None
                }
            }
        }
    }

    /// Checks one session's timers at `now`.
    ///
    /// A late sweep can pass through `Idle` and `Afk` in one call, in which
    /// case both the warning and the action are returned, in that order.
    /// `limbo_live` says whether the limbo node can take a teleport.
    pub fn evaluate(
        &self,
        session: &mut PlayerSession,
        now: u64,
        limbo_live: bool,
    ) -> Vec<Command> {
        let mut commands = Vec::new();
        if !matches!(session.state, AfkState::Active | AfkState::Idle) {
            return commands;
        }
        if self.policy.is_disabled(session.host.node()) {
            return commands;
        }

        let idle_for = now.saturating_sub(session.last_activity);

        if session.state == AfkState::Active && idle_for >= self.policy.idle_ms() {
            session.state = AfkState::Idle;
            tracing::info!(player = %session.player, idle_ms = idle_for, "player idle");
            commands.push(Command::warn(session.player, self.policy.warn_message.clone()));
        }

        if session.state == AfkState::Idle && idle_for >= self.policy.afk_ms() {
            commands.push(self.mark_afk(session, now, limbo_live));
        }

        commands
    }

    fn mark_afk(&self, session: &mut PlayerSession, now: u64, limbo_live: bool) -> Command {
        session.state = AfkState::Afk;
        session.afk_since = Some(now);
        let command = self.afk_command(session, limbo_live);
        if matches!(command.action, CommandAction::TeleportLimbo { .. }) {
            session.previous_node = Some(session.host.node().clone());
        }
        tracing::info!(
            player = %session.player,
            idle_ms = now.saturating_sub(session.last_activity),
            action = command.action.name(), "player afk"
        );
        command
    }

    /// Marks a player AFK on request (the `/afk` command).
    ///
    /// The player's silence is backdated to the AFK threshold and the AFK
    /// action fires at once, without a warning. Any activity from `now` on
    /// brings them back. Players already AFK, suspended, or on a disabled
    /// node are left alone.
    pub fn set_afk(
        &self,
        session: &mut PlayerSession,
        now: u64,
        limbo_live: bool,
    ) -> Option<Command> {
        if !matches!(session.state, AfkState::Active | AfkState::Idle)
            || self.policy.is_disabled(session.host.node())
        {
            return None;
        }
        session.last_activity = session
            .last_activity
            .min(now.saturating_sub(self.policy.afk_ms()));
        tracing::info!(player = %session.player, "player marked afk on request");
        Some(self.mark_afk(session, now, limbo_live))
    }

    /// Evaluates every session in the registry.
    pub fn sweep(
        &self,
        registry: &mut SessionRegistry,
        now: u64,
        limbo_live: bool,
    ) -> Vec<Command> {
        registry
            .iter_mut()
            .flat_map(|session| self.evaluate(session, now, limbo_live))
            .collect()
    }

    /// Freezes a player whose host became unknown.
    pub fn suspend(&self, session: &mut PlayerSession) {
        if session.state == AfkState::Suspended {
            return;
        }
        session.suspended_from = Some(session.state);
        session.state = AfkState::Suspended;
        tracing::debug!(player = %session.player, host = %session.host, "player suspended");
    }

    /// Snapshot for adapters.
    pub fn status(&self, session: &PlayerSession, now: u64) -> PlayerStatus {
        let idle_ms = now.saturating_sub(session.last_activity);
        let afk_in = match session.state {
            AfkState::Active | AfkState::Idle => Some(Duration::from_millis(
                self.policy.afk_ms().saturating_sub(idle_ms),
            )),
            AfkState::Afk | AfkState::Suspended => None,
        };
        PlayerStatus {
            player: session.player,
            host: session.host.clone(),
            state: session.state,
            last_activity: session.last_activity,
            idle_for: Duration::from_millis(idle_ms),
            afk_in,
        }
    }

    fn afk_command(&self, session: &PlayerSession, limbo_live: bool) -> Command {
        match &self.policy.action {
            AfkAction::TeleportLimbo { limbo }
                if limbo_live && !on_node(session, limbo) =>
            {
                Command::teleport_limbo(session.player, limbo.clone())
            }
            _ => Command::disconnect(session.player, self.policy.disconnect_reason.clone()),
        }
    }

    /// CLEAR_STATE for a returning player, sending them back to where they
    /// were if they are still parked in limbo.
    fn clear_command(&self, session: &mut PlayerSession) -> Command {
        let previous = session.previous_node.take();
        let parked = self
            .policy
            .limbo()
            .is_some_and(|limbo| on_node(session, limbo));
        match previous {
            Some(node) if parked => Command::clear_state_and_return(session.player, node),
            _ => Command::clear_state(session.player),
        }
    }
}

fn returned_after_afk(session: &PlayerSession, timestamp: u64) -> bool {
    session.afk_since.is_none_or(|since| timestamp >= since)
}

fn on_node(session: &PlayerSession, node: &NodeId) -> bool {
    session.host.node() == node
}

// =========================================================================
// Tests
// =========================================================================
