//! What counts as idle, what counts as AFK, and what happens then.

use std::collections::BTreeSet;
use std::time::Duration;

use afkwatch_protocol::{MAX_NODE_ID_LEN, NodeId};
use serde::{Deserialize, Serialize};

use crate::PolicyError;

/// The side effect applied when a player becomes AFK.
///
/// Serialized with a `kind` tag:
/// `{"kind":"disconnect"}` or `{"kind":"teleport_limbo","limbo":"limbo"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AfkAction {
    /// Move the player to the named limbo node.
    TeleportLimbo { limbo: NodeId },
    /// Kick the player.
    Disconnect,
}

/// Thresholds and messages driving the AFK state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AfkPolicy {
    /// Silence after which the player is warned.
    pub idle_threshold: Duration,
    /// Silence after which the AFK action is taken.
    pub afk_threshold: Duration,
    pub action: AfkAction,
    pub warn_message: String,
    pub disconnect_reason: String,
    /// Nodes whose players are never timed (lobbies, event servers).
    pub disabled_nodes: BTreeSet<NodeId>,
}

impl Default for AfkPolicy {
    fn default() -> Self {
        Self {
            idle_threshold: Duration::from_secs(300),
            afk_threshold: Duration::from_secs(600),
            action: AfkAction::Disconnect,
            warn_message: "You will be marked as AFK soon.".to_string(),
            disconnect_reason: "You were disconnected for being AFK.".to_string(),
            disabled_nodes: BTreeSet::new(),
        }
    }
}

impl AfkPolicy {
    /// Checks the rules every policy, initial or reloaded, must satisfy.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.idle_threshold.is_zero() {
            return Err(PolicyError::ZeroThreshold("idle threshold"));
        }
        if self.afk_threshold.is_zero() {
            return Err(PolicyError::ZeroThreshold("afk threshold"));
        }
        if self.afk_threshold <= self.idle_threshold {
            return Err(PolicyError::ThresholdOrder {
                idle: self.idle_threshold,
                afk: self.afk_threshold,
            });
        }
        if let AfkAction::TeleportLimbo { limbo } = &self.action {
            if limbo.is_empty() {
                return Err(PolicyError::InvalidLimbo("empty".to_string()));
            }
            if limbo.as_str().len() > MAX_NODE_ID_LEN {
                return Err(PolicyError::InvalidLimbo(format!(
                    "{} bytes, maximum is {MAX_NODE_ID_LEN}",
                    limbo.as_str().len()
                )));
            }
        }
        Ok(())
    }

    /// The limbo node, if the policy teleports.
    pub fn limbo(&self) -> Option<&NodeId> {
        match &self.action {
            AfkAction::TeleportLimbo { limbo } => Some(limbo),
            AfkAction::Disconnect => None,
        }
    }

    /// Whether players on `node` are exempt from AFK checks.
    pub fn is_disabled(&self, node: &NodeId) -> bool {
        self.disabled_nodes.contains(node)
    }

    pub(crate) fn idle_ms(&self) -> u64 {
        self.idle_threshold.as_millis() as u64
    }

    pub(crate) fn afk_ms(&self) -> u64 {
        self.afk_threshold.as_millis() as u64
    }
}
