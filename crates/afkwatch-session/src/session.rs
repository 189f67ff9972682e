//! Session types: the proxy's record of one connected player.
//!
//! A session tracks:
//! - WHERE the player is (`Host`), as far as the proxy can tell
//! - HOW active they are (`AfkState`, `last_activity`, `afk_since`)
//! - WHEN membership last changed (`last_update`), for race resolution

use std::fmt;
use std::time::Duration;

use afkwatch_protocol::{NodeId, PlayerId};

// ---------------------------------------------------------------------------
// RegistryConfig
// ---------------------------------------------------------------------------

/// Configuration for the session registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// How long a LEAVE keeps blocking older JOIN/SWITCH_NODE events for
    /// the same player. Default: 30 seconds.
    pub tombstone_ttl: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            tombstone_ttl: Duration::from_secs(30),
        }
    }
}

// ---------------------------------------------------------------------------
// Host
// ---------------------------------------------------------------------------

/// Which node currently hosts a player.
///
/// ```text
///   Known(n) ──(n's link drops)──→ Unknown(n) ──(n reconnects)──→ Known(n)
///       │                              │
///       └────(SWITCH_NODE to m)────────┴──────────────→ Known(m)
/// ```
///
/// `Unknown` keeps the last node so the mapping can be restored when that
/// node's link comes back.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Host {
    Known(NodeId),
    Unknown(NodeId),
}

impl Host {
    /// The current node if known, otherwise the last known one.
    pub fn node(&self) -> &NodeId {
        match self {
            Self::Known(node) | Self::Unknown(node) => node,
        }
    }

    /// The node, only if the mapping is currently trustworthy.
    pub fn known(&self) -> Option<&NodeId> {
        match self {
            Self::Known(node) => Some(node),
            Self::Unknown(_) => None,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Self::Known(_))
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(node) => write!(f, "{node}"),
            Self::Unknown(node) => write!(f, "unknown (last {node})"),
        }
    }
}

// ---------------------------------------------------------------------------
// AfkState
// ---------------------------------------------------------------------------

/// AFK classification of a player.
///
/// ```text
///   Active ──(idle threshold)──→ Idle ──(afk threshold)──→ Afk
///     ↑                           │                         │
///     └──────(activity)───────────┴────(fresh activity)─────┘
///
///   any ──(host unknown)──→ Suspended ──(host known + activity)──→ Active
/// ```
///
/// The registry only stores this tag; transitions belong to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AfkState {
    #[default]
    Active,
    Idle,
    Afk,
    Suspended,
}

impl fmt::Display for AfkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Active => "active",
            Self::Idle => "idle",
            Self::Afk => "afk",
            Self::Suspended => "suspended",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// PlayerSession
// ---------------------------------------------------------------------------

/// The proxy's view of one player. All timestamps are Unix milliseconds as
/// reported by nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerSession {
    pub player: PlayerId,
    pub host: Host,
    /// Timestamp of the newest activity seen.
    pub last_activity: u64,
    pub state: AfkState,
    /// When the player entered `Afk`.
    pub afk_since: Option<u64>,
    /// State to remember while `Suspended`.
    pub suspended_from: Option<AfkState>,
    /// Node the player was on before being parked in limbo.
    pub previous_node: Option<NodeId>,
    pub joined_at: u64,
    /// Timestamp of the last applied JOIN/SWITCH_NODE.
    pub last_update: u64,
}

impl PlayerSession {
    /// A fresh session: `Active`, last activity at the join time.
    pub fn new(player: PlayerId, node: NodeId, timestamp: u64) -> Self {
        Self {
            player,
            host: Host::Known(node),
            last_activity: timestamp,
            state: AfkState::Active,
            afk_since: None,
            suspended_from: None,
            previous_node: None,
            joined_at: timestamp,
            last_update: timestamp,
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.state == AfkState::Suspended
    }
}
