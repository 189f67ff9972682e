//! Identity and tag types shared by every afkwatch crate.
//!
//! These are the small values that appear inside wire messages: who the
//! player is, which backend node is talking, what kind of node it is, and
//! what kind of activity was observed.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum length in bytes of a [`NodeId`] (it travels as a `str8`).
pub const MAX_NODE_ID_LEN: usize = u8::MAX as usize;

// ---------------------------------------------------------------------------
// PlayerId
// ---------------------------------------------------------------------------

/// A stable, globally unique player identifier.
///
/// Newtype over [`Uuid`] so a player id can never be confused with a node
/// name or session token. On the wire it is the 16 raw UUID bytes; for humans
/// it prints in the usual hyphenated form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlayerId(pub Uuid);

impl PlayerId {
    /// Generates a fresh random (v4) id.
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    /// Builds an id from its 128-bit integer value.
    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl From<Uuid> for PlayerId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for PlayerId {
    type Err = uuid::Error;

    /// Accepts the hyphenated, simple, braced and URN forms.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// ---------------------------------------------------------------------------
// NodeId
// ---------------------------------------------------------------------------

/// The name of a backend node (e.g. `"lobby"`, `"survival-1"`, `"limbo"`).
///
/// Nodes announce their own name in the HELLO handshake; the proxy does not
/// pre-register them. Names longer than [`MAX_NODE_ID_LEN`] bytes cannot be
/// encoded and are rejected by the codec.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Creates a node id from any string-like value.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the node name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the name is empty (never valid in a handshake).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// NodeRole
// ---------------------------------------------------------------------------

/// What kind of backend a node is, announced in HELLO.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    /// A regular game server hosting players.
    #[default]
    Game,
    /// A holding server AFK players can be moved to.
    Limbo,
}

impl NodeRole {
    pub(crate) fn as_byte(self) -> u8 {
        match self {
            Self::Game => 0,
            Self::Limbo => 1,
        }
    }

    pub(crate) fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Game),
            1 => Some(Self::Limbo),
            _ => None,
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Game => f.write_str("game"),
            Self::Limbo => f.write_str("limbo"),
        }
    }
}

// ---------------------------------------------------------------------------
// ActivityKind
// ---------------------------------------------------------------------------

/// The kind of input a node observed for a player.
///
/// Every kind counts as activity for AFK purposes; the tag is carried for
/// logging and for adapters that want to tell movement from chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityKind {
    /// The player moved or turned.
    Movement,
    /// The player sent a chat message.
    Chat,
    /// The player ran a command.
    Command,
    /// The player interacted with a block or entity.
    Interact,
    /// The player clicked (swing/use).
    Click,
    /// Anything else the adapter considers activity.
    Other,
}

impl ActivityKind {
    pub(crate) fn as_byte(self) -> u8 {
        match self {
            Self::Movement => 0,
            Self::Chat => 1,
            Self::Command => 2,
            Self::Interact => 3,
            Self::Click => 4,
            Self::Other => 5,
        }
    }

    pub(crate) fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Movement),
            1 => Some(Self::Chat),
            2 => Some(Self::Command),
            3 => Some(Self::Interact),
            4 => Some(Self::Click),
            5 => Some(Self::Other),
            _ => None,
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Movement => "movement",
            Self::Chat => "chat",
            Self::Command => "command",
            Self::Interact => "interact",
            Self::Click => "click",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// All event timestamps and AFK threshold comparisons use this clock.
/// A system clock set before 1970 reads as 0.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
