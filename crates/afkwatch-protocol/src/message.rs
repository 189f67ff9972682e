//! Message types that travel between backend nodes and the proxy.
//!
//! ```text
//!   node ──HELLO──────────────────▶ proxy      (once, first frame)
//!   node ──HEARTBEAT──────────────▶ proxy      (every interval, both ways)
//!   node ◀─────────────HEARTBEAT── proxy
//!   node ──ACTIVITY/JOIN/SWITCH/LEAVE─▶ proxy  (Event)
//!   node ◀────────────────COMMAND── proxy      (Command)
//! ```
//!
//! A [`Message`] is decoded once and then matched exhaustively; nothing
//! downstream looks at raw kind bytes.

use std::fmt;

use crate::types::{ActivityKind, NodeId, NodeRole, PlayerId};

/// Highest protocol version this build speaks.
pub const PROTOCOL_VERSION: u16 = 1;

/// Largest allowed value of a frame's length prefix (kind byte + payload).
pub const MAX_FRAME_LEN: usize = 65_536;

// ---------------------------------------------------------------------------
// MessageKind
// ---------------------------------------------------------------------------

/// The one-byte tag that follows a frame's length prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    Hello = 0x01,
    Heartbeat = 0x02,
    Activity = 0x03,
    Join = 0x04,
    SwitchNode = 0x05,
    Leave = 0x06,
    Command = 0x07,
}

impl MessageKind {
    /// Maps a wire byte back to a kind, `None` if undefined.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Hello),
            0x02 => Some(Self::Heartbeat),
            0x03 => Some(Self::Activity),
            0x04 => Some(Self::Join),
            0x05 => Some(Self::SwitchNode),
            0x06 => Some(Self::Leave),
            0x07 => Some(Self::Command),
            _ => None,
        }
    }

    /// The wire byte for this kind.
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Hello => "HELLO",
            Self::Heartbeat => "HEARTBEAT",
            Self::Activity => "ACTIVITY",
            Self::Join => "JOIN",
            Self::SwitchNode => "SWITCH_NODE",
            Self::Leave => "LEAVE",
            Self::Command => "COMMAND",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Events (node → proxy)
// ---------------------------------------------------------------------------

/// What happened to a player on the reporting node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// The player did something.
    Activity(ActivityKind),
    /// The player connected to this node.
    Join,
    /// The player arrived on this node from another one.
    SwitchNode,
    /// The player left the network from this node.
    Leave,
}

impl EventKind {
    /// The message kind this event travels as.
    pub fn message_kind(&self) -> MessageKind {
        match self {
            Self::Activity(_) => MessageKind::Activity,
            Self::Join => MessageKind::Join,
            Self::SwitchNode => MessageKind::SwitchNode,
            Self::Leave => MessageKind::Leave,
        }
    }
}

/// An immutable report about one player from one node.
///
/// The reporting node is not part of the payload: the proxy binds it from
/// the connection's handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Per-connection sequence number, starting at 1.
    pub seq: u64,
    /// Sender wall-clock time, Unix milliseconds.
    pub timestamp: u64,
    pub player: PlayerId,
    pub kind: EventKind,
}

// ---------------------------------------------------------------------------
// Commands (proxy → node)
// ---------------------------------------------------------------------------

/// The side effect a node should apply to a player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandAction {
    /// Show the player a soft warning.
    Warn { message: String },
    /// Move the player to the limbo node.
    TeleportLimbo { limbo: NodeId },
    /// Kick the player.
    Disconnect { reason: String },
    /// Undo any AFK presentation (title, tab tag, ...). When `return_to`
    /// is set the player was parked in limbo and should be sent back there.
    ClearState { return_to: Option<NodeId> },
}

impl CommandAction {
    pub(crate) fn code(&self) -> u8 {
        match self {
            Self::Warn { .. } => 1,
            Self::TeleportLimbo { .. } => 2,
            Self::Disconnect { .. } => 3,
            Self::ClearState { .. } => 4,
        }
    }

    /// Short lowercase name, handy as a log field.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Warn { .. } => "warn",
            Self::TeleportLimbo { .. } => "teleport_limbo",
            Self::Disconnect { .. } => "disconnect",
            Self::ClearState { .. } => "clear_state",
        }
    }
}

/// An action addressed to one player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub target: PlayerId,
    pub action: CommandAction,
}

impl Command {
    pub fn warn(target: PlayerId, message: impl Into<String>) -> Self {
        Self {
            target,
            action: CommandAction::Warn {
                message: message.into(),
            },
        }
    }

    pub fn teleport_limbo(target: PlayerId, limbo: NodeId) -> Self {
        Self {
            target,
            action: CommandAction::TeleportLimbo { limbo },
        }
    }

    pub fn disconnect(target: PlayerId, reason: impl Into<String>) -> Self {
        Self {
            target,
            action: CommandAction::Disconnect {
                reason: reason.into(),
            },
        }
    }

    pub fn clear_state(target: PlayerId) -> Self {
        Self {
            target,
            action: CommandAction::ClearState { return_to: None },
        }
    }

    /// Clear AFK state and move the player back to `node`.
    pub fn clear_state_and_return(target: PlayerId, node: NodeId) -> Self {
        Self {
            target,
            action: CommandAction::ClearState {
                return_to: Some(node),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Every frame on the wire decodes to exactly one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Handshake: the node introduces itself.
    Hello {
        version: u16,
        node: NodeId,
        role: NodeRole,
    },
    /// Liveness signal, sent by both sides.
    Heartbeat { seq: u64, timestamp: u64 },
    /// A player report from a node.
    Event(Event),
    /// An action for the node to execute.
    Command { seq: u64, command: Command },
}

impl Message {
    /// A HELLO for the current protocol version.
    pub fn hello(node: NodeId, role: NodeRole) -> Self {
        Self::Hello {
            version: PROTOCOL_VERSION,
            node,
            role,
        }
    }

    /// The frame kind this message encodes as.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Hello { .. } => MessageKind::Hello,
            Self::Heartbeat { .. } => MessageKind::Heartbeat,
            Self::Event(event) => event.kind.message_kind(),
            Self::Command { .. } => MessageKind::Command,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_kind_from_byte_covers_all_kinds() {
        for byte in 0x01..=0x07u8 {
            let kind = MessageKind::from_byte(byte).unwrap();
            assert_eq!(kind.as_byte(), byte);
        }
        assert_eq!(MessageKind::from_byte(0x00), None);
        assert_eq!(MessageKind::from_byte(0x08), None);
    }

    #[test]
    fn test_message_kind_for_event_follows_event_kind() {
        let event = Event {
            seq: 1,
            timestamp: 0,
            player: PlayerId::from_u128(1),
            kind: EventKind::SwitchNode,
        };
        assert_eq!(Message::Event(event).kind(), MessageKind::SwitchNode);
    }

    #[test]
    fn test_command_constructors_set_action() {
        let p = PlayerId::from_u128(9);
        assert_eq!(
            Command::clear_state(p).action,
            CommandAction::ClearState { return_to: None }
        );
        assert_eq!(
            Command::clear_state_and_return(p, NodeId::new("lobby")).action,
            CommandAction::ClearState {
                return_to: Some(NodeId::new("lobby"))
            }
        );
        assert_eq!(Command::warn(p, "hi").action.name(), "warn");
        assert_eq!(
            Command::teleport_limbo(p, NodeId::new("limbo")).action.code(),
            2
        );
    }
}
