//! Wire protocol for afkwatch.
//!
//! This crate defines what backend nodes and the proxy say to each other:
//!
//! - **Types** ([`PlayerId`], [`NodeId`], [`NodeRole`], [`ActivityKind`]):
//!   the identities carried inside messages.
//! - **Messages** ([`Message`], [`Event`], [`Command`]): one tagged enum
//!   covering every frame kind.
//! - **Codec** ([`encode`], [`decode`], [`FrameDecoder`]): the
//!   length-prefixed binary frame format.
//! - **Errors** ([`DecodeError`], [`ProtocolError`]).
//!
//! # Architecture
//!
//! The protocol layer knows nothing about sockets, sessions, or timers. It
//! turns messages into bytes and back.
//!
//! ```text
//! Transport (bytes) → Protocol (Message) → Proxy loop (NodeEvent)
//! ```

mod codec;
mod decoder;
mod error;
mod message;
mod types;

pub use codec::{LEN_PREFIX, decode, encode};
pub use decoder::FrameDecoder;
pub use error::{DecodeError, ProtocolError};
pub use message::{
    Command, CommandAction, Event, EventKind, MAX_FRAME_LEN, Message,
    MessageKind, PROTOCOL_VERSION,
};
pub use types::{
    ActivityKind, MAX_NODE_ID_LEN, NodeId, NodeRole, PlayerId, now_millis,
};
pub use uuid::Uuid;
