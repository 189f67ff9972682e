//! Error types for the protocol layer.
//!
//! Two enums, split by who can act on them:
//!
//! - [`DecodeError`] describes what is wrong with a byte buffer. The
//!   `Truncated` variant is not a failure at all, just "read more".
//! - [`ProtocolError`] is the crate-level error that also covers encode
//!   failures and handshake rule violations. Any `ProtocolError` on a live
//!   connection means the connection gets closed.

use crate::message::MessageKind;

/// Errors produced while decoding a frame from bytes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The buffer ends before the frame does. Buffer and retry.
    #[error("truncated frame: need {needed} more byte(s)")]
    Truncated {
        /// How many more bytes are needed to make progress.
        needed: usize,
    },

    /// The kind byte is not one this protocol version defines.
    #[error("unknown message kind 0x{0:02x}")]
    UnknownKind(u8),

    /// The frame is complete but its contents are invalid: bad enum byte,
    /// bad UTF-8, zero or oversized length, short payload, or trailing
    /// bytes after a known kind.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// A HELLO advertised a protocol version this build does not speak.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u16),
}

impl DecodeError {
    /// Returns `true` for the one recoverable case (need more bytes).
    pub fn is_truncated(&self) -> bool {
        matches!(self, Self::Truncated { .. })
    }
}

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The peer sent bytes that do not decode.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// A string field does not fit its length prefix.
    #[error("{field} is {len} bytes, maximum is {max}")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    /// The encoded frame would exceed the maximum frame length.
    #[error("frame of {len} bytes exceeds maximum of {max}")]
    FrameTooLarge { len: usize, max: usize },

    /// The first frame on a connection was not HELLO.
    #[error("expected HELLO as first frame, got {0}")]
    HandshakeExpected(MessageKind),

    /// HELLO decoded but its contents are unacceptable (e.g. empty node).
    #[error("invalid handshake: {0}")]
    InvalidHandshake(String),

    /// A frame the peer is never allowed to send in this direction or
    /// at this point of the connection.
    #[error("unexpected {0} frame")]
    UnexpectedMessage(MessageKind),
}
