//! Binary frame codec.
//!
//! ```text
//! ┌──────────────┬──────────┬─────────────────────────┐
//! │ length u32BE │ kind u8  │ payload (length-1 bytes)│
//! └──────────────┴──────────┴─────────────────────────┘
//! ```
//!
//! `length` counts the kind byte plus the payload and must be in
//! `1..=MAX_FRAME_LEN`. All integers are big-endian. Strings are UTF-8 with
//! a `u8` (`str8`) or `u16` (`str16`) byte-length prefix; player ids are 16
//! raw bytes.
//!
//! [`decode`] only ever looks at the first frame in the buffer and reports
//! how many bytes it used, so a caller holding several frames (or one and a
//! half) can loop. See [`FrameDecoder`](crate::FrameDecoder) for the
//! buffering wrapper.

use crate::error::{DecodeError, ProtocolError};
use crate::message::{
    Command, CommandAction, Event, EventKind, MAX_FRAME_LEN, Message,
    MessageKind, PROTOCOL_VERSION,
};
use crate::types::{ActivityKind, NodeId, NodeRole, PlayerId};
use uuid::Uuid;

/// Size of the length prefix.
pub const LEN_PREFIX: usize = 4;

const ACTION_WARN: u8 = 1;
const ACTION_TELEPORT_LIMBO: u8 = 2;
const ACTION_DISCONNECT: u8 = 3;
const ACTION_CLEAR_STATE: u8 = 4;

// ---------------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------------

/// Encodes one message into a complete frame (length prefix included).
///
/// Deterministic and side-effect free. Fails only when a string field is
/// longer than its length prefix allows, or the whole frame would exceed
/// [`MAX_FRAME_LEN`].
pub fn encode(message: &Message) -> Result<Vec<u8>, ProtocolError> {
    let mut out = Vec::with_capacity(48);
    out.extend_from_slice(&[0u8; LEN_PREFIX]);
    out.push(message.kind().as_byte());

    match message {
        Message::Hello {
            version,
            node,
            role,
        } => {
            out.extend_from_slice(&version.to_be_bytes());
            out.push(role.as_byte());
            put_str8(&mut out, "node", node.as_str())?;
        }
        Message::Heartbeat { seq, timestamp } => {
            out.extend_from_slice(&seq.to_be_bytes());
            out.extend_from_slice(&timestamp.to_be_bytes());
        }
        Message::Event(event) => {
            out.extend_from_slice(&event.seq.to_be_bytes());
            out.extend_from_slice(&event.timestamp.to_be_bytes());
            out.extend_from_slice(event.player.as_bytes());
            if let EventKind::Activity(kind) = event.kind {
                out.push(kind.as_byte());
            }
        }
        Message::Command { seq, command } => {
            out.extend_from_slice(&seq.to_be_bytes());
            out.push(command.action.code());
            out.extend_from_slice(command.target.as_bytes());
            match &command.action {
                CommandAction::Warn { message } => {
                    put_str16(&mut out, "warn message", message)?
                }
                CommandAction::TeleportLimbo { limbo } => {
                    put_str8(&mut out, "limbo node", limbo.as_str())?
                }
                CommandAction::Disconnect { reason } => {
                    put_str16(&mut out, "disconnect reason", reason)?
                }
                CommandAction::ClearState { return_to } => put_str8(
                    &mut out,
                    "return node",
                    return_to.as_ref().map_or("", NodeId::as_str),
                )?,
            }
        }
    }

    let len = out.len() - LEN_PREFIX;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }
    out[..LEN_PREFIX].copy_from_slice(&(len as u32).to_be_bytes());
    Ok(out)
}

fn put_str8(
    out: &mut Vec<u8>,
    field: &'static str,
    value: &str,
) -> Result<(), ProtocolError> {
    let bytes = value.as_bytes();
    let len = u8::try_from(bytes.len()).map_err(|_| ProtocolError::FieldTooLong {
        field,
        len: bytes.len(),
        max: u8::MAX as usize,
    })?;
    out.push(len);
    out.extend_from_slice(bytes);
    Ok(())
}

fn put_str16(
    out: &mut Vec<u8>,
    field: &'static str,
    value: &str,
) -> Result<(), ProtocolError> {
    let bytes = value.as_bytes();
    let len =
        u16::try_from(bytes.len()).map_err(|_| ProtocolError::FieldTooLong {
            field,
            len: bytes.len(),
            max: u16::MAX as usize,
        })?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(bytes);
    Ok(())
}

// ---------------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------------

/// Decodes the first frame in `buf`.
///
/// Returns the message and the number of bytes the frame occupied. Bytes
/// past the frame are not inspected.
///
/// # Errors
///
/// - [`DecodeError::Truncated`] if `buf` does not yet hold a whole frame.
///   Not permanent: append more bytes and call again.
/// - [`DecodeError::UnknownKind`] for an undefined kind byte.
/// - [`DecodeError::UnsupportedVersion`] for a HELLO outside `1..=PROTOCOL_VERSION`.
/// - [`DecodeError::MalformedPayload`] for everything else.
pub fn decode(buf: &[u8]) -> Result<(Message, usize), DecodeError> {
    if buf.len() < LEN_PREFIX {
        return Err(DecodeError::Truncated {
            needed: LEN_PREFIX - buf.len(),
        });
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len == 0 {
        return Err(DecodeError::MalformedPayload(
            "zero-length frame".to_string(),
        ));
    }
    if len > MAX_FRAME_LEN {
        return Err(DecodeError::MalformedPayload(format!(
            "frame length {len} exceeds maximum of {MAX_FRAME_LEN}"
        )));
    }
    let total = LEN_PREFIX + len;
    if buf.len() < total {
        return Err(DecodeError::Truncated {
            needed: total - buf.len(),
        });
    }

    let kind_byte = buf[LEN_PREFIX];
    let kind =
        MessageKind::from_byte(kind_byte).ok_or(DecodeError::UnknownKind(kind_byte))?;
    let mut payload = PayloadReader::new(&buf[LEN_PREFIX + 1..total]);

    let message = match kind {
        MessageKind::Hello => {
            let version = payload.u16()?;
            if version == 0 || version > PROTOCOL_VERSION {
                return Err(DecodeError::UnsupportedVersion(version));
            }
            let role_byte = payload.u8()?;
            let role = NodeRole::from_byte(role_byte).ok_or_else(|| {
                DecodeError::MalformedPayload(format!("unknown node role {role_byte}"))
            })?;
            let node = NodeId::new(payload.str8()?);
            Message::Hello {
                version,
                node,
                role,
            }
        }
        MessageKind::Heartbeat => Message::Heartbeat {
            seq: payload.u64()?,
            timestamp: payload.u64()?,
        },
        MessageKind::Activity
        | MessageKind::Join
        | MessageKind::SwitchNode
        | MessageKind::Leave => {
            let seq = payload.u64()?;
            let timestamp = payload.u64()?;
            let player = payload.player()?;
            let kind = match kind {
                MessageKind::Activity => {
                    let byte = payload.u8()?;
                    let activity = ActivityKind::from_byte(byte).ok_or_else(|| {
                        DecodeError::MalformedPayload(format!(
                            "unknown activity kind {byte}"
                        ))
                    })?;
                    EventKind::Activity(activity)
                }
                MessageKind::Join => EventKind::Join,
                MessageKind::SwitchNode => EventKind::SwitchNode,
                _ => EventKind::Leave,
            };
            Message::Event(Event {
                seq,
                timestamp,
                player,
                kind,
            })
        }
        MessageKind::Command => {
            let seq = payload.u64()?;
            let code = payload.u8()?;
            let target = payload.player()?;
            let action = match code {
                ACTION_WARN => CommandAction::Warn {
                    message: payload.str16()?,
                },
                ACTION_TELEPORT_LIMBO => CommandAction::TeleportLimbo {
                    limbo: NodeId::new(payload.str8()?),
                },
                ACTION_DISCONNECT => CommandAction::Disconnect {
                    reason: payload.str16()?,
                },
                ACTION_CLEAR_STATE => {
                    // Empty means "stay where you are".
                    let node = payload.str8()?;
                    CommandAction::ClearState {
                        return_to: (!node.is_empty()).then(|| NodeId::new(node)),
                    }
                }
                other => {
                    return Err(DecodeError::MalformedPayload(format!(
                        "unknown command action {other}"
                    )));
                }
            };
            Message::Command {
                seq,
                command: Command { target, action },
            }
        }
    };

    payload.finish(kind)?;
    Ok((message, total))
}

/// Cursor over one frame's payload. Running out of bytes here means the
/// frame's own length was wrong, so it is `MalformedPayload`, not
/// `Truncated`.
struct PayloadReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let remaining = self.buf.len() - self.pos;
        if remaining < n {
            return Err(DecodeError::MalformedPayload(format!(
                "payload too short: wanted {n} byte(s) at offset {}, {remaining} left",
                self.pos
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u64(&mut self) -> Result<u64, DecodeError> {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(bytes))
    }

    fn player(&mut self) -> Result<PlayerId, DecodeError> {
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(self.take(16)?);
        Ok(PlayerId(Uuid::from_bytes(bytes)))
    }

    fn str8(&mut self) -> Result<String, DecodeError> {
        let len = self.u8()? as usize;
        self.utf8(len)
    }

    fn str16(&mut self) -> Result<String, DecodeError> {
        let len = self.u16()? as usize;
        self.utf8(len)
    }

    fn utf8(&mut self, len: usize) -> Result<String, DecodeError> {
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| DecodeError::MalformedPayload(format!("invalid UTF-8: {e}")))
    }

    fn finish(&self, kind: MessageKind) -> Result<(), DecodeError> {
        let extra = self.buf.len() - self.pos;
        if extra > 0 {
            return Err(DecodeError::MalformedPayload(format!(
                "{extra} unread byte(s) after {kind} payload"
            )));
        }
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
