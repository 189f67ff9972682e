//! Streaming decoder for reads that split or merge frames.

use crate::codec::decode;
use crate::error::DecodeError;
use crate::message::Message;

/// Accumulates raw bytes and hands out whole messages.
///
/// ```text
/// extend(b"\0\0\0\x11\x02...")  ─┐
/// extend(b"...rest")            ─┼─▶ buf ─▶ next_message() ─▶ Some(Heartbeat)
///                                │                          ─▶ None (need more)
/// ```
///
/// A [`DecodeError::Truncated`] from the codec becomes `Ok(None)`. Any other
/// error is permanent for the stream: the bytes cannot be resynchronised, so
/// the caller should drop the connection.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes read from the stream.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pops the next complete message, if one is buffered.
    pub fn next_message(&mut self) -> Result<Option<Message>, DecodeError> {
        match decode(&self.buf) {
            Ok((message, used)) => {
                self.buf.drain(..used);
                Ok(Some(message))
            }
            Err(DecodeError::Truncated { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Number of buffered bytes not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// `true` when no partial frame is pending.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
