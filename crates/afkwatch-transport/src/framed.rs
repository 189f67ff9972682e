//! Message-level reader and writer over any tokio byte stream.
//!
//! ```text
//! TcpStream / DuplexStream
//!   ├── read half  → FrameReader ─ FrameDecoder ─▶ Message
//!   └── write half ← FrameWriter ◀─ encode ────── Message
//! ```

use afkwatch_protocol::{FrameDecoder, Message, ProtocolError, encode};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::TransportError;

const READ_CHUNK: usize = 4096;

/// Reads whole messages from a byte stream.
pub struct FrameReader<R> {
    inner: R,
    decoder: FrameDecoder,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            decoder: FrameDecoder::new(),
        }
    }

    /// Reads the next message.
    ///
    /// Returns `Ok(None)` on a clean EOF at a frame boundary. EOF in the
    /// middle of a frame is `ConnectionClosed`.
    ///
    /// # Cancel safety
    ///
    /// Cancel-safe. Bytes are moved into the internal decoder as soon as a
    /// single `read` completes, so dropping this future inside
    /// `tokio::select!` never loses a partially received frame.
    pub async fn read_message(&mut self) -> Result<Option<Message>, TransportError> {
        loop {
            if let Some(message) = self
                .decoder
                .next_message()
                .map_err(ProtocolError::from)?
            {
                return Ok(Some(message));
            }

            let mut chunk = [0u8; READ_CHUNK];
            let n = self
                .inner
                .read(&mut chunk)
                .await
                .map_err(TransportError::ReceiveFailed)?;
            if n == 0 {
                if self.decoder.is_empty() {
                    return Ok(None);
                }
                return Err(TransportError::ConnectionClosed(format!(
                    "eof with {} byte(s) of a partial frame buffered",
                    self.decoder.buffered()
                )));
            }
            self.decoder.extend(&chunk[..n]);
        }
    }
}

/// Writes whole messages to a byte stream.
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Encodes and writes one frame, then flushes.
    ///
    /// Encode failures surface as [`TransportError::Protocol`] before any
    /// byte is written, so the stream stays usable.
    pub async fn write_message(&mut self, message: &Message) -> Result<(), TransportError> {
        let frame = encode(message)?;
        self.inner
            .write_all(&frame)
            .await
            .map_err(TransportError::SendFailed)?;
        self.inner.flush().await.map_err(TransportError::SendFailed)
    }

    /// Shuts down the write side of the stream.
    pub async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.inner.shutdown().await.map_err(TransportError::SendFailed)
    }
}
