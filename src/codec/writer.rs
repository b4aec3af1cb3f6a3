use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::error::{Error, Result};
use crate::protocol::{Frame, generate_mask};

/// Writes masked frames to the write half of a stream.
pub struct FrameWriter<W> {
    io: W,
    buf: BytesMut,
}

impl<W> FrameWriter<W> {
    #[must_use]
    pub fn new(io: W, write_buffer_size: usize) -> Self {
        Self {
            io,
            buf: BytesMut::with_capacity(write_buffer_size),
        }
    }

    #[must_use]
    pub fn get_ref(&self) -> &W {
        &self.io
    }
}

fn lost(e: std::io::Error) -> Error {
    Error::ConnectionLost(e.to_string())
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Encode `frame` with a fresh masking key and write it out.
    ///
    /// Nothing is flushed; call [`flush`](Self::flush) after the last frame
    /// of a message.
    ///
    /// # Errors
    ///
    /// - Outgoing frame rule violations (see [`Frame::validate`])
    /// - `Error::Io` if no masking key can be drawn
    /// - `Error::ConnectionLost` if the transport write fails
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        frame.validate()?;
        let mask = generate_mask()?;

        self.buf.clear();
        frame.encode_into(&mut self.buf, Some(mask));
        self.io.write_all(&self.buf).await.map_err(lost)?;

        trace!(opcode = %frame.opcode, fin = frame.fin, len = frame.payload().len(), "frame written");
        Ok(())
    }

    /// Flush buffered bytes to the transport.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConnectionLost` if the transport fails.
    pub async fn flush(&mut self) -> Result<()> {
        self.io.flush().await.map_err(lost)
    }

    /// Close the write direction of the transport.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConnectionLost` if the transport fails.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.io.shutdown().await.map_err(lost)
    }
}
