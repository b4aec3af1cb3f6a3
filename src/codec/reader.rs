use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

use crate::error::{Error, Result};
use crate::protocol::{Frame, FrameValidator};

/// Reads validated frames off the read half of a stream.
pub struct FrameReader<R> {
    io: R,
    buf: BytesMut,
    chunk: usize,
    validator: FrameValidator,
}

impl<R> FrameReader<R> {
    /// Reader whose buffer starts with `leftover`, the bytes that followed
    /// the handshake response head.
    #[must_use]
    pub fn new(io: R, validator: FrameValidator, read_buffer_size: usize, leftover: Bytes) -> Self {
        let chunk = read_buffer_size.max(64);
        let mut buf = BytesMut::with_capacity(chunk.max(leftover.len()));
        buf.extend_from_slice(&leftover);
        Self {
            io,
            buf,
            chunk,
            validator,
        }
    }

    /// Bytes received but not yet decoded.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn into_inner(self) -> R {
        self.io
    }
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Read the next frame.
    ///
    /// Cancel safe: dropping the future before it completes loses no bytes,
    /// a later call resumes where this one stopped.
    ///
    /// # Errors
    ///
    /// - Frame validation errors (see [`Frame::decode`])
    /// - `Error::ConnectionLost` on EOF or a transport read error
    pub async fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = Frame::decode_from(&mut self.buf, &self.validator)? {
                trace!(opcode = %frame.opcode, fin = frame.fin, len = frame.payload().len(), "frame read");
                return Ok(frame);
            }

            self.buf.reserve(self.chunk);
            let n = self
                .io
                .read_buf(&mut self.buf)
                .await
                .map_err(|e| Error::ConnectionLost(e.to_string()))?;
            if n == 0 {
                let reason = if self.buf.is_empty() {
                    "connection closed by peer"
                } else {
                    "connection closed by peer mid-frame"
                };
                return Err(Error::ConnectionLost(reason.into()));
            }
        }
    }
}
