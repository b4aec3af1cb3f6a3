//! Outbound side of a session: serialized, fragmenting writes.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::WriteHalf;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::codec::FrameWriter;
use crate::config::{Config, Limits};
use crate::connection::fragmenter::MessageFragmenter;
use crate::connection::session::Session;
use crate::connection::state::ConnectionState;
use crate::connection::wait_until;
use crate::error::{Error, Result};
use crate::message::{CloseCode, CloseFrame, Message};
use crate::protocol::{Frame, MAX_CONTROL_FRAME_PAYLOAD, OpCode};
use crate::transport::BoxedStream;

type Writer = FrameWriter<WriteHalf<BoxedStream>>;

/// Write half plus a marker for a write cut short by cancellation.
struct Outbound {
    writer: Writer,
    in_flight: bool,
}

/// Handle for writing to a session. Cheap to clone.
///
/// All writes, data and control alike, go through one async mutex held for
/// "encode, write every frame, flush". tokio's mutex is fair, so concurrent
/// senders reach the wire in the order they queued and frames of distinct
/// messages never interleave.
///
/// A write never outlives the session: once it is `Closed`, or has been
/// closing for longer than the closing timeout, pending and in-progress
/// writes are abandoned and the lock is released.
#[derive(Clone)]
pub struct Sender {
    session: Arc<Session>,
    outbound: Arc<Mutex<Outbound>>,
    max_frame_size: usize,
    limits: Limits,
    close_timeout: Duration,
}

impl Sender {
    pub(crate) fn new(session: Arc<Session>, writer: Writer, config: &Config) -> Self {
        Self {
            session,
            outbound: Arc::new(Mutex::new(Outbound {
                writer,
                in_flight: false,
            })),
            max_frame_size: config.max_frame_size,
            limits: config.limits.clone(),
            close_timeout: config.timeouts.close,
        }
    }

    /// Send a data message, fragmenting it if it exceeds the frame size.
    ///
    /// # Errors
    ///
    /// - `Error::NotOpen` unless the session is `Open`, also when it stopped
    ///   being open while this call waited for earlier sends
    /// - `Error::MessageTooLarge` before anything is written
    /// - `Error::ConnectionLost` if the transport fails; the session is then
    ///   `Closed`
    /// - `Error::ConnectionClosed` if the session ended before the write
    ///   completed
    pub async fn send(&self, message: Message) -> Result<()> {
        if !self.session.state().can_send() {
            return Err(Error::NotOpen);
        }
        self.limits.check_message_size(message.len())?;

        let opcode = if message.is_text() {
            OpCode::Text
        } else {
            OpCode::Binary
        };
        let fragments =
            MessageFragmenter::new(Bytes::from(message.into_bytes()), opcode, self.max_frame_size);

        self.unless_abandoned(async move {
            let mut out = self.lock().await?;
            if !self.session.state().can_send() {
                return Err(Error::NotOpen);
            }

            out.in_flight = true;
            for frame in fragments {
                if let Err(e) = out.writer.write_frame(&frame).await {
                    return Err(self.fail(e));
                }
            }
            if let Err(e) = out.writer.flush().await {
                return Err(self.fail(e));
            }
            out.in_flight = false;
            Ok(())
        })
        .await
    }

    /// Send a ping. Only allowed while `Open`.
    ///
    /// # Errors
    ///
    /// - `Error::NotOpen` unless the session is `Open`
    /// - `Error::ControlFrameTooLarge` for payloads over 125 bytes
    /// - `Error::ConnectionLost` if the transport fails
    pub async fn ping(&self, payload: impl Into<Bytes>) -> Result<()> {
        let payload = payload.into();
        if !self.session.state().can_send() {
            return Err(Error::NotOpen);
        }
        if payload.len() > MAX_CONTROL_FRAME_PAYLOAD {
            return Err(Error::ControlFrameTooLarge(payload.len()));
        }
        self.write_control(Frame::ping(payload)).await
    }

    /// Write a control frame regardless of state.
    ///
    /// Used for pongs, keepalive pings and the frames of the closing
    /// handshake, which must go out after the session left `Open`.
    ///
    /// # Errors
    ///
    /// - `Error::ConnectionLost` if the transport fails
    /// - `Error::ConnectionClosed` if the session ended first
    pub(crate) async fn write_control(&self, frame: Frame) -> Result<()> {
        self.unless_abandoned(async move {
            let mut out = self.lock().await?;
            out.in_flight = true;
            if let Err(e) = out.writer.write_frame(&frame).await {
                return Err(self.fail(e));
            }
            if let Err(e) = out.writer.flush().await {
                return Err(self.fail(e));
            }
            out.in_flight = false;
            Ok(())
        })
        .await
    }

    /// Close the write direction of the transport, giving up after the
    /// closing timeout. Errors are ignored, the session is over either way.
    pub(crate) async fn shutdown(&self) {
        let shutdown = async {
            let mut out = self.outbound.lock().await;
            out.writer.shutdown().await
        };
        match tokio::time::timeout(self.close_timeout, shutdown).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "transport shutdown failed"),
            Err(_) => debug!(timeout = ?self.close_timeout, "transport shutdown timed out"),
        }
    }

    /// Run `write`, dropping it if the session is abandoned first.
    ///
    /// A write dropped mid-frame leaves `in_flight` set, so nothing else is
    /// ever written on that stream.
    async fn unless_abandoned<F>(&self, write: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        tokio::select! {
            biased;
            () = self.abandoned() => {
                debug!(state = %self.session.state(), "write abandoned");
                Err(Error::ConnectionClosed(self.session.close_frame()))
            }
            result = write => result,
        }
    }

    /// Resolves once the session is `Closed`, or once it has been closing
    /// for `close_timeout`. In the second case the session is closed here
    /// with status 1006.
    async fn abandoned(&self) {
        let mut state_rx = self.session.subscribe();
        let mut deadline = None;
        loop {
            let state = *state_rx.borrow_and_update();
            if state == ConnectionState::Closed {
                return;
            }
            if state.is_closing() && deadline.is_none() {
                deadline = Some(Instant::now() + self.close_timeout);
            }
            tokio::select! {
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                () = wait_until(deadline) => {
                    let frame = CloseFrame::new(CloseCode::Abnormal, "closing handshake timed out");
                    if self.session.close(frame) {
                        warn!(timeout = ?self.close_timeout, "write stalled past closing timeout");
                    }
                    return;
                }
            }
        }
    }

    async fn lock(&self) -> Result<tokio::sync::MutexGuard<'_, Outbound>> {
        let out = self.outbound.lock().await;
        if out.in_flight {
            // A previous write was cancelled mid-frame; the stream is no
            // longer aligned on a frame boundary.
            return Err(self.fail(Error::ConnectionLost(
                "previous write was interrupted".into(),
            )));
        }
        Ok(out)
    }

    /// Record a write failure on the session and hand back the error.
    fn fail(&self, error: Error) -> Error {
        let reason = error.to_string();
        if self.session.close(CloseFrame::new(CloseCode::Abnormal, reason)) {
            warn!(error = %error, "write failed, connection closed");
        }
        match error {
            Error::ConnectionLost(_) => error,
            other => Error::ConnectionLost(other.to_string()),
        }
    }
}
