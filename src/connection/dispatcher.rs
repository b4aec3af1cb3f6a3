//! Inbound side of a session: the background read loop.
//!
//! One dispatcher task runs per session. It reads frames, answers pings,
//! drives the closing handshake and hands complete messages to the
//! consumer through a bounded channel. A full channel stops reading, which
//! in turn stops the server at the TCP level.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::ReadHalf;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, trace, warn};

use crate::codec::FrameReader;
use crate::config::Config;
use crate::connection::sender::Sender;
use crate::connection::session::Session;
use crate::connection::state::ConnectionState;
use crate::connection::wait_until;
use crate::error::{Error, Result};
use crate::message::{CloseCode, CloseFrame, Message};
use crate::protocol::{Frame, MessageAssembler, OpCode};
use crate::transport::BoxedStream;

/// Item on the delivery channel.
#[derive(Debug)]
pub(crate) enum Delivery {
    Message(Message),
    /// The fatal error that ended the session, delivered once.
    Failed(Error),
}

pub(crate) struct Dispatcher {
    reader: FrameReader<ReadHalf<BoxedStream>>,
    assembler: MessageAssembler,
    session: Arc<Session>,
    sender: Sender,
    deliveries: mpsc::Sender<Delivery>,
    state_rx: watch::Receiver<ConnectionState>,
    close_timeout: Duration,
    close_deadline: Option<Instant>,
    keepalive: Option<Interval>,
    pong_timeout: Duration,
    pong_deadline: Option<Instant>,
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Close code sent to the server for a failure, `None` when the transport
/// is already gone.
fn close_code_for(error: &Error) -> Option<CloseCode> {
    match error {
        Error::ConnectionLost(_) | Error::Io(_) => None,
        Error::InvalidUtf8 => Some(CloseCode::InvalidPayload),
        Error::MessageTooLarge { .. }
        | Error::TooManyFragments { .. }
        | Error::FrameTooLarge { .. } => Some(CloseCode::MessageTooBig),
        _ => Some(CloseCode::ProtocolError),
    }
}

/// Error as the consumer sees it.
fn surfaced(error: Error) -> Error {
    match error {
        Error::InvalidUtf8 => Error::ProtocolViolation("invalid UTF-8 in text message".into()),
        e if e.is_frame_error() => Error::ProtocolViolation(e.to_string()),
        e => e,
    }
}

impl Dispatcher {
    pub(crate) fn new(
        reader: FrameReader<ReadHalf<BoxedStream>>,
        session: Arc<Session>,
        sender: Sender,
        deliveries: mpsc::Sender<Delivery>,
        config: &Config,
    ) -> Self {
        let keepalive = config.ping_interval.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        Self {
            reader,
            assembler: MessageAssembler::new(config.limits.clone()),
            state_rx: session.subscribe(),
            session,
            sender,
            deliveries,
            close_timeout: config.timeouts.close,
            close_deadline: None,
            keepalive,
            pong_timeout: config.pong_timeout,
            pong_deadline: None,
        }
    }

    /// Run until the session is `Closed`, then release the transport.
    ///
    /// The delivery channel is closed before the writer is touched: a send
    /// stalled on a server that stopped reading may still hold it, and a
    /// consumer blocked in `receive()` must wake regardless.
    pub(crate) async fn run(mut self) {
        debug!("dispatcher started");
        if let Err(error) = self.read_loop().await {
            self.fail(error).await;
        }
        let Self {
            reader,
            session,
            sender,
            deliveries,
            ..
        } = self;
        drop(deliveries);
        drop(reader);
        sender.shutdown().await;
        debug!(close = ?session.close_frame(), "dispatcher stopped");
    }

    /// Latest published state; arms the closing timer on `ClosingLocal`.
    fn observe_state(&mut self) -> ConnectionState {
        let state = *self.state_rx.borrow_and_update();
        if state == ConnectionState::ClosingLocal && self.close_deadline.is_none() {
            self.close_deadline = Some(Instant::now() + self.close_timeout);
        }
        state
    }

    async fn read_loop(&mut self) -> Result<()> {
        loop {
            let state = self.observe_state();
            if !state.can_receive() {
                return Ok(());
            }

            tokio::select! {
                frame = self.reader.read_frame() => {
                    self.pong_deadline = None;
                    if let Some(message) = self.handle_frame(frame?).await? {
                        self.deliver(message).await;
                    }
                }
                changed = self.state_rx.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                }
                () = wait_until(self.close_deadline) => {
                    self.close_timed_out();
                }
                () = wait_until(self.pong_deadline) => {
                    return Err(Error::ConnectionLost(format!(
                        "no response within {:?} of keepalive ping",
                        self.pong_timeout
                    )));
                }
                () = tick(&mut self.keepalive), if state == ConnectionState::Open => {
                    trace!("keepalive ping");
                    self.sender.write_control(Frame::ping(Bytes::new())).await?;
                    if self.pong_deadline.is_none() {
                        self.pong_deadline = Some(Instant::now() + self.pong_timeout);
                    }
                }
            }
        }
    }

    async fn handle_frame(&mut self, frame: Frame) -> Result<Option<Message>> {
        match frame.opcode {
            OpCode::Ping => {
                // No pong once our close frame is out.
                if self.session.state() == ConnectionState::Open {
                    trace!(len = frame.payload().len(), "ping, sending pong");
                    self.sender
                        .write_control(Frame::pong(frame.into_payload()))
                        .await?;
                }
                Ok(None)
            }
            OpCode::Pong => {
                trace!(len = frame.payload().len(), "pong");
                Ok(None)
            }
            OpCode::Close => {
                self.handle_close(&frame).await?;
                Ok(None)
            }
            OpCode::Text | OpCode::Binary | OpCode::Continuation => self.assembler.push(frame),
        }
    }

    async fn handle_close(&mut self, frame: &Frame) -> Result<()> {
        let received = CloseFrame::parse(frame.payload())?;
        let record = received
            .clone()
            .unwrap_or_else(|| CloseFrame::new(CloseCode::NoStatus, ""));

        // Fails if our own close frame is already out (ClosingLocal).
        if self.session.transition(ConnectionState::ClosingRemote).is_ok() {
            debug!(code = %record.code, reason = %record.reason, "peer initiated close");
            let echo = received.map(|f| f.encode()).unwrap_or_default();
            if let Err(e) = self.sender.write_control(Frame::close(echo)).await {
                debug!(error = %e, "close echo not sent");
            }
        } else {
            debug!(code = %record.code, "closing handshake complete");
        }
        self.session.close(record);
        Ok(())
    }

    /// Hand a message to the consumer, waiting for queue space.
    ///
    /// While waiting, a local close still times out and a `Closed` session
    /// abandons the message.
    async fn deliver(&mut self, message: Message) {
        trace!(len = message.len(), text = message.is_text(), "delivering message");
        let send = self.deliveries.send(Delivery::Message(message));
        tokio::pin!(send);
        loop {
            tokio::select! {
                sent = &mut send => {
                    if sent.is_err() {
                        debug!("receiver gone, message dropped");
                    }
                    return;
                }
                changed = self.state_rx.changed() => {
                    let state = *self.state_rx.borrow_and_update();
                    if changed.is_err() || state == ConnectionState::Closed {
                        return;
                    }
                    if state == ConnectionState::ClosingLocal && self.close_deadline.is_none() {
                        self.close_deadline = Some(Instant::now() + self.close_timeout);
                    }
                }
                () = wait_until(self.close_deadline) => {
                    self.close_timed_out();
                    return;
                }
            }
        }
    }

    fn close_timed_out(&self) {
        if self.session.close(CloseFrame::new(
            CloseCode::Abnormal,
            "closing handshake timed out",
        )) {
            warn!(timeout = ?self.close_timeout, "peer did not answer close frame");
        }
    }

    /// End the session after a fatal error.
    async fn fail(&mut self, error: Error) {
        let was = self.session.state();
        let code = close_code_for(&error);
        let reason = error.to_string();

        if let Some(code) = code {
            if was.is_active() {
                // Bounded: a stalled send may hold the writer while `Open`.
                let frame = Frame::close(CloseFrame::new(code, reason.clone()).encode());
                match tokio::time::timeout(self.close_timeout, self.sender.write_control(frame))
                    .await
                {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => debug!(error = %e, "close frame not sent"),
                    Err(_) => debug!("close frame not sent, writer busy"),
                }
            }
        }

        let record = CloseFrame::new(code.unwrap_or(CloseCode::Abnormal), reason);
        if !self.session.close(record) {
            // Someone else closed the session first and reported it.
            return;
        }

        if was == ConnectionState::ClosingLocal {
            debug!(error = %error, "transport ended during closing handshake");
            return;
        }

        warn!(error = %error, state = %was, "connection failed");
        self.sender.shutdown().await;
        if self.deliveries.send(Delivery::Failed(surfaced(error))).await.is_err() {
            debug!("receiver gone, error dropped");
        }
    }
}
