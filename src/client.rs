//! The client facade: one WebSocket connection at a time to one target.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::codec::{FrameReader, FrameWriter};
use crate::config::Config;
use crate::connection::dispatcher::{Delivery, Dispatcher};
use crate::connection::{ConnectionState, Sender, Session};
use crate::error::{Error, Result};
use crate::message::{CloseCode, CloseFrame, Message};
use crate::protocol::{Frame, FrameValidator, negotiate};
use crate::transport::{Connector, TcpConnector, Target};

/// An established session: the write handle, the delivery queue and the
/// dispatcher task reading for it.
struct Link {
    session: Arc<Session>,
    sender: Sender,
    deliveries: AsyncMutex<mpsc::Receiver<Delivery>>,
    subprotocol: Option<String>,
    dispatcher: JoinHandle<()>,
}

impl Drop for Link {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

enum Slot {
    Idle,
    Connecting(Arc<Session>),
    Connected(Arc<Link>),
}

impl Slot {
    fn session(&self) -> Option<&Arc<Session>> {
        match self {
            Slot::Idle => None,
            Slot::Connecting(session) => Some(session),
            Slot::Connected(link) => Some(&link.session),
        }
    }
}

/// WebSocket client.
///
/// Holds at most one session at a time. All methods take `&self`, so a
/// client wrapped in an `Arc` can send from many tasks while another task
/// receives.
///
/// ## Example
///
/// ```rust,no_run
/// use wsconn::{Client, Config, Message, Target};
///
/// # async fn run() -> wsconn::Result<()> {
/// let client = Client::new(Target::new("localhost", 9001).with_path("/chat"), Config::default());
/// client.connect().await?;
/// client.send_text("hello").await?;
/// let reply = client.receive().await?;
/// println!("{reply:?}");
/// client.disconnect().await?;
/// client.closed().await;
/// # Ok(())
/// # }
/// ```
pub struct Client {
    target: Target,
    config: Config,
    connector: Arc<dyn Connector>,
    slot: Mutex<Slot>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("target", &self.target)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Client connecting over plain TCP.
    #[must_use]
    pub fn new(target: Target, config: Config) -> Self {
        Self::with_connector(target, config, TcpConnector)
    }

    /// Client opening its transport through `connector`.
    #[must_use]
    pub fn with_connector(target: Target, config: Config, connector: impl Connector) -> Self {
        Self {
            target,
            config,
            connector: Arc::new(connector),
            slot: Mutex::new(Slot::Idle),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn link(&self) -> Option<Arc<Link>> {
        match &*self.slot() {
            Slot::Connected(link) => Some(link.clone()),
            _ => None,
        }
    }

    /// Connect the transport, run the opening handshake and start reading.
    ///
    /// A client whose previous session is `Closed` may connect again.
    ///
    /// # Errors
    ///
    /// - `Error::AlreadyConnected` while a session is connecting, open or
    ///   closing
    /// - `Error::Io` / `Error::Timeout` if the transport cannot be opened
    /// - `Error::Handshake` (and friends, see [`negotiate`]) if the server
    ///   rejects the upgrade
    /// - `Error::ConnectionClosed` if [`disconnect`](Self::disconnect) was
    ///   called before the handshake finished
    pub async fn connect(&self) -> Result<()> {
        let session = {
            let mut slot = self.slot();
            if slot.session().is_some_and(|s| s.state().is_active()) {
                return Err(Error::AlreadyConnected);
            }
            let session = Arc::new(Session::new());
            *slot = Slot::Connecting(session.clone());
            session
        };

        debug!(target = %self.target, "connecting");
        let established = tokio::select! {
            result = self.establish(&session) => result,
            () = session.closed() => Err(Error::ConnectionClosed(session.close_frame())),
        };
        match established {
            Ok(link) => {
                *self.slot() = Slot::Connected(Arc::new(link));
                Ok(())
            }
            Err(error) => {
                if session.close(CloseFrame::new(CloseCode::Abnormal, error.to_string())) {
                    warn!(target = %self.target, error = %error, "connect failed");
                } else {
                    debug!(target = %self.target, "connect abandoned");
                }
                Err(error)
            }
        }
    }

    async fn establish(&self, session: &Arc<Session>) -> Result<Link> {
        let mut stream = tokio::time::timeout(
            self.config.timeouts.handshake,
            self.connector.connect(&self.target),
        )
        .await
        .map_err(|_| Error::Timeout("transport connect"))??;

        let negotiated = negotiate(&mut stream, &self.target, &self.config).await?;

        let (read_half, write_half) = tokio::io::split(stream);
        let reader = FrameReader::new(
            read_half,
            FrameValidator::new(self.config.limits.clone()),
            self.config.read_buffer_size,
            negotiated.leftover,
        );
        let sender = Sender::new(
            session.clone(),
            FrameWriter::new(write_half, self.config.write_buffer_size),
            &self.config,
        );
        let (tx, rx) = mpsc::channel(self.config.receive_queue_capacity.max(1));

        if let Err(error) = session.transition(ConnectionState::Open) {
            // Closed by `disconnect()` after the handshake finished.
            debug!(error = %error, "session closed during handshake");
            sender.shutdown().await;
            return Err(Error::ConnectionClosed(session.close_frame()));
        }

        let dispatcher = Dispatcher::new(reader, session.clone(), sender.clone(), tx, &self.config);
        let dispatcher = tokio::spawn(dispatcher.run());

        Ok(Link {
            session: session.clone(),
            sender,
            deliveries: AsyncMutex::new(rx),
            subprotocol: negotiated.subprotocol,
            dispatcher,
        })
    }

    /// Start the closing handshake with status 1000.
    ///
    /// See [`disconnect_with`](Self::disconnect_with).
    ///
    /// # Errors
    ///
    /// Returns `Error::ConnectionLost` if the close frame cannot be written.
    pub async fn disconnect(&self) -> Result<()> {
        self.disconnect_with(CloseCode::Normal, "").await
    }

    /// Start the closing handshake with `code` and `reason`.
    ///
    /// Returns once the close frame is written; the session stays
    /// `ClosingLocal` until the server answers or the closing timeout
    /// elapses. Await [`closed`](Self::closed) for the end. Calling this
    /// while already closing or closed does nothing. A session still
    /// connecting is abandoned.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidCloseCode` for codes that may not be sent
    /// - `Error::ConnectionLost` if the close frame cannot be written
    /// - `Error::ConnectionClosed` if a stalled write kept the close frame
    ///   from going out within the closing timeout
    pub async fn disconnect_with(&self, code: CloseCode, reason: &str) -> Result<()> {
        if !code.is_sendable() {
            return Err(Error::InvalidCloseCode(code.as_u16()));
        }
        let close = CloseFrame::new(code, reason);

        let link = match &*self.slot() {
            Slot::Idle => return Ok(()),
            Slot::Connecting(session) => {
                session.close(close);
                return Ok(());
            }
            Slot::Connected(link) => link.clone(),
        };

        if link.session.transition(ConnectionState::ClosingLocal).is_err() {
            return Ok(());
        }
        debug!(code = %code, "closing");
        link.sender.write_control(Frame::close(close.encode())).await
    }

    /// Send a message.
    ///
    /// # Errors
    ///
    /// - `Error::NotOpen` unless the connection is `Open`
    /// - `Error::MessageTooLarge` if the message exceeds the limit
    /// - `Error::ConnectionLost` if the transport fails
    pub async fn send(&self, message: impl Into<Message>) -> Result<()> {
        let link = self.link().ok_or(Error::NotOpen)?;
        link.sender.send(message.into()).await
    }

    /// Send a text message.
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send).
    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send(Message::Text(text.into())).await
    }

    /// Send a binary message.
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send).
    pub async fn send_binary(&self, data: impl Into<Vec<u8>>) -> Result<()> {
        self.send(Message::Binary(data.into())).await
    }

    /// Send a ping. The pong is consumed internally.
    ///
    /// # Errors
    ///
    /// - `Error::NotOpen` unless the connection is `Open`
    /// - `Error::ControlFrameTooLarge` for payloads over 125 bytes
    /// - `Error::ConnectionLost` if the transport fails
    pub async fn ping(&self, payload: impl Into<Bytes>) -> Result<()> {
        let link = self.link().ok_or(Error::NotOpen)?;
        link.sender.ping(payload).await
    }

    /// Wait for the next message.
    ///
    /// Messages are returned in the order the server sent them. Once the
    /// session ends, the error that ended it is returned once (if it failed);
    /// every later call returns `Error::ConnectionClosed` with the recorded
    /// close status.
    ///
    /// # Errors
    ///
    /// - `Error::ConnectionClosed` after the session closed
    /// - `Error::ConnectionLost` / `Error::ProtocolViolation` /
    ///   `Error::MessageTooLarge` / `Error::TooManyFragments` once, for the
    ///   failure that closed the session
    /// - `Error::NotOpen` if the client never connected
    pub async fn receive(&self) -> Result<Message> {
        let link = self.link().ok_or(Error::NotOpen)?;
        let mut deliveries = link.deliveries.lock().await;
        match deliveries.recv().await {
            Some(Delivery::Message(message)) => Ok(message),
            Some(Delivery::Failed(error)) => Err(error),
            None => Err(Error::ConnectionClosed(link.session.close_frame())),
        }
    }

    /// Take the next message if one is queued.
    ///
    /// Returns `Ok(None)` when the queue is empty or another task is
    /// currently waiting in [`receive`](Self::receive).
    ///
    /// # Errors
    ///
    /// Same as [`receive`](Self::receive).
    pub fn try_receive(&self) -> Result<Option<Message>> {
        let link = self.link().ok_or(Error::NotOpen)?;
        let Ok(mut deliveries) = link.deliveries.try_lock() else {
            return Ok(None);
        };
        match deliveries.try_recv() {
            Ok(Delivery::Message(message)) => Ok(Some(message)),
            Ok(Delivery::Failed(error)) => Err(error),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => {
                Err(Error::ConnectionClosed(link.session.close_frame()))
            }
        }
    }

    /// Whether the connection is exactly `Open`.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// State of the current session; `Closed` before the first connect.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.slot()
            .session()
            .map_or(ConnectionState::Closed, |s| s.state())
    }

    /// Subprotocol the server selected for the current session.
    #[must_use]
    pub fn subprotocol(&self) -> Option<String> {
        self.link().and_then(|link| link.subprotocol.clone())
    }

    /// Close status of the current session, once it is `Closed`.
    #[must_use]
    pub fn close_frame(&self) -> Option<CloseFrame> {
        self.slot().session().and_then(|s| s.close_frame())
    }

    #[must_use]
    pub fn target(&self) -> &Target {
        &self.target
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Wait until the current session is `Closed`. Returns immediately if
    /// there is none.
    pub async fn closed(&self) {
        let session = self.slot().session().cloned();
        if let Some(session) = session {
            session.closed().await;
        }
    }
}
