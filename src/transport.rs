//! Transport collaborator: where the client connects and how bytes flow.
//!
//! The client never opens sockets itself. A [`Connector`] turns a [`Target`]
//! into a byte stream; [`TcpConnector`] is the plain TCP implementation.
//! TLS or proxies plug in as further connectors.

use std::fmt;
use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::trace;

/// Byte stream a WebSocket session runs over.
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> Stream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Boxed transport stream handed to the session.
pub type BoxedStream = Box<dyn Stream>;

/// Opens transport streams.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a stream to `target`.
    async fn connect(&self, target: &Target) -> io::Result<BoxedStream>;
}

/// Plain TCP with `TCP_NODELAY` set.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, target: &Target) -> io::Result<BoxedStream> {
        let stream = TcpStream::connect((target.host.as_str(), target.port)).await?;
        stream.set_nodelay(true)?;
        trace!(peer = ?stream.peer_addr().ok(), "tcp connected");
        Ok(Box::new(stream))
    }
}

/// Endpoint of a WebSocket connection.
///
/// Built explicitly by the application; no URL parsing happens here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Host name or address, also sent in the `Host` header.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Request path including any query string.
    pub path: String,
    /// Value for the `Origin` header.
    pub origin: Option<String>,
    /// Subprotocols offered in `Sec-WebSocket-Protocol`, in preference order.
    pub subprotocols: Vec<String>,
    /// Additional request headers.
    pub headers: Vec<(String, String)>,
}

impl Target {
    /// Target `host:port` with path `/`.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            path: "/".to_string(),
            origin: None,
            subprotocols: Vec::new(),
            headers: Vec::new(),
        }
    }

    /// Set the request path. A missing leading `/` is added.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.path = if path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };
        self
    }

    /// Set the `Origin` header.
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Offer a subprotocol.
    #[must_use]
    pub fn with_subprotocol(mut self, protocol: impl Into<String>) -> Self {
        self.subprotocols.push(protocol.into());
        self
    }

    /// Add a request header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Value of the `Host` header; the port is omitted when it is 80.
    #[must_use]
    pub fn host_header(&self) -> String {
        if self.port == 80 {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ws://{}:{}{}", self.host, self.port, self.path)
    }
}
