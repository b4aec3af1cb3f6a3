//! # wsconn - RFC 6455 WebSocket client core
//!
//! `wsconn` connects to a WebSocket server, runs the opening handshake and
//! then keeps one background task reading the connection. Any number of
//! tasks may send through the same [`Client`]; frames of distinct messages
//! never interleave. Received messages are queued in arrival order for
//! [`Client::receive`].
//!
//! ## Features
//!
//! - **Strict framing**: client frames are always masked with a fresh key,
//!   server frames must not be
//! - **Automatic control handling**: pings are answered, the closing
//!   handshake is driven to completion with a timeout
//! - **Fragmentation** of large outgoing messages and reassembly of
//!   incoming ones, with size and fragment-count limits
//! - **Incremental UTF-8 validation** of text messages
//! - **Pluggable transport** through the [`Connector`] trait
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wsconn::{Client, Config, Target};
//!
//! # async fn run() -> wsconn::Result<()> {
//! let client = Client::new(Target::new("localhost", 9001), Config::default());
//! client.connect().await?;
//! client.send_text("hello").await?;
//! let echo = client.receive().await?;
//! assert_eq!(echo.as_text(), Some("hello"));
//! client.disconnect().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod protocol;
pub mod registry;
pub mod transport;

pub use client::Client;
pub use config::{Config, Limits, Timeouts};
pub use connection::ConnectionState;
pub use error::{Error, Result};
pub use message::{CloseCode, CloseFrame, Message};
pub use protocol::{Frame, OpCode, compute_accept_key};
pub use registry::ClientRegistry;
pub use transport::{BoxedStream, Connector, Target, TcpConnector};
