//! Test harness: a scripted WebSocket server for driving the client.
//!
//! `Loopback` wires a client to in-memory streams so each test plays the
//! server by hand; `TestServer` runs a real TCP echo server.

#![allow(dead_code)]

mod loopback;
mod metrics;
mod peer;
mod server;

pub use loopback::{DuplexConnector, Loopback};
pub use metrics::Metrics;
pub use peer::Peer;
pub use server::TestServer;
