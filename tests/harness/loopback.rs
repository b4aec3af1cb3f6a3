//! Client wired to in-memory streams.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use wsconn::{BoxedStream, Client, Config, Connector, Target};

/// Connector handing the server end of every new duplex pipe to the test.
pub struct DuplexConnector {
    incoming: mpsc::UnboundedSender<DuplexStream>,
}

impl DuplexConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DuplexStream>) {
        let (incoming, rx) = mpsc::unbounded_channel();
        (Self { incoming }, rx)
    }
}

#[async_trait]
impl Connector for DuplexConnector {
    async fn connect(&self, _target: &Target) -> io::Result<BoxedStream> {
        let (client, server) = tokio::io::duplex(64 * 1024);
        self.incoming
            .send(server)
            .map_err(|_| io::Error::new(io::ErrorKind::ConnectionRefused, "no server"))?;
        Ok(Box::new(client))
    }
}

pub struct Loopback {
    pub client: Arc<Client>,
    incoming: mpsc::UnboundedReceiver<DuplexStream>,
}

impl Loopback {
    pub fn new(config: Config) -> Self {
        Self::with_target(Target::new("test.local", 80).with_path("/ws"), config)
    }

    pub fn with_target(target: Target, config: Config) -> Self {
        let (connector, incoming) = DuplexConnector::new();
        Self {
            client: Arc::new(Client::with_connector(target, config, connector)),
            incoming,
        }
    }

    /// Server end of the next transport the client opens.
    pub async fn next_peer(&mut self) -> super::Peer<DuplexStream> {
        let stream = self.incoming.recv().await.expect("client connected");
        super::Peer::new(stream)
    }

    /// Connect the client and accept the handshake.
    pub async fn connect(&mut self) -> super::Peer<DuplexStream> {
        let client = self.client.clone();
        let connecting = tokio::spawn(async move { client.connect().await });
        let mut peer = self.next_peer().await;
        peer.accept().await;
        connecting.await.unwrap().expect("connect");
        peer
    }

    /// Connect and run an echo server on the other end.
    pub async fn connect_echo(&mut self) {
        let peer = self.connect().await;
        tokio::spawn(peer.echo());
    }
}
