//! TCP echo server on a random local port.

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use super::Peer;

pub struct TestServer {
    handle: JoinHandle<()>,
}

impl TestServer {
    pub async fn spawn() -> (Self, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut peer = Peer::new(stream);
                    peer.accept().await;
                    peer.echo().await;
                });
            }
        });

        (Self { handle }, addr)
    }

    pub async fn shutdown(self) {
        self.handle.abort();
        let _ = self.handle.await;
    }
}
