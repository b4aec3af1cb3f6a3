//! Echo client demo.
//!
//! Connects to an echo server, sends a few messages from concurrent tasks,
//! prints the echoes and closes.
//!
//! ```text
//! RUST_LOG=wsconn=debug cargo run --example echo_client -- 127.0.0.1 9001 /
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;
use wsconn::{Client, Config, Message, Target};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "127.0.0.1".to_string());
    let port = args.next().map(|p| p.parse::<u16>()).transpose()?.unwrap_or(9001);
    let path = args.next().unwrap_or_else(|| "/".to_string());

    let config = Config::default().with_ping_interval(Duration::from_secs(15));
    let client = Arc::new(Client::new(Target::new(host, port).with_path(path), config));
    client.connect().await?;
    println!("connected to {}", client.target());

    let mut senders = Vec::new();
    for id in 0..3 {
        let client = client.clone();
        senders.push(tokio::spawn(async move {
            client.send_text(format!("hello from task {id}")).await
        }));
    }
    for sender in senders {
        sender.await??;
    }
    client.send_binary(b"binary payload".to_vec()).await?;

    for _ in 0..4 {
        match client.receive().await? {
            Message::Text(text) => println!("text: {text}"),
            Message::Binary(data) => println!("binary: {} bytes", data.len()),
        }
    }

    client.disconnect().await?;
    client.closed().await;
    println!("closed: {:?}", client.close_frame());
    Ok(())
}
