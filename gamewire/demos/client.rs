//! Demo client: logs in, sends one echo and disconnects.
//!
//! Run with: `cargo run --example client`
//!
//! Make sure the server is running first: `cargo run --example server`

use gamewire::prelude::*;
use std::net::SocketAddr;
use std::time::Duration;

const ECHO_REQUEST: i32 = 10;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let addr: SocketAddr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:8888".to_string())
        .parse()?;

    println!("Connecting to gamewire server at {addr}");
    let mut client =
        TcpClient::connect(TcpClientConfig::new(addr).connect_timeout(Duration::from_secs(5)))
            .await?;

    // Anything but a login is refused before authenticating.
    client.send(&Message::new(ECHO_REQUEST, "too early")).await?;
    print_reply(client.recv().await?);

    let login = serde_json::json!({ "username": "amiya", "password": "rhodes" });
    client
        .send(&Message::new(message_type::LOGIN_REQUEST, login.to_string()))
        .await?;
    print_reply(client.recv().await?);

    client.send(&Message::new(ECHO_REQUEST, "hello")).await?;
    print_reply(client.recv().await?);

    client.close().await?;
    println!("Disconnected");
    Ok(())
}

fn print_reply(reply: Option<Message>) {
    match reply {
        Some(message) => println!(
            "[Client] type={} payload={}",
            message.message_type(),
            message.payload_str().unwrap_or("<binary>")
        ),
        None => println!("[Client] server closed the connection"),
    }
}
