//! Demo game server with a JSON login and an echo handler.
//!
//! Run with: `cargo run --example server`

use gamewire::prelude::*;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

const ECHO_REQUEST: i32 = 10;
const ECHO_REPLY: i32 = 11;

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

/// Accepts any non-empty username/password pair and hands out player ids.
struct LoginHandler {
    sessions: Arc<SessionManager>,
    next_player_id: AtomicU64,
}

impl MessageHandler for LoginHandler {
    fn handle(&self, session: &Arc<Session>, message: &Message) -> HandlerResult {
        let request: LoginRequest = serde_json::from_slice(message.payload())?;
        if request.username.is_empty() || request.password.is_empty() {
            let reply = Response::error("username and password are required");
            session.send(message_type::LOGIN_RESPONSE, reply.to_payload()?);
            return Ok(());
        }

        let player_id = self.next_player_id.fetch_add(1, Ordering::Relaxed);
        self.sessions
            .authenticate(session, Identity::new(player_id, request.username.as_str()));
        tracing::info!(player_id, username = %request.username, "player logged in");

        let reply = Response::success_with(
            "login ok",
            serde_json::json!({ "player_id": player_id, "username": request.username }),
        );
        session.send(message_type::LOGIN_RESPONSE, reply.to_payload()?);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let addr: SocketAddr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "0.0.0.0:8888".to_string())
        .parse()?;

    let (mut server, handle) = ServerBuilder::new()
        .bind(addr)
        .max_connections(100)
        .build();

    handle.registry().register(
        message_type::LOGIN_REQUEST,
        Arc::new(LoginHandler {
            sessions: Arc::clone(handle.sessions()),
            next_player_id: AtomicU64::new(1000),
        }),
    );
    handle
        .registry()
        .register_fn(ECHO_REQUEST, |session, message| {
            session.send(ECHO_REPLY, message.payload().clone());
            Ok(())
        });
    handle.sessions().register_disconnect_listener(|session| {
        if let Some(identity) = session.identity() {
            println!("[Server] {} left", identity.username);
        }
        Ok(())
    });

    println!("Starting gamewire server on {addr}");
    println!("Press Ctrl+C to stop");

    let shutdown_handle = handle.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        println!("\nShutting down server...");
        shutdown_handle.shutdown();
    });

    server.run().await?;

    println!("Server stopped");
    Ok(())
}
