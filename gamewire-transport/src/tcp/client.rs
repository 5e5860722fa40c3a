//! TCP client implementation.

use super::framing::GameFrameCodec;
use crate::error::TransportError;
use futures::{SinkExt, StreamExt};
use gamewire_core::Message;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

/// Configuration for TCP client.
#[derive(Debug, Clone)]
pub struct TcpClientConfig {
    /// Server address to connect to.
    pub server_addr: SocketAddr,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Optional cap on the declared payload length of inbound frames.
    pub max_frame_size: Option<usize>,
    /// Enable TCP_NODELAY.
    pub tcp_nodelay: bool,
}

impl Default for TcpClientConfig {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], 8888)),
            connect_timeout: Duration::from_secs(5),
            max_frame_size: None,
            tcp_nodelay: true,
        }
    }
}

impl TcpClientConfig {
    /// Creates a new client config with the specified server address.
    ///
    /// # Arguments
    /// * `server_addr` - Address of the server to connect to
    #[must_use]
    pub fn new(server_addr: SocketAddr) -> Self {
        Self {
            server_addr,
            ..Default::default()
        }
    }

    /// Sets the connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the maximum inbound payload size.
    #[must_use]
    pub fn max_frame_size(mut self, size: Option<usize>) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Sets TCP_NODELAY option.
    #[must_use]
    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }
}

/// Framed TCP client speaking the game protocol.
pub struct TcpClient {
    framed: Framed<TcpStream, GameFrameCodec>,
    peer_addr: SocketAddr,
}

impl TcpClient {
    /// Connects to a server with the given configuration.
    ///
    /// # Arguments
    /// * `config` - Client configuration
    ///
    /// # Errors
    /// Returns `TransportError` if the connection fails or times out.
    pub async fn connect(config: TcpClientConfig) -> Result<Self, TransportError> {
        let stream = tokio::time::timeout(
            config.connect_timeout,
            TcpStream::connect(config.server_addr),
        )
        .await
        .map_err(|_| TransportError::ConnectTimeout)??;

        stream.set_nodelay(config.tcp_nodelay)?;

        let peer_addr = stream.peer_addr()?;
        let framed = Framed::new(stream, GameFrameCodec::from_limit(config.max_frame_size));

        tracing::debug!(peer = %peer_addr, "connected");
        Ok(Self { framed, peer_addr })
    }

    /// Sends a message to the server.
    ///
    /// # Arguments
    /// * `message` - Message to frame and send
    ///
    /// # Errors
    /// Returns `TransportError` if the write fails.
    pub async fn send(&mut self, message: &Message) -> Result<(), TransportError> {
        self.framed.send(message).await
    }

    /// Receives the next message from the server.
    ///
    /// # Returns
    /// `Ok(Some(message))` if a frame arrived, `Ok(None)` if the connection closed.
    ///
    /// # Errors
    /// Returns `TransportError` if the read or decode fails.
    pub async fn recv(&mut self) -> Result<Option<Message>, TransportError> {
        self.framed.next().await.transpose()
    }

    /// Returns the peer address.
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Closes the connection.
    ///
    /// # Errors
    /// Returns `TransportError` if the final flush fails.
    pub async fn close(mut self) -> Result<(), TransportError> {
        SinkExt::<&Message>::close(&mut self.framed).await
    }
}
