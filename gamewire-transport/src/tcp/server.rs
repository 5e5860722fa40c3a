//! TCP server implementation.

use super::framing::GameFrameCodec;
use crate::error::TransportError;
use futures::{SinkExt, StreamExt};
use gamewire_core::Message;
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

/// Configuration for TCP server.
#[derive(Debug, Clone)]
pub struct TcpServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Optional cap on the declared payload length of inbound frames.
    pub max_frame_size: Option<usize>,
    /// Enable TCP_NODELAY on accepted sockets.
    pub tcp_nodelay: bool,
    /// Enable SO_KEEPALIVE on accepted sockets.
    pub keepalive: bool,
    /// Listen backlog.
    pub backlog: i32,
}

impl Default for TcpServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8888)),
            max_frame_size: None,
            tcp_nodelay: true,
            keepalive: true,
            backlog: 128,
        }
    }
}

impl TcpServerConfig {
    /// Creates a new server config with the specified bind address.
    ///
    /// # Arguments
    /// * `bind_addr` - Address to listen on
    #[must_use]
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
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

    /// Sets SO_KEEPALIVE option.
    #[must_use]
    pub fn keepalive(mut self, enabled: bool) -> Self {
        self.keepalive = enabled;
        self
    }

    /// Sets the listen backlog.
    #[must_use]
    pub fn backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }
}

/// TCP server accepting framed game connections.
pub struct TcpServer {
    listener: TcpListener,
    config: Arc<TcpServerConfig>,
}

impl TcpServer {
    /// Binds to the configured address and creates a new server.
    ///
    /// # Arguments
    /// * `config` - Server configuration
    ///
    /// # Errors
    /// Returns IO error if the socket cannot be created or bound.
    pub async fn bind(config: TcpServerConfig) -> std::io::Result<Self> {
        let addr = config.bind_addr;
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(config.backlog)?;

        let listener = TcpListener::from_std(socket.into())?;
        Ok(Self {
            listener,
            config: Arc::new(config),
        })
    }

    /// Accepts a new connection and applies the per-socket options.
    ///
    /// # Errors
    /// Returns IO error if accept fails.
    pub async fn accept(&self) -> std::io::Result<TcpConnection> {
        let (stream, addr) = self.listener.accept().await?;
        stream.set_nodelay(self.config.tcp_nodelay)?;
        if self.config.keepalive {
            SockRef::from(&stream).set_keepalive(true)?;
        }

        Ok(TcpConnection {
            framed: Framed::new(stream, GameFrameCodec::from_limit(self.config.max_frame_size)),
            peer_addr: addr,
        })
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

/// A framed TCP connection to a client.
pub struct TcpConnection {
    framed: Framed<TcpStream, GameFrameCodec>,
    peer_addr: SocketAddr,
}

impl TcpConnection {
    /// Returns the peer address.
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Sends a message to the client.
    ///
    /// # Arguments
    /// * `message` - Message to frame and send
    ///
    /// # Errors
    /// Returns `TransportError` if the write fails.
    pub async fn send(&mut self, message: &Message) -> Result<(), TransportError> {
        self.framed.send(message).await
    }

    /// Receives the next message from the client.
    ///
    /// # Returns
    /// `Some(Ok(message))` if a frame was decoded, `None` if the peer closed the connection.
    pub async fn recv(&mut self) -> Option<Result<Message, TransportError>> {
        self.framed.next().await
    }

    /// Flushes pending writes and shuts down the write half.
    ///
    /// # Errors
    /// Returns `TransportError` if the flush fails.
    pub async fn close(mut self) -> Result<(), TransportError> {
        SinkExt::<&Message>::close(&mut self.framed).await
    }
}
