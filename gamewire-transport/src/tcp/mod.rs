//! TCP transport module.
//!
//! Provides TCP client and server implementations with length-prefixed framing.

pub mod client;
pub mod framing;
pub mod server;

pub use client::{TcpClient, TcpClientConfig};
pub use framing::GameFrameCodec;
pub use server::{TcpConnection, TcpServer, TcpServerConfig};
