//! # Gamewire Transport
//!
//! Network transport layer for the gamewire protocol.
//!
//! This crate provides:
//! - [`tcp::GameFrameCodec`] - `[i32 type][i32 length][payload]` framing for tokio-util
//! - [`tcp::TcpServer`] / [`tcp::TcpConnection`] - listener with the server socket options
//! - [`tcp::TcpClient`] - framed client used by tools and tests

pub mod error;
pub mod tcp;

pub use error::TransportError;
pub use tcp::{
    GameFrameCodec, TcpClient, TcpClientConfig, TcpConnection, TcpServer, TcpServerConfig,
};
