//! # Gamewire
//!
//! Network edge of a multiplayer game server.
//!
//! Clients speak a simple binary protocol over TCP: every frame is a
//! big-endian `i32` message type, a big-endian `i32` payload length and the
//! payload bytes. Gamewire turns that stream into per-connection sessions,
//! holds everything but the login message until the session is
//! authenticated, and routes the rest to handlers registered by message type.
//!
//! ## Quick Start
//!
//! ```ignore
//! use gamewire::prelude::*;
//!
//! let (mut server, handle) = ServerBuilder::new()
//!     .bind("0.0.0.0:8888".parse().unwrap())
//!     .build();
//!
//! handle.registry().register_fn(10, |session, message| {
//!     session.send(11, message.payload().clone());
//!     Ok(())
//! });
//!
//! server.run().await?;
//! ```
//!
//! ## Crate Organization
//!
//! - [`core`] - Messages, the frame header and the reply envelope
//! - [`transport`] - Frame codec, TCP listener and client
//! - [`server`] - Sessions, handler registry, dispatcher and server runtime

pub mod prelude;

/// Messages, frame header and reply envelope.
pub mod core {
    pub use gamewire_core::*;
}

/// Framed TCP transport.
pub mod transport {
    pub use gamewire_transport::*;
}

/// Server-side engine.
pub mod server {
    pub use gamewire_server::*;
}
