//! Prelude module for convenient imports.
//!
//! ```ignore
//! use gamewire::prelude::*;
//! ```

// Core types
pub use gamewire_core::{Error as CoreError, FrameHeader, Message, Response, message_type};

// Transport types
pub use gamewire_transport::{GameFrameCodec, TcpClient, TcpClientConfig, TransportError};

// Server types
pub use gamewire_server::{
    DispatchOutcome, HandlerRegistry, HandlerResult, Identity, ListenerId, MessageHandler,
    PlayerId, Server, ServerBuilder, ServerConfig, ServerError, ServerHandle, Session,
    SessionManager,
};
