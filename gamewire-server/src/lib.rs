//! # Gamewire Server
//!
//! Server-side engine for the gamewire protocol.
//!
//! This crate provides:
//! - Server builder with configuration options
//! - Sessions and the session manager (connection and identity indices)
//! - Handler registry and the authentication-gated dispatcher
//! - A bounded worker pool that keeps callbacks off the I/O runtime

pub mod builder;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod manager;
pub mod registry;
pub mod session;
pub mod worker;

pub use builder::{Server, ServerBuilder, ServerCommand, ServerConfig, ServerHandle};
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use error::ServerError;
pub use handler::{DisconnectListener, FnHandler, HandlerResult, MessageHandler};
pub use manager::{ListenerId, SessionManager};
pub use registry::{HandlerRegistry, Routed};
pub use session::{Identity, PlayerId, Session, SessionOutbox};
pub use worker::{SessionLane, WorkerPool};
