//! # Gamewire Core
//!
//! Core types for the gamewire game-server edge.
//!
//! This crate provides:
//! - [`Message`] - the unit exchanged once framing is resolved
//! - [`FrameHeader`] - the 8-byte big-endian wire header
//! - [`Response`] - the JSON `{ success, message, data }` envelope
//! - Error types for frame-level operations

pub mod error;
pub mod header;
pub mod message;
pub mod response;

pub use error::{Error, Result};
pub use header::FrameHeader;
pub use message::{Message, message_type};
pub use response::Response;
