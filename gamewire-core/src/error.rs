//! Error types for gamewire core operations.

use thiserror::Error;

/// Core error type for frame-level operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Buffer is too short for the requested operation.
    #[error("buffer too short: required {required} bytes, available {available} bytes")]
    BufferTooShort {
        /// Required buffer size in bytes.
        required: usize,
        /// Available buffer size in bytes.
        available: usize,
    },

    /// The frame header declares a negative payload length.
    #[error("negative payload length {length} for message type {message_type}")]
    NegativeLength {
        /// Message type carried by the offending header.
        message_type: i32,
        /// Declared length.
        length: i32,
    },

    /// Declared or actual payload length exceeds the configured cap.
    #[error("frame too large: {size} bytes exceeds maximum {max} bytes")]
    FrameTooLarge {
        /// Payload size in bytes.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Payload does not fit in the signed 32-bit length field.
    #[error("payload of {size} bytes does not fit in a 32-bit length field")]
    PayloadOverflow {
        /// Payload size in bytes.
        size: usize,
    },

    /// Response envelope could not be serialized.
    #[error("response serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Result type alias for gamewire core operations.
pub type Result<T> = std::result::Result<T, Error>;
