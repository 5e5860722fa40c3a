//! Application message exchanged once framing is resolved.

use bytes::Bytes;

use crate::header::FrameHeader;

/// Well-known message types understood by the transport itself.
///
/// Every other type belongs to business handlers. Non-negative values are
/// application messages; negative values are reserved for transport-level
/// signaling and never legitimately originate from a client.
pub mod message_type {
    /// Login request, the only type allowed through the authentication gate.
    pub const LOGIN_REQUEST: i32 = 1;
    /// Login response.
    pub const LOGIN_RESPONSE: i32 = 2;
    /// Transport/dispatch-level error, originated by the server.
    pub const ERROR: i32 = -1;
}

/// One decoded frame: a type tag plus an opaque payload.
///
/// The payload is usually UTF-8 JSON, but the transport never looks inside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    message_type: i32,
    payload: Bytes,
}

impl Message {
    /// Creates a message with the given type and payload.
    #[must_use]
    pub fn new(message_type: i32, payload: impl Into<Bytes>) -> Self {
        Self {
            message_type,
            payload: payload.into(),
        }
    }

    /// Creates a message with an empty payload.
    #[must_use]
    pub fn empty(message_type: i32) -> Self {
        Self::new(message_type, Bytes::new())
    }

    /// Returns the message type.
    #[inline]
    #[must_use]
    pub fn message_type(&self) -> i32 {
        self.message_type
    }

    /// Returns the payload bytes.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Consumes the message and returns the payload.
    #[must_use]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Returns the payload as UTF-8 text, if it is valid UTF-8.
    #[must_use]
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    /// Returns true if this message uses a reserved (negative) type.
    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.message_type < 0
    }

    /// Returns the number of bytes this message occupies on the wire.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        FrameHeader::ENCODED_LENGTH + self.payload.len()
    }
}
