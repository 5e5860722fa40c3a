//! Frame header.
//!
//! Every frame on the wire starts with an 8-byte header followed by the
//! payload. There is no magic number, version byte, or checksum.
//!
//! # Wire Format
//! ```text
//! +0: type    (i32, big-endian)
//! +4: length  (i32, big-endian, >= 0)
//! +8: payload (length bytes)
//! ```

use crate::error::{Error, Result};

/// Fixed 8-byte frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameHeader {
    /// Application-defined message type.
    pub message_type: i32,
    /// Declared payload length as read from the wire.
    pub length: i32,
}

impl FrameHeader {
    /// Encoded length of the frame header in bytes.
    pub const ENCODED_LENGTH: usize = 8;

    /// Creates a header for a payload of `payload_len` bytes.
    ///
    /// # Errors
    /// Returns [`Error::PayloadOverflow`] if the length does not fit in an `i32`.
    pub fn for_payload(message_type: i32, payload_len: usize) -> Result<Self> {
        let length =
            i32::try_from(payload_len).map_err(|_| Error::PayloadOverflow { size: payload_len })?;
        Ok(Self {
            message_type,
            length,
        })
    }

    /// Decodes a header from the first 8 bytes of `buffer`.
    ///
    /// No validation of the length is performed here; see [`payload_len`](Self::payload_len).
    ///
    /// # Errors
    /// Returns [`Error::BufferTooShort`] if fewer than 8 bytes are available.
    pub fn wrap(buffer: &[u8]) -> Result<Self> {
        if buffer.len() < Self::ENCODED_LENGTH {
            return Err(Error::BufferTooShort {
                required: Self::ENCODED_LENGTH,
                available: buffer.len(),
            });
        }

        Ok(Self {
            message_type: i32::from_be_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]),
            length: i32::from_be_bytes([buffer[4], buffer[5], buffer[6], buffer[7]]),
        })
    }

    /// Encodes the header into the first 8 bytes of `buffer`.
    ///
    /// # Errors
    /// Returns [`Error::BufferTooShort`] if `buffer` is shorter than 8 bytes.
    pub fn encode(&self, buffer: &mut [u8]) -> Result<()> {
        if buffer.len() < Self::ENCODED_LENGTH {
            return Err(Error::BufferTooShort {
                required: Self::ENCODED_LENGTH,
                available: buffer.len(),
            });
        }
        buffer[0..4].copy_from_slice(&self.message_type.to_be_bytes());
        buffer[4..8].copy_from_slice(&self.length.to_be_bytes());
        Ok(())
    }

    /// Returns the declared payload length, validated against an optional cap.
    ///
    /// # Errors
    /// Returns [`Error::NegativeLength`] for a negative declared length and
    /// [`Error::FrameTooLarge`] if the length exceeds `max`.
    pub fn payload_len(&self, max: Option<usize>) -> Result<usize> {
        let length = usize::try_from(self.length).map_err(|_| Error::NegativeLength {
            message_type: self.message_type,
            length: self.length,
        })?;

        match max {
            Some(max) if length > max => Err(Error::FrameTooLarge { size: length, max }),
            _ => Ok(length),
        }
    }

    /// Returns the total frame size (header + payload) if the length is valid.
    #[must_use]
    pub fn frame_size(&self) -> Option<usize> {
        usize::try_from(self.length)
            .ok()
            .map(|len| Self::ENCODED_LENGTH + len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_is_big_endian() {
        let header = FrameHeader {
            message_type: 1,
            length: 258,
        };
        let mut buf = [0u8; 8];
        header.encode(&mut buf).unwrap();
        assert_eq!(buf, [0, 0, 0, 1, 0, 0, 1, 2]);
    }

    #[test]
    fn test_header_wrap() {
        let buf = [0xFF, 0xFF, 0xFF, 0xFF, 0, 0, 0, 5, 0xAA];
        let header = FrameHeader::wrap(&buf).unwrap();
        assert_eq!(header.message_type, -1);
        assert_eq!(header.length, 5);
        assert_eq!(header.frame_size(), Some(13));
    }

    #[test]
    fn test_header_wrap_short_buffer() {
        let result = FrameHeader::wrap(&[0u8; 7]);
        assert!(matches!(
            result,
            Err(Error::BufferTooShort {
                required: 8,
                available: 7
            })
        ));
    }

    #[test]
    fn test_payload_len_negative() {
        let header = FrameHeader {
            message_type: 3,
            length: -4,
        };
        assert!(matches!(
            header.payload_len(None),
            Err(Error::NegativeLength { length: -4, .. })
        ));
        assert_eq!(header.frame_size(), None);
    }

    #[test]
    fn test_payload_len_cap() {
        let header = FrameHeader {
            message_type: 3,
            length: 100,
        };
        assert_eq!(header.payload_len(None).unwrap(), 100);
        assert_eq!(header.payload_len(Some(100)).unwrap(), 100);
        assert!(matches!(
            header.payload_len(Some(99)),
            Err(Error::FrameTooLarge { size: 100, max: 99 })
        ));
    }

    #[test]
    fn test_for_payload_zero_length() {
        let header = FrameHeader::for_payload(7, 0).unwrap();
        assert_eq!(header.length, 0);
        assert_eq!(header.frame_size(), Some(FrameHeader::ENCODED_LENGTH));
    }
}
