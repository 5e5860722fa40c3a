//! Game message framing codec for TCP.
//!
//! Frame format: `[4-byte type (i32, BE)][4-byte length (i32, BE)][payload]`.
//! No magic, no version byte, no checksum.

use bytes::{Buf, BufMut, BytesMut};
use gamewire_core::{FrameHeader, Message};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::TransportError;

/// Upper bound on how much buffer space is reserved ahead of a partial frame.
const RESERVE_CHUNK: usize = 64 * 1024;

/// Length-prefixed codec turning a byte stream into [`Message`]s.
///
/// Decoding never consumes bytes until a whole frame is available, so frames
/// split arbitrarily across reads and several frames in one read are both
/// handled. The payload length is trusted at face value unless a cap is set.
#[derive(Debug, Clone, Default)]
pub struct GameFrameCodec {
    max_frame_size: Option<usize>,
}

impl GameFrameCodec {
    /// Creates a codec with no payload size cap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a codec that rejects frames declaring more than `max` payload bytes.
    ///
    /// # Arguments
    /// * `max` - Maximum payload length in bytes
    #[must_use]
    pub fn with_max_frame_size(max: usize) -> Self {
        Self {
            max_frame_size: Some(max),
        }
    }

    /// Creates a codec from an optional cap.
    ///
    /// # Arguments
    /// * `max_frame_size` - Maximum payload length, or `None` for no cap
    #[must_use]
    pub fn from_limit(max_frame_size: Option<usize>) -> Self {
        Self { max_frame_size }
    }

    /// Returns the payload size cap, if any.
    #[must_use]
    pub fn max_frame_size(&self) -> Option<usize> {
        self.max_frame_size
    }
}

impl Decoder for GameFrameCodec {
    type Item = Message;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < FrameHeader::ENCODED_LENGTH {
            return Ok(None);
        }

        let header = FrameHeader::wrap(&src[..])?;
        let length = header.payload_len(self.max_frame_size)?;
        let frame_len = FrameHeader::ENCODED_LENGTH + length;

        if src.len() < frame_len {
            src.reserve((frame_len - src.len()).min(RESERVE_CHUNK));
            return Ok(None);
        }

        src.advance(FrameHeader::ENCODED_LENGTH);
        let payload = src.split_to(length).freeze();

        Ok(Some(Message::new(header.message_type, payload)))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None if buf.is_empty() => Ok(None),
            None => Err(TransportError::ConnectionClosed),
        }
    }
}

impl Encoder<&Message> for GameFrameCodec {
    type Error = TransportError;

    fn encode(&mut self, item: &Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = item.payload();
        let header = FrameHeader::for_payload(item.message_type(), payload.len())?;

        dst.reserve(FrameHeader::ENCODED_LENGTH + payload.len());
        dst.put_i32(header.message_type);
        dst.put_i32(header.length);
        dst.put_slice(payload);

        Ok(())
    }
}

impl Encoder<Message> for GameFrameCodec {
    type Error = TransportError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        <Self as Encoder<&Message>>::encode(self, &item, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(message: &Message) -> BytesMut {
        let mut codec = GameFrameCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(message, &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_encode_layout() {
        let buf = encoded(&Message::new(2, &b"hi"[..]));
        assert_eq!(&buf[..], &[0, 0, 0, 2, 0, 0, 0, 2, b'h', b'i']);
    }

    #[test]
    fn test_encode_decode_lengths() {
        let mut codec = GameFrameCodec::new();
        for len in [0usize, 1, 7, 8, 9, 255, 4096] {
            let message = Message::new(17, vec![0xABu8; len]);
            let mut buf = encoded(&message);
            let decoded = codec.decode(&mut buf).unwrap().unwrap();
            assert_eq!(decoded, message);
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn test_every_split_point() {
        let message = Message::new(33, &b"{\"username\":\"amiya\"}"[..]);
        let full = encoded(&message);

        for split in 0..full.len() {
            let mut codec = GameFrameCodec::new();
            let mut buf = BytesMut::from(&full[..split]);

            assert!(codec.decode(&mut buf).unwrap().is_none());
            assert_eq!(buf.len(), split, "partial frame must not be consumed");

            buf.extend_from_slice(&full[split..]);
            assert_eq!(codec.decode(&mut buf).unwrap(), Some(message.clone()));
            assert!(codec.decode(&mut buf).unwrap().is_none());
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn test_one_byte_at_a_time() {
        let message = Message::new(64, &b"potion x3"[..]);
        let full = encoded(&message);

        let mut codec = GameFrameCodec::new();
        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();

        for byte in full.iter() {
            buf.put_u8(*byte);
            while let Some(msg) = codec.decode(&mut buf).unwrap() {
                decoded.push(msg);
            }
        }

        assert_eq!(decoded, vec![message]);
    }

    #[test]
    fn test_multiple_frames_in_one_read() {
        let a = Message::new(10, &b"first"[..]);
        let b = Message::empty(11);
        let c = Message::new(-1, &b"third"[..]);

        let mut buf = encoded(&a);
        buf.extend_from_slice(&encoded(&b));
        buf.extend_from_slice(&encoded(&c)[..5]);

        let mut codec = GameFrameCodec::new();
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(a));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(b));
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn test_negative_length_is_error() {
        let mut codec = GameFrameCodec::new();
        let mut buf = BytesMut::new();
        buf.put_i32(5);
        buf.put_i32(-1);

        let result = codec.decode(&mut buf);
        assert!(matches!(
            result,
            Err(TransportError::Frame(gamewire_core::Error::NegativeLength { .. }))
        ));
    }

    #[test]
    fn test_eof_mid_frame_is_connection_closed() {
        let full = encoded(&Message::new(7, &b"cut short"[..]));
        let mut codec = GameFrameCodec::new();

        for split in [3, FrameHeader::ENCODED_LENGTH, full.len() - 1] {
            let mut buf = BytesMut::from(&full[..split]);
            let err = codec.decode_eof(&mut buf).unwrap_err();
            assert!(matches!(err, TransportError::ConnectionClosed));
            assert!(err.is_disconnect());
        }
    }

    #[test]
    fn test_eof_on_frame_boundary() {
        let message = Message::new(7, &b"whole"[..]);
        let mut codec = GameFrameCodec::new();

        let mut buf = encoded(&message);
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some(message));
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_frame_cap() {
        let mut capped = GameFrameCodec::with_max_frame_size(16);
        let mut buf = BytesMut::new();
        buf.put_i32(5);
        buf.put_i32(17);
        assert!(capped.decode(&mut buf).is_err());

        let mut uncapped = GameFrameCodec::new();
        let mut buf = BytesMut::new();
        buf.put_i32(5);
        buf.put_i32(1 << 30);
        assert!(uncapped.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 8);
    }
}
