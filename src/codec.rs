//! Length-prefixed frame codec.
//!
//! Every message on the wire is a fixed-width unsigned length followed by
//! exactly that many payload bytes:
//!
//! ```text
//! +--------------------------+------------------+
//! | Length (1, 2 or 4 bytes) | Payload          |
//! +--------------------------+------------------+
//! ```
//!
//! The width, the byte order of the length field and the inclusive
//! `[min_len, max_len]` payload bounds are fixed when the codec is built and
//! never change for the lifetime of a connection. Lengths are validated
//! before any payload bytes are buffered, so an oversized header is rejected
//! without allocating for it.
//!
//! [`FrameCodec`] implements the `tokio_util` [`Decoder`] and [`Encoder`]
//! traits, so it can be used with `FramedRead`, `FramedWrite` or `Framed`
//! directly.
//!
//! # Example
//!
//! ```
//! use relink::codec::{ByteOrder, FrameCodec, LengthWidth};
//!
//! let codec = FrameCodec::new(LengthWidth::Four, 0, 1024, ByteOrder::Big).unwrap();
//! let frame = codec.encode_frame(b"ping").unwrap();
//! assert_eq!(&frame[..], &[0, 0, 0, 4, b'p', b'i', b'n', b'g']);
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Default maximum payload length in bytes.
pub const DEFAULT_MAX_FRAME_LEN: u32 = 4096;

/// Errors produced while encoding or decoding frames.
#[derive(Error, Debug)]
pub enum FrameError {
    /// Payload is longer than the configured maximum.
    #[error("frame length {len} exceeds maximum {max}")]
    TooLarge {
        /// Length of the offending payload.
        len: usize,
        /// Configured maximum.
        max: u32,
    },

    /// Payload is shorter than the configured minimum.
    #[error("frame length {len} is below minimum {min}")]
    TooSmall {
        /// Length of the offending payload.
        len: usize,
        /// Configured minimum.
        min: u32,
    },

    /// The stream ended part-way through a frame.
    #[error("stream ended mid-frame: expected {expected} bytes, got {received}")]
    Truncated {
        /// Bytes needed to complete the frame (header included).
        expected: usize,
        /// Bytes that were actually buffered.
        received: usize,
    },

    /// The length field width is not one of the supported sizes.
    #[error("unsupported length field width {0}, expected 1, 2 or 4")]
    InvalidWidth(u8),

    /// The payload bounds are unusable (zero maximum or `min > max`).
    #[error("invalid frame bounds: min {min}, max {max}")]
    InvalidBounds {
        /// Requested minimum.
        min: u32,
        /// Requested maximum.
        max: u32,
    },

    /// Underlying socket error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Byte order of the length field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    /// Network order, most significant byte first.
    #[default]
    Big,
    /// Least significant byte first.
    Little,
}

/// Width of the length field in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthWidth {
    /// 1-byte length, payloads up to 255 bytes.
    One,
    /// 2-byte length, payloads up to 65535 bytes.
    Two,
    /// 4-byte length.
    Four,
}

impl LengthWidth {
    /// Number of bytes the length field occupies.
    pub const fn bytes(self) -> usize {
        match self {
            LengthWidth::One => 1,
            LengthWidth::Two => 2,
            LengthWidth::Four => 4,
        }
    }

    /// Largest payload length the field can represent.
    pub const fn capacity(self) -> u32 {
        match self {
            LengthWidth::One => u8::MAX as u32,
            LengthWidth::Two => u16::MAX as u32,
            LengthWidth::Four => u32::MAX,
        }
    }
}

impl TryFrom<u8> for LengthWidth {
    type Error = FrameError;

    fn try_from(width: u8) -> Result<Self, Self::Error> {
        match width {
            1 => Ok(LengthWidth::One),
            2 => Ok(LengthWidth::Two),
            4 => Ok(LengthWidth::Four),
            other => Err(FrameError::InvalidWidth(other)),
        }
    }
}

/// Length-prefixed frame encoder/decoder.
///
/// The codec is `Copy` and carries no stream state of its own; partial
/// frames live in the `BytesMut` buffer owned by the framed reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    width: LengthWidth,
    min_len: u32,
    max_len: u32,
    order: ByteOrder,
}

impl FrameCodec {
    /// Builds a codec with the given length field layout and payload bounds.
    ///
    /// A `max_len` larger than `width` can represent is clamped to the
    /// width's capacity.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::InvalidBounds`] if `max_len` is zero or
    /// `min_len` exceeds the (clamped) maximum.
    pub fn new(
        width: LengthWidth,
        min_len: u32,
        max_len: u32,
        order: ByteOrder,
    ) -> Result<Self, FrameError> {
        if max_len == 0 {
            return Err(FrameError::InvalidBounds {
                min: min_len,
                max: max_len,
            });
        }

        let capacity = width.capacity();
        let clamped = if max_len > capacity {
            tracing::debug!(
                requested = max_len,
                clamped = capacity,
                "max frame length exceeds length field capacity, clamping"
            );
            capacity
        } else {
            max_len
        };

        if min_len > clamped {
            return Err(FrameError::InvalidBounds {
                min: min_len,
                max: clamped,
            });
        }

        Ok(Self {
            width,
            min_len,
            max_len: clamped,
            order,
        })
    }

    /// Length field width.
    pub fn width(&self) -> LengthWidth {
        self.width
    }

    /// Inclusive minimum payload length.
    pub fn min_len(&self) -> u32 {
        self.min_len
    }

    /// Inclusive maximum payload length.
    pub fn max_len(&self) -> u32 {
        self.max_len
    }

    /// Byte order of the length field.
    pub fn byte_order(&self) -> ByteOrder {
        self.order
    }

    /// Checks a payload length against the configured bounds.
    pub fn check_len(&self, len: usize) -> Result<(), FrameError> {
        if len as u64 > u64::from(self.max_len) {
            return Err(FrameError::TooLarge {
                len,
                max: self.max_len,
            });
        }
        if (len as u64) < u64::from(self.min_len) {
            return Err(FrameError::TooSmall {
                len,
                min: self.min_len,
            });
        }
        Ok(())
    }

    /// Encodes one payload into a standalone frame.
    pub fn encode_frame(&self, payload: &[u8]) -> Result<Bytes, FrameError> {
        let mut dst = BytesMut::with_capacity(self.width.bytes() + payload.len());
        self.write_frame(payload, &mut dst)?;
        Ok(dst.freeze())
    }

    fn write_frame(&self, payload: &[u8], dst: &mut BytesMut) -> Result<(), FrameError> {
        self.check_len(payload.len())?;
        dst.reserve(self.width.bytes() + payload.len());
        // check_len guarantees the length fits the field
        let len = payload.len() as u32;
        match (self.width, self.order) {
            (LengthWidth::One, _) => dst.put_u8(len as u8),
            (LengthWidth::Two, ByteOrder::Big) => dst.put_u16(len as u16),
            (LengthWidth::Two, ByteOrder::Little) => dst.put_u16_le(len as u16),
            (LengthWidth::Four, ByteOrder::Big) => dst.put_u32(len),
            (LengthWidth::Four, ByteOrder::Little) => dst.put_u32_le(len),
        }
        dst.extend_from_slice(payload);
        Ok(())
    }

    /// Reads the length field from the front of `src` without consuming it.
    ///
    /// Callers must ensure `src` holds at least `width` bytes.
    fn peek_len(&self, src: &[u8]) -> u32 {
        let mut head = &src[..self.width.bytes()];
        match (self.width, self.order) {
            (LengthWidth::One, _) => u32::from(head.get_u8()),
            (LengthWidth::Two, ByteOrder::Big) => u32::from(head.get_u16()),
            (LengthWidth::Two, ByteOrder::Little) => u32::from(head.get_u16_le()),
            (LengthWidth::Four, ByteOrder::Big) => head.get_u32(),
            (LengthWidth::Four, ByteOrder::Little) => head.get_u32_le(),
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self {
            width: LengthWidth::Two,
            min_len: 0,
            max_len: DEFAULT_MAX_FRAME_LEN,
            order: ByteOrder::Big,
        }
    }
}

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let header = self.width.bytes();
        if src.len() < header {
            src.reserve(header - src.len());
            return Ok(None);
        }

        let len = self.peek_len(src) as usize;
        self.check_len(len)?;

        let total = header + len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(header);
        Ok(Some(src.split_to(len)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if src.is_empty() {
            return Ok(None);
        }

        let header = self.width.bytes();
        let expected = if src.len() < header {
            header
        } else {
            header + self.peek_len(src) as usize
        };
        Err(FrameError::Truncated {
            expected,
            received: src.len(),
        })
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.write_frame(&item, dst)
    }
}

impl<'a> Encoder<&'a [u8]> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: &'a [u8], dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.write_frame(item, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec(width: LengthWidth, min: u32, max: u32, order: ByteOrder) -> FrameCodec {
        FrameCodec::new(width, min, max, order).expect("valid codec")
    }

    #[test]
    fn ping_encodes_with_four_byte_big_endian_header() {
        let c = codec(LengthWidth::Four, 0, 1024, ByteOrder::Big);
        let frame = c.encode_frame(b"ping").unwrap();
        assert_eq!(
            &frame[..],
            &[0x00, 0x00, 0x00, 0x04, 0x70, 0x69, 0x6E, 0x67]
        );

        let mut decoder = c;
        let mut buf = BytesMut::from(&frame[..]);
        let decoded = decoder.decode(&mut buf).unwrap().expect("complete frame");
        assert_eq!(&decoded[..], b"ping");
        assert!(buf.is_empty());
    }

    #[test]
    fn little_endian_header_layout() {
        let c = codec(LengthWidth::Two, 0, 1024, ByteOrder::Little);
        let payload = vec![0xAB; 0x0102];
        let frame = c.encode_frame(&payload).unwrap();
        assert_eq!(&frame[..2], &[0x02, 0x01]);
        assert_eq!(frame.len(), 2 + 0x0102);
    }

    #[test]
    fn round_trip_every_width_and_order() {
        for width in [LengthWidth::One, LengthWidth::Two, LengthWidth::Four] {
            for order in [ByteOrder::Big, ByteOrder::Little] {
                let mut c = codec(width, 0, 200, order);
                let payload: Vec<u8> = (0..200u8).collect();

                let mut buf = BytesMut::new();
                c.encode(&payload[..], &mut buf).unwrap();
                c.encode(Bytes::from_static(b""), &mut buf).unwrap();

                let first = c.decode(&mut buf).unwrap().expect("first frame");
                let second = c.decode(&mut buf).unwrap().expect("empty frame");
                assert_eq!(&first[..], &payload[..], "{:?}/{:?}", width, order);
                assert!(second.is_empty());
                assert!(c.decode(&mut buf).unwrap().is_none());
            }
        }
    }

    #[test]
    fn encode_at_max_succeeds_and_max_plus_one_fails() {
        let c = codec(LengthWidth::Two, 0, 16, ByteOrder::Big);
        assert!(c.encode_frame(&[0u8; 16]).is_ok());

        let err = c.encode_frame(&[0u8; 17]).unwrap_err();
        assert!(matches!(err, FrameError::TooLarge { len: 17, max: 16 }));
    }

    #[test]
    fn encode_below_min_fails() {
        let c = codec(LengthWidth::Two, 4, 16, ByteOrder::Big);
        let err = c.encode_frame(b"abc").unwrap_err();
        assert!(matches!(err, FrameError::TooSmall { len: 3, min: 4 }));
        assert!(c.encode_frame(b"abcd").is_ok());
    }

    #[test]
    fn decode_waits_for_partial_header_and_payload() {
        let mut c = codec(LengthWidth::Four, 0, 64, ByteOrder::Big);
        let mut buf = BytesMut::from(&[0x00, 0x00][..]);
        assert!(c.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&[0x00, 0x03, b'a']);
        assert!(c.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"bc");
        let frame = c.decode(&mut buf).unwrap().expect("complete frame");
        assert_eq!(&frame[..], b"abc");
    }

    #[test]
    fn decode_rejects_oversized_header_before_payload_arrives() {
        let mut c = codec(LengthWidth::Two, 0, 8, ByteOrder::Big);
        let mut buf = BytesMut::from(&[0x00, 0x09][..]);
        let err = c.decode(&mut buf).unwrap_err();
        assert!(matches!(err, FrameError::TooLarge { len: 9, max: 8 }));
    }

    #[test]
    fn decode_rejects_header_below_min() {
        let mut c = codec(LengthWidth::One, 2, 8, ByteOrder::Big);
        let mut buf = BytesMut::from(&[0x01, b'x'][..]);
        let err = c.decode(&mut buf).unwrap_err();
        assert!(matches!(err, FrameError::TooSmall { len: 1, min: 2 }));
    }

    #[test]
    fn eof_mid_frame_is_truncated() {
        let mut c = codec(LengthWidth::Two, 0, 64, ByteOrder::Big);

        let mut buf = BytesMut::from(&[0x00, 0x05, b'a', b'b'][..]);
        let err = c.decode_eof(&mut buf).unwrap_err();
        assert!(matches!(
            err,
            FrameError::Truncated {
                expected: 7,
                received: 4
            }
        ));

        let mut header_only = BytesMut::from(&[0x00][..]);
        let err = c.decode_eof(&mut header_only).unwrap_err();
        assert!(matches!(
            err,
            FrameError::Truncated {
                expected: 2,
                received: 1
            }
        ));

        let mut empty = BytesMut::new();
        assert!(c.decode_eof(&mut empty).unwrap().is_none());
    }

    #[test]
    fn max_is_clamped_to_width_capacity() {
        let c = codec(LengthWidth::One, 0, 4096, ByteOrder::Big);
        assert_eq!(c.max_len(), 255);
        assert!(c.encode_frame(&[0u8; 255]).is_ok());
        assert!(matches!(
            c.encode_frame(&[0u8; 256]),
            Err(FrameError::TooLarge { len: 256, max: 255 })
        ));
    }

    #[test]
    fn invalid_construction_is_rejected() {
        assert!(matches!(
            LengthWidth::try_from(0),
            Err(FrameError::InvalidWidth(0))
        ));
        assert!(matches!(
            LengthWidth::try_from(3),
            Err(FrameError::InvalidWidth(3))
        ));
        assert!(matches!(
            FrameCodec::new(LengthWidth::Two, 0, 0, ByteOrder::Big),
            Err(FrameError::InvalidBounds { min: 0, max: 0 })
        ));
        assert!(matches!(
            FrameCodec::new(LengthWidth::Two, 10, 5, ByteOrder::Big),
            Err(FrameError::InvalidBounds { min: 10, max: 5 })
        ));
        // min only becomes invalid after the maximum is clamped
        assert!(matches!(
            FrameCodec::new(LengthWidth::One, 300, 1000, ByteOrder::Big),
            Err(FrameError::InvalidBounds { min: 300, max: 255 })
        ));
    }

    #[test]
    fn default_codec_uses_two_byte_big_endian() {
        let c = FrameCodec::default();
        assert_eq!(c.width(), LengthWidth::Two);
        assert_eq!(c.byte_order(), ByteOrder::Big);
        assert_eq!(c.min_len(), 0);
        assert_eq!(c.max_len(), DEFAULT_MAX_FRAME_LEN);
    }
}
