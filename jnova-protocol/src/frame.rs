//! Framing strategies.
//!
//! Two framings are supported, selected per use site rather than negotiated:
//!
//! ```text
//! Delimiter:       | payload ...          | 0x0A |
//!
//! LengthPrefixed:  | payload_len | payload            |
//!                  |   4 bytes   | payload_len bytes  |
//!                  |  (u32 BE)   |                    |
//! ```
//!
//! Both variants carry a maximum frame size. A declared length (or an
//! unterminated delimiter frame) above the bound is rejected before the
//! payload is buffered in full.

use crate::error::ProtocolError;
use crate::{DELIMITER, LENGTH_PREFIX_SIZE, MAX_FRAME_SIZE};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

/// A framing strategy for one logical message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Payload followed by a single terminator byte.
    Delimiter { delimiter: u8, max_len: u32 },
    /// 4-byte big-endian payload length followed by the payload.
    LengthPrefixed { max_len: u32 },
}

impl Framing {
    /// Newline-delimited framing with the default size bound.
    pub fn line() -> Self {
        Framing::Delimiter {
            delimiter: DELIMITER,
            max_len: MAX_FRAME_SIZE,
        }
    }

    /// Length-prefixed framing with the default size bound.
    pub fn length_prefixed() -> Self {
        Framing::LengthPrefixed {
            max_len: MAX_FRAME_SIZE,
        }
    }

    /// Returns a copy of this framing with a different payload bound.
    pub fn with_max_len(self, max_len: u32) -> Self {
        match self {
            Framing::Delimiter { delimiter, .. } => Framing::Delimiter { delimiter, max_len },
            Framing::LengthPrefixed { .. } => Framing::LengthPrefixed { max_len },
        }
    }

    /// Maximum payload size accepted by this framing.
    pub fn max_len(&self) -> u32 {
        match self {
            Framing::Delimiter { max_len, .. } | Framing::LengthPrefixed { max_len } => *max_len,
        }
    }

    /// Encodes a payload into a single frame.
    pub fn encode(&self, payload: &[u8]) -> Result<BytesMut, ProtocolError> {
        let max = self.max_len();
        if payload.len() as u64 > max as u64 {
            return Err(ProtocolError::FrameTooLarge {
                size: payload.len() as u64,
                max,
            });
        }

        match *self {
            Framing::Delimiter { delimiter, .. } => {
                if let Some(offset) = payload.iter().position(|&b| b == delimiter) {
                    return Err(ProtocolError::DelimiterInPayload { delimiter, offset });
                }
                let mut buf = BytesMut::with_capacity(payload.len() + 1);
                buf.put_slice(payload);
                buf.put_u8(delimiter);
                Ok(buf)
            }
            Framing::LengthPrefixed { .. } => {
                let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
                buf.put_u32(payload.len() as u32);
                buf.put_slice(payload);
                Ok(buf)
            }
        }
    }

    /// Decodes one frame from the front of `buf`.
    ///
    /// Returns `Ok(Some(payload))` and consumes the frame if it is complete,
    /// `Ok(None)` if more data is needed (nothing is consumed), or `Err` if the
    /// frame exceeds the size bound.
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<Bytes>, ProtocolError> {
        self.decode_from(buf, &mut 0)
    }

    /// Like [`decode`](Self::decode), but resumes the delimiter search at
    /// `scanned` instead of the start of `buf`.
    ///
    /// `scanned` is the number of leading bytes already known not to hold the
    /// delimiter. It is advanced to the end of `buf` when no frame completes
    /// and reset to zero once a frame is split off, so a caller that keeps it
    /// between reads scans each byte once.
    pub fn decode_from(
        &self,
        buf: &mut BytesMut,
        scanned: &mut usize,
    ) -> Result<Option<Bytes>, ProtocolError> {
        match *self {
            Framing::Delimiter { delimiter, max_len } => {
                let start = (*scanned).min(buf.len());
                match buf[start..].iter().position(|&b| b == delimiter) {
                    Some(offset) => {
                        let pos = start + offset;
                        *scanned = 0;
                        if pos as u64 > max_len as u64 {
                            return Err(ProtocolError::FrameTooLarge {
                                size: pos as u64,
                                max: max_len,
                            });
                        }
                        let mut frame = buf.split_to(pos + 1);
                        frame.truncate(pos);
                        Ok(Some(frame.freeze()))
                    }
                    None => {
                        *scanned = buf.len();
                        if buf.len() as u64 > max_len as u64 {
                            return Err(ProtocolError::FrameTooLarge {
                                size: buf.len() as u64,
                                max: max_len,
                            });
                        }
                        Ok(None)
                    }
                }
            }
            Framing::LengthPrefixed { max_len } => {
                if buf.len() < LENGTH_PREFIX_SIZE {
                    return Ok(None);
                }

                let payload_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
                if payload_len > max_len {
                    return Err(ProtocolError::FrameTooLarge {
                        size: payload_len as u64,
                        max: max_len,
                    });
                }

                let total_len = LENGTH_PREFIX_SIZE + payload_len as usize;
                if buf.len() < total_len {
                    return Ok(None);
                }

                buf.advance(LENGTH_PREFIX_SIZE);
                Ok(Some(buf.split_to(payload_len as usize).freeze()))
            }
        }
    }

    /// Number of bytes that must still arrive before the next frame in `buf`
    /// can possibly complete.
    ///
    /// Never zero while `decode` returns `Ok(None)`. Reading at most this many
    /// bytes never crosses a frame boundary.
    pub fn needed(&self, buf: &[u8]) -> usize {
        match self {
            Framing::Delimiter { .. } => 1,
            Framing::LengthPrefixed { .. } => {
                if buf.len() < LENGTH_PREFIX_SIZE {
                    return LENGTH_PREFIX_SIZE - buf.len();
                }
                let payload_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
                (LENGTH_PREFIX_SIZE + payload_len)
                    .saturating_sub(buf.len())
                    .max(1)
            }
        }
    }
}

impl Default for Framing {
    fn default() -> Self {
        Self::line()
    }
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Framing::Delimiter { delimiter, .. } => write!(f, "delimiter({:#04x})", delimiter),
            Framing::LengthPrefixed { .. } => write!(f, "length-prefixed(u32 BE)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_delimiter_encode() {
        let encoded = Framing::line().encode(b"PING").unwrap();
        assert_eq!(&encoded[..], b"PING\n");
    }

    #[test]
    fn test_delimiter_rejects_embedded_delimiter() {
        let result = Framing::line().encode(b"PI\nNG");
        assert!(matches!(
            result,
            Err(ProtocolError::DelimiterInPayload { offset: 2, .. })
        ));
    }

    #[test]
    fn test_delimiter_partial_then_complete() {
        let framing = Framing::line();
        let mut buf = BytesMut::from(&b"PI"[..]);
        assert!(framing.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 2);

        buf.extend_from_slice(b"NG\nrest");
        let frame = framing.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&frame[..], b"PING");
        assert_eq!(&buf[..], b"rest");
    }

    #[test]
    fn test_decode_from_resumes_search() {
        let framing = Framing::line();
        let mut scanned = 0;
        let mut buf = BytesMut::from(&b"abc"[..]);
        assert!(framing.decode_from(&mut buf, &mut scanned).unwrap().is_none());
        assert_eq!(scanned, 3);

        buf.extend_from_slice(b"de\nfg");
        let frame = framing.decode_from(&mut buf, &mut scanned).unwrap().unwrap();
        assert_eq!(&frame[..], b"abcde");
        assert_eq!(scanned, 0);
        assert_eq!(&buf[..], b"fg");
    }

    #[test]
    fn test_decode_from_skips_scanned_prefix() {
        // Bytes before `scanned` are trusted to hold no delimiter
        let framing = Framing::line();
        let mut scanned = 2;
        let mut buf = BytesMut::from(&b"a\nb\nc"[..]);
        let frame = framing.decode_from(&mut buf, &mut scanned).unwrap().unwrap();
        assert_eq!(&frame[..], b"a\nb");
        assert_eq!(&buf[..], b"c");
    }

    #[test]
    fn test_decode_from_clamps_stale_offset() {
        let framing = Framing::line();
        let mut scanned = 100;
        let mut buf = BytesMut::from(&b"x"[..]);
        assert!(framing.decode_from(&mut buf, &mut scanned).unwrap().is_none());
        assert_eq!(scanned, 1);
    }

    #[test]
    fn test_delimiter_empty_frame() {
        let mut buf = BytesMut::from(&b"\n"[..]);
        let frame = Framing::line().decode(&mut buf).unwrap().unwrap();
        assert!(frame.is_empty());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_delimiter_too_large() {
        let framing = Framing::line().with_max_len(4);
        let mut buf = BytesMut::from(&b"abcdef"[..]);
        let result = framing.decode(&mut buf);
        assert!(matches!(
            result,
            Err(ProtocolError::FrameTooLarge { size: 6, max: 4 })
        ));
    }

    #[test]
    fn test_length_prefixed_ping() {
        let encoded = Framing::length_prefixed().encode(b"PING\n").unwrap();
        assert_eq!(&encoded[..4], &[0, 0, 0, 5]);
        assert_eq!(&encoded[4..], b"PING\n");

        let mut buf = encoded;
        let frame = Framing::length_prefixed().decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.len(), 5);
        assert_eq!(&frame[..], b"PING\n");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_length_prefixed_incomplete_header() {
        let framing = Framing::length_prefixed();
        let mut buf = BytesMut::from(&[0u8, 0][..]);
        assert!(framing.decode(&mut buf).unwrap().is_none());
        assert_eq!(framing.needed(&buf), 2);
    }

    #[test]
    fn test_length_prefixed_incomplete_payload() {
        let framing = Framing::length_prefixed();
        let mut buf = BytesMut::from(&b"\x00\x00\x00\x05PI"[..]);
        assert!(framing.decode(&mut buf).unwrap().is_none());
        assert_eq!(framing.needed(&buf), 3);
        // Nothing consumed while incomplete
        assert_eq!(buf.len(), 6);
    }

    #[test]
    fn test_length_prefixed_no_over_read() {
        let framing = Framing::length_prefixed();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&framing.encode(b"one").unwrap());
        buf.extend_from_slice(&framing.encode(b"two\ntwo").unwrap());

        let first = framing.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&first[..], b"one");

        let second = framing.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&second[..], b"two\ntwo");
        assert!(framing.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_length_prefixed_declared_too_large() {
        let framing = Framing::length_prefixed().with_max_len(1024);
        let mut buf = BytesMut::from(&b"\xFF\xFF\xFF\xFF"[..]);
        let result = framing.decode(&mut buf);
        assert!(matches!(
            result,
            Err(ProtocolError::FrameTooLarge {
                size: 0xFFFF_FFFF,
                max: 1024
            })
        ));
    }

    #[test]
    fn test_encode_too_large() {
        let framing = Framing::length_prefixed().with_max_len(3);
        let result = framing.encode(b"PING");
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_needed_delimiter() {
        assert_eq!(Framing::line().needed(b""), 1);
        assert_eq!(Framing::line().needed(b"partial"), 1);
    }

    #[test]
    fn test_display() {
        assert_eq!(Framing::line().to_string(), "delimiter(0x0a)");
        assert!(Framing::length_prefixed().to_string().contains("length"));
    }

    proptest! {
        #[test]
        fn prop_delimiter_roundtrip(payload in prop::collection::vec(any::<u8>().prop_filter("no newline", |b| *b != b'\n'), 0..512)) {
            let framing = Framing::line();
            let mut buf = framing.encode(&payload).unwrap();
            let frame = framing.decode(&mut buf).unwrap().unwrap();
            prop_assert_eq!(&frame[..], &payload[..]);
            prop_assert!(buf.is_empty());
        }

        #[test]
        fn prop_length_prefixed_roundtrip(payload in prop::collection::vec(any::<u8>(), 0..2048)) {
            let framing = Framing::length_prefixed();
            let mut buf = framing.encode(&payload).unwrap();
            let declared = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
            prop_assert_eq!(declared as usize, payload.len());

            let frame = framing.decode(&mut buf).unwrap().unwrap();
            prop_assert_eq!(&frame[..], &payload[..]);
            prop_assert!(buf.is_empty());
        }

        #[test]
        fn prop_length_prefixed_byte_at_a_time(payload in prop::collection::vec(any::<u8>(), 0..256)) {
            let framing = Framing::length_prefixed();
            let encoded = framing.encode(&payload).unwrap();

            let mut buf = BytesMut::new();
            let mut decoded = None;
            for (i, byte) in encoded.iter().enumerate() {
                prop_assert!(decoded.is_none());
                prop_assert!(framing.needed(&buf) <= encoded.len() - i);
                buf.put_u8(*byte);
                decoded = framing.decode(&mut buf).unwrap();
            }
            prop_assert_eq!(&decoded.unwrap()[..], &payload[..]);
        }
    }
}
