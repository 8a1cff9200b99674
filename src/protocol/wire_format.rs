//! Wire format encoding and decoding.
//!
//! Implements the 10-byte frame header:
//! ```text
//! ┌───────────┬───────┬───────┬──────────┐
//! │ Stream ID │ Kind  │ Flags │ Length   │
//! │ 4 bytes   │ 1 byte│ 1 byte│ 4 bytes  │
//! │ uint32 BE │       │       │ uint32 BE│
//! └───────────┴───────┴───────┴──────────┘
//! ```
//!
//! All multi-byte integers are Big Endian. Client-initiated streams carry
//! strictly increasing odd ids starting at 1; stream id 0 is reserved for
//! connection-level frames (PING, GOAWAY).

use crate::error::ProtocolError;

/// Frame header size in bytes (fixed, exactly 10).
pub const FRAME_HEADER_SIZE: usize = 10;

/// Default maximum payload size (1 MB). Notification bodies are small;
/// response bodies are tiny.
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 1_048_576;

/// Stream id reserved for connection-level frames.
pub const CONNECTION_STREAM_ID: u32 = 0;

/// First stream id a client allocates.
pub const FIRST_CLIENT_STREAM_ID: u32 = 1;

/// Ids at or above this threshold are never allocated; the connection is
/// proactively closed first so the id space cannot be exhausted.
pub const STREAM_ID_REFUSE_THRESHOLD: u32 = i32::MAX as u32 - 1;

/// Exact payload length of a PING frame.
pub const PING_PAYLOAD_SIZE: usize = 8;

/// Frame kinds carried in the header's kind byte.
pub mod kind {
    /// Header block opening (or, with END_MESSAGE, completing) a response.
    pub const HEADERS: u8 = 0x01;
    /// Body bytes; END_MESSAGE marks the terminal frame of the exchange.
    pub const DATA: u8 = 0x02;
    /// Keepalive probe / acknowledgment (stream id 0).
    pub const PING: u8 = 0x03;
    /// Peer-initiated connection shutdown notice (stream id 0).
    pub const GOAWAY: u8 = 0x04;

    /// Check whether a kind byte is one the protocol defines.
    #[inline]
    pub fn is_known(kind: u8) -> bool {
        matches!(kind, HEADERS | DATA | PING | GOAWAY)
    }
}

/// Flag constants for the protocol.
pub mod flags {
    /// Terminal frame of a message exchange.
    pub const END_MESSAGE: u8 = 0b0000_0001;
    /// Acknowledgment (PING replies).
    pub const ACK: u8 = 0b0000_0010;

    /// Reserved bits mask (bits 2-7).
    pub const RESERVED_MASK: u8 = 0b1111_1100;

    /// Check if a specific flag is set.
    #[inline]
    pub fn has_flag(flags: u8, flag: u8) -> bool {
        flags & flag != 0
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Stream identifier (0 = connection-level).
    pub stream_id: u32,
    /// Frame kind (see [`kind`]).
    pub kind: u8,
    /// Flags byte (see [`flags`]).
    pub flags: u8,
    /// Payload length in bytes.
    pub payload_length: u32,
}

impl FrameHeader {
    /// Create a new frame header.
    pub fn new(stream_id: u32, kind: u8, flags: u8, payload_length: u32) -> Self {
        Self {
            stream_id,
            kind,
            flags,
            payload_length,
        }
    }

    /// Encode the header to bytes (Big Endian).
    pub fn encode(&self) -> [u8; FRAME_HEADER_SIZE] {
        let mut buf = [0u8; FRAME_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.stream_id.to_be_bytes());
        buf[4] = self.kind;
        buf[5] = self.flags;
        buf[6..10].copy_from_slice(&self.payload_length.to_be_bytes());
        buf
    }

    /// Decode a header from bytes (Big Endian).
    ///
    /// Returns `None` if the buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < FRAME_HEADER_SIZE {
            return None;
        }
        Some(Self {
            stream_id: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            kind: buf[4],
            flags: buf[5],
            payload_length: u32::from_be_bytes([buf[6], buf[7], buf[8], buf[9]]),
        })
    }

    /// Validate the header for protocol compliance.
    ///
    /// Checks:
    /// - The kind byte is known
    /// - Payload length does not exceed the maximum
    /// - Reserved flag bits are 0
    /// - Stream semantics: HEADERS/DATA need an odd nonzero id, PING and
    ///   GOAWAY are connection-level (id 0), PING payloads are 8 bytes
    pub fn validate(&self, max_payload_size: u32) -> Result<(), ProtocolError> {
        if !kind::is_known(self.kind) {
            return Err(ProtocolError::UnknownFrameKind(self.kind));
        }

        if self.payload_length > max_payload_size {
            return Err(ProtocolError::PayloadTooLarge {
                length: self.payload_length,
                max: max_payload_size,
            });
        }

        if self.flags & flags::RESERVED_MASK != 0 {
            return Err(ProtocolError::ReservedFlagBits);
        }

        match self.kind {
            kind::HEADERS | kind::DATA => {
                if self.stream_id == CONNECTION_STREAM_ID || self.stream_id % 2 == 0 {
                    return Err(ProtocolError::InvalidStreamId {
                        stream_id: self.stream_id,
                        kind: self.kind,
                    });
                }
            }
            kind::PING => {
                if self.stream_id != CONNECTION_STREAM_ID {
                    return Err(ProtocolError::InvalidStreamId {
                        stream_id: self.stream_id,
                        kind: self.kind,
                    });
                }
                if self.payload_length as usize != PING_PAYLOAD_SIZE {
                    return Err(ProtocolError::MalformedBlock(format!(
                        "PING payload must be {} bytes, got {}",
                        PING_PAYLOAD_SIZE, self.payload_length
                    )));
                }
            }
            kind::GOAWAY => {
                if self.stream_id != CONNECTION_STREAM_ID {
                    return Err(ProtocolError::InvalidStreamId {
                        stream_id: self.stream_id,
                        kind: self.kind,
                    });
                }
            }
            _ => unreachable!("kind checked above"),
        }

        Ok(())
    }

    /// Check if this frame terminates its message exchange.
    #[inline]
    pub fn is_end_message(&self) -> bool {
        flags::has_flag(self.flags, flags::END_MESSAGE)
    }

    /// Check if this frame is an acknowledgment.
    #[inline]
    pub fn is_ack(&self) -> bool {
        flags::has_flag(self.flags, flags::ACK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode_decode_roundtrip() {
        let original = FrameHeader::new(7, kind::HEADERS, flags::END_MESSAGE, 100);
        let encoded = original.encode();
        let decoded = FrameHeader::decode(&encoded).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_header_big_endian_byte_order() {
        let header = FrameHeader::new(0x01020304, 0x02, 0x01, 0x05060708);
        let bytes = header.encode();

        assert_eq!(&bytes[0..4], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(bytes[4], 0x02);
        assert_eq!(bytes[5], 0x01);
        assert_eq!(&bytes[6..10], &[0x05, 0x06, 0x07, 0x08]);
    }

    #[test]
    fn test_header_size_is_exactly_10() {
        assert_eq!(FRAME_HEADER_SIZE, 10);
        let header = FrameHeader::new(1, kind::DATA, 0, 0);
        assert_eq!(header.encode().len(), 10);
    }

    #[test]
    fn test_decode_too_short_buffer() {
        let buf = [0u8; 9];
        assert!(FrameHeader::decode(&buf).is_none());
    }

    #[test]
    fn test_validate_unknown_kind_rejected() {
        let header = FrameHeader::new(1, 0x7F, 0, 0);
        assert!(matches!(
            header.validate(DEFAULT_MAX_PAYLOAD_SIZE),
            Err(ProtocolError::UnknownFrameKind(0x7F))
        ));
    }

    #[test]
    fn test_validate_payload_too_large() {
        let header = FrameHeader::new(1, kind::DATA, 0, 1_000_000);
        assert!(matches!(
            header.validate(100),
            Err(ProtocolError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_validate_reserved_bits_must_be_zero() {
        let header = FrameHeader::new(1, kind::DATA, 0b1000_0000, 0);
        assert!(matches!(
            header.validate(DEFAULT_MAX_PAYLOAD_SIZE),
            Err(ProtocolError::ReservedFlagBits)
        ));
    }

    #[test]
    fn test_validate_stream_semantics() {
        // Even stream id on HEADERS is a violation.
        let header = FrameHeader::new(2, kind::HEADERS, 0, 0);
        assert!(header.validate(DEFAULT_MAX_PAYLOAD_SIZE).is_err());

        // Stream id 0 on DATA is a violation.
        let header = FrameHeader::new(0, kind::DATA, 0, 0);
        assert!(header.validate(DEFAULT_MAX_PAYLOAD_SIZE).is_err());

        // PING must sit on stream 0 with an 8-byte payload.
        let header = FrameHeader::new(0, kind::PING, flags::ACK, 8);
        assert!(header.validate(DEFAULT_MAX_PAYLOAD_SIZE).is_ok());
        let header = FrameHeader::new(1, kind::PING, 0, 8);
        assert!(header.validate(DEFAULT_MAX_PAYLOAD_SIZE).is_err());
        let header = FrameHeader::new(0, kind::PING, 0, 4);
        assert!(header.validate(DEFAULT_MAX_PAYLOAD_SIZE).is_err());

        // GOAWAY is connection-level.
        let header = FrameHeader::new(0, kind::GOAWAY, 0, 32);
        assert!(header.validate(DEFAULT_MAX_PAYLOAD_SIZE).is_ok());
        let header = FrameHeader::new(3, kind::GOAWAY, 0, 32);
        assert!(header.validate(DEFAULT_MAX_PAYLOAD_SIZE).is_err());
    }

    #[test]
    fn test_flag_accessors() {
        let header = FrameHeader::new(1, kind::DATA, flags::END_MESSAGE, 0);
        assert!(header.is_end_message());
        assert!(!header.is_ack());

        let header = FrameHeader::new(0, kind::PING, flags::ACK, 8);
        assert!(header.is_ack());
        assert!(!header.is_end_message());
    }
}
