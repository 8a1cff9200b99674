//! Frame struct with typed accessors.
//!
//! Represents a complete protocol frame with header and payload.
//! Uses `bytes::Bytes` for zero-copy payload sharing.

use bytes::Bytes;

use super::wire_format::{kind, FrameHeader, FRAME_HEADER_SIZE};

/// A complete protocol frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Decoded header.
    pub header: FrameHeader,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from header and payload.
    pub fn new(header: FrameHeader, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get the stream id.
    #[inline]
    pub fn stream_id(&self) -> u32 {
        self.header.stream_id
    }

    /// Get the frame kind.
    #[inline]
    pub fn kind(&self) -> u8 {
        self.header.kind
    }

    /// Check if this is a header-block frame.
    #[inline]
    pub fn is_headers(&self) -> bool {
        self.header.kind == kind::HEADERS
    }

    /// Check if this is a body frame.
    #[inline]
    pub fn is_data(&self) -> bool {
        self.header.kind == kind::DATA
    }

    /// Check if this is a keepalive frame.
    #[inline]
    pub fn is_ping(&self) -> bool {
        self.header.kind == kind::PING
    }

    /// Check if this is a shutdown notice.
    #[inline]
    pub fn is_goaway(&self) -> bool {
        self.header.kind == kind::GOAWAY
    }

    /// Check if this frame terminates its message exchange.
    #[inline]
    pub fn is_end_message(&self) -> bool {
        self.header.is_end_message()
    }

    /// Check if this frame is an acknowledgment.
    #[inline]
    pub fn is_ack(&self) -> bool {
        self.header.is_ack()
    }
}

/// Build a complete frame as a single byte vector.
///
/// Encodes the header and appends the payload into a contiguous buffer.
pub fn build_frame(header: &FrameHeader, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    buf
}
