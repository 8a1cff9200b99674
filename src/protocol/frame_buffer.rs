//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented frames:
//! - `WaitingForHeader`: need at least 10 bytes
//! - `WaitingForPayload`: header parsed, need N more payload bytes
//!
//! Header validation happens as soon as a header is complete, so a
//! malformed frame surfaces before its payload is buffered.

use bytes::{Bytes, BytesMut};

use super::wire_format::{FrameHeader, DEFAULT_MAX_PAYLOAD_SIZE, FRAME_HEADER_SIZE};
use super::Frame;
use crate::error::ProtocolError;

/// State machine for frame parsing.
#[derive(Debug, Clone)]
enum State {
    /// Waiting for a complete header (need 10 bytes).
    WaitingForHeader,
    /// Header parsed, waiting for payload bytes.
    WaitingForPayload { header: FrameHeader, remaining: u32 },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
///
/// All data is stored in a single `BytesMut` buffer to minimize
/// allocations; payloads are handed out as zero-copy `freeze` slices.
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed payload size.
    max_payload_size: u32,
}

impl FrameBuffer {
    /// Create a new frame buffer with default settings.
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Create a new frame buffer with a custom max payload size.
    pub fn with_max_payload(max_payload_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(16 * 1024),
            state: State::WaitingForHeader,
            max_payload_size,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Returns a vector of complete frames; fragmented tails stay buffered
    /// for the next push.
    ///
    /// # Errors
    ///
    /// Returns an error when a header fails validation (unknown kind,
    /// oversized payload, reserved flags, bad stream id).
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>, ProtocolError> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Try to extract a single frame from the buffer.
    fn try_extract_one(&mut self) -> Result<Option<Frame>, ProtocolError> {
        match &self.state {
            State::WaitingForHeader => {
                if self.buffer.len() < FRAME_HEADER_SIZE {
                    return Ok(None);
                }

                let header = FrameHeader::decode(&self.buffer[..FRAME_HEADER_SIZE])
                    .expect("buffer has enough bytes");
                header.validate(self.max_payload_size)?;

                let _ = self.buffer.split_to(FRAME_HEADER_SIZE);

                if header.payload_length == 0 {
                    return Ok(Some(Frame::new(header, Bytes::new())));
                }

                self.state = State::WaitingForPayload {
                    header,
                    remaining: header.payload_length,
                };
                self.try_extract_one()
            }

            State::WaitingForPayload { header, remaining } => {
                let remaining = *remaining as usize;
                if self.buffer.len() < remaining {
                    return Ok(None);
                }

                let payload = self.buffer.split_to(remaining).freeze();
                let header = *header;
                self.state = State::WaitingForHeader;
                Ok(Some(Frame::new(header, payload)))
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForHeader;
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
