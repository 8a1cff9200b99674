//! Protocol module - wire format, framing, and frame types.
//!
//! This module implements the binary framing spoken over the TLS stream:
//! - 10-byte frame header encoding/decoding
//! - Frame buffer for accumulating partial reads
//! - Frame struct with typed accessors

mod frame;
mod frame_buffer;
mod wire_format;

pub use frame::{build_frame, Frame};
pub use frame_buffer::FrameBuffer;
pub use wire_format::{
    flags, kind, FrameHeader, CONNECTION_STREAM_ID, DEFAULT_MAX_PAYLOAD_SIZE,
    FIRST_CLIENT_STREAM_ID, FRAME_HEADER_SIZE, PING_PAYLOAD_SIZE, STREAM_ID_REFUSE_THRESHOLD,
};
