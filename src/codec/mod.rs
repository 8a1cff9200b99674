//! Codec module - header blocks and response bodies.
//!
//! Two encodings cross the wire:
//!
//! - [`RequestHead`] / [`ResponseHead`] - MessagePack maps carried in
//!   HEADERS frames. **Always `to_vec_named`**: struct-as-map keeps the
//!   field names on the wire, which is what the gateway decodes.
//! - [`ErrorResponse`] - the JSON `{reason, timestamp}` structure carried
//!   in terminal DATA frames of rejected notifications and in GOAWAY debug
//!   payloads.
//!
//! The notification payload itself is opaque and passes through untouched.

mod error_response;
mod head;

pub use error_response::ErrorResponse;
pub use head::{RequestHead, ResponseHead, DEVICE_PATH_PREFIX, METHOD_POST, STATUS_OK};
