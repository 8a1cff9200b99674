//! Request and response header blocks.
//!
//! Header blocks are MessagePack maps (`rmp_serde::to_vec_named`, so field
//! names survive on the wire). Optional fields are omitted entirely when
//! absent rather than encoded as nil.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::notification::Notification;

/// Path prefix for device-addressed requests; the destination token is
/// appended directly.
pub const DEVICE_PATH_PREFIX: &str = "/3/device/";

/// The one request method the gateway accepts.
pub const METHOD_POST: &str = "POST";

/// Status code meaning the notification was accepted.
pub const STATUS_OK: u16 = 200;

/// Header block of an outbound notification request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestHead {
    /// Request method, always [`METHOD_POST`].
    pub method: String,
    /// Device path derived from the destination token.
    pub path: String,
    /// Expiration as whole seconds since the epoch; 0 when unset.
    pub expiration: i64,
    /// Delivery priority code; omitted when the notification carries no
    /// explicit priority.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
    /// Topic; omitted when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}

impl RequestHead {
    /// Build the header block for a notification.
    pub fn for_notification(notification: &Notification) -> Self {
        Self {
            method: METHOD_POST.to_string(),
            path: format!("{}{}", DEVICE_PATH_PREFIX, notification.token()),
            expiration: notification.expiration_epoch_seconds(),
            priority: notification.priority().map(|p| p.code()),
            topic: notification.topic().map(str::to_string),
        }
    }

    /// Encode to MessagePack bytes.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        rmp_serde::to_vec_named(self).map_err(|e| ProtocolError::MalformedBlock(e.to_string()))
    }

    /// Decode from MessagePack bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        rmp_serde::from_slice(bytes).map_err(|e| ProtocolError::MalformedBlock(e.to_string()))
    }
}

/// Header block of an inbound response.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResponseHead {
    /// Response status code.
    pub status: u16,
}

impl ResponseHead {
    /// Whether the status reports acceptance.
    pub fn is_success(&self) -> bool {
        self.status == STATUS_OK
    }

    /// Encode to MessagePack bytes.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        rmp_serde::to_vec_named(self).map_err(|e| ProtocolError::MalformedBlock(e.to_string()))
    }

    /// Decode from MessagePack bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        rmp_serde::from_slice(bytes).map_err(|e| ProtocolError::MalformedBlock(e.to_string()))
    }
}
