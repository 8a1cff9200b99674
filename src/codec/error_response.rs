//! The gateway's `{reason, timestamp}` structure.
//!
//! Carried as JSON in the terminal DATA frame of a rejected notification
//! and as the debug payload of a GOAWAY notice. The timestamp is integer
//! milliseconds since the epoch, or null.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Rejection reason and optional token-invalidation timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable reason string.
    #[serde(default)]
    pub reason: Option<String>,
    /// Milliseconds since the epoch at which the destination token became
    /// invalid, when the gateway knows.
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl ErrorResponse {
    /// Decode from a JSON body.
    pub fn from_json(bytes: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::MalformedBlock(e.to_string()))
    }

    /// Encode to a JSON body.
    pub fn to_json(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_else(|_| b"{}".to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_timestamp() {
        let decoded =
            ErrorResponse::from_json(br#"{"reason":"BadDeviceToken","timestamp":null}"#).unwrap();
        assert_eq!(decoded.reason.as_deref(), Some("BadDeviceToken"));
        assert_eq!(decoded.timestamp, None);
    }

    #[test]
    fn test_millisecond_timestamp() {
        let decoded =
            ErrorResponse::from_json(br#"{"reason":"Unregistered","timestamp":1672531200000}"#)
                .unwrap();
        assert_eq!(decoded.reason.as_deref(), Some("Unregistered"));
        assert_eq!(decoded.timestamp, Some(1_672_531_200_000));
    }

    #[test]
    fn test_missing_fields_tolerated() {
        let decoded = ErrorResponse::from_json(b"{}").unwrap();
        assert_eq!(decoded.reason, None);
        assert_eq!(decoded.timestamp, None);
    }

    #[test]
    fn test_json_roundtrip() {
        let original = ErrorResponse {
            reason: Some("Shutdown".to_string()),
            timestamp: Some(1_500_000_000_000),
        };
        let decoded = ErrorResponse::from_json(&original.to_json()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_invalid_json_is_error() {
        assert!(ErrorResponse::from_json(b"not json").is_err());
    }
}
