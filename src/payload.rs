//! Payload builder producing the opaque notification body.
//!
//! The connection and codec layers treat the payload as uninterpreted
//! bytes; this builder exists so callers can assemble the conventional
//! `aps` dictionary without hand-writing JSON.
//!
//! # Example
//!
//! ```
//! use pushwire_client::PayloadBuilder;
//!
//! let payload = PayloadBuilder::new()
//!     .alert_body("hi")
//!     .badge(1)
//!     .sound_default()
//!     .build();
//! ```

use bytes::Bytes;
use serde_json::{json, Map, Value};

/// Fluent builder for the notification payload.
#[derive(Debug, Default)]
pub struct PayloadBuilder {
    aps: Map<String, Value>,
    alert: Map<String, Value>,
    fields: Map<String, Value>,
}

impl PayloadBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the alert body text shown to the user.
    pub fn alert_body(mut self, body: impl Into<String>) -> Self {
        self.alert.insert("body".to_string(), json!(body.into()));
        self
    }

    /// Set the badge number displayed next to the application icon.
    /// A badge of 0 clears the indicator.
    pub fn badge(mut self, badge: i64) -> Self {
        self.aps.insert("badge".to_string(), json!(badge));
        self
    }

    /// Play the default notification sound.
    pub fn sound_default(self) -> Self {
        self.sound("default")
    }

    /// Play the named notification sound.
    pub fn sound(mut self, sound: impl Into<String>) -> Self {
        self.aps.insert("sound".to_string(), json!(sound.into()));
        self
    }

    /// Add a custom top-level field.
    pub fn field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Serialize the payload to JSON bytes.
    pub fn build(self) -> Bytes {
        let mut root = Map::new();
        let mut aps = self.aps;

        // A lone body collapses to the simple string form.
        if !self.alert.is_empty() {
            if self.alert.len() == 1 && self.alert.contains_key("body") {
                aps.insert("alert".to_string(), self.alert["body"].clone());
            } else {
                aps.insert("alert".to_string(), Value::Object(self.alert));
            }
        }

        root.insert("aps".to_string(), Value::Object(aps));
        for (key, value) in self.fields {
            root.insert(key, value);
        }

        let encoded = serde_json::to_vec(&Value::Object(root))
            .unwrap_or_else(|_| b"{\"aps\":{}}".to_vec());
        Bytes::from(encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(bytes: &Bytes) -> Value {
        serde_json::from_slice(bytes).unwrap()
    }

    #[test]
    fn test_alert_body_collapses_to_string() {
        let payload = PayloadBuilder::new().alert_body("hi").build();
        let value = parse(&payload);
        assert_eq!(value["aps"]["alert"], json!("hi"));
    }

    #[test]
    fn test_badge_and_sound() {
        let payload = PayloadBuilder::new().badge(3).sound_default().build();
        let value = parse(&payload);
        assert_eq!(value["aps"]["badge"], json!(3));
        assert_eq!(value["aps"]["sound"], json!("default"));
    }

    #[test]
    fn test_custom_fields_at_root() {
        let payload = PayloadBuilder::new()
            .alert_body("hi")
            .field("conversation", json!({"id": 42}))
            .build();
        let value = parse(&payload);
        assert_eq!(value["conversation"]["id"], json!(42));
        assert!(value["aps"].is_object());
    }

    #[test]
    fn test_empty_builder_still_valid_json() {
        let payload = PayloadBuilder::new().build();
        let value = parse(&payload);
        assert!(value["aps"].is_object());
    }
}
