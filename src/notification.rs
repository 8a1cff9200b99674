//! Notification values and their resolved outcomes.
//!
//! A [`Notification`] is the unit of submission: a destination token, an
//! opaque payload, and delivery metadata. Every constructed notification
//! carries a unique occurrence token; the correlation layer keys in-flight
//! tracking on that token, so two notifications with identical field values
//! are still tracked independently, while re-submitting the *same* value
//! before its first submission resolves is reported as already in flight.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

/// Relative importance of a notification to the gateway's delivery
/// scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryPriority {
    /// Deliver immediately.
    Immediate,
    /// Deliver at a time that conserves the device's power.
    ConservePower,
}

impl DeliveryPriority {
    /// Wire code for this priority.
    pub fn code(self) -> u32 {
        match self {
            DeliveryPriority::Immediate => 10,
            DeliveryPriority::ConservePower => 5,
        }
    }

    /// Map a wire code back to a priority.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            10 => Some(DeliveryPriority::Immediate),
            5 => Some(DeliveryPriority::ConservePower),
            _ => None,
        }
    }
}

/// Token identifying one submission occurrence.
///
/// Allocated from a process-wide counter when the notification value is
/// constructed. Cloning a notification preserves the token: the clone IS
/// the same occurrence. Building a new notification, even with equal
/// fields, yields a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OccurrenceId(u64);

impl OccurrenceId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        OccurrenceId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// A push notification to be delivered to one device.
#[derive(Debug, Clone)]
pub struct Notification {
    occurrence: OccurrenceId,
    token: String,
    payload: Bytes,
    expiration: Option<SystemTime>,
    priority: Option<DeliveryPriority>,
    topic: Option<String>,
}

impl Notification {
    /// Create a notification with immediate priority and no expiration.
    pub fn new(token: impl Into<String>, topic: Option<String>, payload: impl Into<Bytes>) -> Self {
        Self::with_options(
            token,
            topic,
            payload,
            None,
            Some(DeliveryPriority::Immediate),
        )
    }

    /// Create a notification with every field spelled out.
    ///
    /// A `None` priority omits the priority field from the request head
    /// entirely, leaving the choice to the gateway.
    pub fn with_options(
        token: impl Into<String>,
        topic: Option<String>,
        payload: impl Into<Bytes>,
        expiration: Option<SystemTime>,
        priority: Option<DeliveryPriority>,
    ) -> Self {
        Self {
            occurrence: OccurrenceId::next(),
            token: token.into(),
            payload: payload.into(),
            expiration,
            priority,
            topic,
        }
    }

    /// The occurrence token for this submission.
    pub fn occurrence(&self) -> OccurrenceId {
        self.occurrence
    }

    /// Destination device token.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Opaque payload bytes (cheap clone).
    pub fn payload(&self) -> Bytes {
        self.payload.clone()
    }

    /// Expiration instant, if any.
    pub fn expiration(&self) -> Option<SystemTime> {
        self.expiration
    }

    /// Expiration as whole seconds since the epoch; `0` when unset.
    pub fn expiration_epoch_seconds(&self) -> i64 {
        match self.expiration {
            Some(instant) => instant
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0),
            None => 0,
        }
    }

    /// Delivery priority, if one was set.
    pub fn priority(&self) -> Option<DeliveryPriority> {
        self.priority
    }

    /// Topic, if one was set or filled in.
    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    /// Fill in the topic. The client does this automatically when the
    /// notification has no topic and the credential container yielded
    /// default identities.
    pub fn set_topic(&mut self, topic: impl Into<String>) {
        self.topic = Some(topic.into());
    }
}

/// The gateway's decision about one submitted notification.
///
/// A rejection is a *successful* round trip reporting a negative decision;
/// transport-level failures surface as
/// [`SubmissionError`](crate::SubmissionError) instead.
#[derive(Debug)]
pub struct NotificationOutcome {
    notification: Notification,
    accepted: bool,
    rejection_reason: Option<String>,
    token_invalidation_timestamp: Option<i64>,
}

impl NotificationOutcome {
    pub(crate) fn new(
        notification: Notification,
        accepted: bool,
        rejection_reason: Option<String>,
        token_invalidation_timestamp: Option<i64>,
    ) -> Self {
        Self {
            notification,
            accepted,
            rejection_reason,
            token_invalidation_timestamp,
        }
    }

    /// The originating notification.
    pub fn notification(&self) -> &Notification {
        &self.notification
    }

    /// Whether the gateway accepted the notification for delivery.
    pub fn accepted(&self) -> bool {
        self.accepted
    }

    /// Rejection reason reported by the gateway, if any.
    pub fn rejection_reason(&self) -> Option<&str> {
        self.rejection_reason.as_deref()
    }

    /// Instant (milliseconds since the epoch) at which the gateway learned
    /// the destination token became invalid, if it reported one.
    pub fn token_invalidation_timestamp(&self) -> Option<i64> {
        self.token_invalidation_timestamp
    }

    /// Consume the outcome, returning the originating notification.
    pub fn into_notification(self) -> Notification {
        self.notification
    }
}
