//! Correlation of in-flight submissions with their eventual outcomes.
//!
//! The store tracks exactly one pending entry per submission occurrence and
//! one slot per open stream id. Every pending entry is resolved exactly
//! once - success, rejection, or error - and removed at the moment of
//! resolution. Only the connection worker touches the store, so no locking
//! is needed.

use std::collections::HashMap;

use tokio::sync::oneshot;

use crate::codec::ResponseHead;
use crate::error::SubmissionError;
use crate::notification::{Notification, NotificationOutcome, OccurrenceId};

/// Completion side of a submission handle.
pub(crate) type OutcomeSender = oneshot::Sender<Result<NotificationOutcome, SubmissionError>>;

/// One submission awaiting its outcome.
struct PendingOperation {
    notification: Notification,
    responder: OutcomeSender,
}

/// One open stream awaiting its response.
struct StreamSlot {
    occurrence: OccurrenceId,
    /// Response head buffered when the gateway sends a non-terminal
    /// HEADERS frame ahead of the body.
    head: Option<ResponseHead>,
}

/// Pending-operation map plus stream-id bookkeeping.
#[derive(Default)]
pub(crate) struct CorrelationStore {
    pending: HashMap<OccurrenceId, PendingOperation>,
    streams: HashMap<u32, StreamSlot>,
}

impl CorrelationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a submission. Fails when the same occurrence is already
    /// pending, handing the notification and responder back so the caller
    /// can resolve the duplicate without disturbing the original.
    pub fn register(
        &mut self,
        notification: Notification,
        responder: OutcomeSender,
    ) -> Result<(), (Notification, OutcomeSender)> {
        let occurrence = notification.occurrence();
        if self.pending.contains_key(&occurrence) {
            return Err((notification, responder));
        }
        self.pending.insert(
            occurrence,
            PendingOperation {
                notification,
                responder,
            },
        );
        Ok(())
    }

    /// Bind a stream id to a registered occurrence after its frames were
    /// accepted for write.
    pub fn bind_stream(&mut self, stream_id: u32, occurrence: OccurrenceId) {
        self.streams.insert(
            stream_id,
            StreamSlot {
                occurrence,
                head: None,
            },
        );
    }

    /// Buffer a non-terminal response head for a stream. Returns false
    /// when the stream is unknown.
    pub fn note_head(&mut self, stream_id: u32, head: ResponseHead) -> bool {
        match self.streams.get_mut(&stream_id) {
            Some(slot) => {
                slot.head = Some(head);
                true
            }
            None => false,
        }
    }

    /// Buffered head for a stream, if any.
    pub fn buffered_head(&self, stream_id: u32) -> Option<ResponseHead> {
        self.streams.get(&stream_id).and_then(|slot| slot.head)
    }

    /// Resolve the stream's pending operation with an outcome, removing
    /// both the slot and the pending entry. Returns false when the stream
    /// id is unknown.
    pub fn resolve_stream(
        &mut self,
        stream_id: u32,
        accepted: bool,
        rejection_reason: Option<String>,
        token_invalidation_timestamp: Option<i64>,
    ) -> bool {
        let Some(slot) = self.streams.remove(&stream_id) else {
            return false;
        };
        let Some(op) = self.pending.remove(&slot.occurrence) else {
            return false;
        };
        let outcome = NotificationOutcome::new(
            op.notification,
            accepted,
            rejection_reason,
            token_invalidation_timestamp,
        );
        let _ = op.responder.send(Ok(outcome));
        true
    }

    /// Fail one occurrence (write-failure path; no stream slot exists).
    pub fn fail(&mut self, occurrence: OccurrenceId, error: SubmissionError) {
        if let Some(op) = self.pending.remove(&occurrence) {
            let _ = op.responder.send(Err(error));
        }
    }

    /// Fail every pending operation with the given error and clear all
    /// stream slots. Each entry is resolved exactly once.
    pub fn fail_all(&mut self, error: &SubmissionError) {
        for (_, op) in self.pending.drain() {
            let _ = op.responder.send(Err(error.clone()));
        }
        self.streams.clear();
    }

    /// Number of unresolved submissions.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Number of open stream slots.
    pub fn stream_len(&self) -> usize {
        self.streams.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::STATUS_OK;

    fn notification() -> Notification {
        Notification::new("abcd1234", None, &b"{}"[..])
    }

    #[test]
    fn test_register_and_resolve_success() {
        let mut store = CorrelationStore::new();
        let n = notification();
        let occurrence = n.occurrence();
        let (tx, mut rx) = oneshot::channel();

        store.register(n, tx).unwrap();
        store.bind_stream(1, occurrence);
        assert!(store.resolve_stream(1, true, None, None));

        let outcome = rx.try_recv().unwrap().unwrap();
        assert!(outcome.accepted());
        assert_eq!(store.pending_len(), 0);
        assert_eq!(store.stream_len(), 0);
    }

    #[test]
    fn test_duplicate_occurrence_rejected() {
        let mut store = CorrelationStore::new();
        let n = notification();
        let duplicate = n.clone();

        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();

        store.register(n, tx1).unwrap();
        let err = store.register(duplicate, tx2);
        assert!(err.is_err());

        // The original stays registered and unresolved.
        assert_eq!(store.pending_len(), 1);
        assert!(rx1.try_recv().is_err());
    }

    #[test]
    fn test_distinct_occurrences_coexist() {
        let mut store = CorrelationStore::new();
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();

        store.register(notification(), tx1).unwrap();
        store.register(notification(), tx2).unwrap();
        assert_eq!(store.pending_len(), 2);
    }

    #[test]
    fn test_buffered_head_then_resolution() {
        let mut store = CorrelationStore::new();
        let n = notification();
        let occurrence = n.occurrence();
        let (tx, mut rx) = oneshot::channel();

        store.register(n, tx).unwrap();
        store.bind_stream(3, occurrence);
        assert!(store.note_head(3, ResponseHead { status: 400 }));
        assert_eq!(store.buffered_head(3).unwrap().status, 400);

        assert!(store.resolve_stream(
            3,
            false,
            Some("BadDeviceToken".to_string()),
            None
        ));
        let outcome = rx.try_recv().unwrap().unwrap();
        assert!(!outcome.accepted());
        assert_eq!(outcome.rejection_reason(), Some("BadDeviceToken"));
        assert_eq!(outcome.token_invalidation_timestamp(), None);
    }

    #[test]
    fn test_note_head_unknown_stream() {
        let mut store = CorrelationStore::new();
        assert!(!store.note_head(9, ResponseHead { status: STATUS_OK }));
        assert!(!store.resolve_stream(9, true, None, None));
    }

    #[test]
    fn test_fail_before_stream_bound() {
        let mut store = CorrelationStore::new();
        let n = notification();
        let occurrence = n.occurrence();
        let (tx, mut rx) = oneshot::channel();

        store.register(n, tx).unwrap();
        store.fail(occurrence, SubmissionError::WriteFailed("broken pipe".to_string()));

        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(SubmissionError::WriteFailed(_))
        ));
        assert_eq!(store.pending_len(), 0);
    }

    #[test]
    fn test_fail_all_resolves_each_exactly_once() {
        let mut store = CorrelationStore::new();
        let mut receivers = Vec::new();

        for i in 0..4u32 {
            let n = notification();
            let occurrence = n.occurrence();
            let (tx, rx) = oneshot::channel();
            store.register(n, tx).unwrap();
            store.bind_stream(1 + i * 2, occurrence);
            receivers.push(rx);
        }

        store.fail_all(&SubmissionError::NotConnected);

        for mut rx in receivers {
            assert!(matches!(
                rx.try_recv().unwrap(),
                Err(SubmissionError::NotConnected)
            ));
        }
        assert_eq!(store.pending_len(), 0);
        assert_eq!(store.stream_len(), 0);
    }

    #[test]
    fn test_resolution_with_dropped_receiver_is_silent() {
        let mut store = CorrelationStore::new();
        let n = notification();
        let occurrence = n.occurrence();
        let (tx, rx) = oneshot::channel();

        store.register(n, tx).unwrap();
        store.bind_stream(1, occurrence);
        drop(rx);

        // The abandoned wait does not disturb the store's bookkeeping.
        assert!(store.resolve_stream(1, true, None, None));
        assert_eq!(store.pending_len(), 0);
    }
}
