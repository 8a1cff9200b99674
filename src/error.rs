//! Error types for pushwire-client.

use thiserror::Error;

/// Errors raised while establishing or maintaining the gateway connection.
///
/// Handshake-level failures are terminal for the attempt that produced them:
/// the reconnect-with-backoff loop only engages after a connection that
/// reached ready drops unexpectedly.
#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    /// The TLS handshake with the gateway failed.
    #[error("TLS handshake failed: {0}")]
    HandshakeFailed(String),

    /// The TLS handshake completed but the peer did not negotiate the one
    /// supported application protocol. The connection is torn down rather
    /// than silently downgraded.
    #[error("gateway negotiated an unsupported application protocol")]
    UnsupportedProtocolNegotiated,

    /// The transport closed before the connection became ready.
    #[error("connection closed before becoming ready")]
    ClosedBeforeReady,

    /// The client's worker has been shut down and cannot be restarted.
    #[error("client worker has been shut down")]
    WorkerShutDown,

    /// The transport could not be opened (DNS, TCP, proxy, timeout).
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),
}

/// Errors resolving a single notification submission.
///
/// These resolve the submission's handle; only the bounded-wait facade
/// re-raises them to its caller. A gateway rejection is NOT a submission
/// error — it arrives as a [`NotificationOutcome`](crate::NotificationOutcome)
/// with `accepted == false`.
#[derive(Debug, Clone, Error)]
pub enum SubmissionError {
    /// No connection was ready and none could be established.
    #[error("client is not connected to the gateway")]
    NotConnected,

    /// The same submission occurrence is already pending. No second frame
    /// is written; the first submission's handle is unaffected.
    #[error("notification has already been sent and not yet resolved")]
    AlreadyInFlight,

    /// Writing the request frames to the transport failed.
    #[error("failed to write notification: {0}")]
    WriteFailed(String),

    /// The bounded wait elapsed before the submission resolved. Only the
    /// caller's wait is abandoned; the operation itself may still resolve.
    #[error("timed out waiting for the gateway response")]
    Timeout,
}

/// Errors loading a TLS client identity. Always fatal to client
/// construction.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// The credential container could not be read or decoded.
    #[error("invalid credential container: {0}")]
    InvalidContainer(String),

    /// The container held no private key entry.
    #[error("credential container did not contain any private key entries")]
    NoPrivateKeyEntry,

    /// The container held certificate material that is not X.509.
    #[error("found a certificate in the credential container, but it was not an X.509 certificate")]
    UnexpectedCertificateType,
}

/// Frame-structure violations detected while encoding or decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A frame announced a payload larger than the configured maximum.
    #[error("frame payload size {length} exceeds maximum {max}")]
    PayloadTooLarge { length: u32, max: u32 },

    /// The frame kind byte is not one this protocol defines.
    #[error("unknown frame kind: {0:#04x}")]
    UnknownFrameKind(u8),

    /// Reserved flag bits were set.
    #[error("reserved frame flag bits must be 0")]
    ReservedFlagBits,

    /// A frame carried a stream id its kind does not allow.
    #[error("invalid stream id {stream_id} for frame kind {kind:#04x}")]
    InvalidStreamId { stream_id: u32, kind: u8 },

    /// A header block or body structure failed to decode.
    #[error("malformed block: {0}")]
    MalformedBlock(String),
}
