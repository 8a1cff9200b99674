//! # pushwire-client
//!
//! Async client for the pushwire push-notification gateway.
//!
//! One persistent TLS connection carries many concurrent request/response
//! exchanges, each on its own stream. Submissions return handles that
//! resolve exactly once with the gateway's decision; an unexpected drop
//! fails every in-flight submission and the client reconnects with
//! exponential backoff.
//!
//! ## Architecture
//!
//! - **Connection worker**: one task owns the connection state machine,
//!   the correlation store, and stream-id bookkeeping.
//! - **Stream codec**: binary frames over TLS; MessagePack header blocks,
//!   opaque payload bodies, JSON rejection structures.
//! - **Facade**: [`Client::send`] (async handle) and
//!   [`Client::send_timeout`] (bounded wait).
//!
//! ## Example
//!
//! ```ignore
//! use pushwire_client::{Client, ClientIdentity, Notification, PayloadBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let identity = ClientIdentity::from_pkcs12_file("push.p12", "secret")?;
//!     let client = Client::builder().identity(identity).build()?;
//!
//!     let payload = PayloadBuilder::new().alert_body("hi").build();
//!     let outcome = client
//!         .send(Notification::new("abcd1234", None, payload))
//!         .await
//!         .await?;
//!     println!("accepted: {}", outcome.accepted());
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod credentials;
pub mod error;
pub mod payload;
pub mod protocol;
pub mod tls;

mod client;
mod connection;
mod correlation;
mod notification;
mod transport;
mod writer;

pub use client::{
    Client, ClientBuilder, ResponseHandle, ALTERNATE_GATEWAY_PORT, DEFAULT_GATEWAY_PORT,
    PRODUCTION_GATEWAY_HOST, SANDBOX_GATEWAY_HOST,
};
pub use connection::ConnectionState;
pub use credentials::ClientIdentity;
pub use error::{ConnectionError, CredentialError, ProtocolError, SubmissionError};
pub use notification::{DeliveryPriority, Notification, NotificationOutcome, OccurrenceId};
pub use payload::PayloadBuilder;
pub use tls::ALPN_PROTOCOL;
