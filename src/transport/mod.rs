//! Transport layer - outbound TCP + TLS dialing.
//!
//! Opening a transport is a configuration-driven sequence: TCP connect
//! (optionally traversing an HTTP CONNECT proxy) bounded by the connect
//! timeout, then the TLS handshake, then the ALPN check. The connection
//! worker never sees a stream whose application protocol was not the one
//! this client speaks.

mod dial;

pub(crate) use dial::{open_secure_transport, DialConfig, ProxyConfig};

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::ConnectionError;

/// Host + port pair a connection attempt targets.
pub(crate) type Target = (String, u16);

/// Object-safe transport stream.
pub(crate) trait Io: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Io for T {}

/// An established transport, ready for framing.
pub(crate) type BoxedIo = Box<dyn Io>;

/// Pluggable transport opener. Production uses [`tls_connector`]; tests
/// substitute in-memory pipes.
pub(crate) type Connector = Box<
    dyn Fn(Target) -> Pin<Box<dyn Future<Output = Result<BoxedIo, ConnectionError>> + Send>>
        + Send,
>;

/// Build the production connector: TCP (+ proxy) + TLS + ALPN enforcement.
pub(crate) fn tls_connector(tls: Arc<rustls::ClientConfig>, dial: DialConfig) -> Connector {
    Box::new(move |target| {
        let tls = tls.clone();
        let dial = dial.clone();
        Box::pin(async move {
            let stream = open_secure_transport(&target.0, target.1, &dial, tls).await?;
            Ok(Box::new(stream) as BoxedIo)
        })
    })
}
