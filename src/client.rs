//! Client builder and facade.
//!
//! The [`ClientBuilder`] provides a fluent API for configuring credentials
//! and timings; [`Client`] is the thin facade over the connection worker:
//! 1. Load a TLS identity (fatal on credential errors)
//! 2. Spawn the worker that owns the connection
//! 3. Post connect/send/disconnect commands and await their handles
//!
//! # Example
//!
//! ```ignore
//! use pushwire_client::{Client, ClientIdentity, Notification, PayloadBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let identity = ClientIdentity::from_pkcs12_file("push.p12", "secret")?;
//!     let client = Client::builder().identity(identity).build()?;
//!
//!     client.connect().await?;
//!
//!     let payload = PayloadBuilder::new().alert_body("hi").build();
//!     let outcome = client
//!         .send_timeout(
//!             Notification::new("abcd1234", None, payload),
//!             std::time::Duration::from_secs(5),
//!         )
//!         .await?;
//!     println!("accepted: {}", outcome.accepted());
//!
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use rustls::pki_types::CertificateDer;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::connection::{spawn_worker, Command, ConnectionConfig, ConnectionState};
use crate::credentials::ClientIdentity;
use crate::error::{ConnectionError, CredentialError, SubmissionError};
use crate::notification::{Notification, NotificationOutcome};
use crate::transport::{tls_connector, DialConfig, ProxyConfig, Target};

/// Production gateway host.
pub const PRODUCTION_GATEWAY_HOST: &str = "api.push.pushwire.io";

/// Sandbox/development gateway host.
pub const SANDBOX_GATEWAY_HOST: &str = "api.sandbox.push.pushwire.io";

/// Standard secure port.
pub const DEFAULT_GATEWAY_PORT: u16 = 443;

/// Alternate port recognized by both gateway environments.
pub const ALTERNATE_GATEWAY_PORT: u16 = 2197;

/// Builder for configuring and creating a [`Client`].
pub struct ClientBuilder {
    identity: Option<ClientIdentity>,
    tls_override: Option<Arc<rustls::ClientConfig>>,
    default_topics: Vec<String>,
    extra_roots: Vec<CertificateDer<'static>>,
    gateway_port: u16,
    sandbox: bool,
    dial: DialConfig,
    connection: ConnectionConfig,
}

impl ClientBuilder {
    /// Create a new client builder.
    pub fn new() -> Self {
        Self {
            identity: None,
            tls_override: None,
            default_topics: Vec::new(),
            extra_roots: Vec::new(),
            gateway_port: DEFAULT_GATEWAY_PORT,
            sandbox: false,
            dial: DialConfig::default(),
            connection: ConnectionConfig::default(),
        }
    }

    /// Authenticate with the given client identity. Its extracted
    /// certificate identities become the default topics.
    pub fn identity(mut self, identity: ClientIdentity) -> Self {
        self.default_topics = identity.identities().to_vec();
        self.identity = Some(identity);
        self
    }

    /// Use an already-built TLS configuration instead of loading one from
    /// an identity. The configuration must offer the client certificate
    /// and the supported ALPN identifier itself.
    pub fn tls_config(mut self, config: Arc<rustls::ClientConfig>) -> Self {
        self.tls_override = Some(config);
        self
    }

    /// Default topics used to fill in notifications submitted without
    /// one (first entry wins). Implied by [`identity`](Self::identity).
    pub fn default_topics(mut self, topics: Vec<String>) -> Self {
        self.default_topics = topics;
        self
    }

    /// Trust an additional root certificate (private CAs).
    pub fn add_root_certificate(mut self, cert: CertificateDer<'static>) -> Self {
        self.extra_roots.push(cert);
        self
    }

    /// Start in sandbox mode: `connect()` targets the development host.
    pub fn sandbox(mut self, sandbox: bool) -> Self {
        self.sandbox = sandbox;
        self
    }

    /// Use the alternate gateway port for default connects.
    pub fn alternate_port(mut self) -> Self {
        self.gateway_port = ALTERNATE_GATEWAY_PORT;
        self
    }

    /// Bound on opening the transport. Default: 10 seconds.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.dial.connect_timeout = timeout;
        self
    }

    /// Traverse an HTTP CONNECT proxy when dialing.
    pub fn proxy(mut self, host: impl Into<String>, port: u16) -> Self {
        self.dial.proxy = Some(ProxyConfig {
            host: host.into(),
            port,
        });
        self
    }

    /// Bound on a stalled transport write. Default: 20 seconds.
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.connection.writer.write_timeout = timeout;
        self
    }

    /// Write-idle period before a partial batch is flushed.
    /// Default: 50 milliseconds.
    pub fn flush_after_idle(mut self, idle: Duration) -> Self {
        self.connection.writer.flush_after_idle = idle;
        self
    }

    /// Maximum frames accumulated before a forced flush. Default: 1280.
    pub fn max_unflushed_frames(mut self, limit: usize) -> Self {
        self.connection.writer.max_unflushed_frames = limit;
        self
    }

    /// Write-idle period before a keepalive probe. Default: 60 seconds.
    pub fn ping_idle(mut self, idle: Duration) -> Self {
        self.connection.ping_idle = idle;
        self
    }

    /// First reconnect delay after an unexpected drop. Default: 1 second.
    pub fn initial_reconnect_delay(mut self, delay: Duration) -> Self {
        self.connection.initial_reconnect_delay = delay;
        self
    }

    /// Upper bound on the reconnect delay. Default: 60 seconds.
    pub fn max_reconnect_delay(mut self, delay: Duration) -> Self {
        self.connection.max_reconnect_delay = delay;
        self
    }

    /// Build the client and spawn its worker.
    ///
    /// # Errors
    ///
    /// Credential and TLS-configuration problems are fatal here; they
    /// never surface later as submission errors.
    pub fn build(self) -> Result<Client, CredentialError> {
        let tls = match (self.tls_override, self.identity) {
            (Some(config), _) => config,
            (None, Some(identity)) => crate::tls::build_client_config(identity, self.extra_roots)?,
            (None, None) => {
                return Err(CredentialError::InvalidContainer(
                    "no client identity was provided".to_string(),
                ))
            }
        };

        let connector = tls_connector(tls, self.dial);
        let (cmd_tx, state_rx, worker_task) =
            spawn_worker(self.connection, connector, self.default_topics);

        Ok(Client {
            cmd_tx,
            state_rx,
            sandbox: AtomicBool::new(self.sandbox),
            gateway_port: self.gateway_port,
            _worker_task: worker_task,
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Asynchronous handle to one submission's eventual outcome.
///
/// Resolves exactly once with the gateway's decision or a
/// [`SubmissionError`]. Dropping the handle abandons the wait without
/// cancelling the submission.
pub struct ResponseHandle {
    rx: oneshot::Receiver<Result<NotificationOutcome, SubmissionError>>,
}

impl ResponseHandle {
    fn ready(result: Result<NotificationOutcome, SubmissionError>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx }
    }
}

impl Future for ResponseHandle {
    type Output = Result<NotificationOutcome, SubmissionError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|result| match result {
            Ok(inner) => inner,
            // The worker is gone; nothing will resolve this submission.
            Err(_) => Err(SubmissionError::NotConnected),
        })
    }
}

/// A push-notification gateway client.
///
/// Cheap to share behind an `Arc`; all state lives in the worker task.
pub struct Client {
    cmd_tx: mpsc::Sender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    sandbox: AtomicBool,
    gateway_port: u16,
    _worker_task: JoinHandle<()>,
}

impl Client {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Target the production host with subsequent default connects.
    /// No effect on an already-open connection.
    pub fn production_mode(&self) {
        self.sandbox.store(false, Ordering::Relaxed);
    }

    /// Target the sandbox host with subsequent default connects.
    /// No effect on an already-open connection.
    pub fn sandbox_mode(&self) {
        self.sandbox.store(true, Ordering::Relaxed);
    }

    fn default_target(&self) -> Target {
        let host = if self.sandbox.load(Ordering::Relaxed) {
            SANDBOX_GATEWAY_HOST
        } else {
            PRODUCTION_GATEWAY_HOST
        };
        (host.to_string(), self.gateway_port)
    }

    /// Connect to the default gateway host for the current mode.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        let (host, port) = self.default_target();
        self.connect_to(host, port).await
    }

    /// Connect to an explicit host and port.
    ///
    /// Returns once the connection is ready. A concurrent call observes
    /// the same attempt; a call on a ready client returns immediately.
    pub async fn connect_to(&self, host: impl Into<String>, port: u16) -> Result<(), ConnectionError> {
        let (done, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Connect {
                target: (host.into(), port),
                done,
            })
            .await
            .map_err(|_| ConnectionError::WorkerShutDown)?;
        rx.await.map_err(|_| ConnectionError::WorkerShutDown)?
    }

    /// Whether the connection is ready for submissions right now.
    pub fn is_connected(&self) -> bool {
        *self.state_rx.borrow() == ConnectionState::Ready
    }

    /// Current connection state snapshot.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Submit a notification, returning a handle that resolves with the
    /// gateway's decision.
    ///
    /// Submission-time problems (not connected, duplicate in-flight
    /// occurrence, write failures) resolve the handle rather than raising
    /// here. When the client is not ready, a connection attempt is made
    /// first and the submission rides on its result.
    pub async fn send(&self, notification: Notification) -> ResponseHandle {
        let (responder, rx) = oneshot::channel();
        let command = Command::Send {
            notification,
            responder,
            fallback: self.default_target(),
        };
        match self.cmd_tx.send(command).await {
            Ok(()) => ResponseHandle { rx },
            Err(_) => ResponseHandle::ready(Err(SubmissionError::NotConnected)),
        }
    }

    /// Submit a notification and wait at most `timeout` for its outcome.
    ///
    /// An elapsed deadline abandons only this wait - the submission may
    /// still resolve on the gateway's schedule - and is reported as
    /// [`SubmissionError::Timeout`], distinct from rejection and
    /// disconnection.
    pub async fn send_timeout(
        &self,
        notification: Notification,
        timeout: Duration,
    ) -> Result<NotificationOutcome, SubmissionError> {
        let handle = self.send(notification).await;
        match tokio::time::timeout(timeout, handle).await {
            Ok(result) => result,
            Err(_) => Err(SubmissionError::Timeout),
        }
    }

    /// Disconnect and shut the worker down.
    ///
    /// Cancels any scheduled reconnect, fails every pending operation with
    /// a not-connected error, and returns once the transport close has
    /// completed. Subsequent calls observe
    /// [`ConnectionError::WorkerShutDown`].
    pub async fn disconnect(&self) {
        let (done, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(Command::Disconnect { done })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let builder = ClientBuilder::new();
        assert_eq!(builder.gateway_port, DEFAULT_GATEWAY_PORT);
        assert!(!builder.sandbox);
        assert!(builder.identity.is_none());
    }

    #[test]
    fn test_builder_configuration_chaining() {
        let builder = Client::builder()
            .sandbox(true)
            .alternate_port()
            .connect_timeout(Duration::from_secs(3))
            .write_timeout(Duration::from_secs(7))
            .ping_idle(Duration::from_secs(30))
            .max_unflushed_frames(256)
            .initial_reconnect_delay(Duration::from_millis(500))
            .max_reconnect_delay(Duration::from_secs(15));

        assert!(builder.sandbox);
        assert_eq!(builder.gateway_port, ALTERNATE_GATEWAY_PORT);
        assert_eq!(builder.dial.connect_timeout, Duration::from_secs(3));
        assert_eq!(builder.connection.writer.write_timeout, Duration::from_secs(7));
        assert_eq!(builder.connection.ping_idle, Duration::from_secs(30));
        assert_eq!(builder.connection.writer.max_unflushed_frames, 256);
        assert_eq!(
            builder.connection.initial_reconnect_delay,
            Duration::from_millis(500)
        );
        assert_eq!(builder.connection.max_reconnect_delay, Duration::from_secs(15));
    }

    #[test]
    fn test_build_without_identity_is_credential_error() {
        let result = ClientBuilder::new().build();
        // No runtime is needed to hit the credential check.
        assert!(matches!(result, Err(CredentialError::InvalidContainer(_))));
    }

    #[tokio::test]
    async fn test_mode_toggles_pick_default_host() {
        let client = minimal_client();
        assert_eq!(client.default_target().0, PRODUCTION_GATEWAY_HOST);

        client.sandbox_mode();
        assert_eq!(client.default_target().0, SANDBOX_GATEWAY_HOST);

        client.production_mode();
        assert_eq!(client.default_target().0, PRODUCTION_GATEWAY_HOST);
    }

    #[tokio::test]
    async fn test_send_after_shutdown_resolves_not_connected() {
        let client = minimal_client();
        client.disconnect().await;

        let handle = client
            .send(Notification::new("t", None, &b"{}"[..]))
            .await;
        assert!(matches!(
            handle.await,
            Err(SubmissionError::NotConnected)
        ));

        let err = client.connect_to("gateway.test", 443).await.unwrap_err();
        assert!(matches!(err, ConnectionError::WorkerShutDown));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_timeout_reports_timeout() {
        // A connector that dials forever: the submission can never resolve
        // on its own, so the bounded wait must fire.
        let connector: crate::transport::Connector = Box::new(|_target| {
            Box::pin(std::future::pending::<
                Result<crate::transport::BoxedIo, ConnectionError>,
            >())
        });
        let (cmd_tx, state_rx, task) =
            spawn_worker(ConnectionConfig::default(), connector, Vec::new());
        let client = Client {
            cmd_tx,
            state_rx,
            sandbox: AtomicBool::new(false),
            gateway_port: DEFAULT_GATEWAY_PORT,
            _worker_task: task,
        };

        let started = tokio::time::Instant::now();
        let result = client
            .send_timeout(
                Notification::new("t", None, &b"{}"[..]),
                Duration::from_secs(1),
            )
            .await;

        assert!(matches!(result, Err(SubmissionError::Timeout)));
        assert_eq!(started.elapsed(), Duration::from_secs(1));
    }

    /// A client whose connector never succeeds; good enough for facade
    /// plumbing tests.
    fn minimal_client() -> Client {
        let connector: crate::transport::Connector = Box::new(|_target| {
            Box::pin(async {
                Err(ConnectionError::TransportUnavailable(
                    "test connector".to_string(),
                ))
            })
        });
        let (cmd_tx, state_rx, task) =
            spawn_worker(ConnectionConfig::default(), connector, Vec::new());
        Client {
            cmd_tx,
            state_rx,
            sandbox: AtomicBool::new(false),
            gateway_port: DEFAULT_GATEWAY_PORT,
            _worker_task: task,
        }
    }
}
