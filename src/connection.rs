//! Connection lifecycle worker.
//!
//! One task per client owns the physical connection and every piece of
//! shared state: the connection state machine, the correlation store, and
//! stream-id bookkeeping. Facade calls post commands into the worker's
//! mailbox and receive completion handles; the per-connection reader and
//! writer tasks report back the same way. Nothing outside this task ever
//! mutates the shared maps, so there is no locking.
//!
//! ```text
//!            commands                 frames
//! facade ───────────────► worker ◄─────────────── reader task
//!                           │
//!                           └────► writer task ──► transport
//! ```
//!
//! The reconnect loop engages only after a connection that reached ready
//! drops unexpectedly: the delay doubles per failed attempt up to a cap
//! and resets once a connection is restored. Explicit connect failures
//! never retry.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

use crate::codec::{ErrorResponse, RequestHead, ResponseHead};
use crate::correlation::{CorrelationStore, OutcomeSender};
use crate::error::{ConnectionError, SubmissionError};
use crate::notification::Notification;
use crate::protocol::{
    flags, kind, Frame, FrameBuffer, FrameHeader, CONNECTION_STREAM_ID, DEFAULT_MAX_PAYLOAD_SIZE,
    FIRST_CLIENT_STREAM_ID, PING_PAYLOAD_SIZE, STREAM_ID_REFUSE_THRESHOLD,
};
use crate::transport::{BoxedIo, Connector, Target};
use crate::writer::{spawn_writer_task, OutboundFrame, WriterConfig, WriterHandle};

/// Idle period with no outbound writes before a keepalive probe.
pub(crate) const DEFAULT_PING_IDLE: Duration = Duration::from_secs(60);

/// Bound on waiting for a probe's acknowledgment.
pub(crate) const DEFAULT_PING_ACK_TIMEOUT: Duration = Duration::from_secs(30);

/// First reconnect delay after an unexpected drop.
pub(crate) const DEFAULT_INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Upper bound on the reconnect delay.
pub(crate) const DEFAULT_MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);

/// Event queue capacity between the reader task and the worker.
const EVENT_QUEUE_CAPACITY: usize = 256;

/// Connection state of a client instance. Exactly one physical connection
/// exists per client at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and no attempt in progress.
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// Connected; notifications can be written.
    Ready,
    /// An unexpected drop was observed; a reconnect attempt is scheduled.
    Reconnecting,
}

/// Tunables for the worker.
#[derive(Debug, Clone)]
pub(crate) struct ConnectionConfig {
    pub writer: WriterConfig,
    pub ping_idle: Duration,
    pub ping_ack_timeout: Duration,
    pub initial_reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    pub max_payload_size: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            writer: WriterConfig::default(),
            ping_idle: DEFAULT_PING_IDLE,
            ping_ack_timeout: DEFAULT_PING_ACK_TIMEOUT,
            initial_reconnect_delay: DEFAULT_INITIAL_RECONNECT_DELAY,
            max_reconnect_delay: DEFAULT_MAX_RECONNECT_DELAY,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }
}

/// Commands posted by the facade.
pub(crate) enum Command {
    Connect {
        target: Target,
        done: oneshot::Sender<Result<(), ConnectionError>>,
    },
    Send {
        notification: Notification,
        responder: OutcomeSender,
        /// Default target used for transparent reconnect-then-send when
        /// the worker has never connected anywhere.
        fallback: Target,
    },
    Disconnect {
        done: oneshot::Sender<()>,
    },
}

/// Events reported by the reader task.
enum ConnEvent {
    Frame(Frame),
    Closed,
}

/// What woke the worker loop.
enum Wake {
    Cmd(Option<Command>),
    Event(Option<ConnEvent>),
    Attempt(Result<BoxedIo, ConnectionError>),
    ReconnectDue,
    KeepaliveDue,
}

/// One in-flight connection attempt. At most one exists at a time; a
/// second connect request joins its waiters instead of dialing again.
struct Attempt {
    rx: oneshot::Receiver<Result<BoxedIo, ConnectionError>>,
    target: Target,
    /// Attempts fired by the reconnect schedule reschedule themselves on
    /// failure; explicit attempts do not.
    from_reconnect: bool,
}

/// A scheduled reconnect.
struct ReconnectTimer {
    at: Instant,
    target: Target,
}

/// The live connection owned by the worker.
struct ActiveConnection {
    writer: WriterHandle,
    writer_task: JoinHandle<Result<(), std::io::Error>>,
    reader_task: JoinHandle<()>,
    event_rx: mpsc::Receiver<ConnEvent>,
    next_stream_id: u32,
    next_ping_id: u64,
    last_write: Instant,
    /// Outstanding probe id and its ack deadline.
    outstanding_ping: Option<(u64, Instant)>,
}

/// Spawn the worker; returns its mailbox, the state snapshot channel, and
/// the task handle.
pub(crate) fn spawn_worker(
    config: ConnectionConfig,
    connector: Connector,
    identities: Vec<String>,
) -> (
    mpsc::Sender<Command>,
    watch::Receiver<ConnectionState>,
    JoinHandle<()>,
) {
    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

    let worker = ConnectionWorker {
        cmd_rx,
        state_tx,
        state: ConnectionState::Disconnected,
        reconnect_delay: config.initial_reconnect_delay,
        config,
        connector,
        identities,
        store: CorrelationStore::new(),
        conn: None,
        attempt: None,
        reconnect: None,
        last_target: None,
        queued: Vec::new(),
        connect_waiters: Vec::new(),
    };

    let task = tokio::spawn(worker.run());
    (cmd_tx, state_rx, task)
}

struct ConnectionWorker {
    cmd_rx: mpsc::Receiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
    state: ConnectionState,
    config: ConnectionConfig,
    connector: Connector,
    identities: Vec<String>,
    store: CorrelationStore,
    conn: Option<ActiveConnection>,
    attempt: Option<Attempt>,
    reconnect: Option<ReconnectTimer>,
    reconnect_delay: Duration,
    last_target: Option<Target>,
    /// Submissions parked while a connection attempt is in flight.
    queued: Vec<(Notification, OutcomeSender)>,
    connect_waiters: Vec<oneshot::Sender<Result<(), ConnectionError>>>,
}

impl ConnectionWorker {
    async fn run(mut self) {
        loop {
            let reconnect_at = self.reconnect.as_ref().map(|timer| timer.at);
            let keepalive_at = self.conn.as_ref().map(|conn| match conn.outstanding_ping {
                Some((_, deadline)) => deadline,
                None => conn.last_write + self.config.ping_idle,
            });

            let wake = tokio::select! {
                cmd = self.cmd_rx.recv() => Wake::Cmd(cmd),
                event = recv_event(&mut self.conn) => Wake::Event(event),
                result = recv_attempt(&mut self.attempt) => Wake::Attempt(result),
                _ = sleep_opt(reconnect_at) => Wake::ReconnectDue,
                _ = sleep_opt(keepalive_at) => Wake::KeepaliveDue,
            };

            match wake {
                Wake::Cmd(Some(Command::Connect { target, done })) => {
                    self.handle_connect(target, done);
                }
                Wake::Cmd(Some(Command::Send {
                    notification,
                    responder,
                    fallback,
                })) => {
                    self.handle_send(notification, responder, fallback).await;
                }
                Wake::Cmd(Some(Command::Disconnect { done })) => {
                    self.handle_disconnect(done).await;
                    return;
                }
                Wake::Cmd(None) => {
                    // Every client handle is gone; shut down quietly.
                    self.shutdown_silently().await;
                    return;
                }
                Wake::Event(Some(ConnEvent::Frame(frame))) => {
                    self.handle_frame(frame).await;
                }
                Wake::Event(Some(ConnEvent::Closed)) | Wake::Event(None) => {
                    self.handle_closed();
                }
                Wake::Attempt(result) => {
                    self.handle_attempt_result(result).await;
                }
                Wake::ReconnectDue => {
                    if let Some(timer) = self.reconnect.take() {
                        tracing::warn!("attempting to reconnect");
                        self.start_attempt(timer.target, true);
                    }
                }
                Wake::KeepaliveDue => {
                    self.handle_keepalive().await;
                }
            }
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        self.state_tx.send_replace(state);
    }

    // ---- commands -------------------------------------------------------

    fn handle_connect(&mut self, target: Target, done: oneshot::Sender<Result<(), ConnectionError>>) {
        if self.state == ConnectionState::Ready {
            let _ = done.send(Ok(()));
            return;
        }
        if self.attempt.is_some() {
            // A second concurrent connect observes the same attempt.
            self.connect_waiters.push(done);
            return;
        }
        self.reconnect = None;
        self.connect_waiters.push(done);
        self.start_attempt(target, false);
    }

    async fn handle_send(
        &mut self,
        notification: Notification,
        responder: OutcomeSender,
        fallback: Target,
    ) {
        if self.state == ConnectionState::Ready && self.conn.is_some() {
            self.write_notification(notification, responder).await;
            return;
        }

        // Transparent reconnect-then-send: park the submission and make
        // sure an attempt is under way. The first submission after a drop
        // pays the reconnect latency inline.
        self.queued.push((notification, responder));
        if self.attempt.is_none() {
            let (target, from_reconnect) = match self.reconnect.take() {
                Some(timer) => (timer.target, true),
                None => (self.last_target.clone().unwrap_or(fallback), false),
            };
            self.start_attempt(target, from_reconnect);
        }
    }

    async fn handle_disconnect(&mut self, done: oneshot::Sender<()>) {
        tracing::info!("disconnecting");
        self.reconnect = None;
        self.attempt = None;
        self.fail_waiters(&ConnectionError::ClosedBeforeReady);
        self.fail_queued(&SubmissionError::NotConnected);
        self.store.fail_all(&SubmissionError::NotConnected);

        if let Some(conn) = self.conn.take() {
            conn.reader_task.abort();
            drop(conn.writer);
            // Acknowledge only after the writer drained and closed the
            // transport's write side.
            let _ = conn.writer_task.await;
        }

        self.set_state(ConnectionState::Disconnected);
        let _ = done.send(());
    }

    async fn shutdown_silently(&mut self) {
        self.reconnect = None;
        self.attempt = None;
        self.fail_waiters(&ConnectionError::WorkerShutDown);
        self.fail_queued(&SubmissionError::NotConnected);
        self.store.fail_all(&SubmissionError::NotConnected);
        if let Some(conn) = self.conn.take() {
            conn.reader_task.abort();
            drop(conn.writer);
            let _ = conn.writer_task.await;
        }
        self.set_state(ConnectionState::Disconnected);
    }

    // ---- connection attempts -------------------------------------------

    fn start_attempt(&mut self, target: Target, from_reconnect: bool) {
        tracing::info!("connecting to {}:{}", target.0, target.1);
        self.set_state(ConnectionState::Connecting);

        let (tx, rx) = oneshot::channel();
        let dial = (self.connector)(target.clone());
        tokio::spawn(async move {
            let _ = tx.send(dial.await);
        });

        self.attempt = Some(Attempt {
            rx,
            target,
            from_reconnect,
        });
    }

    async fn handle_attempt_result(&mut self, result: Result<BoxedIo, ConnectionError>) {
        let attempt = self.attempt.take().expect("attempt result without attempt");

        match result {
            Ok(io) => {
                if attempt.from_reconnect {
                    tracing::info!("connection to {}:{} restored", attempt.target.0, attempt.target.1);
                } else {
                    tracing::info!("connected to {}:{}", attempt.target.0, attempt.target.1);
                }
                self.conn = Some(self.open_connection(io));
                self.last_target = Some(attempt.target);
                self.reconnect_delay = self.config.initial_reconnect_delay;
                self.set_state(ConnectionState::Ready);

                for waiter in self.connect_waiters.drain(..) {
                    let _ = waiter.send(Ok(()));
                }
                let queued = std::mem::take(&mut self.queued);
                for (notification, responder) in queued {
                    self.write_notification(notification, responder).await;
                }
            }
            Err(error) => {
                tracing::error!("failed to connect: {}", error);
                self.fail_waiters(&error);
                self.fail_queued(&SubmissionError::NotConnected);

                if attempt.from_reconnect {
                    let next = std::cmp::min(
                        self.reconnect_delay.saturating_mul(2),
                        self.config.max_reconnect_delay,
                    );
                    self.reconnect_delay = next;
                    tracing::error!("next reconnection attempt in {:?}", next);
                    self.reconnect = Some(ReconnectTimer {
                        at: Instant::now() + next,
                        target: attempt.target,
                    });
                    self.set_state(ConnectionState::Reconnecting);
                } else {
                    self.set_state(ConnectionState::Disconnected);
                }
            }
        }
    }

    fn open_connection(&self, io: BoxedIo) -> ActiveConnection {
        let (read_half, write_half) = tokio::io::split(io);
        let (writer, writer_task) = spawn_writer_task(write_half, self.config.writer.clone());

        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let max_payload = self.config.max_payload_size;
        let reader_task = tokio::spawn(read_loop(read_half, event_tx, max_payload));

        ActiveConnection {
            writer,
            writer_task,
            reader_task,
            event_rx,
            next_stream_id: FIRST_CLIENT_STREAM_ID,
            next_ping_id: seed_ping_id(),
            last_write: Instant::now(),
            outstanding_ping: None,
        }
    }

    // ---- the write path -------------------------------------------------

    async fn write_notification(&mut self, mut notification: Notification, responder: OutcomeSender) {
        let Some(conn) = self.conn.as_mut() else {
            let _ = responder.send(Err(SubmissionError::NotConnected));
            return;
        };

        // First extracted identity wins when the notification has no topic.
        if notification.topic().is_none() {
            if let Some(identity) = self.identities.first() {
                notification.set_topic(identity.clone());
            }
        }

        let head = RequestHead::for_notification(&notification);
        let head_bytes = match head.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = responder.send(Err(SubmissionError::WriteFailed(e.to_string())));
                return;
            }
        };
        let payload = notification.payload();
        let occurrence = notification.occurrence();

        if let Err((_, responder)) = self.store.register(notification, responder) {
            tracing::warn!("rejected duplicate submission of an in-flight notification");
            let _ = responder.send(Err(SubmissionError::AlreadyInFlight));
            return;
        }

        let stream_id = conn.next_stream_id;
        conn.next_stream_id += 2;

        let headers = OutboundFrame::new(
            &FrameHeader::new(stream_id, kind::HEADERS, 0, head_bytes.len() as u32),
            Bytes::from(head_bytes),
        );
        let data = OutboundFrame::new(
            &FrameHeader::new(
                stream_id,
                kind::DATA,
                flags::END_MESSAGE,
                payload.len() as u32,
            ),
            payload,
        );

        let wrote = conn.writer.send(headers).await.is_ok() && conn.writer.send(data).await.is_ok();
        if !wrote {
            tracing::error!("failed to write notification on stream {}", stream_id);
            self.store.fail(
                occurrence,
                SubmissionError::WriteFailed("connection writer closed".to_string()),
            );
            return;
        }

        tracing::debug!("wrote notification on stream {}", stream_id);
        conn.last_write = Instant::now();
        self.store.bind_stream(stream_id, occurrence);

        if conn.next_stream_id >= STREAM_ID_REFUSE_THRESHOLD {
            tracing::warn!("stream identifier space exhausted; recycling connection");
            self.handle_unexpected_close();
        }
    }

    // ---- inbound frames -------------------------------------------------

    async fn handle_frame(&mut self, frame: Frame) {
        match frame.kind() {
            kind::HEADERS => self.handle_headers(frame),
            kind::DATA => self.handle_data(frame),
            kind::PING => self.handle_ping(frame).await,
            kind::GOAWAY => self.handle_goaway(frame),
            _ => unreachable!("frame buffer validates kinds"),
        }
    }

    fn handle_headers(&mut self, frame: Frame) {
        let stream_id = frame.stream_id();
        let head = match ResponseHead::decode(frame.payload()) {
            Ok(head) => head,
            Err(e) => {
                tracing::error!("undecodable response head on stream {}: {}", stream_id, e);
                return;
            }
        };
        tracing::trace!("received head on stream {}: status {}", stream_id, head.status);

        if frame.is_end_message() {
            if !head.is_success() {
                tracing::error!(
                    "gateway ended stream {} with an unsuccessful header-only response",
                    stream_id
                );
            }
            if !self.store.resolve_stream(stream_id, head.is_success(), None, None) {
                tracing::warn!("response on unknown stream {}", stream_id);
            }
        } else if !self.store.note_head(stream_id, head) {
            tracing::warn!("head for unknown stream {}", stream_id);
        }
    }

    fn handle_data(&mut self, frame: Frame) {
        let stream_id = frame.stream_id();
        if !frame.is_end_message() {
            tracing::error!("gateway sent a DATA frame that was not the end of a stream");
            return;
        }

        let accepted = self
            .store
            .buffered_head(stream_id)
            .map(|head| head.is_success())
            .unwrap_or(false);

        let body = match ErrorResponse::from_json(frame.payload()) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!("undecodable response body on stream {}: {}", stream_id, e);
                ErrorResponse {
                    reason: None,
                    timestamp: None,
                }
            }
        };

        if !self
            .store
            .resolve_stream(stream_id, accepted, body.reason, body.timestamp)
        {
            tracing::warn!("response body on unknown stream {}", stream_id);
        }
    }

    async fn handle_ping(&mut self, frame: Frame) {
        let Some(conn) = self.conn.as_mut() else {
            return;
        };

        if frame.is_ack() {
            let acked = u64::from_be_bytes(
                frame.payload()[..PING_PAYLOAD_SIZE]
                    .try_into()
                    .expect("validated ping payload"),
            );
            match conn.outstanding_ping {
                Some((id, _)) if id == acked => {
                    tracing::trace!("received reply to ping");
                    conn.outstanding_ping = None;
                }
                _ => tracing::error!("received PING ACK with no corresponding outbound PING"),
            }
            return;
        }

        // Gateway-initiated probe: echo it back.
        let ack = OutboundFrame::new(
            &FrameHeader::new(
                CONNECTION_STREAM_ID,
                kind::PING,
                flags::ACK,
                PING_PAYLOAD_SIZE as u32,
            ),
            frame.payload.clone(),
        );
        if conn.writer.send(ack).await.is_ok() {
            conn.last_write = Instant::now();
        }
    }

    fn handle_goaway(&mut self, frame: Frame) {
        let reason = ErrorResponse::from_json(frame.payload())
            .ok()
            .and_then(|body| body.reason)
            .unwrap_or_else(|| "gateway shutdown".to_string());
        tracing::error!("gateway terminated the connection: {}", reason);

        // Like an explicit disconnect, minus the worker shutdown: pendings
        // fail, reconnects are cancelled, and the client may connect again.
        self.reconnect = None;
        self.teardown_connection();
        self.fail_queued(&SubmissionError::NotConnected);
        self.store.fail_all(&SubmissionError::NotConnected);
        self.set_state(ConnectionState::Disconnected);
    }

    // ---- keepalive ------------------------------------------------------

    async fn handle_keepalive(&mut self) {
        let Some(conn) = self.conn.as_mut() else {
            return;
        };

        if conn.outstanding_ping.is_some() {
            tracing::warn!("closing connection due to ping timeout");
            self.handle_unexpected_close();
            return;
        }

        tracing::info!("sending ping due to inactivity");
        let id = conn.next_ping_id;
        conn.next_ping_id = conn.next_ping_id.wrapping_add(1);

        let probe = OutboundFrame::new(
            &FrameHeader::new(
                CONNECTION_STREAM_ID,
                kind::PING,
                0,
                PING_PAYLOAD_SIZE as u32,
            ),
            Bytes::copy_from_slice(&id.to_be_bytes()),
        );

        if conn.writer.send(probe).await.is_err() {
            tracing::error!("failed to write PING frame");
            self.handle_unexpected_close();
            return;
        }
        conn.last_write = Instant::now();
        conn.outstanding_ping = Some((id, Instant::now() + self.config.ping_ack_timeout));
    }

    // ---- closure --------------------------------------------------------

    fn handle_closed(&mut self) {
        if self.conn.is_none() {
            return;
        }
        if self.state == ConnectionState::Ready {
            self.handle_unexpected_close();
        } else {
            self.teardown_connection();
            self.set_state(ConnectionState::Disconnected);
        }
    }

    /// Unexpected drop while ready: fail every pending operation exactly
    /// once and schedule a reconnect.
    fn handle_unexpected_close(&mut self) {
        self.teardown_connection();
        self.store.fail_all(&SubmissionError::NotConnected);

        match self.last_target.clone() {
            Some(target) => {
                let delay = self.reconnect_delay;
                tracing::error!(
                    "disconnected; next automatic reconnection attempt in {:?}",
                    delay
                );
                self.reconnect = Some(ReconnectTimer {
                    at: Instant::now() + delay,
                    target,
                });
                self.set_state(ConnectionState::Reconnecting);
            }
            None => self.set_state(ConnectionState::Disconnected),
        }
    }

    fn teardown_connection(&mut self) {
        if let Some(conn) = self.conn.take() {
            conn.reader_task.abort();
            drop(conn.writer);
        }
    }

    fn fail_waiters(&mut self, error: &ConnectionError) {
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Err(error.clone()));
        }
    }

    fn fail_queued(&mut self, error: &SubmissionError) {
        for (_, responder) in self.queued.drain(..) {
            let _ = responder.send(Err(error.clone()));
        }
    }
}

// ---- select helpers -----------------------------------------------------

async fn recv_event(conn: &mut Option<ActiveConnection>) -> Option<ConnEvent> {
    match conn {
        Some(active) => active.event_rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn recv_attempt(attempt: &mut Option<Attempt>) -> Result<BoxedIo, ConnectionError> {
    match attempt {
        Some(pending) => match (&mut pending.rx).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::TransportUnavailable(
                "connection attempt aborted".to_string(),
            )),
        },
        None => std::future::pending().await,
    }
}

async fn sleep_opt(at: Option<Instant>) {
    match at {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Read loop: accumulate bytes, forward complete frames to the worker.
async fn read_loop(
    mut reader: tokio::io::ReadHalf<BoxedIo>,
    event_tx: mpsc::Sender<ConnEvent>,
    max_payload_size: u32,
) {
    let mut frames = FrameBuffer::with_max_payload(max_payload_size);
    let mut buf = vec![0u8; 16 * 1024];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => match frames.push(&buf[..n]) {
                Ok(decoded) => {
                    for frame in decoded {
                        if event_tx.send(ConnEvent::Frame(frame)).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    tracing::error!("protocol violation from gateway: {}", e);
                    break;
                }
            },
            Err(e) => {
                tracing::debug!("transport read ended: {}", e);
                break;
            }
        }
    }

    let _ = event_tx.send(ConnEvent::Closed).await;
}

/// Seed for probe ids: time mixed with the process id, like any other
/// place we need a cheap unpredictable starting point.
fn seed_ping_id() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    nanos.wrapping_mul(0x517cc1b727220a95) ^ std::process::id() as u64
}
