//! Dedicated writer task for the connection's transport.
//!
//! All outbound frames funnel through an mpsc channel into one task that
//! owns the write half of the TLS stream. This serializes writes without a
//! mutex and lets bursts of frames coalesce into batched vectored writes.
//!
//! ```text
//! worker ─► mpsc::Sender<OutboundFrame> ─► writer task ─► transport
//! ```
//!
//! Flush policy: a batch is written once it reaches `max_unflushed_frames`
//! or once `flush_after_idle` elapses with no new frames, whichever comes
//! first. A single batch write that stalls longer than `write_timeout`
//! kills the task, which surfaces as a transport close upstream.

use std::io::IoSlice;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::protocol::{FrameHeader, FRAME_HEADER_SIZE};

/// Default maximum frames accumulated before a forced flush.
pub(crate) const DEFAULT_MAX_UNFLUSHED_FRAMES: usize = 1280;

/// Default write-idle period after which a partial batch is flushed.
pub(crate) const DEFAULT_FLUSH_AFTER_IDLE: Duration = Duration::from_millis(50);

/// Default bound on a single batch write before the connection is
/// considered dead.
pub(crate) const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(20);

/// Default channel capacity between the worker and the writer task.
pub(crate) const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// A frame ready to be written to the transport.
#[derive(Debug)]
pub(crate) struct OutboundFrame {
    /// Pre-encoded header (10 bytes).
    pub header: [u8; FRAME_HEADER_SIZE],
    /// Payload bytes (may be empty).
    pub payload: Bytes,
}

impl OutboundFrame {
    /// Create a new outbound frame.
    #[inline]
    pub fn new(header: &FrameHeader, payload: Bytes) -> Self {
        Self {
            header: header.encode(),
            payload,
        }
    }

    /// Create a new outbound frame with an empty payload.
    #[inline]
    pub fn empty(header: &FrameHeader) -> Self {
        Self {
            header: header.encode(),
            payload: Bytes::new(),
        }
    }

    /// Total size of this frame (header + payload).
    #[inline]
    pub fn size(&self) -> usize {
        FRAME_HEADER_SIZE + self.payload.len()
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub(crate) struct WriterConfig {
    /// Maximum frames accumulated before a forced flush.
    pub max_unflushed_frames: usize,
    /// Write-idle period after which a partial batch is flushed.
    pub flush_after_idle: Duration,
    /// Bound on a single batch write.
    pub write_timeout: Duration,
    /// Channel capacity for the frame queue.
    pub channel_capacity: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_unflushed_frames: DEFAULT_MAX_UNFLUSHED_FRAMES,
            flush_after_idle: DEFAULT_FLUSH_AFTER_IDLE,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// The writer task is gone; the transport is no longer writable.
#[derive(Debug)]
pub(crate) struct WriterClosed;

/// Handle for sending frames to the writer task. Cheaply cloneable.
#[derive(Clone)]
pub(crate) struct WriterHandle {
    tx: mpsc::Sender<OutboundFrame>,
}

impl WriterHandle {
    /// Queue a frame for writing. Waits when the queue is full, which is
    /// the backpressure path for burst load.
    pub async fn send(&self, frame: OutboundFrame) -> Result<(), WriterClosed> {
        self.tx.send(frame).await.map_err(|_| WriterClosed)
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// The task drains its queue until every handle is dropped, then shuts the
/// transport's write side down cleanly. It exits early with an error when a
/// write fails or stalls past the configured timeout.
pub(crate) fn spawn_writer_task<W>(
    writer: W,
    config: WriterConfig,
) -> (WriterHandle, JoinHandle<Result<(), std::io::Error>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let task = tokio::spawn(writer_loop(rx, writer, config));
    (WriterHandle { tx }, task)
}

/// Main writer loop: accumulate, flush on cap or idle.
async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut writer: W,
    config: WriterConfig,
) -> Result<(), std::io::Error>
where
    W: AsyncWrite + Unpin,
{
    let mut batch: Vec<OutboundFrame> = Vec::new();

    loop {
        let first = match rx.recv().await {
            Some(frame) => frame,
            None => {
                // Every handle dropped: clean shutdown.
                let _ = writer.shutdown().await;
                return Ok(());
            }
        };
        batch.push(first);

        let mut channel_open = true;
        while batch.len() < config.max_unflushed_frames {
            match tokio::time::timeout(config.flush_after_idle, rx.recv()).await {
                Ok(Some(frame)) => batch.push(frame),
                Ok(None) => {
                    channel_open = false;
                    break;
                }
                // Idle with a partial batch: flush now.
                Err(_) => break,
            }
        }

        let flushed = tokio::time::timeout(config.write_timeout, write_batch(&mut writer, &batch));
        match flushed.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!("transport write failed: {}", e);
                return Err(e);
            }
            Err(_) => {
                tracing::error!("closing connection due to write timeout");
                return Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "batch write exceeded write timeout",
                ));
            }
        }
        batch.clear();

        if !channel_open {
            let _ = writer.shutdown().await;
            return Ok(());
        }
    }
}

/// Write a batch of frames with scatter/gather IO.
///
/// A batch of N frames is at most one vectored write plus a flush when the
/// kernel buffer has room; partial writes continue from the exact byte
/// offset reached.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<(), std::io::Error>
where
    W: AsyncWrite + Unpin,
{
    let total: usize = batch.iter().map(OutboundFrame::size).sum();
    let mut written = 0usize;

    while written < total {
        let slices = remaining_slices(batch, written);
        let n = writer.write_vectored(&slices).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            ));
        }
        written += n;
    }

    writer.flush().await
}

/// Build the IoSlice list for the unwritten tail of a batch.
fn remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut offset = 0usize;

    for frame in batch {
        for part in [&frame.header[..], &frame.payload[..]] {
            let end = offset + part.len();
            if skip_bytes < end && !part.is_empty() {
                let start_within = skip_bytes.saturating_sub(offset);
                slices.push(IoSlice::new(&part[start_within..]));
            }
            offset = end;
        }
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{flags, kind};
    use tokio::io::{duplex, AsyncReadExt};

    fn data_frame(stream_id: u32, payload: &'static [u8]) -> OutboundFrame {
        let header = FrameHeader::new(
            stream_id,
            kind::DATA,
            flags::END_MESSAGE,
            payload.len() as u32,
        );
        OutboundFrame::new(&header, Bytes::from_static(payload))
    }

    #[test]
    fn test_outbound_frame_size() {
        let frame = data_frame(1, b"hello");
        assert_eq!(frame.size(), FRAME_HEADER_SIZE + 5);

        let header = FrameHeader::new(1, kind::HEADERS, 0, 0);
        assert_eq!(OutboundFrame::empty(&header).size(), FRAME_HEADER_SIZE);
    }

    #[test]
    fn test_remaining_slices_offsets() {
        let batch = vec![data_frame(1, b"hello")];

        assert_eq!(remaining_slices(&batch, 0).len(), 2);

        let partial_header = remaining_slices(&batch, 4);
        assert_eq!(partial_header.len(), 2);
        assert_eq!(partial_header[0].len(), FRAME_HEADER_SIZE - 4);

        let payload_only = remaining_slices(&batch, FRAME_HEADER_SIZE);
        assert_eq!(payload_only.len(), 1);
        assert_eq!(payload_only[0].len(), 5);

        let mid_payload = remaining_slices(&batch, FRAME_HEADER_SIZE + 3);
        assert_eq!(mid_payload.len(), 1);
        assert_eq!(mid_payload[0].len(), 2);
    }

    #[tokio::test]
    async fn test_frames_reach_the_transport() {
        let (client, mut server) = duplex(4096);
        let config = WriterConfig {
            flush_after_idle: Duration::from_millis(1),
            ..WriterConfig::default()
        };
        let (handle, task) = spawn_writer_task(client, config);

        handle.send(data_frame(1, b"hello")).await.unwrap();
        handle.send(data_frame(3, b"world")).await.unwrap();
        drop(handle);

        task.await.unwrap().unwrap();

        let mut buf = Vec::new();
        server.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf.len(), 2 * (FRAME_HEADER_SIZE + 5));

        let first = FrameHeader::decode(&buf[..FRAME_HEADER_SIZE]).unwrap();
        assert_eq!(first.stream_id, 1);
        let second = FrameHeader::decode(&buf[FRAME_HEADER_SIZE + 5..]).unwrap();
        assert_eq!(second.stream_id, 3);
    }

    #[tokio::test]
    async fn test_partial_batch_flushes_after_idle() {
        let (client, mut server) = duplex(4096);
        let config = WriterConfig {
            max_unflushed_frames: 64,
            flush_after_idle: Duration::from_millis(10),
            ..WriterConfig::default()
        };
        let (handle, _task) = spawn_writer_task(client, config);

        // One lone frame, far below the batch cap.
        handle.send(data_frame(1, b"lone")).await.unwrap();

        let mut buf = vec![0u8; 64];
        let n = server.read(&mut buf).await.unwrap();
        assert_eq!(n, FRAME_HEADER_SIZE + 4);
    }

    #[tokio::test]
    async fn test_shutdown_on_channel_close() {
        let (client, _server) = duplex(4096);
        let (handle, task) = spawn_writer_task(client, WriterConfig::default());

        drop(handle);
        let result = task.await.unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_timeout_kills_task() {
        // Tiny pipe nobody drains: the batch write can never complete.
        let (client, server) = duplex(8);
        let config = WriterConfig {
            flush_after_idle: Duration::from_millis(1),
            write_timeout: Duration::from_millis(100),
            ..WriterConfig::default()
        };
        let (handle, task) = spawn_writer_task(client, config);

        handle
            .send(data_frame(1, b"a payload larger than the pipe"))
            .await
            .unwrap();

        let result = task.await.unwrap();
        let err = result.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::TimedOut);
        drop(server);
    }
}
