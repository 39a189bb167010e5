//! Packetizing datagram sender.
//!
//! Drains the sample queue and batches wire records into datagrams. A batch is
//! flushed when:
//!
//! - the next record would not fit in `max_bytes` (flush first, then append)
//! - it holds `max_samples` records
//! - no sample arrived within `flush_timeout` and anything is pending
//!
//! The byte cap bounds datagram size; the count cap and the idle flush bound
//! end-to-end latency.
//!
//! Transmission is best effort. A failed send is logged, counted and
//! discarded; the buffer is reset after every attempt and nothing is retried.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::error::{AppResult, StreamError};
use crate::link::LinkMonitor;
use crate::queue::SampleReceiver;
use crate::sample::{Sample, MAX_RECORD_LEN};
use crate::stats::PipelineStats;

/// Largest UDP payload over IPv4 (65535 minus IP and UDP headers).
pub const MAX_DATAGRAM_BYTES: usize = 65_507;

/// Default maximum datagram payload in bytes.
pub const DEFAULT_MAX_BYTES: usize = 1200;

/// Default maximum records per datagram.
pub const DEFAULT_MAX_SAMPLES: usize = 20;

/// Default idle window before a partial datagram is sent.
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_millis(10);

/// Size, count and latency bounds for outgoing datagrams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketLimits {
    /// Maximum payload bytes per datagram.
    pub max_bytes: usize,
    /// Maximum records per datagram.
    pub max_samples: usize,
    /// Idle window after which pending records are sent anyway.
    pub flush_timeout: Duration,
}

impl Default for PacketLimits {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
            max_samples: DEFAULT_MAX_SAMPLES,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
        }
    }
}

impl PacketLimits {
    /// Reject limits that could never produce a datagram.
    pub fn validate(&self) -> AppResult<()> {
        if self.max_bytes < MAX_RECORD_LEN {
            return Err(StreamError::Configuration(format!(
                "max_bytes {} is smaller than the largest record ({MAX_RECORD_LEN} bytes)",
                self.max_bytes
            )));
        }
        if self.max_bytes > MAX_DATAGRAM_BYTES {
            return Err(StreamError::Configuration(format!(
                "max_bytes {} exceeds the largest UDP payload ({MAX_DATAGRAM_BYTES} bytes)",
                self.max_bytes
            )));
        }
        if self.max_samples == 0 {
            return Err(StreamError::Configuration(
                "max_samples must be greater than 0".to_string(),
            ));
        }
        if self.flush_timeout.is_zero() {
            return Err(StreamError::Configuration(
                "flush_timeout must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Reused accumulation buffer for one datagram.
#[derive(Debug)]
pub struct PacketBuffer {
    bytes: BytesMut,
    max_bytes: usize,
    max_samples: usize,
    samples: usize,
}

impl PacketBuffer {
    /// Allocate a buffer for the given limits. Never reallocates afterwards.
    pub fn new(max_bytes: usize, max_samples: usize) -> Self {
        Self {
            bytes: BytesMut::with_capacity(max_bytes),
            max_bytes,
            max_samples,
            samples: 0,
        }
    }

    /// Whether `len` more bytes fit without exceeding `max_bytes`.
    pub fn fits(&self, len: usize) -> bool {
        self.bytes.len() + len <= self.max_bytes
    }

    /// Append one encoded record. The caller checks [`fits`](Self::fits) first.
    pub fn push_record(&mut self, record: &[u8]) {
        debug_assert!(self.fits(record.len()));
        self.bytes.extend_from_slice(record);
        self.samples += 1;
    }

    /// The record count has reached `max_samples`.
    pub fn is_full(&self) -> bool {
        self.samples >= self.max_samples
    }

    /// Nothing pending.
    pub fn is_empty(&self) -> bool {
        self.samples == 0
    }

    /// Records pending.
    pub fn sample_count(&self) -> usize {
        self.samples
    }

    /// Payload bytes pending.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Pending payload.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Reset to empty, keeping the allocation.
    pub fn clear(&mut self) {
        self.bytes.clear();
        self.samples = 0;
    }
}

/// Connectionless transport for finished datagrams.
#[async_trait]
pub trait DatagramSink: Send + Sync {
    /// Send one datagram to the fixed destination.
    async fn send_datagram(&self, payload: &[u8]) -> io::Result<()>;
}

/// UDP transport to a fixed destination.
#[derive(Debug)]
pub struct UdpSink {
    socket: UdpSocket,
    dest: SocketAddr,
}

impl UdpSink {
    /// Bind a local socket for sending to `dest`.
    pub async fn bind(bind_addr: SocketAddr, dest: SocketAddr) -> AppResult<Self> {
        let socket = UdpSocket::bind(bind_addr).await?;
        info!(local = ?socket.local_addr().ok(), %dest, "UDP socket ready");
        Ok(Self { socket, dest })
    }

    /// Destination address.
    pub fn dest(&self) -> SocketAddr {
        self.dest
    }
}

#[async_trait]
impl DatagramSink for UdpSink {
    async fn send_datagram(&self, payload: &[u8]) -> io::Result<()> {
        let sent = self.socket.send_to(payload, self.dest).await?;
        if sent != payload.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short datagram send: {sent} of {} bytes", payload.len()),
            ));
        }
        Ok(())
    }
}

/// In-memory sink that records every datagram. Useful for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    sent: Arc<Mutex<Vec<Bytes>>>,
    fail_next: Arc<AtomicU32>,
}

impl RecordingSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` sends fail.
    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Every datagram accepted so far, in send order.
    pub fn datagrams(&self) -> Vec<Bytes> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl DatagramSink for RecordingSink {
    async fn send_datagram(&self, payload: &[u8]) -> io::Result<()> {
        let fail = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(io::Error::new(io::ErrorKind::Other, "simulated send failure"));
        }
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Bytes::copy_from_slice(payload));
        Ok(())
    }
}

/// Why a datagram was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// The next record would have overflowed the byte cap.
    Full,
    /// The record count cap was reached.
    MaxSamples,
    /// No sample arrived within the flush timeout.
    Idle,
    /// The pipeline is stopping.
    Shutdown,
}

/// Consumer side of the pipeline. Sole owner of the packet buffer.
pub struct Packetizer<S> {
    queue: SampleReceiver,
    sink: S,
    link: LinkMonitor,
    buffer: PacketBuffer,
    flush_timeout: Duration,
    stats: Arc<PipelineStats>,
}

impl<S: DatagramSink> Packetizer<S> {
    /// Create a packetizer. `limits` should already be validated.
    pub fn new(
        queue: SampleReceiver,
        sink: S,
        link: LinkMonitor,
        limits: PacketLimits,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            queue,
            sink,
            link,
            buffer: PacketBuffer::new(limits.max_bytes, limits.max_samples),
            flush_timeout: limits.flush_timeout,
            stats,
        }
    }

    /// One loop iteration: wait for a sample, then append it or idle-flush.
    pub async fn step(&mut self) {
        match self.queue.pop_wait(self.flush_timeout).await {
            Some(sample) => self.append(sample).await,
            None => {
                if !self.buffer.is_empty() {
                    self.flush(FlushReason::Idle).await;
                }
            }
        }
    }

    async fn append(&mut self, sample: Sample) {
        let mut line = [0u8; MAX_RECORD_LEN];
        let len = sample.record().encode(&mut line);
        if len == 0 {
            return;
        }

        if !self.buffer.fits(len) {
            self.flush(FlushReason::Full).await;
        }
        self.buffer.push_record(&line[..len]);

        if self.buffer.is_full() {
            self.flush(FlushReason::MaxSamples).await;
        }
    }

    /// Send whatever is pending and reset the buffer, whatever the outcome.
    pub async fn flush(&mut self, reason: FlushReason) {
        if self.buffer.is_empty() {
            return;
        }
        let records = self.buffer.sample_count() as u64;
        let bytes = self.buffer.len();

        if !self.link.is_up() {
            self.stats.link_down_discards.fetch_add(1, Ordering::Relaxed);
            debug!(?reason, records, "Link down, discarding datagram");
        } else {
            match self.sink.send_datagram(self.buffer.as_bytes()).await {
                Ok(()) => {
                    self.stats.datagrams_sent.fetch_add(1, Ordering::Relaxed);
                    self.stats.records_sent.fetch_add(records, Ordering::Relaxed);
                    trace!(?reason, records, bytes, "datagram sent");
                }
                Err(e) => {
                    self.stats.send_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, ?reason, records, bytes, "Error sending datagram");
                    if e.kind() == io::ErrorKind::OutOfMemory {
                        // Give the network stack a moment to free buffers.
                        tokio::time::sleep(Duration::from_millis(1)).await;
                    }
                }
            }
        }

        self.buffer.clear();
    }

    /// Records currently waiting in the packet buffer.
    pub fn pending(&self) -> usize {
        self.buffer.sample_count()
    }

    /// Drain the queue until `shutdown` turns true, then send what is left.
    pub async fn run(mut self, shutdown: watch::Receiver<bool>) {
        info!(
            max_bytes = self.buffer.max_bytes,
            max_samples = self.buffer.max_samples,
            flush_timeout = ?self.flush_timeout,
            "Packetizer started, waiting for samples..."
        );
        loop {
            let stopping = *shutdown.borrow();
            if stopping {
                break;
            }
            self.step().await;
        }

        while let Some(sample) = self.queue.try_pop() {
            self.append(sample).await;
        }
        self.flush(FlushReason::Shutdown).await;
        info!("Packetizer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{link_channel, LinkHandle, LinkState};
    use crate::queue::{sample_queue, SampleSender};

    struct Harness {
        packetizer: Packetizer<RecordingSink>,
        tx: SampleSender,
        sink: RecordingSink,
        link: LinkHandle,
        stats: Arc<PipelineStats>,
    }

    fn harness(limits: PacketLimits) -> Harness {
        let stats = Arc::new(PipelineStats::default());
        let (tx, rx) = sample_queue(256, stats.clone()).unwrap();
        let (link, monitor) = link_channel(LinkState::Up);
        let sink = RecordingSink::new();
        Harness {
            packetizer: Packetizer::new(rx, sink.clone(), monitor, limits, stats.clone()),
            tx,
            sink,
            link,
            stats,
        }
    }

    fn sample(seq: u64) -> Sample {
        Sample::new(seq, [seq as i32, -1000, 123_456], seq % 3 == 0)
    }

    #[test]
    fn buffer_tracks_bytes_and_count() {
        let mut buf = PacketBuffer::new(10, 2);
        assert!(buf.is_empty());
        buf.push_record(b"1 2 3 0\n");
        assert_eq!(buf.len(), 8);
        assert!(!buf.fits(3));
        assert!(buf.fits(2));
        assert!(!buf.is_full());
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.as_bytes(), b"");
    }

    #[test]
    fn limits_validation() {
        assert!(PacketLimits::default().validate().is_ok());
        let tiny = PacketLimits {
            max_bytes: 16,
            ..Default::default()
        };
        assert!(tiny.validate().is_err());
        let largest = PacketLimits {
            max_bytes: MAX_DATAGRAM_BYTES,
            ..Default::default()
        };
        assert!(largest.validate().is_ok());
        let oversized = PacketLimits {
            max_bytes: MAX_DATAGRAM_BYTES + 1,
            ..Default::default()
        };
        assert!(oversized.validate().is_err());
        let no_samples = PacketLimits {
            max_samples: 0,
            ..Default::default()
        };
        assert!(no_samples.validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn count_cap_flushes_immediately() {
        let mut h = harness(PacketLimits {
            max_samples: 3,
            ..Default::default()
        });
        for seq in 0..3 {
            h.tx.try_push(sample(seq));
        }
        for _ in 0..3 {
            h.packetizer.step().await;
        }

        let datagrams = h.sink.datagrams();
        assert_eq!(datagrams.len(), 1);
        let expected: String = (0..3).map(|s| sample(s).record().to_string()).collect();
        assert_eq!(&datagrams[0][..], expected.as_bytes());
        assert_eq!(h.packetizer.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn byte_cap_flushes_before_append() {
        let record_len = sample(0).record().to_string().len();
        let mut h = harness(PacketLimits {
            max_bytes: record_len * 2 + 1,
            max_samples: 100,
            ..Default::default()
        });
        for seq in 0..3 {
            h.tx.try_push(sample(seq));
            h.packetizer.step().await;
        }

        let datagrams = h.sink.datagrams();
        assert_eq!(datagrams.len(), 1);
        assert_eq!(datagrams[0].len(), record_len * 2);
        assert_eq!(h.packetizer.pending(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_flushes_partial_datagram() {
        let mut h = harness(PacketLimits::default());
        h.tx.try_push(sample(7));
        h.packetizer.step().await;
        assert!(h.sink.datagrams().is_empty());

        h.packetizer.step().await;
        let datagrams = h.sink.datagrams();
        assert_eq!(datagrams.len(), 1);
        assert_eq!(&datagrams[0][..], sample(7).record().to_string().as_bytes());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_with_empty_buffer_sends_nothing() {
        let mut h = harness(PacketLimits::default());
        for _ in 0..5 {
            h.packetizer.step().await;
        }
        assert!(h.sink.datagrams().is_empty());
        assert_eq!(h.stats.snapshot().datagrams_sent, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn send_failure_discards_and_continues() {
        let mut h = harness(PacketLimits {
            max_samples: 2,
            ..Default::default()
        });
        h.sink.fail_next(1);
        for seq in 0..4 {
            h.tx.try_push(sample(seq));
            h.packetizer.step().await;
        }

        let datagrams = h.sink.datagrams();
        assert_eq!(datagrams.len(), 1);
        let expected: String = (2..4).map(|s| sample(s).record().to_string()).collect();
        assert_eq!(&datagrams[0][..], expected.as_bytes());

        let snap = h.stats.snapshot();
        assert_eq!(snap.send_failures, 1);
        assert_eq!(snap.datagrams_sent, 1);
        assert_eq!(snap.records_sent, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn link_down_discards_buffer() {
        let mut h = harness(PacketLimits {
            max_samples: 1,
            ..Default::default()
        });
        h.link.set_down();
        h.tx.try_push(sample(0));
        h.packetizer.step().await;

        assert!(h.sink.datagrams().is_empty());
        assert_eq!(h.packetizer.pending(), 0);
        assert_eq!(h.stats.snapshot().link_down_discards, 1);

        h.link.set_up();
        h.tx.try_push(sample(1));
        h.packetizer.step().await;
        assert_eq!(h.sink.datagrams().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_drains_queue_on_shutdown() {
        let h = harness(PacketLimits::default());
        let (stop_tx, stop_rx) = watch::channel(false);
        let Harness {
            packetizer,
            mut tx,
            sink,
            ..
        } = h;

        for seq in 0..5 {
            tx.try_push(sample(seq));
        }
        stop_tx.send_replace(true);
        packetizer.run(stop_rx).await;

        let datagrams = sink.datagrams();
        assert_eq!(datagrams.len(), 1);
        assert_eq!(datagrams[0].split(|&b| b == b'\n').count(), 6);
    }
}
