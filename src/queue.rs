//! Bounded single-producer single-consumer sample queue.
//!
//! A fixed-capacity ring buffer (`ringbuf::HeapRb`) allocated once at startup
//! and split into a [`SampleSender`] for the reader and a [`SampleReceiver`]
//! for the packetizer. The producer side never blocks and never allocates:
//! when the ring is full the newest sample is rejected and counted. The
//! consumer side waits on a `tokio::sync::Notify` for at most a caller-given
//! window.
//!
//! # Ordering
//!
//! Strict FIFO. Overflow policy is drop-newest, never evict-oldest.
//!
//! # Example
//! ```
//! use ecg_stream::queue::{sample_queue, PushOutcome};
//! use ecg_stream::stats::PipelineStats;
//! use ecg_stream::Sample;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let (mut tx, mut rx) = sample_queue(1, Arc::new(PipelineStats::default()))?;
//! assert_eq!(tx.try_push(Sample::new(0, [1, 2, 3], false)), PushOutcome::Enqueued);
//! assert_eq!(tx.try_push(Sample::new(1, [1, 2, 3], false)), PushOutcome::Dropped);
//!
//! let first = rx.pop_wait(Duration::from_millis(10)).await;
//! assert_eq!(first.map(|s| s.seq), Some(0));
//! # Ok::<(), ecg_stream::StreamError>(())
//! # }).unwrap();
//! ```

use ringbuf::{HeapConsumer, HeapProducer, HeapRb};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::{AppResult, StreamError};
use crate::sample::Sample;
use crate::stats::PipelineStats;

/// Result of a non-blocking push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The sample is now owned by the queue.
    Enqueued,
    /// The queue was full; the sample was discarded.
    Dropped,
}

impl PushOutcome {
    /// True for [`PushOutcome::Enqueued`].
    pub fn is_enqueued(self) -> bool {
        matches!(self, PushOutcome::Enqueued)
    }
}

struct Shared {
    ready: Notify,
    stats: Arc<PipelineStats>,
}

/// Producer half. Owned by the sample reader.
pub struct SampleSender {
    producer: HeapProducer<Sample>,
    shared: Arc<Shared>,
}

/// Consumer half. Owned by the packetizer.
pub struct SampleReceiver {
    consumer: HeapConsumer<Sample>,
    shared: Arc<Shared>,
}

/// Allocate a queue holding up to `capacity` samples.
pub fn sample_queue(
    capacity: usize,
    stats: Arc<PipelineStats>,
) -> AppResult<(SampleSender, SampleReceiver)> {
    if capacity == 0 {
        return Err(StreamError::Configuration(
            "queue capacity must be greater than 0".to_string(),
        ));
    }

    let (producer, consumer) = HeapRb::<Sample>::new(capacity).split();
    let shared = Arc::new(Shared {
        ready: Notify::new(),
        stats,
    });

    Ok((
        SampleSender {
            producer,
            shared: shared.clone(),
        },
        SampleReceiver { consumer, shared },
    ))
}

impl SampleSender {
    /// Enqueue without blocking. On a full queue the sample is dropped.
    pub fn try_push(&mut self, sample: Sample) -> PushOutcome {
        match self.producer.push(sample) {
            Ok(()) => {
                self.shared.ready.notify_one();
                PushOutcome::Enqueued
            }
            Err(_rejected) => {
                self.shared.stats.queue_dropped.fetch_add(1, Ordering::Relaxed);
                PushOutcome::Dropped
            }
        }
    }

    /// Fixed capacity of the queue.
    pub fn capacity(&self) -> usize {
        self.producer.capacity()
    }

    /// Samples currently queued.
    pub fn len(&self) -> usize {
        self.producer.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.producer.is_empty()
    }
}

impl SampleReceiver {
    /// Take the oldest sample, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `None` when the window elapses with the queue still empty.
    pub async fn pop_wait(&mut self, timeout: Duration) -> Option<Sample> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(sample) = self.consumer.pop() {
                return Some(sample);
            }
            let notified = self.shared.ready.notified();
            // A push may have landed between the pop and registering interest.
            if let Some(sample) = self.consumer.pop() {
                return Some(sample);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.consumer.pop();
            }
        }
    }

    /// Take the oldest sample if one is queued.
    pub fn try_pop(&mut self) -> Option<Sample> {
        self.consumer.pop()
    }

    /// Samples currently queued.
    pub fn len(&self) -> usize {
        self.consumer.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.consumer.is_empty()
    }
}
