//! Acquisition trigger gate.
//!
//! Turns a hardware data-ready edge into exactly one wake-up of the sample
//! reader, and admits at most one acquisition at a time.
//!
//! The edge side ([`EdgeGate::on_edge`]) is synchronous and never blocks: it
//! does one atomic test-and-set and, on success, one `Notify::notify_one`. It can
//! be called from a GPIO callback, a timer, or a test. An edge that arrives while
//! the previous acquisition is still in flight is dropped and counted.
//!
//! The reader side waits with [`EdgeGate::wait`] and must call
//! [`EdgeGate::exit`] once it is done touching the sensor, whether the read
//! succeeded or not.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::stats::PipelineStats;

/// Result of presenting one edge to the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeOutcome {
    /// The gate was free; the reader has been woken.
    Admitted,
    /// An acquisition was already in flight; the edge was shed.
    Dropped,
}

/// Re-entrancy guard between the edge source and the sample reader.
#[derive(Debug)]
pub struct EdgeGate {
    busy: AtomicBool,
    wake: Notify,
    stats: Arc<PipelineStats>,
}

impl EdgeGate {
    /// Create a gate with its own counters.
    pub fn new() -> Self {
        Self::with_stats(Arc::new(PipelineStats::default()))
    }

    /// Create a gate that reports into shared pipeline counters.
    pub fn with_stats(stats: Arc<PipelineStats>) -> Self {
        Self {
            busy: AtomicBool::new(false),
            wake: Notify::new(),
            stats,
        }
    }

    /// Atomically claim the gate. Returns false if it was already held.
    #[inline]
    pub fn try_enter(&self) -> bool {
        !self.busy.swap(true, Ordering::Acquire)
    }

    /// Release the gate so the next edge can be admitted.
    #[inline]
    pub fn exit(&self) {
        self.busy.store(false, Ordering::Release);
    }

    /// Whether an acquisition is currently in flight.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Present one hardware edge. Never blocks and never fails.
    pub fn on_edge(&self) -> EdgeOutcome {
        if self.try_enter() {
            self.stats.edges_admitted.fetch_add(1, Ordering::Relaxed);
            self.wake.notify_one();
            EdgeOutcome::Admitted
        } else {
            self.stats.edges_dropped.fetch_add(1, Ordering::Relaxed);
            EdgeOutcome::Dropped
        }
    }

    /// Wait, without timeout, for the next admitted edge.
    pub async fn wait(&self) {
        self.wake.notified().await;
    }

    /// Counters this gate reports into.
    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }
}

impl Default for EdgeGate {
    fn default() -> Self {
        Self::new()
    }
}
