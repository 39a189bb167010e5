//! Pipeline observability counters.
//!
//! Every drop and every contained failure in the pipeline is counted here
//! instead of being reported to a caller. Counters are plain relaxed atomics;
//! they carry no ordering obligations for the data path.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Shared counters, one instance per pipeline.
#[derive(Debug, Default)]
pub struct PipelineStats {
    /// Edges admitted by the gate.
    pub edges_admitted: AtomicU64,
    /// Edges shed because an acquisition was in flight.
    pub edges_dropped: AtomicU64,
    /// Samples constructed by the reader.
    pub samples_produced: AtomicU64,
    /// Streaming reads that failed.
    pub sensor_read_failures: AtomicU64,
    /// Samples whose error-status read came back non-zero.
    pub error_status_flags: AtomicU64,
    /// Samples rejected by a full queue.
    pub queue_dropped: AtomicU64,
    /// Datagrams handed to the transport successfully.
    pub datagrams_sent: AtomicU64,
    /// Records carried by successful datagrams.
    pub records_sent: AtomicU64,
    /// Datagram sends that failed.
    pub send_failures: AtomicU64,
    /// Buffers discarded because the link was down at flush time.
    pub link_down_discards: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`].
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub edges_admitted: u64,
    pub edges_dropped: u64,
    pub samples_produced: u64,
    pub sensor_read_failures: u64,
    pub error_status_flags: u64,
    pub queue_dropped: u64,
    pub datagrams_sent: u64,
    pub records_sent: u64,
    pub send_failures: u64,
    pub link_down_discards: u64,
}

impl PipelineStats {
    /// Read every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            edges_admitted: load(&self.edges_admitted),
            edges_dropped: load(&self.edges_dropped),
            samples_produced: load(&self.samples_produced),
            sensor_read_failures: load(&self.sensor_read_failures),
            error_status_flags: load(&self.error_status_flags),
            queue_dropped: load(&self.queue_dropped),
            datagrams_sent: load(&self.datagrams_sent),
            records_sent: load(&self.records_sent),
            send_failures: load(&self.send_failures),
            link_down_discards: load(&self.link_down_discards),
        }
    }
}

impl StatsSnapshot {
    /// Samples that were produced but will never reach the network.
    pub fn samples_lost(&self) -> u64 {
        self.samples_produced.saturating_sub(self.records_sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let stats = PipelineStats::default();
        stats.samples_produced.fetch_add(10, Ordering::Relaxed);
        stats.records_sent.fetch_add(7, Ordering::Relaxed);
        stats.queue_dropped.fetch_add(3, Ordering::Relaxed);

        let snap = stats.snapshot();
        assert_eq!(snap.samples_produced, 10);
        assert_eq!(snap.queue_dropped, 3);
        assert_eq!(snap.samples_lost(), 3);
    }

    #[test]
    fn snapshot_serializes_to_json() {
        let snap = StatsSnapshot {
            datagrams_sent: 4,
            ..Default::default()
        };
        let json = serde_json::to_value(snap).unwrap();
        assert_eq!(json["datagrams_sent"], 4);
        assert_eq!(json["edges_dropped"], 0);
    }
}
