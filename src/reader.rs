//! Sample reader task.
//!
//! Woken by the [`EdgeGate`], performs exactly one acquisition per admitted
//! edge:
//!
//! 1. one streaming read of the three channel fields
//! 2. optional error-status read (diagnostic only)
//! 3. reconstruction and calibration of each channel
//! 4. one read of the alarm line
//! 5. a non-blocking push onto the sample queue
//! 6. release of the gate
//!
//! Nothing on this path blocks or propagates an error. A failed read releases
//! the gate and skips the cycle; a full queue drops the sample. Both are
//! counted in [`PipelineStats`].

use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use crate::gate::EdgeGate;
use crate::queue::{PushOutcome, SampleSender};
use crate::sample::{Calibration, Sample, FRAME_LEN};
use crate::sensor::{registers, SensorBus};
use crate::stats::PipelineStats;

/// Per-reader tunables.
#[derive(Debug, Clone, Copy)]
pub struct ReaderSettings {
    /// Offset subtracted from each channel.
    pub calibration: Calibration,
    /// Read the error-status register after every stream read.
    pub check_error_status: bool,
    /// Log one warning per this many queue drops or read failures.
    pub log_interval: u64,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            calibration: Calibration::default(),
            check_error_status: false,
            log_interval: 1000,
        }
    }
}

/// What one acquisition cycle produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquisition {
    /// A sample with this sequence number was queued.
    Enqueued(u64),
    /// A sample with this sequence number was built but the queue was full.
    QueueFull(u64),
    /// The streaming read failed; no sample exists for this edge.
    ReadFailed,
}

/// Warn on the first occurrence and then on every `interval`th.
fn should_log(count: u64, interval: u64) -> bool {
    count == 1 || count % interval.max(1) == 0
}

/// Releases the gate when dropped, so every exit path frees it.
struct GateRelease(Arc<EdgeGate>);

impl Drop for GateRelease {
    fn drop(&mut self) {
        self.0.exit();
    }
}

/// Producer side of the pipeline. Sole owner of the sensor bus.
pub struct SampleReader<B> {
    gate: Arc<EdgeGate>,
    bus: B,
    queue: SampleSender,
    settings: ReaderSettings,
    stats: Arc<PipelineStats>,
    next_seq: u64,
}

impl<B: SensorBus> SampleReader<B> {
    /// Create a reader. The bus must already be configured for streaming.
    pub fn new(
        gate: Arc<EdgeGate>,
        bus: B,
        queue: SampleSender,
        settings: ReaderSettings,
    ) -> Self {
        let stats = gate.stats().clone();
        Self {
            gate,
            bus,
            queue,
            settings,
            stats,
            next_seq: 0,
        }
    }

    /// Perform one acquisition for an already admitted edge.
    ///
    /// The gate is released on return regardless of the outcome.
    pub async fn acquire_once(&mut self) -> Acquisition {
        let _release = GateRelease(self.gate.clone());

        let mut frame = [0u8; FRAME_LEN];
        if let Err(e) = self.bus.read_stream(registers::DATA_LOOP, &mut frame).await {
            let failures = self.stats.sensor_read_failures.fetch_add(1, Ordering::Relaxed) + 1;
            if should_log(failures, self.settings.log_interval) {
                warn!(error = %e, failures, "Failed to read data stream");
            } else {
                trace!(error = %e, failures, "stream read failed");
            }
            return Acquisition::ReadFailed;
        }

        if self.settings.check_error_status {
            self.poll_error_status().await;
        }

        let channels = self.settings.calibration.decode_frame(&frame);
        let alarm_state = self.bus.alarm_level();

        let seq = self.next_seq;
        self.next_seq += 1;
        self.stats.samples_produced.fetch_add(1, Ordering::Relaxed);

        match self.queue.try_push(Sample::new(seq, channels, alarm_state)) {
            PushOutcome::Enqueued => {
                trace!(seq, "sample queued");
                Acquisition::Enqueued(seq)
            }
            PushOutcome::Dropped => {
                let dropped = self.stats.queue_dropped.load(Ordering::Relaxed);
                if should_log(dropped, self.settings.log_interval) {
                    warn!(seq, dropped, "Sample queue full, dropping samples");
                }
                Acquisition::QueueFull(seq)
            }
        }
    }

    async fn poll_error_status(&mut self) {
        match self.bus.read_register(registers::ERROR_STATUS).await {
            Ok(0) => {}
            Ok(status) => {
                self.stats.error_status_flags.fetch_add(1, Ordering::Relaxed);
                trace!(status = %registers::Hex(status), "error status set");
            }
            Err(e) => debug!(error = %e, "error status read failed"),
        }
    }

    /// Sequence number the next sample will carry.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Serve admitted edges for the rest of the process lifetime.
    pub async fn run(mut self) {
        info!("Sample reader started, waiting for edges...");
        loop {
            self.gate.wait().await;
            self.acquire_once().await;
        }
    }
}
