//! Simulated front end for running and testing without hardware.
//!
//! [`SimulatedSensor`] implements [`SensorBus`] with a synthetic ECG-like
//! waveform encoded exactly as the real device encodes it (24-bit
//! two's-complement, offset by the calibration constant). A cloneable
//! [`SimulatedSensorHandle`] stays with the test or CLI after the sensor itself
//! has moved into the reader, and lets it:
//!
//! - toggle the alarm line
//! - inject bus failures
//! - script exact frames
//! - add read latency and noise
//! - observe register writes and read counts
//!
//! [`EdgeClock`] stands in for the data-ready interrupt line.

use async_trait::async_trait;
use rand::Rng;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::{registers, SensorBus};
use crate::error::{AppResult, StreamError};
use crate::gate::{EdgeGate, EdgeOutcome};
use crate::sample::{Calibration, CHANNELS, FRAME_LEN};

/// Output data rate of the reference configuration.
pub const DEFAULT_SAMPLE_RATE_HZ: f64 = 853.364;

/// Fastest edge rate [`EdgeClock`] will drive.
pub const MAX_SAMPLE_RATE_HZ: f64 = 1_000_000.0;

const HEART_RATE_HZ: f64 = 1.2;
const WAVE_AMPLITUDE: f64 = 200_000.0;
const LEAD_GAINS: [f64; CHANNELS] = [1.0, 0.7, -0.4];

/// Synthetic channel values for sample `index`.
///
/// A sum of Gaussian bumps (P, Q, R, S, T) repeating at 72 bpm, scaled per
/// lead. Deterministic, so tests can predict every reading.
pub fn waveform(index: u64, sample_rate_hz: f64) -> [i32; CHANNELS] {
    let t = index as f64 / sample_rate_hz;
    let phase = (t * HEART_RATE_HZ).fract();
    let bump = |center: f64, width: f64, amplitude: f64| {
        amplitude * (-((phase - center) / width).powi(2)).exp()
    };
    let lead = bump(0.20, 0.025, 0.12) - bump(0.36, 0.010, 0.15) + bump(0.38, 0.012, 1.0)
        - bump(0.40, 0.010, 0.25)
        + bump(0.65, 0.050, 0.30);

    LEAD_GAINS.map(|gain| (lead * gain * WAVE_AMPLITUDE) as i32)
}

#[derive(Debug)]
struct SimState {
    registers: Mutex<[u8; 256]>,
    writes: Mutex<Vec<(u8, u8)>>,
    scripted: Mutex<VecDeque<[u8; FRAME_LEN]>>,
    alarm: AtomicBool,
    fail_reads: AtomicU32,
    fail_writes: AtomicU32,
    stream_reads: AtomicU64,
    read_latency_us: AtomicU64,
    noise: AtomicI32,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            registers: Mutex::new([0; 256]),
            writes: Mutex::new(Vec::new()),
            scripted: Mutex::new(VecDeque::new()),
            alarm: AtomicBool::new(false),
            fail_reads: AtomicU32::new(0),
            fail_writes: AtomicU32::new(0),
            stream_reads: AtomicU64::new(0),
            read_latency_us: AtomicU64::new(0),
            noise: AtomicI32::new(0),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Simulated ECG front end.
#[derive(Debug)]
pub struct SimulatedSensor {
    state: Arc<SimState>,
    calibration: Calibration,
    sample_rate_hz: f64,
    frame_index: u64,
}

impl SimulatedSensor {
    /// Create a sensor using the default calibration and sample rate.
    pub fn new() -> Self {
        Self::with_calibration(Calibration::default(), DEFAULT_SAMPLE_RATE_HZ)
    }

    /// Create a sensor whose raw codes decode correctly under `calibration`.
    pub fn with_calibration(calibration: Calibration, sample_rate_hz: f64) -> Self {
        Self {
            state: Arc::new(SimState::default()),
            calibration,
            sample_rate_hz,
            frame_index: 0,
        }
    }

    /// Control and observation handle.
    pub fn handle(&self) -> SimulatedSensorHandle {
        SimulatedSensorHandle {
            state: self.state.clone(),
        }
    }

    fn next_frame(&mut self) -> [u8; FRAME_LEN] {
        if let Some(frame) = lock(&self.state.scripted).pop_front() {
            return frame;
        }

        let values = waveform(self.frame_index, self.sample_rate_hz);
        self.frame_index += 1;

        let noise = self.state.noise.load(Ordering::Relaxed);
        let mut frame = [0u8; FRAME_LEN];
        for (i, value) in values.into_iter().enumerate() {
            let jitter = if noise > 0 {
                rand::thread_rng().gen_range(-noise..=noise)
            } else {
                0
            };
            let raw = self.calibration.encode(value + jitter);
            frame[i * 3..i * 3 + 3].copy_from_slice(&raw);
        }
        frame
    }
}

impl Default for SimulatedSensor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SensorBus for SimulatedSensor {
    async fn read_stream(&mut self, reg: u8, buf: &mut [u8]) -> AppResult<()> {
        let state = self.state.clone();
        state.stream_reads.fetch_add(1, Ordering::SeqCst);

        let latency = state.read_latency_us.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_micros(latency)).await;
        }

        if take_one(&state.fail_reads) {
            Err(StreamError::Sensor("simulated stream read failure".to_string()))
        } else if reg == registers::DATA_LOOP {
            let frame = self.next_frame();
            let n = buf.len().min(FRAME_LEN);
            buf[..n].copy_from_slice(&frame[..n]);
            Ok(())
        } else {
            let regs = lock(&state.registers);
            for (offset, byte) in buf.iter_mut().enumerate() {
                *byte = regs[(reg as usize + offset) & 0xFF];
            }
            Ok(())
        }
    }

    async fn read_register(&mut self, reg: u8) -> AppResult<u8> {
        if take_one(&self.state.fail_reads) {
            return Err(StreamError::Sensor(format!(
                "simulated read failure at {}",
                registers::Hex(reg)
            )));
        }
        Ok(lock(&self.state.registers)[reg as usize])
    }

    async fn write_register(&mut self, reg: u8, value: u8) -> AppResult<()> {
        if take_one(&self.state.fail_writes) {
            return Err(StreamError::Sensor(format!(
                "simulated write failure at {}",
                registers::Hex(reg)
            )));
        }
        lock(&self.state.registers)[reg as usize] = value;
        lock(&self.state.writes).push((reg, value));
        Ok(())
    }

    fn alarm_level(&mut self) -> bool {
        self.state.alarm.load(Ordering::SeqCst)
    }
}

/// Shared control surface of a [`SimulatedSensor`].
#[derive(Debug, Clone)]
pub struct SimulatedSensorHandle {
    state: Arc<SimState>,
}

impl SimulatedSensorHandle {
    /// Drive the alarm line.
    pub fn set_alarm(&self, level: bool) {
        self.state.alarm.store(level, Ordering::SeqCst);
    }

    /// Make the next `count` reads (stream or register) fail.
    pub fn fail_next_reads(&self, count: u32) {
        self.state.fail_reads.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` register writes fail.
    pub fn fail_next_writes(&self, count: u32) {
        self.state.fail_writes.store(count, Ordering::SeqCst);
    }

    /// Preset a register value.
    pub fn set_register(&self, reg: u8, value: u8) {
        lock(&self.state.registers)[reg as usize] = value;
    }

    /// Queue an exact frame to be returned by the next streaming read.
    pub fn push_frame(&self, frame: [u8; FRAME_LEN]) {
        lock(&self.state.scripted).push_back(frame);
    }

    /// Time each streaming read takes.
    pub fn set_read_latency(&self, latency: Duration) {
        self.state
            .read_latency_us
            .store(latency.as_micros() as u64, Ordering::Relaxed);
    }

    /// Add uniform noise of at most `amplitude` codes to each channel.
    pub fn set_noise(&self, amplitude: i32) {
        self.state.noise.store(amplitude.max(0), Ordering::Relaxed);
    }

    /// Every successful register write, in order.
    pub fn register_writes(&self) -> Vec<(u8, u8)> {
        lock(&self.state.writes).clone()
    }

    /// Streaming reads attempted so far.
    pub fn stream_reads(&self) -> u64 {
        self.state.stream_reads.load(Ordering::SeqCst)
    }
}

/// Periodic data-ready edge source.
pub struct EdgeClock;

impl EdgeClock {
    /// Present one edge to `gate` every `1 / rate_hz` seconds until aborted.
    ///
    /// `rate_hz` must be finite and in `(0, MAX_SAMPLE_RATE_HZ]`.
    pub fn spawn(gate: Arc<EdgeGate>, rate_hz: f64) -> AppResult<JoinHandle<()>> {
        if !(rate_hz.is_finite() && rate_hz > 0.0 && rate_hz <= MAX_SAMPLE_RATE_HZ) {
            return Err(StreamError::Configuration(format!(
                "edge rate {rate_hz} Hz is outside (0, {MAX_SAMPLE_RATE_HZ}]"
            )));
        }
        let period = Duration::from_secs_f64(1.0 / rate_hz);
        info!(rate_hz, ?period, "Edge clock started");

        Ok(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if gate.on_edge() == EdgeOutcome::Dropped {
                    debug!("Edge shed: acquisition still in flight");
                }
            }
        }))
    }
}
