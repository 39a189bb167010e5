//! Sample data model and the wire record format.
//!
//! A [`Sample`] is one reading of the three ECG channels plus the alarm line,
//! tagged with its position in the acquisition sequence. On the wire each sample
//! becomes one newline-terminated text record:
//!
//! ```text
//! <ch1> <ch2> <ch3> <alarm>\n
//! ```
//!
//! Channels are signed decimal integers and the alarm flag is `0` or `1`. The
//! sequence number is never transmitted.
//!
//! # Channel Reconstruction
//!
//! The front end delivers each channel as a 3-byte big-endian two's-complement
//! field. [`sign_extend_24`] widens it to `i32`, and [`Calibration`] subtracts a
//! fixed offset that recenters the signal around zero.

use std::fmt;
use std::io::{Cursor, Write};
use std::str::FromStr;

use crate::error::StreamError;

/// Number of ECG channels in one reading.
pub const CHANNELS: usize = 3;

/// Bytes per channel field.
pub const BYTES_PER_CHANNEL: usize = 3;

/// Bytes in one streaming read covering all channels.
pub const FRAME_LEN: usize = CHANNELS * BYTES_PER_CHANNEL;

/// Upper bound on the encoded length of any record.
///
/// Three `i32` values of at most 11 characters, three separators, the alarm
/// digit and the newline.
pub const MAX_RECORD_LEN: usize = 38;

/// Calibration offset used by the reference front end to center the signal.
pub const DEFAULT_CALIBRATION_OFFSET: i32 = 6_075_000;

const MIN_24: i32 = -(1 << 23);
const MAX_24: i32 = (1 << 23) - 1;

/// Widen a 24-bit big-endian two's-complement field to `i32`.
#[inline]
pub fn sign_extend_24(bytes: [u8; BYTES_PER_CHANNEL]) -> i32 {
    let raw = i32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]);
    (raw << 8) >> 8
}

/// Truncate a value to its 24-bit two's-complement big-endian field.
#[inline]
pub fn truncate_24(value: i32) -> [u8; BYTES_PER_CHANNEL] {
    let [_, hi, mid, lo] = value.to_be_bytes();
    [hi, mid, lo]
}

/// Fixed offset subtracted from every reconstructed channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calibration {
    offset: i32,
}

impl Calibration {
    /// Create a calibration with the given offset.
    ///
    /// The offset must itself be a representable 24-bit value so that the
    /// calibrated result always fits in `i32`.
    pub fn new(offset: i32) -> Result<Self, StreamError> {
        if !(MIN_24..=MAX_24).contains(&offset) {
            return Err(StreamError::Configuration(format!(
                "calibration offset {offset} outside the 24-bit range {MIN_24}..={MAX_24}"
            )));
        }
        Ok(Self { offset })
    }

    /// Offset subtracted from each channel.
    pub fn offset(&self) -> i32 {
        self.offset
    }

    /// Reconstruct one calibrated channel value from its raw field.
    #[inline]
    pub fn decode(&self, raw: [u8; BYTES_PER_CHANNEL]) -> i32 {
        sign_extend_24(raw) - self.offset
    }

    /// Produce the raw field that decodes to `value`.
    #[inline]
    pub fn encode(&self, value: i32) -> [u8; BYTES_PER_CHANNEL] {
        truncate_24(value.wrapping_add(self.offset))
    }

    /// Reconstruct all channels from one streaming frame.
    ///
    /// All three values come from the same buffer, so they always belong to
    /// the same sensor transaction.
    pub fn decode_frame(&self, frame: &[u8; FRAME_LEN]) -> [i32; CHANNELS] {
        let field = |i: usize| {
            let at = i * BYTES_PER_CHANNEL;
            [frame[at], frame[at + 1], frame[at + 2]]
        };
        [self.decode(field(0)), self.decode(field(1)), self.decode(field(2))]
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            offset: DEFAULT_CALIBRATION_OFFSET,
        }
    }
}

/// The transmitted part of a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record {
    /// Channel 1 value.
    pub ch1: i32,
    /// Channel 2 value.
    pub ch2: i32,
    /// Channel 3 value.
    pub ch3: i32,
    /// Alarm line level sampled with this reading.
    pub alarm_state: bool,
}

impl Record {
    /// Encode into a fixed scratch buffer, returning the number of bytes written.
    ///
    /// Returns 0 if the record could not be formatted; callers skip it.
    pub fn encode(&self, out: &mut [u8; MAX_RECORD_LEN]) -> usize {
        let mut cursor = Cursor::new(&mut out[..]);
        match write!(cursor, "{self}") {
            Ok(()) => cursor.position() as usize,
            Err(_) => 0,
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} {} {} {}",
            self.ch1,
            self.ch2,
            self.ch3,
            u8::from(self.alarm_state)
        )
    }
}

impl FromStr for Record {
    type Err = String;

    /// Parse one record, with or without its trailing newline.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.strip_suffix('\n').unwrap_or(line);
        let mut fields = line.split(' ');
        let mut channel = |name: &str| -> Result<i32, String> {
            let field = fields.next().ok_or_else(|| format!("missing {name}"))?;
            // The encoder never writes a plus sign.
            if field.starts_with('+') {
                return Err(format!("invalid {name} '{field}': explicit plus sign"));
            }
            field
                .parse::<i32>()
                .map_err(|e| format!("invalid {name} '{field}': {e}"))
        };
        let ch1 = channel("ch1")?;
        let ch2 = channel("ch2")?;
        let ch3 = channel("ch3")?;
        let alarm_state = match fields.next() {
            Some("0") => false,
            Some("1") => true,
            Some(other) => return Err(format!("invalid alarm flag '{other}'")),
            None => return Err("missing alarm flag".to_string()),
        };
        if fields.next().is_some() {
            return Err("unexpected trailing field".to_string());
        }
        Ok(Self {
            ch1,
            ch2,
            ch3,
            alarm_state,
        })
    }
}

/// One reading, owned by exactly one pipeline stage at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    /// Position in the acquisition sequence since startup.
    pub seq: u64,
    /// Channel 1 value.
    pub ch1: i32,
    /// Channel 2 value.
    pub ch2: i32,
    /// Channel 3 value.
    pub ch3: i32,
    /// Alarm line level, read after the channel data.
    pub alarm_state: bool,
}

impl Sample {
    /// Build a sample from calibrated channel values.
    pub fn new(seq: u64, channels: [i32; CHANNELS], alarm_state: bool) -> Self {
        let [ch1, ch2, ch3] = channels;
        Self {
            seq,
            ch1,
            ch2,
            ch3,
            alarm_state,
        }
    }

    /// The part of this sample that goes on the wire.
    pub fn record(&self) -> Record {
        Record {
            ch1: self.ch1,
            ch2: self.ch2,
            ch3: self.ch3,
            alarm_state: self.alarm_state,
        }
    }
}
