//! Configuration System using Figment
//!
//! Strongly-typed configuration for the streaming pipeline. Values are loaded
//! from:
//! 1. `config/ecg_stream.toml` (or a path given on the command line)
//! 2. Environment variables prefixed with `ECG_STREAM_`, nested with `__`
//!
//! Every field has a default, so an empty or missing file yields a runnable
//! configuration.
//!
//! # Example
//! ```no_run
//! use ecg_stream::config::StreamConfig;
//!
//! let config = StreamConfig::load()?;
//! config.validate()?;
//! println!("Streaming to {}", config.destination()?);
//! # Ok::<(), ecg_stream::error::StreamError>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use crate::error::{AppResult, StreamError};
use crate::packetizer::{
    PacketLimits, DEFAULT_FLUSH_TIMEOUT, DEFAULT_MAX_BYTES, DEFAULT_MAX_SAMPLES,
};
use crate::reader::ReaderSettings;
use crate::sample::{Calibration, DEFAULT_CALIBRATION_OFFSET};
use crate::sensor::simulated::{DEFAULT_SAMPLE_RATE_HZ, MAX_SAMPLE_RATE_HZ};

/// Default configuration file location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/ecg_stream.toml";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "ECG_STREAM_";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const VALID_LOG_FORMATS: [&str; 3] = ["pretty", "compact", "json"];

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StreamConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Destination and link settings
    pub network: NetworkConfig,
    /// Datagram batching limits
    pub packet: PacketConfig,
    /// Sample queue sizing
    pub queue: QueueConfig,
    /// Front end settings
    pub sensor: SensorConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// Where datagrams go and how long to wait for connectivity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Receiver host (IP literal or resolvable name)
    #[serde(default = "default_dest_addr")]
    pub dest_addr: String,
    /// Receiver UDP port
    #[serde(default = "default_dest_port")]
    pub dest_port: u16,
    /// Local address for the sending socket
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// How long startup waits for the link to come up
    #[serde(default = "default_link_timeout", with = "humantime_serde")]
    pub link_timeout: Duration,
}

/// Datagram batching limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketConfig {
    /// Maximum payload bytes per datagram
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
    /// Maximum records per datagram
    #[serde(default = "default_max_samples")]
    pub max_samples: usize,
    /// Idle window after which a partial datagram is sent
    #[serde(default = "default_flush_timeout", with = "humantime_serde")]
    pub flush_timeout: Duration,
}

/// Sample queue sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Slots between reader and packetizer
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

/// Front end settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Raw code subtracted from every channel
    #[serde(default = "default_calibration_offset")]
    pub calibration_offset: i32,
    /// Edge rate of the simulated data-ready clock
    #[serde(default = "default_sample_rate_hz")]
    pub sample_rate_hz: f64,
    /// Read the error-status register after every sample
    #[serde(default)]
    pub check_error_status: bool,
    /// Log one warning per this many queue drops or read failures
    #[serde(default = "default_log_interval")]
    pub log_interval: u64,
}

// Default value functions
fn default_name() -> String {
    "ecg_stream".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_dest_addr() -> String {
    "10.243.226.10".to_string()
}

fn default_dest_port() -> u16 {
    5005
}

fn default_bind_addr() -> String {
    "0.0.0.0:0".to_string()
}

fn default_link_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_bytes() -> usize {
    DEFAULT_MAX_BYTES
}

fn default_max_samples() -> usize {
    DEFAULT_MAX_SAMPLES
}

fn default_flush_timeout() -> Duration {
    DEFAULT_FLUSH_TIMEOUT
}

fn default_capacity() -> usize {
    1024
}

fn default_calibration_offset() -> i32 {
    DEFAULT_CALIBRATION_OFFSET
}

fn default_sample_rate_hz() -> f64 {
    DEFAULT_SAMPLE_RATE_HZ
}

fn default_log_interval() -> u64 {
    1000
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            dest_addr: default_dest_addr(),
            dest_port: default_dest_port(),
            bind_addr: default_bind_addr(),
            link_timeout: default_link_timeout(),
        }
    }
}

impl Default for PacketConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_max_bytes(),
            max_samples: default_max_samples(),
            flush_timeout: default_flush_timeout(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            calibration_offset: default_calibration_offset(),
            sample_rate_hz: default_sample_rate_hz(),
            check_error_status: false,
            log_interval: default_log_interval(),
        }
    }
}

impl StreamConfig {
    /// Load configuration from `config/ecg_stream.toml` and environment variables
    ///
    /// Environment variables override the file, e.g.
    /// `ECG_STREAM_NETWORK__DEST_PORT=6000`.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Ok(Self::figment(path).extract()?)
    }

    /// Provider chain: defaults, then the TOML file, then the environment.
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::from(Serialized::defaults(StreamConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let level = self.application.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(StreamError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }

        let format = self.application.log_format.to_lowercase();
        if !VALID_LOG_FORMATS.contains(&format.as_str()) {
            return Err(StreamError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                VALID_LOG_FORMATS.join(", ")
            )));
        }

        if self.network.dest_port == 0 {
            return Err(StreamError::Configuration(
                "network.dest_port must be non-zero".to_string(),
            ));
        }
        self.bind_addr()?;

        self.packet_limits().validate()?;

        if self.queue.capacity == 0 {
            return Err(StreamError::Configuration(
                "queue.capacity must be greater than 0".to_string(),
            ));
        }

        Calibration::new(self.sensor.calibration_offset)?;

        let rate = self.sensor.sample_rate_hz;
        if !(rate.is_finite() && rate > 0.0 && rate <= MAX_SAMPLE_RATE_HZ) {
            return Err(StreamError::Configuration(format!(
                "sensor.sample_rate_hz must be in (0, {MAX_SAMPLE_RATE_HZ}], got {rate}"
            )));
        }

        Ok(())
    }

    /// Resolve `dest_addr:dest_port`.
    ///
    /// IP literals are parsed directly; anything else goes through the system
    /// resolver and the first address wins.
    pub fn destination(&self) -> AppResult<SocketAddr> {
        let host = self.network.dest_addr.trim();
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, self.network.dest_port));
        }
        (host, self.network.dest_port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                StreamError::Configuration(format!("dest_addr '{host}' did not resolve"))
            })
    }

    /// Local address for the sending socket.
    pub fn bind_addr(&self) -> AppResult<SocketAddr> {
        self.network.bind_addr.parse().map_err(|e| {
            StreamError::Configuration(format!(
                "Invalid bind_addr '{}': {e}",
                self.network.bind_addr
            ))
        })
    }

    /// Batching limits for the packetizer.
    pub fn packet_limits(&self) -> PacketLimits {
        PacketLimits {
            max_bytes: self.packet.max_bytes,
            max_samples: self.packet.max_samples,
            flush_timeout: self.packet.flush_timeout,
        }
    }

    /// Settings for the sample reader.
    pub fn reader_settings(&self) -> AppResult<ReaderSettings> {
        Ok(ReaderSettings {
            calibration: Calibration::new(self.sensor.calibration_offset)?,
            check_error_status: self.sensor.check_error_status,
            log_interval: self.sensor.log_interval,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_device() {
        let config = StreamConfig::default();
        assert_eq!(config.network.dest_port, 5005);
        assert_eq!(config.packet.max_bytes, 1200);
        assert_eq!(config.packet.max_samples, 20);
        assert_eq!(config.packet.flush_timeout, Duration::from_millis(10));
        assert_eq!(config.queue.capacity, 1024);
        assert_eq!(config.sensor.calibration_offset, 6_075_000);
        assert!(!config.sensor.check_error_status);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_destination_from_ip_literal() {
        let config = StreamConfig::default();
        assert_eq!(
            config.destination().unwrap(),
            "10.243.226.10:5005".parse().unwrap()
        );
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = StreamConfig::default();
        config.application.log_level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_log_format() {
        let mut config = StreamConfig::default();
        config.application.log_format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unusable_values() {
        let cases: Vec<fn(&mut StreamConfig)> = vec![
            |c| c.network.dest_port = 0,
            |c| c.network.bind_addr = "nowhere".to_string(),
            |c| c.packet.max_bytes = 10,
            |c| c.packet.max_bytes = 65_508,
            |c| c.packet.max_samples = 0,
            |c| c.packet.flush_timeout = Duration::ZERO,
            |c| c.queue.capacity = 0,
            |c| c.sensor.sample_rate_hz = 0.0,
            |c| c.sensor.sample_rate_hz = 1e10,
            |c| c.sensor.calibration_offset = 1 << 24,
        ];
        for mutate in cases {
            let mut config = StreamConfig::default();
            mutate(&mut config);
            assert!(
                matches!(config.validate(), Err(StreamError::Configuration(_))),
                "accepted {:?}",
                config
            );
        }
    }

    #[test]
    fn test_record_sized_datagram_is_accepted() {
        let mut config = StreamConfig::default();
        config.packet.max_bytes = crate::sample::MAX_RECORD_LEN;
        config.packet.max_samples = 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_reader_settings_carry_offset() {
        let mut config = StreamConfig::default();
        config.sensor.calibration_offset = 42;
        config.sensor.check_error_status = true;
        let settings = config.reader_settings().unwrap();
        assert_eq!(settings.calibration.offset(), 42);
        assert!(settings.check_error_status);
    }
}
