//! Custom error types for the streaming pipeline.
//!
//! This module defines the primary error type, `StreamError`. Using the `thiserror`
//! crate, it provides one consistent way to describe the failures that can reach a
//! caller of this library.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically file parsing or type
//!   mismatches while extracting the configuration.
//! - **`Configuration`**: Semantic errors in values that parsed fine but are
//!   unusable (e.g. a packet size smaller than one record).
//! - **`Io`**: Wraps `std::io::Error` for socket setup and other I/O.
//! - **`Sensor`**: A failed bus transaction with the sensor front end.
//! - **`SensorFault`**: The sensor reported a general error in its status register.
//! - **`LinkTimeout`**: The network link never came up during startup.
//! - **`Decode`**: A received line does not follow the record format.
//!
//! Steady-state failures inside the running pipeline never travel as values of
//! this type. They are logged and counted where they happen; only startup and
//! the receiving side return `StreamError`.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the library error type.
pub type AppResult<T> = std::result::Result<T, StreamError>;

#[allow(missing_docs)]
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sensor bus error: {0}")]
    Sensor(String),

    #[error("Sensor reported general error status 0x{0:02X}")]
    SensorFault(u8),

    #[error("Network link not ready after {0:?}")]
    LinkTimeout(Duration),

    #[error("Link monitor closed before the link came up")]
    LinkClosed,

    #[error("Malformed record at line {line}: {reason}")]
    Decode { line: usize, reason: String },
}

impl From<figment::Error> for StreamError {
    fn from(err: figment::Error) -> Self {
        StreamError::Config(Box::new(err))
    }
}

impl StreamError {
    /// Whether the pipeline can keep running after this error.
    ///
    /// Sensor transactions and malformed datagrams only cost one unit of work;
    /// everything else happens at startup and is fatal.
    pub fn is_transient(&self) -> bool {
        matches!(self, StreamError::Sensor(_) | StreamError::Decode { .. })
    }
}
