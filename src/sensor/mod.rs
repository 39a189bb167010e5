//! Sensor front end: bus abstraction, streaming setup and diagnostics.
//!
//! The pipeline only ever talks to the sensor through [`SensorBus`], which
//! covers the three things the hardware offers:
//!
//! - a streaming multi-byte read of a register range (the channel data)
//! - single-register reads and writes (configuration and diagnostics)
//! - the level of the digital alarm line
//!
//! Real hardware implements this over SPI plus a GPIO input. This crate ships
//! [`SimulatedSensor`] for running and testing without a board.
//!
//! # Thread Safety
//!
//! The bus is owned by exactly one task (the sample reader after startup), so
//! methods take `&mut self`. Only `Send` is required.

pub mod diagnostics;
pub mod registers;
pub mod simulated;

pub use diagnostics::{read_diagnostics, Diagnostics};
pub use simulated::{EdgeClock, SimulatedSensor, SimulatedSensorHandle};

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::AppResult;
use registers::Hex;

/// Access to the sensor's register interface and alarm line.
#[async_trait]
pub trait SensorBus: Send {
    /// Read `buf.len()` bytes starting at `reg` in one transaction.
    ///
    /// # Returns
    /// - Ok(()) with `buf` filled
    /// - Err on a failed bus transaction; `buf` contents are unspecified
    async fn read_stream(&mut self, reg: u8, buf: &mut [u8]) -> AppResult<()>;

    /// Read one register.
    async fn read_register(&mut self, reg: u8) -> AppResult<u8>;

    /// Write one register.
    async fn write_register(&mut self, reg: u8, value: u8) -> AppResult<()>;

    /// Current level of the alarm line.
    fn alarm_level(&mut self) -> bool;
}

/// Register writes that put the front end in 3-lead streaming mode.
pub const STREAMING_SEQUENCE: &[(u8, u8)] = &[
    (registers::FLEX_CH1_CN, 0x11),
    (registers::FLEX_CH2_CN, 0x19),
    (registers::FLEX_CH3_CN, 0x1C),
    (registers::CMDET_EN, 0x0F),
    (registers::RLD_CN, 0x05),
    (registers::OSC_CN, 0x04),
    (registers::R2_RATE, 0x02),
    (registers::R3_RATE_CH1, 0x02),
    (registers::R3_RATE_CH2, 0x02),
    (registers::R3_RATE_CH3, 0x02),
    (registers::DRDYB_SRC, 0x10),
    (registers::CH_CNFG, 0x70),
];

const RESET_SETTLE: Duration = Duration::from_millis(10);
const WRITE_GAP: Duration = Duration::from_millis(1);
const CONFIG_SETTLE: Duration = Duration::from_millis(50);

/// Stop conversions and program the streaming configuration.
///
/// Conversions stay stopped; call [`start_conversion`] once the consumer side
/// of the pipeline is running.
pub async fn configure_for_streaming<B: SensorBus + ?Sized>(bus: &mut B) -> AppResult<()> {
    info!("Configuring front end for 3-lead streaming");

    bus.write_register(registers::CONFIG, 0x00).await?;
    tokio::time::sleep(RESET_SETTLE).await;

    for &(reg, value) in STREAMING_SEQUENCE {
        debug!(reg = %Hex(reg), value = %Hex(value), "write");
        bus.write_register(reg, value).await?;
        tokio::time::sleep(WRITE_GAP).await;
    }

    tokio::time::sleep(CONFIG_SETTLE).await;
    info!("Front end configured (streaming mode enabled)");
    Ok(())
}

/// Start continuous conversions. Data-ready edges begin after this.
pub async fn start_conversion<B: SensorBus + ?Sized>(bus: &mut B) -> AppResult<()> {
    bus.write_register(registers::CONFIG, registers::START_CON).await
}
