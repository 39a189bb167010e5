//! ADS1293 register addresses and SPI command framing.
//!
//! Only the registers the pipeline touches are listed: streaming setup, the
//! error status block, and the loop read-back address.

/// Main configuration (start / standby / power-down).
pub const CONFIG: u8 = 0x00;
/// Flex routing switch for channel 1.
pub const FLEX_CH1_CN: u8 = 0x01;
/// Flex routing switch for channel 2.
pub const FLEX_CH2_CN: u8 = 0x02;
/// Flex routing switch for channel 3.
pub const FLEX_CH3_CN: u8 = 0x03;
/// Common-mode detect enable.
pub const CMDET_EN: u8 = 0x0A;
/// Right-leg drive control.
pub const RLD_CN: u8 = 0x0C;
/// Clock source and output clock control.
pub const OSC_CN: u8 = 0x12;

/// Lead-off detect error status.
pub const ERROR_LOD: u8 = 0x18;
/// Other error status.
pub const ERROR_STATUS: u8 = 0x19;
/// Channel 1 AFE out-of-range status.
pub const ERROR_RANGE1: u8 = 0x1A;
/// Channel 2 AFE out-of-range status.
pub const ERROR_RANGE2: u8 = 0x1B;
/// Channel 3 AFE out-of-range status.
pub const ERROR_RANGE3: u8 = 0x1C;
/// Synchronization error.
pub const ERROR_SYNC: u8 = 0x1D;
/// Miscellaneous errors.
pub const ERROR_MISC: u8 = 0x1E;

/// R2 decimation rate.
pub const R2_RATE: u8 = 0x21;
/// R3 decimation rate, channel 1.
pub const R3_RATE_CH1: u8 = 0x22;
/// R3 decimation rate, channel 2.
pub const R3_RATE_CH2: u8 = 0x23;
/// R3 decimation rate, channel 3.
pub const R3_RATE_CH3: u8 = 0x24;
/// Data-ready pin source.
pub const DRDYB_SRC: u8 = 0x27;
/// Channel configuration for loop read-back mode.
pub const CH_CNFG: u8 = 0x2F;

/// Revision ID.
pub const REVID: u8 = 0x40;
/// Loop read-back address: streams all enabled channel data.
pub const DATA_LOOP: u8 = 0x50;

/// `CONFIG` bit that starts conversions.
pub const START_CON: u8 = 0x01;

const READ_FLAG: u8 = 0x80;

/// Displays a register address or value as `0xNN`.
#[derive(Debug, Clone, Copy)]
pub struct Hex(pub u8);

impl std::fmt::Display for Hex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

/// Command byte for reading `reg`.
#[inline]
pub const fn read_command(reg: u8) -> u8 {
    READ_FLAG | reg
}

/// Command byte for writing `reg`.
#[inline]
pub const fn write_command(reg: u8) -> u8 {
    reg & !READ_FLAG
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_framing() {
        assert_eq!(read_command(DATA_LOOP), 0xD0);
        assert_eq!(read_command(ERROR_STATUS), 0x99);
        assert_eq!(write_command(CONFIG), 0x00);
        assert_eq!(write_command(0xAF), 0x2F);
        assert_eq!(Hex(0x0A).to_string(), "0x0A");
    }
}
