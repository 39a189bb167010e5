//! Error-status block decoding.
//!
//! Read once at startup to report electrode and front-end health. The result is
//! informational: a general error is surfaced to the caller, who decides whether
//! to continue.

use serde::Serialize;
use tracing::{error, info, warn};

use super::registers::{self, Hex};
use super::SensorBus;
use crate::error::{AppResult, StreamError};

/// Snapshot of the seven error-status registers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    /// Lead-off detect flags.
    pub lead_off: u8,
    /// General error status.
    pub status: u8,
    /// Per-channel AFE out-of-range flags.
    pub range: [u8; 3],
    /// Synchronization error flags.
    pub sync: u8,
    /// Miscellaneous error flags.
    pub misc: u8,
}

impl Diagnostics {
    /// An electrode is disconnected.
    pub fn lead_off(&self) -> bool {
        self.lead_off != 0
    }

    /// Any channel saturated its analog front end.
    pub fn out_of_range(&self) -> bool {
        self.range.iter().any(|&r| r != 0)
    }

    /// Digital filter synchronization was lost.
    pub fn sync_error(&self) -> bool {
        self.sync != 0
    }

    /// The general error status is set.
    pub fn general_error(&self) -> bool {
        self.status != 0
    }

    /// No flag of any kind is raised.
    pub fn is_clean(&self) -> bool {
        !(self.lead_off() || self.out_of_range() || self.sync_error() || self.general_error())
            && self.misc == 0
    }

    /// Log every register and any raised condition.
    pub fn log(&self) {
        info!(
            lead_off = %Hex(self.lead_off),
            status = %Hex(self.status),
            range1 = %Hex(self.range[0]),
            range2 = %Hex(self.range[1]),
            range3 = %Hex(self.range[2]),
            sync = %Hex(self.sync),
            misc = %Hex(self.misc),
            "Front end error registers"
        );
        if self.lead_off() {
            warn!("Lead-off detected (check electrode connections)");
        }
        if self.out_of_range() {
            warn!("Out-of-range detected");
        }
        if self.sync_error() {
            warn!("Sync error (possible noise or clock issue)");
        }
        if self.general_error() {
            error!(status = self.status, "General error status set");
        } else if self.is_clean() {
            info!("No errors detected");
        }
    }

    /// Fail on a general error. The other flags are advisory.
    pub fn check(&self) -> AppResult<()> {
        if self.general_error() {
            return Err(StreamError::SensorFault(self.status));
        }
        Ok(())
    }
}

/// Read the full error-status block.
pub async fn read_diagnostics<B: SensorBus + ?Sized>(bus: &mut B) -> AppResult<Diagnostics> {
    Ok(Diagnostics {
        lead_off: bus.read_register(registers::ERROR_LOD).await?,
        status: bus.read_register(registers::ERROR_STATUS).await?,
        range: [
            bus.read_register(registers::ERROR_RANGE1).await?,
            bus.read_register(registers::ERROR_RANGE2).await?,
            bus.read_register(registers::ERROR_RANGE3).await?,
        ],
        sync: bus.read_register(registers::ERROR_SYNC).await?,
        misc: bus.read_register(registers::ERROR_MISC).await?,
    })
}
