//! Firmware identity reported by the printer

use serde::{Deserialize, Serialize};
use std::fmt;

/// What the printer says it is running
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareIdentity {
    /// Firmware family in lowercase (`marlin`, `repetier`, `smoothieware`, ...)
    pub name: String,
    /// Firmware version string, if reported
    pub version: Option<String>,
    /// Machine type, if reported
    pub machine_type: Option<String>,
    /// Device code embedded in the machine type after `^`
    pub device_code: Option<String>,
    /// Number of extruders, if reported
    pub extruder_count: Option<u32>,
}

impl FirmwareIdentity {
    /// Check if the firmware family matches (case-insensitive)
    pub fn is(&self, family: &str) -> bool {
        self.name.eq_ignore_ascii_case(family)
    }
}

impl fmt::Display for FirmwareIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(version) = &self.version {
            write!(f, " {}", version)?;
        }
        if let Some(machine) = &self.machine_type {
            write!(f, " ({})", machine)?;
        }
        Ok(())
    }
}
