//! Heater telemetry
//!
//! One actual/target pair per hot-end (bounded by [`MAX_EXTRUDERS`]) plus the bed.
//! Actual values come only from parsed printer reports and targets only from
//! intercepted outgoing commands, so the mirrored state always matches what
//! was transmitted.

use serde::{Deserialize, Serialize};

/// Maximum number of hot-ends tracked
pub const MAX_EXTRUDERS: usize = 16;

/// Actual and target temperatures for every heater
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemperatureState {
    hotend_actual: [f64; MAX_EXTRUDERS],
    hotend_target: [f64; MAX_EXTRUDERS],
    bed_actual: f64,
    bed_target: f64,
}

impl TemperatureState {
    /// Create a state with every heater at zero
    pub fn new() -> Self {
        Self {
            hotend_actual: [0.0; MAX_EXTRUDERS],
            hotend_target: [0.0; MAX_EXTRUDERS],
            bed_actual: 0.0,
            bed_target: 0.0,
        }
    }

    /// Actual temperature of a hot-end (0 for an out-of-range index)
    pub fn hotend_actual(&self, index: usize) -> f64 {
        self.hotend_actual.get(index).copied().unwrap_or(0.0)
    }

    /// Target temperature of a hot-end (0 for an out-of-range index)
    pub fn hotend_target(&self, index: usize) -> f64 {
        self.hotend_target.get(index).copied().unwrap_or(0.0)
    }

    /// Actual bed temperature
    pub fn bed_actual(&self) -> f64 {
        self.bed_actual
    }

    /// Target bed temperature
    pub fn bed_target(&self) -> f64 {
        self.bed_target
    }

    /// Record a reported hot-end temperature, returning true if it changed
    pub fn set_hotend_actual(&mut self, index: usize, value: f64) -> bool {
        match self.hotend_actual.get_mut(index) {
            Some(slot) if *slot != value => {
                *slot = value;
                true
            }
            _ => false,
        }
    }

    /// Record a commanded hot-end target, returning true if it changed
    pub fn set_hotend_target(&mut self, index: usize, value: f64) -> bool {
        match self.hotend_target.get_mut(index) {
            Some(slot) if *slot != value => {
                *slot = value;
                true
            }
            _ => false,
        }
    }

    /// Record a reported bed temperature, returning true if it changed
    pub fn set_bed_actual(&mut self, value: f64) -> bool {
        let changed = self.bed_actual != value;
        self.bed_actual = value;
        changed
    }

    /// Record a commanded bed target, returning true if it changed
    pub fn set_bed_target(&mut self, value: f64) -> bool {
        let changed = self.bed_target != value;
        self.bed_target = value;
        changed
    }

    /// Check if a hot-end has reached its target within `tolerance` degrees
    pub fn hotend_ready(&self, index: usize, tolerance: f64) -> bool {
        self.hotend_actual(index) >= self.hotend_target(index) - tolerance
    }

    /// Check if the bed has reached its target within `tolerance` degrees
    pub fn bed_ready(&self, tolerance: f64) -> bool {
        self.bed_actual >= self.bed_target - tolerance
    }

    /// Zero every actual reading
    pub fn zero_actuals(&mut self) {
        self.hotend_actual = [0.0; MAX_EXTRUDERS];
        self.bed_actual = 0.0;
    }

    /// Zero every target
    pub fn zero_targets(&mut self) {
        self.hotend_target = [0.0; MAX_EXTRUDERS];
        self.bed_target = 0.0;
    }

    /// Iterate over (index, actual) for all hot-ends
    pub fn hotend_actuals(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.hotend_actual.iter().copied().enumerate()
    }
}

impl Default for TemperatureState {
    fn default() -> Self {
        Self::new()
    }
}
