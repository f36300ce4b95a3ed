//! Read-only settings lookup consumed by the link
//!
//! The link never owns configuration. It reads values by key through
//! [`SettingsSource`] every time it needs them, so a value changed by the
//! settings collaborator (a feed-rate ratio tweaked mid-print, a new write
//! regex) takes effect on the next line.

use std::collections::HashMap;

/// Keys the link reads
pub mod keys {
    /// Serial port name or `host:port` network address
    pub const PORT_NAME: &str = "com_port";
    /// Serial baud rate
    pub const BAUD_RATE: &str = "baud_rate";
    /// `serial` or `tcp`
    pub const CONNECTION_TYPE: &str = "connection_type";
    /// `text` or `binary`
    pub const FIRMWARE_PROTOCOL: &str = "firmware_protocol";
    /// Frame lines with sequence numbers and checksums
    pub const SEND_WITH_CHECKSUM: &str = "send_with_checksum";
    /// Handshake timeout in milliseconds
    pub const CONNECT_TIMEOUT_MS: &str = "connect_timeout_ms";
    /// Regex rules applied to received lines
    pub const READ_REGEX: &str = "read_regex";
    /// Regex rules applied to outgoing lines
    pub const WRITE_REGEX: &str = "write_regex";
    /// Extrusion multiplier
    pub const EXTRUSION_RATIO: &str = "extrusion_ratio";
    /// Feed-rate multiplier
    pub const FEED_RATE_RATIO: &str = "feedrate_ratio";
    /// Enable print recovery after an interruption
    pub const RECOVER_ENABLED: &str = "recover_is_enabled";
    /// First-layer speed (mm/s) used while recovering
    pub const RECOVER_FIRST_LAYER_SPEED: &str = "recover_first_layer_speed";
    /// `x,y` position to move to before homing Z during recovery
    pub const RECOVER_POSITION_BEFORE_Z_HOME: &str = "recover_position_before_z_home";
    /// Z homes to the top of the machine
    pub const Z_HOMES_TO_MAX: &str = "z_homes_to_max";
    /// The machine has a heated bed
    pub const HAS_HEATED_BED: &str = "has_heated_bed";
    /// Bed temperature of the loaded material
    pub const BED_TEMPERATURE: &str = "bed_temperature";
    /// Hot-end temperature of the loaded material
    pub const EXTRUDER_TEMPERATURE: &str = "temperature";
    /// Number of extruders
    pub const EXTRUDER_COUNT: &str = "extruder_count";
    /// Nozzle diameter in millimeters
    pub const NOZZLE_DIAMETER: &str = "nozzle_diameter";
    /// Apply leveling compensation
    pub const PRINT_LEVELING_ENABLED: &str = "print_leveling_enabled";
    /// Interactive Z nudge in millimeters
    pub const BABY_STEP_Z_OFFSET: &str = "baby_step_z_offset";
    /// Prefix of per-tool `x,y,z` offsets (`extruder_offset_1`)
    pub const EXTRUDER_OFFSET_PREFIX: &str = "extruder_offset_";
    /// G-code queued after connecting
    pub const CONNECT_GCODE: &str = "connect_gcode";
    /// G-code queued when a print is cancelled
    pub const CANCEL_GCODE: &str = "cancel_gcode";
    /// G-code injected when pausing
    pub const PAUSE_GCODE: &str = "pause_gcode";
    /// G-code injected when resuming
    pub const RESUME_GCODE: &str = "resume_gcode";
    /// Comma-separated one-based layer numbers to pause on
    pub const LAYERS_TO_PAUSE: &str = "layer_to_pause";
    /// Temperature poll interval in milliseconds
    pub const TEMPERATURE_POLL_INTERVAL_MS: &str = "temperature_poll_interval_ms";
    /// Manual XY movement speed in mm/min
    pub const MANUAL_SPEED_XY: &str = "manual_movement_speed_xy";
    /// Manual Z movement speed in mm/min
    pub const MANUAL_SPEED_Z: &str = "manual_movement_speed_z";
    /// Manual extruder movement speed in mm/min
    pub const MANUAL_SPEED_E: &str = "manual_movement_speed_e";
    /// Outer perimeter speed in mm/s
    pub const PERIMETER_SPEED: &str = "perimeter_speed";
    /// Prefix of named macros (`macro.purge`)
    pub const MACRO_PREFIX: &str = "macro.";
    /// `x,y,z` steps per millimeter for binary-protocol machines
    pub const BINARY_STEPS_PER_MM: &str = "binary_steps_per_mm";
    /// Extruder steps per millimeter for binary-protocol machines
    pub const BINARY_EXTRUDER_STEPS_PER_MM: &str = "binary_extruder_steps_per_mm";
    /// `xy,z` homing feed rates for binary-protocol machines
    pub const BINARY_HOMING_FEED_RATE: &str = "binary_homing_feed_rate";
}

/// Read-only key/value lookup supplied by the settings collaborator
pub trait SettingsSource: Send + Sync {
    /// Raw value for a key
    fn get(&self, key: &str) -> Option<String>;

    /// Value for a key, or an empty string
    fn get_string(&self, key: &str) -> String {
        self.get(key).unwrap_or_default()
    }

    /// Boolean value (`1`, `true`, `yes`, `on`), false when missing
    fn get_bool(&self, key: &str) -> bool {
        self.get(key)
            .map(|v| {
                matches!(
                    v.trim().to_ascii_lowercase().as_str(),
                    "1" | "true" | "yes" | "on"
                )
            })
            .unwrap_or(false)
    }

    /// Floating point value, if present and parseable
    fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|v| v.trim().parse::<f64>().ok())
    }

    /// Floating point value with a default
    fn get_f64_or(&self, key: &str, default: f64) -> f64 {
        self.get_f64(key).unwrap_or(default)
    }

    /// Unsigned integer value with a default
    fn get_u32_or(&self, key: &str, default: u32) -> u32 {
        self.get(key)
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(default)
    }

    /// Comma-separated list of floats (`"1.5,2"`), empty when missing
    fn get_f64_list(&self, key: &str) -> Vec<f64> {
        self.get(key)
            .map(|v| {
                v.split(',')
                    .filter_map(|part| part.trim().parse::<f64>().ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl SettingsSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

/// Settings source with no values, every lookup falls back to defaults
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptySettings;

impl SettingsSource for EmptySettings {
    fn get(&self, _key: &str) -> Option<String> {
        None
    }
}
