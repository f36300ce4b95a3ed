//! Printer configuration document
//!
//! Provides the configuration file the link reads its settings from.
//! Supports JSON and TOML file formats stored in the platform config directory.
//!
//! Configuration is organized into logical sections:
//! - Connection settings (port, baud rate, protocol, checksums)
//! - Machine description (extruders, bed, speeds, offsets)
//! - Material temperatures
//! - G-code snippets and line filters
//! - Print behavior (ratios, leveling, recovery)

use crate::error::{SettingsError, SettingsResult};
use printlink_core::keys;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Connection transport type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    /// Serial/USB connection
    #[default]
    Serial,
    /// Serial-emulating TCP connection
    Tcp,
}

impl std::fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serial => write!(f, "serial"),
            Self::Tcp => write!(f, "tcp"),
        }
    }
}

/// Wire protocol spoken by the firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FirmwareProtocol {
    /// Newline-terminated G-code text
    #[default]
    Text,
    /// Length-prefixed CRC-checked binary packets
    Binary,
}

impl std::fmt::Display for FirmwareProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Binary => write!(f, "binary"),
        }
    }
}

/// Connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Serial port name or `host:port` address
    pub port: String,
    /// Baud rate for serial connections
    pub baud_rate: u32,
    /// Transport type
    pub connection_type: ConnectionType,
    /// Wire protocol
    pub protocol: FirmwareProtocol,
    /// Frame lines with sequence numbers and checksums
    pub send_with_checksum: bool,
    /// Handshake timeout in milliseconds
    pub connect_timeout_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 250_000,
            connection_type: ConnectionType::Serial,
            protocol: FirmwareProtocol::Text,
            send_with_checksum: true,
            connect_timeout_ms: 10_000,
        }
    }
}

/// Machine description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineSettings {
    /// Number of extruders
    pub extruder_count: u32,
    /// The machine has a heated bed
    pub has_heated_bed: bool,
    /// Z homes to the top of the machine
    pub z_homes_to_max: bool,
    /// Nozzle diameter in millimeters
    pub nozzle_diameter: f64,
    /// Manual XY speed in mm/min
    pub manual_speed_xy: f64,
    /// Manual Z speed in mm/min
    pub manual_speed_z: f64,
    /// Manual extruder speed in mm/min
    pub manual_speed_e: f64,
    /// Outer perimeter speed in mm/s
    pub perimeter_speed: f64,
    /// Per-tool X/Y/Z offsets relative to tool 0
    pub extruder_offsets: Vec<[f64; 3]>,
    /// Interactive Z nudge in millimeters
    pub baby_step_z_offset: f64,
    /// Steps per millimeter for X, Y, Z on binary-protocol machines
    pub binary_steps_per_mm: [f64; 3],
    /// Extruder steps per millimeter on binary-protocol machines
    pub binary_extruder_steps_per_mm: f64,
    /// Homing feed rates for XY and Z on binary-protocol machines
    pub binary_homing_feed_rate: [f64; 2],
}

impl Default for MachineSettings {
    fn default() -> Self {
        Self {
            extruder_count: 1,
            has_heated_bed: true,
            z_homes_to_max: false,
            nozzle_diameter: 0.4,
            manual_speed_xy: 3000.0,
            manual_speed_z: 600.0,
            manual_speed_e: 300.0,
            perimeter_speed: 30.0,
            extruder_offsets: Vec::new(),
            baby_step_z_offset: 0.0,
            binary_steps_per_mm: [88.573186, 88.573186, 400.0],
            binary_extruder_steps_per_mm: 96.275,
            binary_homing_feed_rate: [300.0, 400.0],
        }
    }
}

/// Temperatures of the loaded material
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterialSettings {
    /// Hot-end temperature in degrees Celsius
    pub temperature: f64,
    /// Bed temperature in degrees Celsius
    pub bed_temperature: f64,
}

impl Default for MaterialSettings {
    fn default() -> Self {
        Self {
            temperature: 200.0,
            bed_temperature: 60.0,
        }
    }
}

/// G-code snippets and line filters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcodeSettings {
    /// Queued after connecting
    pub connect_gcode: String,
    /// Injected when pausing
    pub pause_gcode: String,
    /// Injected when resuming
    pub resume_gcode: String,
    /// Queued when a print is cancelled
    pub cancel_gcode: String,
    /// `"search","replace"` rules applied to received lines
    pub read_regex: String,
    /// `"search","replace"` rules applied to outgoing lines
    pub write_regex: String,
    /// Comma-separated one-based layer numbers to pause on
    pub layer_to_pause: String,
    /// Named macros invoked as `@name`
    pub macros: BTreeMap<String, String>,
}

impl Default for GcodeSettings {
    fn default() -> Self {
        Self {
            connect_gcode: String::new(),
            pause_gcode: String::new(),
            resume_gcode: String::new(),
            cancel_gcode: "M104 S0\nM140 S0\nM84".to_string(),
            read_regex: String::new(),
            write_regex: String::new(),
            layer_to_pause: String::new(),
            macros: BTreeMap::new(),
        }
    }
}

/// Print behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrintSettings {
    /// Extrusion multiplier
    pub extrusion_ratio: f64,
    /// Feed-rate multiplier
    pub feedrate_ratio: f64,
    /// Apply leveling compensation
    pub print_leveling_enabled: bool,
    /// Resume interrupted prints through recovery
    pub recover_is_enabled: bool,
    /// First-layer speed in mm/s used while recovering
    pub recover_first_layer_speed: f64,
    /// XY position to move to before homing Z during recovery
    pub recover_position_before_z_home: [f64; 2],
    /// Temperature poll interval in milliseconds
    pub temperature_poll_interval_ms: u64,
}

impl Default for PrintSettings {
    fn default() -> Self {
        Self {
            extrusion_ratio: 1.0,
            feedrate_ratio: 1.0,
            print_leveling_enabled: false,
            recover_is_enabled: false,
            recover_first_layer_speed: 10.0,
            recover_position_before_z_home: [0.0, 0.0],
            temperature_poll_interval_ms: 1000,
        }
    }
}

/// Complete printer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PrinterSettings {
    /// Connection settings
    pub connection: ConnectionSettings,
    /// Machine description
    pub machine: MachineSettings,
    /// Material temperatures
    pub material: MaterialSettings,
    /// G-code snippets and filters
    pub gcode: GcodeSettings,
    /// Print behavior
    pub print: PrintSettings,
}

impl PrinterSettings {
    /// Create new settings with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Default location of the configuration file
    pub fn default_path() -> SettingsResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("printlink").join("printer.toml"))
            .ok_or_else(|| {
                SettingsError::ConfigDirectory("no platform config directory".to_string())
            })
    }

    /// Load from the default location, falling back to defaults when absent
    pub fn load_or_default() -> SettingsResult<Self> {
        let path = Self::default_path()?;
        if path.exists() {
            Self::load_from_file(&path)
        } else {
            tracing::debug!("No settings at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Load settings from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SettingsError::LoadError(format!("{}: {}", path.display(), e)))?;

        let settings: Self = match extension(path) {
            Some("json") => serde_json::from_str(&content)?,
            Some("toml") => toml::from_str(&content)?,
            other => {
                return Err(SettingsError::UnsupportedFormat(
                    other.unwrap_or("<none>").to_string(),
                ))
            }
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Save settings to file (JSON or TOML)
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;

        let content = match extension(path) {
            Some("json") => serde_json::to_string_pretty(self)?,
            Some("toml") => toml::to_string_pretty(self)?,
            other => {
                return Err(SettingsError::UnsupportedFormat(
                    other.unwrap_or("<none>").to_string(),
                ))
            }
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)
            .map_err(|e| SettingsError::SaveError(format!("{}: {}", path.display(), e)))?;

        Ok(())
    }

    /// Validate settings
    pub fn validate(&self) -> SettingsResult<()> {
        if self.connection.baud_rate == 0 {
            return Err(SettingsError::invalid(keys::BAUD_RATE, "must be > 0"));
        }

        if self.connection.connect_timeout_ms == 0 {
            return Err(SettingsError::invalid(keys::CONNECT_TIMEOUT_MS, "must be > 0"));
        }

        if self.machine.extruder_count == 0
            || self.machine.extruder_count as usize > printlink_core::MAX_EXTRUDERS
        {
            return Err(SettingsError::invalid(
                keys::EXTRUDER_COUNT,
                format!("must be between 1 and {}", printlink_core::MAX_EXTRUDERS),
            ));
        }

        if self.print.extrusion_ratio <= 0.0 {
            return Err(SettingsError::invalid(keys::EXTRUSION_RATIO, "must be > 0"));
        }

        if self.print.feedrate_ratio <= 0.0 {
            return Err(SettingsError::invalid(keys::FEED_RATE_RATIO, "must be > 0"));
        }

        if self.machine.binary_steps_per_mm.iter().any(|s| *s <= 0.0)
            || self.machine.binary_extruder_steps_per_mm <= 0.0
        {
            return Err(SettingsError::invalid(
                keys::BINARY_STEPS_PER_MM,
                "steps per millimeter must be > 0",
            ));
        }

        Ok(())
    }

    /// Flatten into the key/value pairs the link looks up
    pub fn entries(&self) -> Vec<(String, String)> {
        let c = &self.connection;
        let m = &self.machine;
        let g = &self.gcode;
        let p = &self.print;

        let mut entries = vec![
            (keys::PORT_NAME, c.port.clone()),
            (keys::BAUD_RATE, c.baud_rate.to_string()),
            (keys::CONNECTION_TYPE, c.connection_type.to_string()),
            (keys::FIRMWARE_PROTOCOL, c.protocol.to_string()),
            (keys::SEND_WITH_CHECKSUM, flag(c.send_with_checksum)),
            (keys::CONNECT_TIMEOUT_MS, c.connect_timeout_ms.to_string()),
            (keys::EXTRUDER_COUNT, m.extruder_count.to_string()),
            (keys::HAS_HEATED_BED, flag(m.has_heated_bed)),
            (keys::Z_HOMES_TO_MAX, flag(m.z_homes_to_max)),
            (keys::NOZZLE_DIAMETER, m.nozzle_diameter.to_string()),
            (keys::MANUAL_SPEED_XY, m.manual_speed_xy.to_string()),
            (keys::MANUAL_SPEED_Z, m.manual_speed_z.to_string()),
            (keys::MANUAL_SPEED_E, m.manual_speed_e.to_string()),
            (keys::PERIMETER_SPEED, m.perimeter_speed.to_string()),
            (keys::BABY_STEP_Z_OFFSET, m.baby_step_z_offset.to_string()),
            (keys::BINARY_STEPS_PER_MM, join(&m.binary_steps_per_mm)),
            (
                keys::BINARY_EXTRUDER_STEPS_PER_MM,
                m.binary_extruder_steps_per_mm.to_string(),
            ),
            (keys::BINARY_HOMING_FEED_RATE, join(&m.binary_homing_feed_rate)),
            (keys::EXTRUDER_TEMPERATURE, self.material.temperature.to_string()),
            (keys::BED_TEMPERATURE, self.material.bed_temperature.to_string()),
            (keys::CONNECT_GCODE, g.connect_gcode.clone()),
            (keys::PAUSE_GCODE, g.pause_gcode.clone()),
            (keys::RESUME_GCODE, g.resume_gcode.clone()),
            (keys::CANCEL_GCODE, g.cancel_gcode.clone()),
            (keys::READ_REGEX, g.read_regex.clone()),
            (keys::WRITE_REGEX, g.write_regex.clone()),
            (keys::LAYERS_TO_PAUSE, g.layer_to_pause.clone()),
            (keys::EXTRUSION_RATIO, p.extrusion_ratio.to_string()),
            (keys::FEED_RATE_RATIO, p.feedrate_ratio.to_string()),
            (keys::PRINT_LEVELING_ENABLED, flag(p.print_leveling_enabled)),
            (keys::RECOVER_ENABLED, flag(p.recover_is_enabled)),
            (
                keys::RECOVER_FIRST_LAYER_SPEED,
                p.recover_first_layer_speed.to_string(),
            ),
            (
                keys::RECOVER_POSITION_BEFORE_Z_HOME,
                join(&p.recover_position_before_z_home),
            ),
            (
                keys::TEMPERATURE_POLL_INTERVAL_MS,
                p.temperature_poll_interval_ms.to_string(),
            ),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect::<Vec<_>>();

        for (index, offset) in m.extruder_offsets.iter().enumerate() {
            entries.push((
                format!("{}{}", keys::EXTRUDER_OFFSET_PREFIX, index),
                join(offset),
            ));
        }

        for (name, body) in &g.macros {
            entries.push((
                format!("{}{}", keys::MACRO_PREFIX, name.to_ascii_lowercase()),
                body.clone(),
            ));
        }

        entries
    }
}

fn extension(path: &Path) -> Option<&str> {
    path.extension().and_then(|ext| ext.to_str())
}

fn flag(value: bool) -> String {
    if value { "1" } else { "0" }.to_string()
}

fn join(values: &[f64]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
