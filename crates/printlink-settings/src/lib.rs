//! PrintLink Settings Crate
//!
//! Handles printer configuration documents, their persistence, and the live
//! key/value store the link reads from.

pub mod config;
pub mod error;
pub mod store;

pub use config::{
    ConnectionSettings, ConnectionType, FirmwareProtocol, GcodeSettings, MachineSettings,
    MaterialSettings, PrintSettings, PrinterSettings,
};
pub use error::{SettingsError, SettingsResult};
pub use store::SettingsStore;
