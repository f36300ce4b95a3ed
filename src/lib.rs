//! # PrintLink
//!
//! A printer communication engine for 3D printers. It speaks:
//! - Checksummed, resendable text G-code over serial or TCP
//! - Binary s3g/x3g packets for MakerBot-family boards
//!
//! ## Architecture
//!
//! PrintLink is organized as a workspace with multiple crates:
//!
//! 1. **printlink-core** - Link states, data types, errors, notifications
//! 2. **printlink-settings** - Printer settings documents and the live store
//! 3. **printlink-communication** - Transports, codecs, write pipeline, connection
//! 4. **printlink** - Command-line streamer that ties the crates together

pub use printlink_communication::{binary, callbacks, pipeline, protocol, transport};
pub use printlink_core::data;

pub use printlink_communication::{
    list_ports, GcodeJob, LevelingSolution, NoLeveling, PrinterConnection, SerialPortInfo,
};
pub use printlink_core::{
    keys, ConnectionError, Error, FirmwareIdentity, LinkState, Move, Notification,
    NotificationDispatcher, NotificationKind, PauseReason, PrintTask, Result, SettingsSource,
    TemperatureState,
};
pub use printlink_settings::{PrinterSettings, SettingsError, SettingsStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Initialize logging with the default configuration
///
/// Sets up structured logging with:
/// - Console output with pretty formatting
/// - RUST_LOG environment variable support
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_thread_names(true)
        .with_line_number(true)
        .pretty();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}

/// Initialize logging as one JSON object per line, for log collectors
pub fn init_json_logging() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json().with_writer(std::io::stderr))
        .try_init()?;

    Ok(())
}
