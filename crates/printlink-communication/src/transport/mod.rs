//! Byte transports the link talks through
//!
//! Provides:
//! - The blocking [`Transport`] trait with a short read timeout
//! - Serial, TCP and scripted in-memory implementations
//! - [`TransportFactory`] opening the configured transport

pub mod mock;
pub mod serial;
pub mod tcp;

pub use mock::{MockTransport, MockTransportFactory};
pub use serial::{list_ports, SerialPortInfo, SerialTransport};
pub use tcp::TcpTransport;

use crate::binary::{BinaryConfig, BinaryTransport};
use printlink_core::{keys, Result, SettingsSource};
use std::io;

/// Default serial baud rate
pub const DEFAULT_BAUD_RATE: u32 = 250_000;

/// An open byte channel to the printer
///
/// Reads return quickly: `Ok(0)` means nothing arrived within the transport's
/// short read timeout. An error means the channel is broken.
pub trait Transport: Send {
    /// Port name or address
    fn name(&self) -> String;

    /// Write every byte
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Read whatever is available into `buf`
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Close the channel
    fn close(&mut self) -> io::Result<()>;

    /// Whether the channel is open
    fn is_open(&self) -> bool;
}

/// Opens the transport named by the settings
pub trait TransportFactory: Send + Sync {
    /// Open a transport
    fn open(&self, settings: &dyn SettingsSource) -> Result<Box<dyn Transport>>;
}

/// Opens serial or TCP transports, speaking binary packets when configured
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTransportFactory;

impl TransportFactory for DefaultTransportFactory {
    fn open(&self, settings: &dyn SettingsSource) -> Result<Box<dyn Transport>> {
        let port = settings.get_string(keys::PORT_NAME);
        let transport: Box<dyn Transport> =
            if settings.get_string(keys::CONNECTION_TYPE).eq_ignore_ascii_case("tcp") {
                Box::new(TcpTransport::connect(&port)?)
            } else {
                let baud = settings.get_u32_or(keys::BAUD_RATE, DEFAULT_BAUD_RATE);
                Box::new(SerialTransport::open(&port, baud)?)
            };
        Ok(wrap_protocol(transport, settings))
    }
}

/// Wrap a transport in the binary protocol adapter when the settings ask for it
pub fn wrap_protocol(
    transport: Box<dyn Transport>,
    settings: &dyn SettingsSource,
) -> Box<dyn Transport> {
    if settings
        .get_string(keys::FIRMWARE_PROTOCOL)
        .eq_ignore_ascii_case("binary")
    {
        tracing::info!("Using binary packet protocol on {}", transport.name());
        Box::new(BinaryTransport::new(
            transport,
            BinaryConfig::from_settings(settings),
        ))
    } else {
        transport
    }
}
