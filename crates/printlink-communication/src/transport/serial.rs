//! Serial port transport
//!
//! Provides port enumeration and a blocking serial transport with a short
//! read timeout so the read loop can poll it.

use super::Transport;
use printlink_core::{ConnectionError, Result};
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};
use std::time::Duration;

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialPortInfo {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    pub port_name: String,

    /// Port description (e.g., "USB Serial Port")
    pub description: String,

    /// Manufacturer name if available
    pub manufacturer: Option<String>,

    /// USB vendor ID if applicable
    pub vid: Option<u16>,

    /// USB product ID if applicable
    pub pid: Option<u16>,
}

/// List serial ports a printer may be attached to
///
/// Keeps only:
/// - Windows: COM* (e.g., COM1, COM3)
/// - Linux: /dev/ttyUSB*, /dev/ttyACM*
/// - macOS: /dev/cu.usbserial-*, /dev/cu.usbmodem*
pub fn list_ports() -> Result<Vec<SerialPortInfo>> {
    let ports = serialport::available_ports().map_err(|e| {
        tracing::error!("Failed to enumerate serial ports: {}", e);
        ConnectionError::Io {
            message: format!("Failed to enumerate ports: {}", e),
        }
    })?;

    Ok(ports
        .into_iter()
        .filter(|port| is_printer_port(&port.port_name))
        .map(|port| match port.port_type {
            serialport::SerialPortType::UsbPort(usb) => SerialPortInfo {
                description: format!(
                    "USB {} {}",
                    usb.manufacturer.as_deref().unwrap_or("Device"),
                    usb.product.as_deref().unwrap_or("Serial Port")
                ),
                manufacturer: usb.manufacturer,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                port_name: port.port_name,
            },
            serialport::SerialPortType::BluetoothPort => SerialPortInfo {
                port_name: port.port_name,
                description: "Bluetooth Serial".to_string(),
                manufacturer: None,
                vid: None,
                pid: None,
            },
            _ => SerialPortInfo {
                port_name: port.port_name,
                description: "Serial Port".to_string(),
                manufacturer: None,
                vid: None,
                pid: None,
            },
        })
        .collect())
}

fn is_printer_port(port_name: &str) -> bool {
    if let Some(number) = port_name.strip_prefix("COM") {
        return !number.is_empty() && number.chars().all(|c| c.is_ascii_digit());
    }

    port_name.starts_with("/dev/ttyUSB")
        || port_name.starts_with("/dev/ttyACM")
        || port_name.starts_with("/dev/cu.usbserial-")
        || port_name.starts_with("/dev/cu.usbmodem")
}

/// Trait for serial port I/O operations
trait ReadWrite: Read + Write + Send {}
impl<T: Read + Write + Send> ReadWrite for T {}

/// Serial transport using the serialport crate
pub struct SerialTransport {
    name: String,
    port: Option<Box<dyn ReadWrite>>,
}

impl SerialTransport {
    /// Open a serial port at the given baud rate
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self> {
        if port_name.is_empty() {
            return Err(ConnectionError::PortUnavailable {
                port: port_name.to_string(),
                reason: "no port configured".to_string(),
            }
            .into());
        }

        let port = serialport::new(port_name, baud_rate)
            .timeout(Duration::from_millis(10))
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .flow_control(serialport::FlowControl::None)
            .open_native()
            .map_err(|e| {
                tracing::warn!("Failed to open serial port {}: {}", port_name, e);
                ConnectionError::PortUnavailable {
                    port: port_name.to_string(),
                    reason: e.to_string(),
                }
            })?;

        tracing::info!("Opened {} at {} baud", port_name, baud_rate);
        Ok(Self {
            name: port_name.to_string(),
            port: Some(Box::new(port)),
        })
    }

    fn port(&mut self) -> io::Result<&mut Box<dyn ReadWrite>> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "serial port closed"))
    }
}

impl Transport for SerialTransport {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let port = self.port()?;
        port.write_all(data)?;
        port.flush()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.port()?.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        if self.port.take().is_some() {
            tracing::debug!("Closed serial port {}", self.name);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_printer_port_patterns() {
        assert!(is_printer_port("COM3"));
        assert!(is_printer_port("/dev/ttyACM0"));
        assert!(is_printer_port("/dev/cu.usbmodem1421"));
        assert!(!is_printer_port("COM"));
        assert!(!is_printer_port("/dev/ttyS0"));
    }

    #[test]
    fn test_open_without_port_fails() {
        assert!(SerialTransport::open("", 250_000).is_err());
    }
}
