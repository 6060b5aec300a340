//! Serial port transport
//!
//! Provides port enumeration and a [`LineTransport`] backed by the
//! `serialport` crate. The port is cloned once on open so the reader thread
//! and the write channel never contend for the same handle.

use super::{ConnectionParams, LineTransport, SerialParity};
use gcodelink_core::{ConnectionError, Error, LineEnding, Result};
use parking_lot::Mutex;
use std::io::{self, BufRead, BufReader, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialPortInfo {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    pub port_name: String,

    /// Port description (e.g., "USB FTDI Serial Port")
    pub description: String,

    /// Manufacturer name if available
    pub manufacturer: Option<String>,

    /// USB vendor/product IDs if applicable
    pub usb_ids: Option<(u16, u16)>,
}

/// List serial ports that look like CNC controllers
///
/// Keeps only COM*, /dev/ttyUSB*, /dev/ttyACM*, /dev/cu.usbserial-* and
/// /dev/cu.usbmodem* devices.
pub fn list_ports() -> Result<Vec<SerialPortInfo>> {
    let ports = serialport::available_ports().map_err(|e| {
        tracing::error!("Failed to enumerate serial ports: {}", e);
        Error::other(format!("Failed to enumerate ports: {}", e))
    })?;

    Ok(ports
        .iter()
        .filter(|port| is_cnc_port(&port.port_name))
        .map(|port| {
            let (manufacturer, usb_ids) = match &port.port_type {
                serialport::SerialPortType::UsbPort(usb) => {
                    (usb.manufacturer.clone(), Some((usb.vid, usb.pid)))
                }
                _ => (None, None),
            };
            SerialPortInfo {
                port_name: port.port_name.clone(),
                description: describe_port(port),
                manufacturer,
                usb_ids,
            }
        })
        .collect())
}

fn is_cnc_port(port_name: &str) -> bool {
    if let Some(number) = port_name.strip_prefix("COM") {
        return !number.is_empty() && number.chars().all(|c| c.is_ascii_digit());
    }

    ["/dev/ttyUSB", "/dev/ttyACM", "/dev/cu.usbserial-", "/dev/cu.usbmodem"]
        .iter()
        .any(|prefix| port_name.starts_with(prefix))
}

fn describe_port(port: &serialport::SerialPortInfo) -> String {
    match &port.port_type {
        serialport::SerialPortType::UsbPort(usb) => format!(
            "USB {} {}",
            usb.manufacturer.as_deref().unwrap_or("Device"),
            usb.product.as_deref().unwrap_or("Serial Port")
        ),
        serialport::SerialPortType::BluetoothPort => "Bluetooth Serial".to_string(),
        serialport::SerialPortType::PciPort => "PCI Serial".to_string(),
        _ => "Serial Port".to_string(),
    }
}

fn to_serialport_parity(parity: SerialParity) -> serialport::Parity {
    match parity {
        SerialParity::None => serialport::Parity::None,
        SerialParity::Even => serialport::Parity::Even,
        SerialParity::Odd => serialport::Parity::Odd,
    }
}

fn open_error(port: &str, err: serialport::Error) -> ConnectionError {
    match err.kind() {
        serialport::ErrorKind::NoDevice => ConnectionError::PortNotFound {
            port: port.to_string(),
        },
        serialport::ErrorKind::InvalidInput => ConnectionError::InvalidParameters {
            reason: err.to_string(),
        },
        serialport::ErrorKind::Io(io::ErrorKind::NotFound) => ConnectionError::PortNotFound {
            port: port.to_string(),
        },
        serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied)
        | serialport::ErrorKind::Io(io::ErrorKind::WouldBlock) => ConnectionError::PortInUse {
            port: port.to_string(),
        },
        _ => ConnectionError::FailedToOpen {
            port: port.to_string(),
            reason: err.to_string(),
        },
    }
}

/// Read half: buffered port plus the bytes of a partially framed line
struct LineReader {
    port: BufReader<Box<dyn serialport::SerialPort>>,
    partial: Vec<u8>,
    line_ending: LineEnding,
}

impl LineReader {
    fn read_line(&mut self, timeout: Duration) -> io::Result<Option<String>> {
        self.port
            .get_mut()
            .set_timeout(timeout)
            .map_err(io::Error::from)?;

        let delimiter = self.line_ending.delimiter();
        match self.port.read_until(delimiter, &mut self.partial) {
            Ok(_) if self.partial.last() == Some(&delimiter) => {
                let raw = std::mem::take(&mut self.partial);
                let text = String::from_utf8_lossy(&raw);
                Ok(Some(self.line_ending.trim(&text).to_string()))
            }
            // EOF without a delimiter; keep what we have for the next call
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::WouldBlock => {
                Ok(None)
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Write half: the port plus the terminator appended to each line
struct LineWriter {
    port: Box<dyn serialport::SerialPort>,
    line_ending: LineEnding,
}

impl LineWriter {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.port.write_all(line.as_bytes())?;
        self.port.write_all(self.line_ending.as_str().as_bytes())?;
        self.port.flush()
    }
}

/// [`LineTransport`] over a physical or virtual serial port
pub struct SerialTransport {
    port_name: Mutex<String>,
    reader: Mutex<Option<LineReader>>,
    writer: Mutex<Option<LineWriter>>,
    open: AtomicBool,
}

impl SerialTransport {
    /// Create a closed transport
    pub fn new() -> Self {
        Self {
            port_name: Mutex::new(String::new()),
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            open: AtomicBool::new(false),
        }
    }
}

impl Default for SerialTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LineTransport for SerialTransport {
    fn open(&self, params: &ConnectionParams) -> Result<()> {
        if self.is_open() {
            return Ok(());
        }

        let data_bits = match params.data_bits {
            5 => serialport::DataBits::Five,
            6 => serialport::DataBits::Six,
            7 => serialport::DataBits::Seven,
            8 => serialport::DataBits::Eight,
            other => {
                return Err(ConnectionError::InvalidParameters {
                    reason: format!("Invalid data bits: {}", other),
                }
                .into())
            }
        };
        let stop_bits = match params.stop_bits {
            1 => serialport::StopBits::One,
            2 => serialport::StopBits::Two,
            other => {
                return Err(ConnectionError::InvalidParameters {
                    reason: format!("Invalid stop bits: {}", other),
                }
                .into())
            }
        };
        if params.baud_rate == 0 {
            return Err(ConnectionError::UnsupportedBaudRate {
                baud: params.baud_rate,
            }
            .into());
        }

        let port = serialport::new(&params.port, params.baud_rate)
            .timeout(params.timeout())
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(to_serialport_parity(params.parity))
            .flow_control(if params.flow_control {
                serialport::FlowControl::Hardware
            } else {
                serialport::FlowControl::None
            })
            .open()
            .map_err(|e| {
                warn!("Failed to open serial port {}: {}", params.port, e);
                open_error(&params.port, e)
            })?;

        let read_half = port.try_clone().map_err(|e| ConnectionError::FailedToOpen {
            port: params.port.clone(),
            reason: format!("cannot clone port handle: {}", e),
        })?;

        *self.reader.lock() = Some(LineReader {
            port: BufReader::new(read_half),
            partial: Vec::new(),
            line_ending: params.line_ending,
        });
        *self.writer.lock() = Some(LineWriter {
            port,
            line_ending: params.line_ending,
        });
        *self.port_name.lock() = params.port.clone();
        self.open.store(true, Ordering::SeqCst);

        info!(
            "Opened serial port {} at {} baud",
            params.port, params.baud_rate
        );
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn read_line(&self, timeout: Duration) -> Result<Option<String>> {
        let mut guard = self.reader.lock();
        let reader = guard.as_mut().ok_or_else(|| ConnectionError::NotOpen {
            port: self.port_name(),
        })?;

        reader.read_line(timeout).map_err(|e| {
            ConnectionError::ReadFailed {
                port: self.port_name(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    fn write_line(&self, line: &str) -> Result<()> {
        let mut guard = self.writer.lock();
        let writer = guard.as_mut().ok_or_else(|| ConnectionError::NotOpen {
            port: self.port_name(),
        })?;

        debug!("{} <- {}", self.port_name(), line);
        writer.write_line(line).map_err(|e| {
            ConnectionError::WriteFailed {
                port: self.port_name(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    fn close(&self) -> Result<()> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.writer.lock().take();
        self.reader.lock().take();
        info!("Closed serial port {}", self.port_name());
        Ok(())
    }

    fn port_name(&self) -> String {
        self.port_name.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cnc_port_filter() {
        assert!(is_cnc_port("COM3"));
        assert!(is_cnc_port("/dev/ttyUSB0"));
        assert!(is_cnc_port("/dev/ttyACM1"));
        assert!(is_cnc_port("/dev/cu.usbmodem14101"));
        assert!(!is_cnc_port("COM"));
        assert!(!is_cnc_port("COMX"));
        assert!(!is_cnc_port("/dev/ttyS0"));
    }

    #[test]
    fn test_closed_transport_rejects_io() {
        let transport = SerialTransport::new();
        assert!(!transport.is_open());
        assert!(transport.write_line("G0 X0").is_err());
        assert!(transport.read_line(Duration::from_millis(1)).is_err());
        assert!(transport.close().is_ok());
    }

    #[test]
    fn test_open_rejects_bad_framing() {
        let transport = SerialTransport::new();
        let mut params = ConnectionParams::new("/dev/ttyUSB0", 115_200);
        params.data_bits = 9;
        let err = transport.open(&params).unwrap_err();
        assert!(err.is_connection_error());
        assert!(!transport.is_open());
    }
}
