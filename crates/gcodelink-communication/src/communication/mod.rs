//! Line-oriented transport layer
//!
//! Defines the [`LineTransport`] seam the streaming engine talks through,
//! the serial parameters used to open it, and two implementations:
//! a `serialport`-backed [`serial::SerialTransport`] and a scripted
//! [`mock::MockTransport`] for exercising the engine without hardware.

pub mod mock;
pub mod serial;

use gcodelink_core::{LineEnding, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Serial parity setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialParity {
    /// No parity bit
    #[default]
    None,
    /// Even parity
    Even,
    /// Odd parity
    Odd,
}

/// Parameters used to open a serial endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Port name (e.g. `/dev/ttyUSB0`, `COM3`)
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (5-8)
    pub data_bits: u8,
    /// Stop bits (1 or 2)
    pub stop_bits: u8,
    /// Parity
    pub parity: SerialParity,
    /// Hardware (RTS/CTS) flow control
    pub flow_control: bool,
    /// Terminator used for both read framing and writes
    pub line_ending: LineEnding,
    /// Low-level read timeout applied to the port in milliseconds
    pub timeout_ms: u64,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 115_200,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
            flow_control: false,
            line_ending: LineEnding::Lf,
            timeout_ms: 100,
        }
    }
}

impl ConnectionParams {
    /// Create parameters for a port with default framing
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            ..Self::default()
        }
    }

    /// Set the line ending
    pub fn with_line_ending(mut self, line_ending: LineEnding) -> Self {
        self.line_ending = line_ending;
        self
    }

    /// Enable or disable hardware flow control
    pub fn with_flow_control(mut self, enabled: bool) -> Self {
        self.flow_control = enabled;
        self
    }

    /// Low-level read timeout as a [`Duration`]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Blocking, line-framed duplex channel to a firmware
///
/// All methods take `&self` so the reader and writer threads can share one
/// `Arc<dyn LineTransport>`; implementations keep the read and write halves
/// behind separate locks.
pub trait LineTransport: Send + Sync {
    /// Open the endpoint
    fn open(&self, params: &ConnectionParams) -> Result<()>;

    /// Whether the endpoint is currently open
    fn is_open(&self) -> bool;

    /// Read one line, without its terminator
    ///
    /// Returns `Ok(None)` when no complete line arrived within `timeout`.
    /// Bytes of a partially received line are kept for the next call.
    fn read_line(&self, timeout: Duration) -> Result<Option<String>>;

    /// Write one line followed by the session's line ending, then flush
    fn write_line(&self, line: &str) -> Result<()>;

    /// Close the endpoint. Closing an already closed transport is a no-op.
    fn close(&self) -> Result<()>;

    /// Name of the endpoint, used in logs and events
    fn port_name(&self) -> String;
}
