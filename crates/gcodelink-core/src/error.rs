//! Error handling for gcodelink
//!
//! Provides error types for every layer of the streaming engine:
//! - Connection errors (opening, reading, and writing the serial link)
//! - Firmware errors (identity, protocol, and firmware-reported failures)
//! - Stream errors (upload sources and flow-control accounting)
//!
//! All error types use `thiserror` for ergonomic error handling.

use crate::data::ProtocolVariant;
use thiserror::Error;

/// Connection error type
///
/// Represents errors related to the serial link itself: opening the port,
/// framing lines, and moving bytes in either direction.
#[derive(Error, Debug, Clone)]
pub enum ConnectionError {
    /// Port not found
    #[error("Port not found: {port}")]
    PortNotFound {
        /// The name of the port that was not found.
        port: String,
    },

    /// Port is already in use
    #[error("Port already in use: {port}")]
    PortInUse {
        /// The name of the port that is in use.
        port: String,
    },

    /// Failed to open port
    #[error("Failed to open port {port}: {reason}")]
    FailedToOpen {
        /// The name of the port that failed to open.
        port: String,
        /// The reason the port failed to open.
        reason: String,
    },

    /// Port is not open
    #[error("Port not open: {port}")]
    NotOpen {
        /// The name of the port.
        port: String,
    },

    /// Read timed out before a full line arrived
    #[error("Read timeout after {timeout_ms}ms")]
    ReadTimeout {
        /// The timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// Reading from the port failed
    #[error("Read failed on {port}: {reason}")]
    ReadFailed {
        /// The port being read.
        port: String,
        /// The reason the read failed.
        reason: String,
    },

    /// Writing to the port failed
    #[error("Write failed on {port}: {reason}")]
    WriteFailed {
        /// The port being written.
        port: String,
        /// The reason the write failed.
        reason: String,
    },

    /// Baud rate not supported
    #[error("Baud rate {baud} not supported")]
    UnsupportedBaudRate {
        /// The unsupported baud rate.
        baud: u32,
    },

    /// Invalid connection parameters
    #[error("Invalid connection parameters: {reason}")]
    InvalidParameters {
        /// The reason the parameters are invalid.
        reason: String,
    },

    /// Operation not allowed in the current session state
    #[error("Cannot {operation} while session is {state}")]
    InvalidState {
        /// The current session state.
        state: String,
        /// The operation that was attempted.
        operation: String,
    },
}

/// Firmware error type
///
/// Represents errors specific to firmware identity and protocol handling.
#[derive(Error, Debug, Clone)]
pub enum FirmwareError {
    /// The boot signature could not be decoded
    #[error("Failed to parse firmware signature: {reason}")]
    SignatureParse {
        /// The reason the signature could not be decoded.
        reason: String,
    },

    /// The connected firmware speaks a different dialect than configured
    #[error("Firmware changed: configured {configured}, detected {detected}; restart required")]
    FirmwareChanged {
        /// The variant the session was configured with.
        configured: ProtocolVariant,
        /// The variant detected from the boot signature.
        detected: ProtocolVariant,
    },

    /// The firmware reported an error for a command
    #[error("Firmware reported error: {message}")]
    ErrorLine {
        /// The error line or decoded message.
        message: String,
    },

    /// Response parsing error
    #[error("Failed to parse firmware response: {reason}")]
    ResponseParseError {
        /// The reason the response parsing failed.
        reason: String,
    },
}

/// Stream error type
///
/// Represents errors raised while uploading a source through the flow
/// controller.
#[derive(Error, Debug, Clone)]
pub enum StreamError {
    /// A session is required but none is open
    #[error("Session not open")]
    NotOpen,

    /// An upload is already running
    #[error("Upload already in progress")]
    AlreadyStreaming,

    /// No upload is running
    #[error("No upload in progress")]
    NotStreaming,

    /// A line can never fit into the firmware buffer
    #[error("Line {line_number} is {size} bytes, larger than the {capacity}-byte buffer")]
    LineTooLong {
        /// 1-based line number within the upload.
        line_number: usize,
        /// Size of the line on the wire.
        size: usize,
        /// Configured buffer capacity.
        capacity: usize,
    },

    /// The upload was cancelled
    #[error("Upload cancelled")]
    Cancelled,

    /// The session closed underneath a running upload
    #[error("Session on {port} closed during upload")]
    SessionClosed {
        /// The port whose session closed.
        port: String,
    },

    /// The upload source could not be read
    #[error("Upload source error: {reason}")]
    Source {
        /// The reason the source failed.
        reason: String,
    },

    /// A worker thread could not be spawned or joined
    #[error("Task error: {reason}")]
    Task {
        /// The reason the task failed.
        reason: String,
    },
}

/// Main error type for gcodelink
///
/// A unified error type that can represent any error from all layers.
/// This is the primary error type used in public APIs.
#[derive(Error, Debug)]
pub enum Error {
    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Firmware error
    #[error(transparent)]
    Firmware(#[from] FirmwareError),

    /// Stream error
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Error::Connection(ConnectionError::ReadTimeout { .. })
        ) || matches!(self, Error::Io(e) if e.kind() == std::io::ErrorKind::TimedOut)
    }

    /// Check if this is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    /// Check if this is a firmware error
    pub fn is_firmware_error(&self) -> bool {
        matches!(self, Error::Firmware(_))
    }

    /// Check if this is a stream error
    pub fn is_stream_error(&self) -> bool {
        matches!(self, Error::Stream(_))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;
