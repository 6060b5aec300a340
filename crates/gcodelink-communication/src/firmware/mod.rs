//! Firmware dialects understood by the streaming engine
//!
//! Supported controllers:
//! - GRBL-class firmware: text replies, one `ok`/`error` per line
//! - g2core/TinyG2-class firmware: JSON replies with queue reports
//!
//! Every incoming line is decoded into zero or more [`FirmwareResponse`]s
//! by [`parse_response`]; the reader decides what each response means for
//! flow control.

pub mod firmware_detector;
pub mod g2core;
pub mod grbl;

pub use firmware_detector::{DetectionConfig, FirmwareDetector, FirmwareIdentity};

use gcodelink_core::ProtocolVariant;

/// Controller families recognised from the boot signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControllerType {
    /// GRBL and derivatives
    Grbl,
    /// g2core / TinyG2
    G2Core,
    /// Unknown/generic
    #[default]
    Unknown,
}

impl ControllerType {
    /// Flow-control dialect this controller speaks
    pub fn variant(&self) -> ProtocolVariant {
        match self {
            Self::Grbl => ProtocolVariant::AckCounted,
            Self::G2Core => ProtocolVariant::QueryCredit,
            Self::Unknown => ProtocolVariant::Generic,
        }
    }

    /// Default flow-control capacity for this controller
    ///
    /// Bytes of serial receive buffer for GRBL, planner slots for g2core.
    pub fn default_capacity(&self) -> usize {
        match self {
            Self::Grbl => 128,
            Self::G2Core => 28,
            Self::Unknown => 128,
        }
    }
}

impl std::fmt::Display for ControllerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Grbl => write!(f, "GRBL"),
            Self::G2Core => write!(f, "g2core"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// One decoded unit of firmware output
#[derive(Debug, Clone, PartialEq)]
pub enum FirmwareResponse {
    /// Command accepted
    Ack,
    /// Command rejected; the firmware still consumed the line
    Error(String),
    /// Alarm raised
    Alarm(String),
    /// Position update; axes absent from the report are `None`
    Status {
        /// X axis
        x: Option<f64>,
        /// Y axis
        y: Option<f64>,
        /// Z axis
        z: Option<f64>,
    },
    /// One settings entry
    Setting {
        /// Setting key
        key: String,
        /// Setting value
        value: String,
    },
    /// Free planner slots reported by the firmware
    QueueReport(usize),
    /// Anything else
    Echo(String),
}

/// Decode one framed line
///
/// JSON objects go through the g2core decoder, everything else through the
/// GRBL decoder. Blank lines decode to nothing.
pub fn parse_response(line: &str) -> Vec<FirmwareResponse> {
    let line = line.trim();
    if line.is_empty() {
        return Vec::new();
    }

    if line.starts_with('{') {
        if let Some(responses) = g2core::parse_json_line(line) {
            return responses;
        }
    }

    grbl::GrblResponseParser::new()
        .parse(line)
        .map(FirmwareResponse::from)
        .into_iter()
        .collect()
}
