//! Data models shared across the workspace
//!
//! This module provides:
//! - Machine position reported by status telemetry
//! - The flow-control protocol variant selected at handshake time
//! - The line-ending policy applied to framing and write termination

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Machine position reported by the firmware (X, Y, Z)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// X-axis position
    pub x: f64,
    /// Y-axis position
    pub y: f64,
    /// Z-axis position
    pub z: f64,
}

impl Position {
    /// Create a new position with X, Y, Z coordinates
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X{:.3} Y{:.3} Z{:.3}", self.x, self.y, self.z)
    }
}

/// Flow-control dialect spoken by the connected firmware
///
/// Selected once during the handshake and fixed for the lifetime of a
/// session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolVariant {
    /// No accounting; every write is assumed immediately acceptable
    #[default]
    Generic,
    /// Every line is acknowledged one-for-one (GRBL-class firmware)
    AckCounted,
    /// The firmware self-reports free planner slots (g2core/TinyG2-class)
    QueryCredit,
}

impl fmt::Display for ProtocolVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generic => write!(f, "generic"),
            Self::AckCounted => write!(f, "ack-counted"),
            Self::QueryCredit => write!(f, "query-credit"),
        }
    }
}

impl FromStr for ProtocolVariant {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "generic" => Ok(Self::Generic),
            "ack-counted" | "ack_counted" | "grbl" => Ok(Self::AckCounted),
            "query-credit" | "query_credit" | "g2core" | "tinyg2" => Ok(Self::QueryCredit),
            other => Err(format!("unknown protocol variant '{}'", other)),
        }
    }
}

/// Line terminator used on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineEnding {
    /// Carriage return only
    Cr,
    /// Line feed only
    #[default]
    Lf,
    /// Carriage return followed by line feed
    CrLf,
}

impl LineEnding {
    /// Terminator appended to every written line
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cr => "\r",
            Self::Lf => "\n",
            Self::CrLf => "\r\n",
        }
    }

    /// Byte that ends a line when reading
    pub fn delimiter(&self) -> u8 {
        match self {
            Self::Cr => b'\r',
            Self::Lf | Self::CrLf => b'\n',
        }
    }

    /// Number of bytes the terminator occupies on the wire
    pub fn len(&self) -> usize {
        self.as_str().len()
    }

    /// Strip the terminator (and any stray CR/LF) from a framed line
    pub fn trim<'a>(&self, line: &'a str) -> &'a str {
        line.trim_end_matches(['\r', '\n'])
    }
}

impl FromStr for LineEnding {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cr" => Ok(Self::Cr),
            "lf" => Ok(Self::Lf),
            "crlf" => Ok(Self::CrLf),
            other => Err(format!("unknown line ending '{}'", other)),
        }
    }
}
