//! # gcodelink Settings
//!
//! Configuration file handling: connection parameters, streaming limits,
//! and firmware detection thresholds, stored as JSON or TOML.

pub mod config;
pub mod error;

pub use config::{Config, ConnectionSettings, DetectionSettings, StreamingSettings};
pub use error::{Result, SettingsError};
