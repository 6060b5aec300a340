//! Configuration and settings management for gcodelink
//!
//! Configuration is organized into three sections:
//! - Connection settings (port, framing, timeouts)
//! - Streaming settings (protocol variant, buffer sizes, query cadence)
//! - Detection settings (boot signature thresholds)
//!
//! Files are JSON or TOML, chosen by extension. Missing keys take their
//! defaults, so a file only needs the values that differ.

use crate::error::{Result, SettingsError};
use gcodelink_communication::{
    ConnectionParams, DetectionConfig, SerialParity, SessionConfig, SourceOptions,
};
use gcodelink_core::{LineEnding, ProtocolVariant};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Serial port name
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (5-8)
    pub data_bits: u8,
    /// Stop bits (1 or 2)
    pub stop_bits: u8,
    /// Parity
    pub parity: SerialParity,
    /// Hardware flow control
    pub flow_control: bool,
    /// Line terminator
    pub line_ending: LineEnding,
    /// Low-level port read timeout in milliseconds
    pub timeout_ms: u64,
    /// How long to wait for the boot signature in milliseconds
    pub signature_timeout_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        let params = ConnectionParams::default();
        Self {
            port: params.port,
            baud_rate: params.baud_rate,
            data_bits: params.data_bits,
            stop_bits: params.stop_bits,
            parity: params.parity,
            flow_control: params.flow_control,
            line_ending: params.line_ending,
            timeout_ms: params.timeout_ms,
            signature_timeout_ms: 2000,
        }
    }
}

/// Streaming settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingSettings {
    /// Protocol variant the firmware is expected to speak
    pub variant: ProtocolVariant,
    /// Firmware receive buffer in bytes (ack-counted)
    pub ack_buffer_bytes: usize,
    /// Firmware planner slots (query-credit)
    pub query_slots: usize,
    /// Interval between queue-report queries in milliseconds
    pub query_interval_ms: u64,
    /// Reader poll interval in milliseconds
    pub read_poll_ms: u64,
    /// Strip `;` and `( )` comments from uploads
    pub strip_comments: bool,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            variant: ProtocolVariant::Generic,
            ack_buffer_bytes: 128,
            query_slots: 28,
            query_interval_ms: 250,
            read_poll_ms: 50,
            strip_comments: true,
        }
    }
}

/// Boot signature thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    /// Lowest accepted `fv` for query-credit firmware
    pub min_firmware_version: f64,
    /// Fields a structured signature must carry
    pub required_fields: Vec<String>,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        let detection = DetectionConfig::default();
        Self {
            min_firmware_version: detection.min_version,
            required_fields: detection.required_fields,
        }
    }
}

/// Complete gcodelink configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Connection settings
    pub connection: ConnectionSettings,
    /// Streaming settings
    pub streaming: StreamingSettings,
    /// Detection settings
    pub detection: DetectionSettings,
}

enum Format {
    Json,
    Toml,
}

impl Format {
    fn of(path: &Path) -> Result<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(Self::Json),
            Some("toml") => Ok(Self::Toml),
            _ => Err(SettingsError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// `<config dir>/gcodelink/config.toml`
    pub fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("gcodelink").join("config.toml"))
            .ok_or_else(|| {
                SettingsError::ConfigDirectory(
                    "could not determine the user config directory".to_string(),
                )
            })
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let format = Format::of(path)?;
        let content = std::fs::read_to_string(path).map_err(|e| SettingsError::LoadError {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let config: Self = match format {
            Format::Json => serde_json::from_str(&content)?,
            Format::Toml => toml::from_str(&content)?,
        };

        config.validate()?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load `path`, or the default path; defaults when the file is absent
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::default_path()?,
        };

        if path.exists() {
            Self::load_from_file(&path)
        } else {
            debug!("No configuration at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Save config to file (JSON or TOML), creating the parent directory
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        self.validate()?;
        let format = Format::of(path)?;

        let content = match format {
            Format::Json => serde_json::to_string_pretty(self)?,
            Format::Toml => toml::to_string_pretty(self)?,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                SettingsError::ConfigDirectory(format!("{}: {}", parent.display(), e))
            })?;
        }

        std::fs::write(path, content).map_err(|e| SettingsError::SaveError {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        info!("Saved configuration to {}", path.display());
        Ok(())
    }

    /// Validate all settings
    pub fn validate(&self) -> Result<()> {
        let connection = &self.connection;
        if connection.baud_rate == 0 {
            return Err(SettingsError::invalid("connection.baud_rate", "must be greater than 0"));
        }
        if !(5..=8).contains(&connection.data_bits) {
            return Err(SettingsError::invalid("connection.data_bits", "must be between 5 and 8"));
        }
        if !matches!(connection.stop_bits, 1 | 2) {
            return Err(SettingsError::invalid("connection.stop_bits", "must be 1 or 2"));
        }
        if connection.timeout_ms == 0 {
            return Err(SettingsError::invalid("connection.timeout_ms", "must be greater than 0"));
        }
        if connection.signature_timeout_ms == 0 {
            return Err(SettingsError::invalid(
                "connection.signature_timeout_ms",
                "must be greater than 0",
            ));
        }

        let streaming = &self.streaming;
        if streaming.ack_buffer_bytes == 0 {
            return Err(SettingsError::invalid(
                "streaming.ack_buffer_bytes",
                "must be greater than 0",
            ));
        }
        if streaming.query_slots == 0 {
            return Err(SettingsError::invalid("streaming.query_slots", "must be greater than 0"));
        }
        if streaming.query_interval_ms == 0 {
            return Err(SettingsError::invalid(
                "streaming.query_interval_ms",
                "must be greater than 0",
            ));
        }
        if streaming.read_poll_ms == 0 {
            return Err(SettingsError::invalid("streaming.read_poll_ms", "must be greater than 0"));
        }

        let detection = &self.detection;
        if !detection.min_firmware_version.is_finite() || detection.min_firmware_version < 0.0 {
            return Err(SettingsError::invalid(
                "detection.min_firmware_version",
                "must be a non-negative number",
            ));
        }
        if detection.required_fields.iter().any(|f| f.trim().is_empty()) {
            return Err(SettingsError::invalid(
                "detection.required_fields",
                "field names must not be empty",
            ));
        }

        Ok(())
    }

    /// Serial parameters for opening the transport
    pub fn connection_params(&self) -> ConnectionParams {
        let c = &self.connection;
        ConnectionParams {
            port: c.port.clone(),
            baud_rate: c.baud_rate,
            data_bits: c.data_bits,
            stop_bits: c.stop_bits,
            parity: c.parity,
            flow_control: c.flow_control,
            line_ending: c.line_ending,
            timeout_ms: c.timeout_ms,
        }
    }

    /// Full session configuration
    pub fn session_config(&self) -> SessionConfig {
        let mut config = SessionConfig::new(self.connection_params())
            .with_variant(self.streaming.variant)
            .with_signature_timeout(Duration::from_millis(self.connection.signature_timeout_ms));
        config.ack_buffer_size = self.streaming.ack_buffer_bytes;
        config.query_slots = self.streaming.query_slots;
        config.query_interval = Duration::from_millis(self.streaming.query_interval_ms);
        config.read_poll = Duration::from_millis(self.streaming.read_poll_ms);
        config.detection = DetectionConfig {
            min_version: self.detection.min_firmware_version,
            required_fields: self.detection.required_fields.clone(),
        };
        config
    }

    /// Preprocessing applied to upload sources
    pub fn source_options(&self) -> SourceOptions {
        SourceOptions {
            strip_comments: self.streaming.strip_comments,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::new();
        assert!(config.validate().is_ok());
        assert_eq!(config.connection.baud_rate, 115_200);
        assert_eq!(config.streaming.ack_buffer_bytes, 128);
        assert_eq!(config.detection.min_firmware_version, 0.98);
        assert_eq!(config.detection.required_fields, vec!["fv", "hp", "hv", "fb"]);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::new();
        config.connection.stop_bits = 3;
        assert!(matches!(
            config.validate(),
            Err(SettingsError::InvalidSetting { ref key, .. }) if key == "connection.stop_bits"
        ));

        let mut config = Config::new();
        config.streaming.query_slots = 0;
        assert!(config.validate().is_err());

        let mut config = Config::new();
        config.detection.min_firmware_version = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_session_config_conversion() {
        let mut config = Config::new();
        config.connection.port = "/dev/ttyACM0".to_string();
        config.connection.line_ending = LineEnding::CrLf;
        config.streaming.variant = ProtocolVariant::QueryCredit;
        config.streaming.query_slots = 32;
        config.detection.min_firmware_version = 1.0;

        let session = config.session_config();
        assert_eq!(session.params.port, "/dev/ttyACM0");
        assert_eq!(session.params.line_ending, LineEnding::CrLf);
        assert_eq!(session.variant, ProtocolVariant::QueryCredit);
        assert_eq!(session.capacity_for(ProtocolVariant::QueryCredit), 32);
        assert_eq!(session.detection.min_version, 1.0);
        assert_eq!(session.signature_timeout, Duration::from_millis(2000));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [connection]
            port = "COM4"

            [streaming]
            variant = "ack_counted"
            "#,
        )
        .unwrap();
        assert_eq!(config.connection.port, "COM4");
        assert_eq!(config.connection.baud_rate, 115_200);
        assert_eq!(config.streaming.variant, ProtocolVariant::AckCounted);
        assert_eq!(config.streaming.query_slots, 28);
    }
}
