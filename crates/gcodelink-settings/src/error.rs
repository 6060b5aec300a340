//! Error types for the settings crate.

use std::io;
use thiserror::Error;

/// Errors that can occur during settings operations.
#[derive(Error, Debug)]
pub enum SettingsError {
    /// The configuration file could not be loaded.
    #[error("Failed to load settings from {path}: {reason}")]
    LoadError { path: String, reason: String },

    /// The configuration file could not be saved.
    #[error("Failed to save settings to {path}: {reason}")]
    SaveError { path: String, reason: String },

    /// A configuration value is invalid.
    #[error("Invalid setting '{key}': {reason}")]
    InvalidSetting { key: String, reason: String },

    /// The file extension is neither `.json` nor `.toml`.
    #[error("Unsupported config format: {0} (expected .json or .toml)")]
    UnsupportedFormat(String),

    /// The configuration directory could not be found or created.
    #[error("Config directory error: {0}")]
    ConfigDirectory(String),

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// TOML deserialization error.
    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("TOML error: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
}

impl SettingsError {
    pub(crate) fn invalid(key: &str, reason: impl Into<String>) -> Self {
        Self::InvalidSetting {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SettingsError::invalid("streaming.query_slots", "must be greater than 0");
        assert_eq!(
            err.to_string(),
            "Invalid setting 'streaming.query_slots': must be greater than 0"
        );

        let err = SettingsError::UnsupportedFormat("job.yaml".to_string());
        assert!(err.to_string().contains(".json or .toml"));
    }
}
