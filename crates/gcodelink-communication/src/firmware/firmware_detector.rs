//! Firmware identification from the boot signature
//!
//! The first line a controller prints after the port opens identifies it.
//! A JSON signature with a recent enough `fv` and the full set of identity
//! fields marks a g2core-class controller; a `Grbl X.Y` banner marks a
//! GRBL-class controller; anything else is treated as generic.

use super::ControllerType;
use gcodelink_core::{FirmwareError, ProtocolVariant};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Thresholds for recognising a structured signature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Lowest accepted `fv` firmware version
    pub min_version: f64,
    /// Fields that must all be present in the signature body
    pub required_fields: Vec<String>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            min_version: 0.98,
            required_fields: ["fv", "hp", "hv", "fb"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// What the handshake learned about the connected firmware
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FirmwareIdentity {
    /// Controller family
    pub controller: ControllerType,
    /// Version string, when the signature carried one
    pub version: Option<String>,
    /// The raw signature line
    pub signature: Option<String>,
}

impl FirmwareIdentity {
    /// Flow-control dialect implied by this identity
    pub fn variant(&self) -> ProtocolVariant {
        self.controller.variant()
    }
}

impl std::fmt::Display for FirmwareIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{} {}", self.controller, version),
            None => write!(f, "{}", self.controller),
        }
    }
}

/// Classifies boot signatures
#[derive(Debug, Clone, Default)]
pub struct FirmwareDetector {
    config: DetectionConfig,
}

impl FirmwareDetector {
    /// Create a detector with the given thresholds
    pub fn new(config: DetectionConfig) -> Self {
        Self { config }
    }

    /// Classify a boot signature; `None` means no line arrived in time
    pub fn detect(&self, signature: Option<&str>) -> FirmwareIdentity {
        let Some(line) = signature.map(str::trim).filter(|l| !l.is_empty()) else {
            return FirmwareIdentity::default();
        };

        let mut identity = FirmwareIdentity {
            signature: Some(line.to_string()),
            ..FirmwareIdentity::default()
        };

        match Self::parse_signature(line) {
            Ok(body) => {
                if let Some(version) = self.qualifying_version(&body) {
                    identity.controller = ControllerType::G2Core;
                    identity.version = Some(version.to_string());
                } else {
                    debug!("Structured signature does not qualify: {}", line);
                }
            }
            Err(e) => {
                debug!("{}", e);
                if let Some(version) = Self::grbl_banner_version(line) {
                    identity.controller = ControllerType::Grbl;
                    identity.version = Some(version);
                }
            }
        }

        identity
    }

    /// Parse the JSON body of a signature (`r` object, or the top level)
    pub fn parse_signature(line: &str) -> Result<Map<String, Value>, FirmwareError> {
        let value: Value =
            serde_json::from_str(line).map_err(|e| FirmwareError::SignatureParse {
                reason: e.to_string(),
            })?;

        let body = match value.get("r") {
            Some(r) => r,
            None => &value,
        };

        body.as_object()
            .cloned()
            .ok_or_else(|| FirmwareError::SignatureParse {
                reason: "signature is not a JSON object".to_string(),
            })
    }

    fn qualifying_version(&self, body: &Map<String, Value>) -> Option<f64> {
        let version = match body.get("fv")? {
            Value::Number(n) => n.as_f64()?,
            Value::String(s) => s.trim().parse().ok()?,
            _ => return None,
        };

        let complete = self
            .config
            .required_fields
            .iter()
            .all(|field| body.contains_key(field));

        (version >= self.config.min_version && complete).then_some(version)
    }

    fn grbl_banner_version(line: &str) -> Option<String> {
        let mut words = line.split_whitespace();
        let name = words.next()?;
        if !name.to_ascii_lowercase().starts_with("grbl") {
            return None;
        }
        Some(words.next().unwrap_or("").to_string())
    }
}
