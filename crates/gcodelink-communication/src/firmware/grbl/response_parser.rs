//! GRBL Response Parser
//!
//! Parses GRBL protocol responses: acknowledgments, errors, alarms, status
//! reports, settings, the version banner, and bracketed feedback messages.
//! Both the 1.1 (`|`-separated) and 0.9 (`,`-separated) status formats are
//! accepted.

use super::error_decoder::{format_alarm, format_error};
use crate::firmware::FirmwareResponse;
use gcodelink_core::Position;

/// GRBL response types
#[derive(Debug, Clone, PartialEq)]
pub enum GrblResponse {
    /// OK acknowledgment
    Ok,
    /// Error response, decoded when numeric
    Error(String),
    /// Alarm response, decoded when numeric
    Alarm(String),
    /// Status report
    Status(StatusReport),
    /// Setting response (`$key=value`)
    Setting {
        /// Key including the leading `$`
        key: String,
        /// Raw value
        value: String,
    },
    /// Boot banner (`Grbl 1.1h ['$' for help]`)
    Version(String),
    /// Bracketed feedback (`[MSG:...]`, `[GC:...]`)
    Feedback(String),
    /// Anything else
    Message(String),
}

/// GRBL status report
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    /// Machine state (`Idle`, `Run`, `Hold:0`, ...)
    pub state: String,
    /// Machine position
    pub machine_pos: Option<Position>,
    /// Work position
    pub work_pos: Option<Position>,
    /// Feed rate
    pub feed_rate: Option<f64>,
}

/// GRBL response parser
#[derive(Debug, Default)]
pub struct GrblResponseParser;

impl GrblResponseParser {
    /// Create a new GRBL response parser
    pub fn new() -> Self {
        Self
    }

    /// Parse one response line
    pub fn parse(&self, line: &str) -> Option<GrblResponse> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let lower = line.to_ascii_lowercase();

        if lower.starts_with("ok") {
            return Some(GrblResponse::Ok);
        }

        if lower.starts_with("error") {
            return Some(GrblResponse::Error(Self::coded(line, "error".len(), format_error)));
        }

        if lower.starts_with("alarm") {
            return Some(GrblResponse::Alarm(Self::coded(line, "alarm".len(), format_alarm)));
        }

        if line.starts_with('<') && line.ends_with('>') {
            return Some(GrblResponse::Status(self.parse_status_report(
                &line[1..line.len() - 1],
            )));
        }

        if line.starts_with('$') {
            if let Some((key, value)) = line.split_once('=') {
                return Some(GrblResponse::Setting {
                    key: key.trim().to_string(),
                    value: Self::strip_setting_comment(value).to_string(),
                });
            }
        }

        if lower.starts_with("grbl") {
            return Some(GrblResponse::Version(line.to_string()));
        }

        if line.starts_with('[') && line.ends_with(']') {
            return Some(GrblResponse::Feedback(line.to_string()));
        }

        Some(GrblResponse::Message(line.to_string()))
    }

    /// `error:22` -> decoded text; `error: Bad number format` -> kept as is
    fn coded(line: &str, prefix_len: usize, format: fn(u8) -> String) -> String {
        let rest = line[prefix_len..].trim_start_matches(':').trim();
        match rest.parse::<u8>() {
            Ok(code) => format(code),
            Err(_) if rest.is_empty() => line.to_string(),
            Err(_) => rest.to_string(),
        }
    }

    /// GRBL 0.9 appends a `(description)` to each `$$` line
    fn strip_setting_comment(value: &str) -> &str {
        match value.find(" (") {
            Some(idx) => value[..idx].trim(),
            None => value.trim(),
        }
    }

    fn parse_status_report(&self, body: &str) -> StatusReport {
        let state_end = body.find(['|', ',']).unwrap_or(body.len());

        StatusReport {
            state: body[..state_end].trim().to_string(),
            machine_pos: Self::field_position(body, "MPos:"),
            work_pos: Self::field_position(body, "WPos:"),
            feed_rate: Self::field_number(body, "FS:").or_else(|| Self::field_number(body, "F:")),
        }
    }

    fn field_text<'a>(body: &'a str, key: &str) -> Option<&'a str> {
        let start = body.find(key)? + key.len();
        let rest = &body[start..];
        Some(rest.split('|').next().unwrap_or(rest))
    }

    fn field_position(body: &str, key: &str) -> Option<Position> {
        let coords: Vec<f64> = Self::field_text(body, key)?
            .split(',')
            .take(3)
            .map(|s| s.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .ok()?;

        match coords.as_slice() {
            [x, y, z] => Some(Position::new(*x, *y, *z)),
            [x, y] => Some(Position::new(*x, *y, 0.0)),
            _ => None,
        }
    }

    fn field_number(body: &str, key: &str) -> Option<f64> {
        Self::field_text(body, key)?
            .split(',')
            .next()?
            .trim()
            .parse()
            .ok()
    }
}

impl From<GrblResponse> for FirmwareResponse {
    fn from(response: GrblResponse) -> Self {
        match response {
            GrblResponse::Ok => FirmwareResponse::Ack,
            GrblResponse::Error(message) => FirmwareResponse::Error(message),
            GrblResponse::Alarm(message) => FirmwareResponse::Alarm(message),
            GrblResponse::Status(report) => match report.machine_pos.or(report.work_pos) {
                Some(pos) => FirmwareResponse::Status {
                    x: Some(pos.x),
                    y: Some(pos.y),
                    z: Some(pos.z),
                },
                None => FirmwareResponse::Echo(format!("<{}>", report.state)),
            },
            GrblResponse::Setting { key, value } => FirmwareResponse::Setting { key, value },
            GrblResponse::Version(text)
            | GrblResponse::Feedback(text)
            | GrblResponse::Message(text) => FirmwareResponse::Echo(text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ok_and_errors() {
        let parser = GrblResponseParser::new();
        assert_eq!(parser.parse("ok"), Some(GrblResponse::Ok));
        assert_eq!(
            parser.parse("error:22"),
            Some(GrblResponse::Error("error:22 (Undefined feed rate)".to_string()))
        );
        assert_eq!(
            parser.parse("error: Bad number format"),
            Some(GrblResponse::Error("Bad number format".to_string()))
        );
        assert_eq!(
            parser.parse("ALARM:1"),
            Some(GrblResponse::Alarm(
                "ALARM:1 (Hard limit triggered, re-homing recommended)".to_string()
            ))
        );
        assert_eq!(parser.parse(""), None);
    }

    #[test]
    fn test_parse_status_report_v11() {
        let parser = GrblResponseParser::new();
        let response = parser.parse("<Run|MPos:10.000,-2.500,0.125|FS:500,0>");
        match response {
            Some(GrblResponse::Status(report)) => {
                assert_eq!(report.state, "Run");
                assert_eq!(report.machine_pos, Some(Position::new(10.0, -2.5, 0.125)));
                assert_eq!(report.work_pos, None);
                assert_eq!(report.feed_rate, Some(500.0));
            }
            other => panic!("expected status, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_status_report_v09() {
        let parser = GrblResponseParser::new();
        let response = parser.parse("<Idle,MPos:1.000,2.000,3.000,WPos:0.000,0.000,0.000>");
        match response {
            Some(GrblResponse::Status(report)) => {
                assert_eq!(report.state, "Idle");
                assert_eq!(report.machine_pos, Some(Position::new(1.0, 2.0, 3.0)));
                assert_eq!(report.work_pos, Some(Position::new(0.0, 0.0, 0.0)));
            }
            other => panic!("expected status, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_settings_and_messages() {
        let parser = GrblResponseParser::new();
        assert_eq!(
            parser.parse("$110=500.000"),
            Some(GrblResponse::Setting {
                key: "$110".to_string(),
                value: "500.000".to_string()
            })
        );
        assert_eq!(
            parser.parse("$0=10 (step pulse, usec)"),
            Some(GrblResponse::Setting {
                key: "$0".to_string(),
                value: "10".to_string()
            })
        );
        assert!(matches!(
            parser.parse("Grbl 1.1h ['$' for help]"),
            Some(GrblResponse::Version(_))
        ));
        assert!(matches!(
            parser.parse("[MSG:'$H'|'$X' to unlock]"),
            Some(GrblResponse::Feedback(_))
        ));
        assert!(matches!(
            parser.parse("$H"),
            Some(GrblResponse::Message(_))
        ));
    }

    #[test]
    fn test_conversion_to_firmware_response() {
        let parser = GrblResponseParser::new();
        let status = parser.parse("<Idle|WPos:1.0,2.0,3.0>").map(FirmwareResponse::from);
        assert_eq!(
            status,
            Some(FirmwareResponse::Status {
                x: Some(1.0),
                y: Some(2.0),
                z: Some(3.0)
            })
        );
        let bare = parser.parse("<Idle>").map(FirmwareResponse::from);
        assert_eq!(bare, Some(FirmwareResponse::Echo("<Idle>".to_string())));
    }
}
