//! g2core Response Parser
//!
//! Decodes one JSON reply line into the responses it carries. A single line
//! may hold several (e.g. a queue report and an acknowledgment).

use crate::firmware::FirmwareResponse;
use serde_json::{Map, Value};

/// Keys inside an `r` body that echo the request rather than report a setting
const NON_SETTING_KEYS: &[&str] = &["gc", "n", "msg", "f"];

/// Decode a JSON reply line
///
/// Returns `None` when the line is not a JSON object, so the caller can fall
/// back to text handling. Settings, status and queue reports are listed
/// before the acknowledgment that closes the reply.
pub fn parse_json_line(line: &str) -> Option<Vec<FirmwareResponse>> {
    let value: Value = serde_json::from_str(line).ok()?;
    let obj = value.as_object()?;
    let mut out = Vec::new();

    let body = obj.get("r").and_then(Value::as_object);
    if let Some(body) = body {
        collect_body(body, &mut out);
    }

    if let Some(sr) = obj.get("sr").and_then(Value::as_object) {
        push_status(sr, &mut out);
    }

    if let Some(qr) = obj.get("qr").and_then(Value::as_u64) {
        out.push(FirmwareResponse::QueueReport(qr as usize));
    }

    if let Some(er) = obj.get("er") {
        out.push(FirmwareResponse::Error(exception_message(er)));
    }

    let footer = obj
        .get("f")
        .or_else(|| body.and_then(|b| b.get("f")))
        .and_then(Value::as_array);
    match footer {
        Some(footer) => {
            let status = footer.get(1).and_then(Value::as_u64).unwrap_or(0);
            if status == 0 {
                out.push(FirmwareResponse::Ack);
            } else {
                out.push(FirmwareResponse::Error(format!("status code {}", status)));
            }
        }
        None if body.is_some() => out.push(FirmwareResponse::Ack),
        None => {}
    }

    if out.is_empty() {
        out.push(FirmwareResponse::Echo(line.to_string()));
    }
    Some(out)
}

fn collect_body(body: &Map<String, Value>, out: &mut Vec<FirmwareResponse>) {
    for (key, value) in body {
        if NON_SETTING_KEYS.contains(&key.as_str()) {
            continue;
        }
        match (key.as_str(), value) {
            ("qr", v) => {
                if let Some(slots) = v.as_u64() {
                    out.push(FirmwareResponse::QueueReport(slots as usize));
                }
            }
            ("sr", Value::Object(sr)) => push_status(sr, out),
            (group, Value::Object(members)) => {
                for (member, v) in members {
                    if let Some(text) = scalar_text(v) {
                        out.push(FirmwareResponse::Setting {
                            key: format!("{}{}", group, member),
                            value: text,
                        });
                    }
                }
            }
            (key, v) => {
                if let Some(text) = scalar_text(v) {
                    out.push(FirmwareResponse::Setting {
                        key: key.to_string(),
                        value: text,
                    });
                }
            }
        }
    }
}

fn push_status(sr: &Map<String, Value>, out: &mut Vec<FirmwareResponse>) {
    let axis = |flat: &str, nested: &str| {
        sr.get(flat).and_then(Value::as_f64).or_else(|| {
            sr.get("pos")
                .and_then(|p| p.get(nested))
                .and_then(Value::as_f64)
        })
    };

    let (x, y, z) = (axis("posx", "x"), axis("posy", "y"), axis("posz", "z"));
    if x.is_some() || y.is_some() || z.is_some() {
        out.push(FirmwareResponse::Status { x, y, z });
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn exception_message(er: &Value) -> String {
    er.get("msg")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| er.to_string())
}
