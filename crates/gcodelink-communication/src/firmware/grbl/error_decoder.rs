//! Human-readable GRBL error and alarm codes

/// Describe a GRBL `error:N` code
pub fn decode_error(code: u8) -> &'static str {
    match code {
        1 => "Expected command letter",
        2 => "Bad number format",
        3 => "Invalid '$' system command",
        4 => "Negative value",
        5 => "Homing not enabled",
        6 => "Minimum step pulse time must be greater than 3us",
        7 => "EEPROM read failed, defaults restored",
        8 => "'$' command requires IDLE state",
        9 => "G-code locked out during alarm or jog",
        10 => "Soft limits require homing",
        11 => "Max characters per line exceeded",
        12 => "Setting exceeds maximum step rate",
        13 => "Safety door opened",
        14 => "Build info or startup line too long",
        15 => "Jog target exceeds machine travel",
        16 => "Invalid jog command",
        17 => "Laser mode requires PWM output",
        20 => "Unsupported or invalid g-code command",
        21 => "Modal group violation",
        22 => "Undefined feed rate",
        23 => "Command requires an integer value",
        24 => "Multiple commands require axis words",
        25 => "Repeated g-code word",
        26 => "No axis words found",
        27 => "Invalid line number",
        28 => "Missing P or L value",
        29 => "Unsupported work coordinate system",
        30 => "G53 requires G0 or G1",
        31 => "Unused axis words",
        32 => "Arc has no axis words in plane",
        33 => "Invalid motion target",
        34 => "Arc radius error",
        35 => "Arc missing IJK offset",
        36 => "Unused g-code words",
        37 => "Tool length offset axis mismatch",
        38 => "Tool number exceeds maximum",
        _ => "Unknown error",
    }
}

/// Describe a GRBL `ALARM:N` code
pub fn decode_alarm(code: u8) -> &'static str {
    match code {
        1 => "Hard limit triggered, re-homing recommended",
        2 => "Soft limit exceeded",
        3 => "Reset while in motion, re-homing recommended",
        4 => "Probe fail: probe not in expected initial state",
        5 => "Probe fail: probe did not contact the workpiece",
        6 => "Homing fail: cycle reset",
        7 => "Homing fail: safety door opened",
        8 => "Homing fail: pull-off did not clear limit switch",
        9 => "Homing fail: limit switch not found",
        10 => "Homing fail: second dual axis limit switch not found",
        _ => "Unknown alarm",
    }
}

/// `error:N (description)`
pub fn format_error(code: u8) -> String {
    format!("error:{} ({})", code, decode_error(code))
}

/// `ALARM:N (description)`
pub fn format_alarm(code: u8) -> String {
    format!("ALARM:{} ({})", code, decode_alarm(code))
}
