//! Host-originated g2core JSON commands

/// Ask the firmware how many planner slots are free (`qr` reply)
pub fn queue_report_query() -> &'static str {
    r#"{"qr":null}"#
}
