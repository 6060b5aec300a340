//! g2core / TinyG2 firmware support
//!
//! JSON protocol: every reply is one object. Command replies carry an `r`
//! body and an `f` footer whose second element is the status code; status
//! reports arrive as `sr`, queue reports as `qr`, exceptions as `er`.

pub mod command_creator;
pub mod response_parser;

pub use command_creator::queue_report_query;
pub use response_parser::parse_json_line;
