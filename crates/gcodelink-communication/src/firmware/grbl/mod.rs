//! GRBL-class firmware support
//!
//! Text protocol: `ok`, `error:N`, `ALARM:N`, `<...>` status reports,
//! `$N=value` settings, `[...]` feedback messages, and the `Grbl X.Y`
//! boot banner.

pub mod error_decoder;
pub mod response_parser;

pub use error_decoder::{decode_alarm, decode_error, format_alarm, format_error};
pub use response_parser::{GrblResponse, GrblResponseParser, StatusReport};
