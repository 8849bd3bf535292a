//! GRBL protocol support: status reports, realtime bytes, error codes

pub mod error_decoder;
pub mod realtime;
pub mod status_parser;

pub use error_decoder::{describe_alarm, describe_error};
pub use realtime::RealtimeCommand;
pub use status_parser::{Decoded, FirmwareLine, StatusDecoder};
