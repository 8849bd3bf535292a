//! # Laserstream
//!
//! Flow-controlled streaming of G-code to GRBL-family laser cutters and CNC
//! controllers over a serial link.
//!
//! ## Architecture
//!
//! Laserstream is organized as a workspace with multiple crates:
//!
//! 1. **laserstream-core** - Command and status data model, error types
//! 2. **laserstream-settings** - Configuration, persistence, validation
//! 3. **laserstream-communication** - Device discovery, serial link, status
//!    decoding, the in-flight window and the streaming session
//! 4. **laserstream** - This crate: re-exports, logging setup and the CLI
//!
//! ## Features
//!
//! - **Never overflows the firmware buffer**: bytes in flight stay within the
//!   receive buffer size, tracked from `Bf:`/`RX:` reports or `ok` replies
//! - **Resumable**: a failed write leaves the queue intact for the next link
//! - **Re-enumeration**: devices are re-matched on every connect
//! - **Job control**: pause, resume, cancel, soft-reset abort and progress

pub use laserstream_communication::{
    communication, firmware, ConnectionSupervisor, Device, DeviceCatalog, FirmwareLine,
    InFlightWindow, RealtimeCommand, SerialLink, SerialPortInfo, SessionSnapshot,
    SharedSession, StatusDecoder, StreamController, StreamingSession, TickReport,
};

pub use laserstream_core::{
    data, BufferHeadroom, Command, ConnectionError, ConnectionState, Error, MachineState,
    MachineStatus, Position, Result, RxReport, StreamingError,
};

pub use laserstream_settings::{
    default_config_path, Config, ConnectionSettings, FlowControlMode, MatchStrategy,
    StreamingSettings,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Initialize logging
///
/// Sets up structured logging with:
/// - Output on stderr, leaving stdout for command results
/// - RUST_LOG environment variable support (default INFO)
/// - Pretty formatting, or one JSON object per line when `json` is set
pub fn init_logging(json: bool) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        let fmt_layer = fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_current_span(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    } else {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true)
            .with_thread_names(true)
            .with_line_number(true)
            .pretty();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_stamp_is_utc_timestamp() {
        // "YYYY-MM-DD HH:MM:SS UTC"
        assert_eq!(BUILD_DATE.len(), 23);
        assert!(BUILD_DATE.ends_with(" UTC"));
        assert!(chrono::NaiveDateTime::parse_from_str(
            BUILD_DATE.trim_end_matches(" UTC"),
            "%Y-%m-%d %H:%M:%S"
        )
        .is_ok());
    }

    #[test]
    fn test_version_matches_package() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
        assert!(!VERSION.is_empty());
    }
}
