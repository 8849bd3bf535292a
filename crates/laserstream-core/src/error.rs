//! Error handling for laserstream
//!
//! Provides the error types shared by every layer of the streaming stack:
//! - Connection errors (device discovery, open/read/write failures)
//! - Streaming errors (queue admission, window bookkeeping)
//!
//! None of these are fatal to the host process. A host loop that receives any
//! of them keeps running and may retry `connect()`.

use thiserror::Error;

/// Connection error type
///
/// Everything that can go wrong between the host and the serial device.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// No enumerated device matched the configured pattern
    #[error("No serial device matching '{pattern}'")]
    DeviceNotFound {
        /// The pattern that was searched for.
        pattern: String,
    },

    /// Open, read or write failure on the serial handle.
    ///
    /// Busy, absent and permission-denied devices all land here with a
    /// descriptive reason.
    #[error("I/O error on {port}: {reason}")]
    Io {
        /// The device the failure occurred on.
        port: String,
        /// The underlying cause.
        reason: String,
    },

    /// An operation needed a live link but none is open
    #[error("Not connected")]
    NotConnected,

    /// The OS refused to enumerate serial devices
    #[error("Failed to enumerate serial devices: {reason}")]
    Enumeration {
        /// The reason enumeration failed.
        reason: String,
    },
}

/// Streaming error type
///
/// Errors raised by the flow-control engine itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamingError {
    /// Command can never fit in the firmware receive buffer
    #[error("Command of {length} bytes exceeds the {capacity} byte receive buffer")]
    CommandTooLarge {
        /// Wire length of the rejected command, terminator included.
        length: usize,
        /// The configured firmware receive buffer capacity.
        capacity: usize,
    },

    /// A line of a submitted program can never fit in the receive buffer.
    ///
    /// Nothing from the program is queued when this is returned.
    #[error("Program line {line}: {length} bytes exceeds the {capacity} byte receive buffer")]
    ProgramLineTooLarge {
        /// One-based line number within the submitted text.
        line: usize,
        /// Wire length of the offending line, terminator included.
        length: usize,
        /// The configured firmware receive buffer capacity.
        capacity: usize,
    },

    /// A status report disagrees with the in-flight byte count.
    ///
    /// Raised when the firmware claims more bytes were consumed than were ever
    /// sent. The window has already been clamped to the reported value when
    /// this is surfaced.
    #[error(
        "Protocol desync: firmware reports {reported_free} free of {capacity} bytes \
         with {in_flight} bytes believed in flight"
    )]
    ProtocolDesync {
        /// Free receive-buffer bytes as reported by the firmware.
        reported_free: usize,
        /// Bytes the host believed were in flight before the report.
        in_flight: usize,
        /// The configured firmware receive buffer capacity.
        capacity: usize,
    },
}

/// Main error type for laserstream
///
/// A unified error type that can represent any error from all layers.
#[derive(Error, Debug)]
pub enum Error {
    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Streaming error
    #[error(transparent)]
    Streaming(#[from] StreamingError),

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Shorthand for a serial I/O failure on `port`
    pub fn io(port: impl Into<String>, reason: impl ToString) -> Self {
        Error::Connection(ConnectionError::Io {
            port: port.into(),
            reason: reason.to_string(),
        })
    }

    /// Check if this is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    /// Check if this is a serial I/O failure
    pub fn is_io_error(&self) -> bool {
        matches!(self, Error::Connection(ConnectionError::Io { .. }) | Error::Io(_))
    }

    /// Check if connecting again might succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Connection(
                ConnectionError::DeviceNotFound { .. }
                    | ConnectionError::Io { .. }
                    | ConnectionError::NotConnected
                    | ConnectionError::Enumeration { .. }
            ) | Error::Io(_)
        )
    }

    /// Check if this is an enqueue-time size rejection
    pub fn is_command_too_large(&self) -> bool {
        matches!(
            self,
            Error::Streaming(
                StreamingError::CommandTooLarge { .. }
                    | StreamingError::ProgramLineTooLarge { .. }
            )
        )
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;
