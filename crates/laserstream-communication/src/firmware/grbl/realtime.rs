//! GRBL realtime command bytes
//!
//! Realtime commands are single bytes the firmware picks out of the serial
//! stream as they arrive. They never enter the receive buffer, so they are
//! written outside the flow-control window and regardless of pause.

use std::fmt;

/// Single-byte commands executed immediately by the firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RealtimeCommand {
    /// `?` request a status report
    StatusQuery,
    /// `!` feed hold
    FeedHold,
    /// `~` cycle start / resume from hold
    CycleStart,
    /// Ctrl-X soft reset; aborts motion and empties the firmware buffers
    SoftReset,
}

impl RealtimeCommand {
    /// The byte written to the link
    pub fn byte(self) -> u8 {
        match self {
            Self::StatusQuery => b'?',
            Self::FeedHold => b'!',
            Self::CycleStart => b'~',
            Self::SoftReset => 0x18,
        }
    }

    /// Whether the firmware discards its receive buffer on this command
    pub fn clears_receive_buffer(self) -> bool {
        matches!(self, Self::SoftReset)
    }
}

impl fmt::Display for RealtimeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StatusQuery => write!(f, "status query"),
            Self::FeedHold => write!(f, "feed hold"),
            Self::CycleStart => write!(f, "cycle start"),
            Self::SoftReset => write!(f, "soft reset"),
        }
    }
}
