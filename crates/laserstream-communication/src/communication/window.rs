//! In-flight byte accounting
//!
//! Tracks bytes written to the firmware whose consumption has not been
//! confirmed. `bytes_in_flight() <= capacity()` holds after every operation.

use laserstream_core::StreamingError;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct InFlight {
    wire_length: usize,
    job: u64,
}

/// Result of feeding consumption evidence into the window
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowUpdate {
    /// Commands retired by this update
    pub retired: usize,
    /// Of those, commands that belong to the job passed in
    pub retired_in_job: usize,
    /// Set when the evidence contradicted the running count; the window has
    /// already been clamped to the firmware's view
    pub desync: Option<StreamingError>,
}

/// Bytes on the wire that the firmware has not yet consumed
#[derive(Debug, Clone)]
pub struct InFlightWindow {
    capacity: usize,
    entries: VecDeque<InFlight>,
    entry_bytes: usize,
    bytes: usize,
}

impl InFlightWindow {
    /// Empty window over a `capacity` byte receive buffer
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::new(),
            entry_bytes: 0,
            bytes: 0,
        }
    }

    /// Firmware receive buffer size
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes believed to be sitting in the firmware buffer
    pub fn bytes_in_flight(&self) -> usize {
        self.bytes
    }

    /// Commands written but not yet retired
    pub fn commands_in_flight(&self) -> usize {
        self.entries.len()
    }

    /// Free bytes from the host's point of view
    pub fn available(&self) -> usize {
        self.capacity - self.bytes
    }

    /// No bytes and no commands outstanding
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.bytes == 0
    }

    /// Whether `wire_length` more bytes keep the window within capacity
    pub fn fits(&self, wire_length: usize) -> bool {
        self.bytes + wire_length <= self.capacity
    }

    /// Record a command as written. Refuses (returns false) if it would
    /// overflow the window.
    pub fn try_push(&mut self, wire_length: usize, job: u64) -> bool {
        if !self.fits(wire_length) {
            return false;
        }
        self.entries.push_back(InFlight { wire_length, job });
        self.entry_bytes += wire_length;
        self.bytes += wire_length;
        true
    }

    /// Retire the oldest command (one `ok` or `error:` line)
    pub fn acknowledge_one(&mut self, job: u64) -> WindowUpdate {
        let Some(oldest) = self.entries.pop_front() else {
            let desync = StreamingError::ProtocolDesync {
                reported_free: self.capacity,
                in_flight: self.bytes,
                capacity: self.capacity,
            };
            self.bytes = 0;
            self.entry_bytes = 0;
            return WindowUpdate {
                desync: Some(desync),
                ..WindowUpdate::default()
            };
        };

        self.entry_bytes -= oldest.wire_length;
        self.bytes = self.bytes.saturating_sub(oldest.wire_length);
        WindowUpdate {
            retired: 1,
            retired_in_job: usize::from(oldest.job == job),
            desync: None,
        }
    }

    /// Apply a firmware free-byte report.
    ///
    /// `unreported` is the number of bytes written after the query this report
    /// answers; the firmware could not have counted them yet. Whole commands
    /// are retired once the remaining entries no longer cover the reported
    /// usage. The running count is replaced by the firmware's figure.
    pub fn apply_report(&mut self, reported_free: usize, unreported: usize, job: u64) -> WindowUpdate {
        let mut update = WindowUpdate::default();

        if reported_free > self.capacity {
            update.desync = Some(StreamingError::ProtocolDesync {
                reported_free,
                in_flight: self.bytes,
                capacity: self.capacity,
            });
        }

        let used = (self.capacity.saturating_sub(reported_free) + unreported).min(self.capacity);

        while let Some(oldest) = self.entries.front().copied() {
            if self.entry_bytes - oldest.wire_length < used {
                break;
            }
            self.entries.pop_front();
            self.entry_bytes -= oldest.wire_length;
            update.retired += 1;
            if oldest.job == job {
                update.retired_in_job += 1;
            }
        }

        if used > self.entry_bytes {
            tracing::debug!(
                "Firmware holds {} bytes, {} accounted for by in-flight commands",
                used,
                self.entry_bytes
            );
        }
        self.bytes = used;
        update
    }

    /// Forget everything (after a reconnect or firmware reset)
    pub fn reset(&mut self) {
        self.entries.clear();
        self.entry_bytes = 0;
        self.bytes = 0;
    }
}
