//! Data models for commands, machine status and connection state
//!
//! This module provides:
//! - `Command`, an opaque machine instruction with its wire length
//! - `MachineState` and `MachineStatus`, the decoded firmware status snapshot
//! - `Position` with up to six axes
//! - `BufferHeadroom`, the receive-buffer occupancy a status report carries
//! - `ConnectionState`, the supervisor's lifecycle state

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// Terminator appended to every command on the wire
pub const LINE_TERMINATOR: &[u8] = b"\n";

/// A single machine instruction as it will be transmitted.
///
/// The stored line never carries its terminator. Once built a command cannot
/// be changed, so its wire length is fixed for as long as it sits in a queue
/// or in the in-flight window.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Command {
    line: Vec<u8>,
}

impl Command {
    /// Build a command, dropping any trailing CR/LF
    pub fn new(line: impl Into<Vec<u8>>) -> Self {
        let mut line = line.into();
        while matches!(line.last(), Some(b'\n' | b'\r')) {
            line.pop();
        }
        Self { line }
    }

    /// The raw line without terminator
    pub fn line(&self) -> &[u8] {
        &self.line
    }

    /// Lossy text view of the line, for logging
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.line)
    }

    /// Bytes this command occupies in the firmware receive buffer
    pub fn wire_length(&self) -> usize {
        self.line.len() + LINE_TERMINATOR.len()
    }

    /// Line plus terminator, ready for the serial link
    pub fn to_wire(&self) -> Vec<u8> {
        let mut wire = Vec::with_capacity(self.wire_length());
        wire.extend_from_slice(&self.line);
        wire.extend_from_slice(LINE_TERMINATOR);
        wire
    }

    /// True when the line is empty or whitespace only
    pub fn is_blank(&self) -> bool {
        self.line.iter().all(|b| b.is_ascii_whitespace())
    }
}

impl From<&str> for Command {
    fn from(line: &str) -> Self {
        Self::new(line.as_bytes())
    }
}

impl From<String> for Command {
    fn from(line: String) -> Self {
        Self::new(line.into_bytes())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text())
    }
}

/// Machine state as reported by the firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineState {
    /// Ready for commands
    Idle,
    /// Executing motion
    Run,
    /// Feed hold active
    Hold,
    /// Jogging
    Jog,
    /// Alarm lock, requires operator intervention
    Alarm,
    /// Safety door open
    Door,
    /// Check (dry-run) mode
    Check,
    /// Homing cycle in progress
    Home,
    /// Sleep mode
    Sleep,
    /// A state name this decoder does not know
    #[default]
    Unknown,
}

impl MachineState {
    /// Map a GRBL state name (with or without `:substate`) to a state
    pub fn from_grbl_state(name: &str) -> Self {
        let base = name.split(':').next().unwrap_or_default().trim();
        match base.to_ascii_lowercase().as_str() {
            "idle" => Self::Idle,
            "run" => Self::Run,
            "hold" | "queue" => Self::Hold,
            "jog" => Self::Jog,
            "alarm" => Self::Alarm,
            "door" => Self::Door,
            "check" => Self::Check,
            "home" => Self::Home,
            "sleep" => Self::Sleep,
            _ => {
                tracing::debug!("Unknown firmware state '{}'", name);
                Self::Unknown
            }
        }
    }

    /// Motion is happening or pending
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Run | Self::Jog | Self::Home)
    }

    /// The firmware will not execute queued motion until cleared
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Alarm | Self::Door)
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Run => "run",
            Self::Hold => "hold",
            Self::Jog => "jog",
            Self::Alarm => "alarm",
            Self::Door => "door",
            Self::Check => "check",
            Self::Home => "home",
            Self::Sleep => "sleep",
            Self::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

/// Up to six-axis position
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// X axis
    pub x: f64,
    /// Y axis
    pub y: f64,
    /// Z axis
    pub z: f64,
    /// A axis (4th axis)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub a: Option<f64>,
    /// B axis (5th axis)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub b: Option<f64>,
    /// C axis (6th axis)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub c: Option<f64>,
}

impl Position {
    /// Position with only the linear axes set
    pub fn xyz(x: f64, y: f64, z: f64) -> Self {
        Self {
            x,
            y,
            z,
            ..Self::default()
        }
    }

    /// Parse a comma separated axis list ("x,y,z[,a[,b[,c]]]").
    ///
    /// Two-axis machines (common on laser cutters) report only x,y; z is then 0.
    pub fn parse_axes(values: &str) -> Option<Self> {
        let coords = values
            .split(',')
            .map(|s| s.trim().parse::<f64>().ok())
            .collect::<Option<Vec<f64>>>()?;

        if coords.len() < 2 || coords.len() > 6 {
            return None;
        }

        Some(Self {
            x: coords[0],
            y: coords[1],
            z: coords.get(2).copied().unwrap_or(0.0),
            a: coords.get(3).copied(),
            b: coords.get(4).copied(),
            c: coords.get(5).copied(),
        })
    }

    /// Component-wise difference, used to derive WPos = MPos - WCO
    pub fn offset_by(&self, offset: &Position) -> Position {
        fn sub(p: Option<f64>, o: Option<f64>) -> Option<f64> {
            match (p, o) {
                (Some(p), Some(o)) => Some(p - o),
                (p, None) => p,
                (None, _) => None,
            }
        }
        Position {
            x: self.x - offset.x,
            y: self.y - offset.y,
            z: self.z - offset.z,
            a: sub(self.a, offset.a),
            b: sub(self.b, offset.b),
            c: sub(self.c, offset.c),
        }
    }
}

/// How the firmware expressed receive-buffer occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "bytes")]
pub enum RxReport {
    /// Bytes still free (GRBL 1.1 `Bf:` second field)
    Free(usize),
    /// Bytes currently buffered (legacy `RX:` field)
    Used(usize),
}

/// Buffer headroom carried by a status report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferHeadroom {
    /// Free planner blocks, when reported
    pub planner_blocks: Option<u16>,
    /// Receive buffer occupancy
    pub rx: RxReport,
}

impl BufferHeadroom {
    /// Free receive-buffer bytes for a buffer of `capacity` bytes.
    ///
    /// A `Free` report is returned as is, even when it exceeds `capacity`;
    /// callers use that to detect desynchronisation.
    pub fn free_bytes(&self, capacity: usize) -> usize {
        match self.rx {
            RxReport::Free(free) => free,
            RxReport::Used(used) => capacity.saturating_sub(used),
        }
    }
}

/// Last decoded status snapshot
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MachineStatus {
    /// Machine state
    pub state: MachineState,
    /// Raw state text as reported, substate included (e.g. "Hold:0")
    pub state_text: String,
    /// Machine coordinates
    pub machine_position: Option<Position>,
    /// Work coordinates
    pub work_position: Option<Position>,
    /// Work coordinate offset
    pub work_offset: Option<Position>,
    /// Buffer headroom
    pub buffer: Option<BufferHeadroom>,
    /// Current feed rate
    pub feed_rate: Option<f64>,
    /// Current spindle speed or laser power
    pub spindle_speed: Option<u32>,
}

impl MachineStatus {
    /// Free receive-buffer bytes if the report carried them
    pub fn rx_free(&self, capacity: usize) -> Option<usize> {
        self.buffer.map(|b| b.free_bytes(capacity))
    }
}

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No link open
    #[default]
    Disconnected,
    /// Opening the link
    Connecting,
    /// Link open and flushed
    Connected,
    /// Link lost to an I/O error; waiting for reconnect
    Failed,
}

impl ConnectionState {
    /// True only while a link is usable
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}
