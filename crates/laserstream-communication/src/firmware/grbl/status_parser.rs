//! GRBL status report parsing
//!
//! Turns raw firmware output into structured values. Two layers:
//! - line assembly: bytes from the link are buffered until a `\n` arrives
//! - line decoding: each complete line is classified, and bracketed status
//!   reports are parsed into a [`MachineStatus`]
//!
//! Both report dialects are understood:
//! - GRBL 1.1: `<Idle|MPos:0.000,0.000,0.000|Bf:15,128|FS:0,0|WCO:0.000,0.000,0.000>`
//! - legacy:   `<Idle,MPos:0.000,0.000,0.000,WPos:0.000,0.000,0.000,Buf:0,RX:0>`

use laserstream_core::{BufferHeadroom, MachineState, MachineStatus, Position, RxReport};

/// Outcome of decoding one line
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// A well-formed status report
    Recognized(MachineStatus),
    /// Anything that is not a status report, or a malformed one
    Unrecognized,
    /// The start of a status report without its closing bracket
    Incomplete,
}

/// A classified line of firmware output
#[derive(Debug, Clone, PartialEq)]
pub enum FirmwareLine {
    /// Status report
    Status(MachineStatus),
    /// `ok` acknowledgement
    Ok,
    /// `error:N` rejection
    Error(u8),
    /// `ALARM:N`
    Alarm(u8),
    /// Welcome banner, feedback message or anything else
    Message(String),
}

impl FirmwareLine {
    /// True for lines that retire one command under acknowledgement flow control
    pub fn is_acknowledgement(&self) -> bool {
        matches!(self, Self::Ok | Self::Error(_))
    }
}

/// Longest partial line kept while waiting for its terminator. GRBL lines
/// never exceed 255 bytes.
pub const MAX_PENDING_LINE: usize = 512;

/// Assembles lines and decodes status reports.
///
/// Owns the one authoritative copy of the latest [`MachineStatus`].
#[derive(Debug, Default)]
pub struct StatusDecoder {
    pending: Vec<u8>,
    latest: Option<MachineStatus>,
}

impl StatusDecoder {
    /// Create a decoder with no buffered input
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest successfully decoded status
    pub fn latest(&self) -> Option<&MachineStatus> {
        self.latest.as_ref()
    }

    /// Bytes held back waiting for a line terminator
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drop any partial line (used after a reconnect)
    pub fn reset_input(&mut self) {
        self.pending.clear();
    }

    /// Split buffered input into complete lines.
    ///
    /// Lines are returned without their terminator (`\n` or `\r\n`); a trailing
    /// fragment stays buffered for the next call. A fragment longer than
    /// [`MAX_PENDING_LINE`] is line noise and is discarded.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            lines.push(text.trim_end_matches('\r').to_string());
        }

        if self.pending.len() > MAX_PENDING_LINE {
            tracing::warn!(
                "Discarding {} bytes without a line terminator (wrong baud rate?)",
                self.pending.len()
            );
            self.pending.clear();
        }
        lines
    }

    /// Assemble, classify and apply incoming bytes.
    ///
    /// Status reports replace the latest snapshot in arrival order.
    pub fn ingest(&mut self, bytes: &[u8]) -> Vec<FirmwareLine> {
        let mut out = Vec::new();
        for line in self.push_bytes(bytes) {
            let Some(classified) = Self::classify(&line) else {
                continue;
            };
            if let FirmwareLine::Status(status) = &classified {
                self.latest = Some(status.clone());
            }
            out.push(classified);
        }
        out
    }

    /// Classify one complete line; `None` for blank lines
    pub fn classify(line: &str) -> Option<FirmwareLine> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        if line == "ok" {
            return Some(FirmwareLine::Ok);
        }

        if let Some(code) = line.strip_prefix("error:") {
            if let Ok(code) = code.trim().parse::<u8>() {
                return Some(FirmwareLine::Error(code));
            }
        }

        if line.get(..6).is_some_and(|p| p.eq_ignore_ascii_case("alarm:")) {
            if let Ok(code) = line[6..].trim().parse::<u8>() {
                return Some(FirmwareLine::Alarm(code));
            }
        }

        match Self::decode(line) {
            Decoded::Recognized(status) => Some(FirmwareLine::Status(status)),
            Decoded::Unrecognized | Decoded::Incomplete => {
                Some(FirmwareLine::Message(line.to_string()))
            }
        }
    }

    /// Decode a single line as a status report
    pub fn decode(line: &str) -> Decoded {
        let line = line.trim();
        let Some(rest) = line.strip_prefix('<') else {
            return Decoded::Unrecognized;
        };
        let Some(body) = rest.strip_suffix('>') else {
            return if rest.contains('>') {
                Decoded::Unrecognized
            } else {
                Decoded::Incomplete
            };
        };

        match parse_report(body) {
            Some(status) => Decoded::Recognized(status),
            None => {
                tracing::debug!("Malformed status report: {}", line);
                Decoded::Unrecognized
            }
        }
    }
}

/// Split a report body into its state name and `(key, value)` fields
fn tokenize(body: &str) -> Option<(&str, Vec<(&str, String)>)> {
    let mut fields: Vec<(&str, String)> = Vec::new();

    if body.contains('|') {
        let mut parts = body.split('|');
        let state = parts.next()?;
        for part in parts {
            let (key, value) = part.split_once(':')?;
            fields.push((key, value.to_string()));
        }
        return Some((state, fields));
    }

    // Legacy dialect: a token with ':' opens a field, bare tokens continue it.
    let mut tokens = body.split(',');
    let state = tokens.next()?;
    for token in tokens {
        match token.split_once(':') {
            Some((key, value)) => fields.push((key, value.to_string())),
            None => {
                let (_, value) = fields.last_mut()?;
                value.push(',');
                value.push_str(token);
            }
        }
    }
    Some((state, fields))
}

fn parse_report(body: &str) -> Option<MachineStatus> {
    let (state, fields) = tokenize(body)?;
    let state = state.trim();
    if !state.starts_with(|c: char| c.is_ascii_alphabetic())
        || !state.chars().all(|c| c.is_ascii_alphanumeric() || c == ':')
    {
        return None;
    }

    let mut status = MachineStatus {
        state: MachineState::from_grbl_state(state),
        state_text: state.to_string(),
        ..MachineStatus::default()
    };
    let mut planner_blocks = None;
    let mut rx = None;

    for (key, value) in fields {
        let value = value.trim();
        match key.trim() {
            "MPos" => status.machine_position = Some(Position::parse_axes(value)?),
            "WPos" => status.work_position = Some(Position::parse_axes(value)?),
            "WCO" => status.work_offset = Some(Position::parse_axes(value)?),
            "Bf" => {
                let (blocks, free) = value.split_once(',')?;
                planner_blocks = Some(blocks.trim().parse::<u16>().ok()?);
                rx = Some(RxReport::Free(free.trim().parse::<usize>().ok()?));
            }
            "RX" => {
                if rx.is_none() {
                    rx = Some(RxReport::Used(value.parse::<usize>().ok()?));
                }
            }
            "FS" => {
                let (feed, speed) = value.split_once(',')?;
                status.feed_rate = Some(feed.trim().parse::<f64>().ok()?);
                status.spindle_speed = Some(speed.trim().parse::<f64>().ok()? as u32);
            }
            "F" => status.feed_rate = Some(value.parse::<f64>().ok()?),
            // Pn, Ov, A, Ln, Buf and friends are accepted but not tracked.
            _ => {}
        }
    }

    status.buffer = rx.map(|rx| BufferHeadroom { planner_blocks, rx });

    if status.work_position.is_none() {
        if let (Some(mpos), Some(wco)) = (status.machine_position, status.work_offset) {
            status.work_position = Some(mpos.offset_by(&wco));
        }
    }

    Some(status)
}
