//! Buffered streaming with flow control
//!
//! Implements the GRBL character-counting protocol: commands wait in a FIFO
//! queue and are written whole only while the in-flight window has room for
//! them. Consumption evidence comes either from the free-byte field of status
//! reports or from `ok`/`error:` acknowledgements.
//!
//! # Features
//! - Unbounded command queue with size admission
//! - In-flight byte window that never exceeds the firmware buffer
//! - Status polling with stale-report compensation
//! - Pause/resume, cancel and job progress
//! - Realtime bytes outside the window

use crate::communication::serial::{write_all, SerialLink};
use crate::communication::window::{InFlightWindow, WindowUpdate};
use crate::firmware::grbl::{describe_alarm, describe_error, FirmwareLine, RealtimeCommand, StatusDecoder};
use laserstream_core::{Command, Error, MachineStatus, Result, StreamingError};
use laserstream_settings::{FlowControlMode, StreamingSettings};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Status queries whose replies are still awaited before new ones go
/// untracked. An untracked query only makes later accounting more cautious.
const MAX_TRACKED_POLLS: usize = 8;

/// What one `service_tick` did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Complete lines received from the firmware
    pub lines_received: usize,
    /// Status reports among those lines
    pub status_reports: usize,
    /// In-flight commands retired
    pub retired: usize,
    /// Commands written
    pub commands_sent: usize,
    /// Bytes written for those commands
    pub bytes_sent: usize,
    /// Whether a status query went out
    pub polled: bool,
}

/// Flow-controlled command streamer.
///
/// Owns the queue, the in-flight window and the line decoder. Performs no I/O
/// of its own; every tick borrows the link it should talk to.
pub struct StreamController {
    queue: VecDeque<Command>,
    window: InFlightWindow,
    decoder: StatusDecoder,
    flow_control: FlowControlMode,
    poll_interval: Option<Duration>,
    skip_blank_lines: bool,

    paused: bool,
    job: u64,
    job_total: usize,
    job_retired: usize,

    last_poll: Option<Instant>,
    polls_in_flight: VecDeque<u64>,
    bytes_written: u64,

    window_reliable: bool,
    desyncs: u64,
}

impl StreamController {
    /// Create a controller for the given streaming settings
    pub fn new(settings: &StreamingSettings) -> Self {
        if settings.flow_control == FlowControlMode::BufferReport
            && settings.status_poll_interval().is_none()
        {
            tracing::warn!("Status polling disabled; the window only drains on unsolicited reports");
        }
        Self {
            queue: VecDeque::new(),
            window: InFlightWindow::new(settings.rx_buffer_capacity),
            decoder: StatusDecoder::new(),
            flow_control: settings.flow_control,
            poll_interval: settings.status_poll_interval(),
            skip_blank_lines: settings.skip_blank_lines,
            paused: false,
            job: 0,
            job_total: 0,
            job_retired: 0,
            last_poll: None,
            polls_in_flight: VecDeque::new(),
            bytes_written: 0,
            window_reliable: true,
            desyncs: 0,
        }
    }

    /// Append a command to the queue.
    ///
    /// Rejects commands whose wire length exceeds the receive buffer; such a
    /// command could never be sent. Never blocks and never performs I/O.
    pub fn enqueue(&mut self, command: impl Into<Command>) -> Result<()> {
        let command = command.into();
        self.check_fits(&command)?;
        self.start_job_if_finished();
        self.queue.push_back(command);
        self.job_total += 1;
        Ok(())
    }

    /// Enqueue a whole program, one command per line.
    ///
    /// Every line is checked before anything is queued; if one is too large
    /// the error names its one-based line number and the queue is untouched.
    /// Returns the number of commands queued.
    pub fn enqueue_program(&mut self, text: &str) -> Result<usize> {
        let mut commands = Vec::new();
        for (index, line) in text.lines().enumerate() {
            let command = Command::from(line);
            if self.skip_blank_lines && command.is_blank() {
                continue;
            }
            if let Err(e) = self.check_fits(&command) {
                if let Error::Streaming(StreamingError::CommandTooLarge { length, capacity }) = e {
                    return Err(StreamingError::ProgramLineTooLarge {
                        line: index + 1,
                        length,
                        capacity,
                    }
                    .into());
                }
                return Err(e);
            }
            commands.push(command);
        }

        let count = commands.len();
        if count > 0 {
            self.start_job_if_finished();
            self.queue.extend(commands);
            self.job_total += count;
        }
        tracing::info!("Queued program of {} command(s)", count);
        Ok(count)
    }

    fn check_fits(&self, command: &Command) -> Result<()> {
        let length = command.wire_length();
        let capacity = self.window.capacity();
        if length > capacity {
            tracing::warn!(
                "Rejected {} byte command (receive buffer is {} bytes)",
                length,
                capacity
            );
            return Err(StreamingError::CommandTooLarge { length, capacity }.into());
        }
        Ok(())
    }

    // A job ends once nothing it queued is left in the queue or the window.
    // A link reset drops in-flight entries without retiring them.
    fn start_job_if_finished(&mut self) {
        let nothing_left = self.job_retired >= self.job_total || self.window.commands_in_flight() == 0;
        if self.queue.is_empty() && nothing_left && self.job_total > 0 {
            tracing::debug!("Job of {} command(s) finished", self.job_total);
            self.job_total = 0;
            self.job_retired = 0;
        }
    }

    /// One scheduling step: read, account, send, poll.
    ///
    /// With no link, or while paused, nothing happens. A write failure leaves
    /// the failed command at the head of the queue, marks the window
    /// unreliable and is returned to the caller.
    pub fn service_tick(&mut self, link: Option<&mut dyn SerialLink>) -> Result<TickReport> {
        let mut report = TickReport::default();
        let Some(link) = link else {
            return Ok(report);
        };
        if self.paused {
            return Ok(report);
        }
        if !self.window_reliable {
            tracing::debug!("Window unreliable until the link is re-established");
            return Ok(report);
        }

        self.receive(link, &mut report)?;
        self.send(link, &mut report)?;
        self.poll_if_due(link, &mut report)?;
        Ok(report)
    }

    fn receive(&mut self, link: &mut dyn SerialLink, report: &mut TickReport) -> Result<()> {
        let bytes = link.read_available().map_err(|e| self.link_failed(e))?;
        if bytes.is_empty() {
            return Ok(());
        }

        for line in self.decoder.ingest(&bytes) {
            report.lines_received += 1;
            let acknowledges = line.is_acknowledgement();
            match line {
                FirmwareLine::Status(status) => {
                    report.status_reports += 1;
                    let sent_since_query = self
                        .polls_in_flight
                        .pop_front()
                        .map_or(0, |at| (self.bytes_written - at) as usize);

                    if self.flow_control == FlowControlMode::BufferReport {
                        if let Some(free) = status.rx_free(self.window.capacity()) {
                            let update = self.window.apply_report(free, sent_since_query, self.job);
                            report.retired += self.account(update);
                        }
                    }
                }
                FirmwareLine::Ok => {}
                FirmwareLine::Error(code) => {
                    tracing::error!("Firmware error {}: {}", code, describe_error(code));
                }
                FirmwareLine::Alarm(code) => {
                    tracing::warn!("Firmware alarm {}: {}", code, describe_alarm(code));
                }
                FirmwareLine::Message(text) => {
                    tracing::debug!("< {}", text);
                }
            }

            if acknowledges && self.flow_control == FlowControlMode::Acknowledge {
                let update = self.window.acknowledge_one(self.job);
                report.retired += self.account(update);
            }
        }
        Ok(())
    }

    fn account(&mut self, update: WindowUpdate) -> usize {
        if let Some(desync) = update.desync {
            self.desyncs += 1;
            tracing::warn!("{}; window clamped to the firmware's count", desync);
        }
        self.job_retired = (self.job_retired + update.retired_in_job).min(self.job_total);
        update.retired
    }

    fn send(&mut self, link: &mut dyn SerialLink, report: &mut TickReport) -> Result<()> {
        while let Some(next) = self.queue.front() {
            let length = next.wire_length();
            if !self.window.fits(length) {
                break;
            }

            let wire = next.to_wire();
            if let Err(e) = write_all(link, &wire) {
                return Err(self.link_failed(e));
            }
            tracing::trace!("> {}", next);

            self.queue.pop_front();
            self.window.try_push(length, self.job);
            self.bytes_written += length as u64;
            report.commands_sent += 1;
            report.bytes_sent += length;
        }
        Ok(())
    }

    fn poll_if_due(&mut self, link: &mut dyn SerialLink, report: &mut TickReport) -> Result<()> {
        let Some(interval) = self.poll_interval else {
            return Ok(());
        };
        let due = self
            .last_poll
            .is_none_or(|at| at.elapsed() >= interval);
        if !due {
            return Ok(());
        }

        self.write_realtime(link, RealtimeCommand::StatusQuery)?;
        self.last_poll = Some(Instant::now());
        report.polled = true;
        Ok(())
    }

    fn write_realtime(&mut self, link: &mut dyn SerialLink, command: RealtimeCommand) -> Result<()> {
        if let Err(e) = write_all(link, &[command.byte()]) {
            return Err(self.link_failed(e));
        }

        if command == RealtimeCommand::StatusQuery && self.polls_in_flight.len() < MAX_TRACKED_POLLS {
            self.polls_in_flight.push_back(self.bytes_written);
        }
        if command.clears_receive_buffer() {
            self.window.reset();
            self.decoder.reset_input();
            self.polls_in_flight.clear();
        }
        Ok(())
    }

    fn link_failed(&mut self, e: Error) -> Error {
        tracing::error!("Link failure while streaming: {}", e);
        self.window_reliable = false;
        e
    }

    /// Write a realtime byte immediately, bypassing queue, window and pause
    pub fn send_realtime(&mut self, link: &mut dyn SerialLink, command: RealtimeCommand) -> Result<()> {
        tracing::debug!("Sending realtime {}", command);
        self.write_realtime(link, command)
    }

    /// Pause or resume streaming.
    ///
    /// Returns `false` when there is nothing to do: pausing with nothing
    /// queued or in flight, pausing while paused, resuming while running.
    pub fn set_pause(&mut self, paused: bool) -> bool {
        if paused && self.is_drained() {
            return false;
        }
        if self.paused == paused {
            return false;
        }
        tracing::info!("Streaming {}", if paused { "paused" } else { "resumed" });
        self.paused = paused;
        true
    }

    /// Whether streaming is paused
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Fraction of the current job acknowledged by the firmware, in [0, 1]
    pub fn progress(&self) -> f64 {
        if self.job_total == 0 {
            return 0.0;
        }
        (self.job_retired as f64 / self.job_total as f64).clamp(0.0, 1.0)
    }

    /// Drop every queued command and reset job progress.
    ///
    /// Bytes already in flight stay accounted until the firmware consumes
    /// them. Returns how many commands were dropped.
    pub fn cancel(&mut self) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        self.job += 1;
        self.job_total = 0;
        self.job_retired = 0;
        tracing::info!("Cancelled streaming, dropped {} queued command(s)", dropped);
        dropped
    }

    /// Cancel and soft-reset the firmware, which discards its buffer
    pub fn abort(&mut self, link: &mut dyn SerialLink) -> Result<usize> {
        let dropped = self.cancel();
        self.paused = false;
        self.send_realtime(link, RealtimeCommand::SoftReset)?;
        Ok(dropped)
    }

    /// Start from a clean slate on a freshly opened link.
    ///
    /// Queued commands survive and are sent next, in order.
    pub fn link_established(&mut self) {
        self.window.reset();
        self.decoder.reset_input();
        self.polls_in_flight.clear();
        self.last_poll = None;
        self.window_reliable = true;
    }

    /// Forget link state after a disconnect; also clears pause
    pub fn link_closed(&mut self) {
        self.window.reset();
        self.decoder.reset_input();
        self.polls_in_flight.clear();
        self.last_poll = None;
        self.paused = false;
    }

    /// Latest decoded status report
    pub fn status(&self) -> Option<&MachineStatus> {
        self.decoder.latest()
    }

    /// Commands waiting to be sent
    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    /// Queued commands in send order
    pub fn queued(&self) -> impl Iterator<Item = &Command> {
        self.queue.iter()
    }

    /// Bytes believed to be in the firmware buffer
    pub fn bytes_in_flight(&self) -> usize {
        self.window.bytes_in_flight()
    }

    /// Commands written but not yet retired
    pub fn commands_in_flight(&self) -> usize {
        self.window.commands_in_flight()
    }

    /// Firmware receive buffer capacity
    pub fn capacity(&self) -> usize {
        self.window.capacity()
    }

    /// Nothing queued and nothing in flight
    pub fn is_drained(&self) -> bool {
        self.queue.is_empty() && self.window.is_empty()
    }

    /// Whether the window still reflects what was written
    pub fn is_window_reliable(&self) -> bool {
        self.window_reliable
    }

    /// Desync events since creation
    pub fn desync_count(&self) -> u64 {
        self.desyncs
    }

    /// Active flow control mode
    pub fn flow_control(&self) -> FlowControlMode {
        self.flow_control
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Loopback {
        written: Vec<u8>,
        incoming: Vec<u8>,
    }

    impl Loopback {
        fn new() -> Self {
            Self {
                written: Vec::new(),
                incoming: Vec::new(),
            }
        }
    }

    impl SerialLink for Loopback {
        fn name(&self) -> &str {
            "loopback"
        }
        fn write(&mut self, data: &[u8]) -> Result<usize> {
            self.written.extend_from_slice(data);
            Ok(data.len())
        }
        fn read_available(&mut self) -> Result<Vec<u8>> {
            Ok(std::mem::take(&mut self.incoming))
        }
        fn flush_input(&mut self) -> Result<()> {
            Ok(())
        }
        fn flush_output(&mut self) -> Result<()> {
            Ok(())
        }
        fn close(&mut self) {}
        fn is_open(&self) -> bool {
            true
        }
    }

    fn quiet(flow_control: FlowControlMode) -> StreamController {
        StreamController::new(&StreamingSettings {
            flow_control,
            status_poll_ms: None,
            ..StreamingSettings::default()
        })
    }

    #[test]
    fn test_enqueue_rejects_oversized() {
        let mut controller = quiet(FlowControlMode::BufferReport);
        let err = controller.enqueue("X".repeat(128)).unwrap_err();
        assert!(err.is_command_too_large());
        assert_eq!(controller.queued_len(), 0);

        // 127 characters plus the terminator fit exactly
        controller.enqueue("X".repeat(127)).unwrap();
        assert_eq!(controller.queued_len(), 1);
    }

    #[test]
    fn test_tick_without_link_is_noop() {
        let mut controller = quiet(FlowControlMode::BufferReport);
        controller.enqueue("G0 X1").unwrap();
        let report = controller.service_tick(None).unwrap();
        assert_eq!(report, TickReport::default());
        assert_eq!(controller.queued_len(), 1);
    }

    #[test]
    fn test_acknowledge_mode_streams_on_ok() {
        let mut controller = quiet(FlowControlMode::Acknowledge);
        let mut link = Loopback::new();
        for _ in 0..4 {
            controller.enqueue("X".repeat(59)).unwrap();
        }

        controller.service_tick(Some(&mut link)).unwrap();
        assert_eq!(controller.commands_in_flight(), 2);
        assert_eq!(controller.bytes_in_flight(), 120);

        link.incoming = b"ok\r\nerror:20\r\n".to_vec();
        let report = controller.service_tick(Some(&mut link)).unwrap();
        assert_eq!(report.retired, 2);
        assert_eq!(report.commands_sent, 2);
        assert_eq!(controller.queued_len(), 0);
        assert_eq!(controller.progress(), 0.5);
    }

    #[test]
    fn test_unexpected_ok_counts_desync() {
        let mut controller = quiet(FlowControlMode::Acknowledge);
        let mut link = Loopback::new();
        link.incoming = b"ok\n".to_vec();
        controller.service_tick(Some(&mut link)).unwrap();
        assert_eq!(controller.desync_count(), 1);
        assert_eq!(controller.bytes_in_flight(), 0);
    }

    #[test]
    fn test_pause_requires_work() {
        let mut controller = quiet(FlowControlMode::BufferReport);
        assert!(!controller.set_pause(true));
        assert!(!controller.is_paused());

        controller.enqueue("G1 X1").unwrap();
        assert!(controller.set_pause(true));
        assert!(controller.is_paused());
        assert!(controller.set_pause(false));
        assert!(!controller.is_paused());
    }

    #[test]
    fn test_repeated_pause_and_resume_are_noops() {
        let mut controller = quiet(FlowControlMode::BufferReport);
        controller.enqueue("G0 X1").unwrap();

        assert!(controller.set_pause(true));
        assert!(!controller.set_pause(true));
        assert!(controller.is_paused());

        assert!(controller.set_pause(false));
        assert!(!controller.set_pause(false));
        assert!(!controller.is_paused());
    }

    #[test]
    fn test_link_reset_ends_job() {
        let mut controller = quiet(FlowControlMode::Acknowledge);
        let mut link = Loopback::new();
        controller.enqueue("G0 X1").unwrap();
        controller.enqueue("G0 X2").unwrap();
        controller.service_tick(Some(&mut link)).unwrap();

        controller.link_closed();
        controller.link_established();
        assert!(controller.is_drained());

        controller.enqueue("M5").unwrap();
        assert_eq!(controller.progress(), 0.0);
        controller.service_tick(Some(&mut link)).unwrap();
        link.incoming = b"ok\n".to_vec();
        controller.service_tick(Some(&mut link)).unwrap();
        assert_eq!(controller.progress(), 1.0);
    }

    #[test]
    fn test_enqueue_program_is_all_or_nothing() {
        let mut controller = quiet(FlowControlMode::BufferReport);
        let program = format!("G21\n\nG0 X0\n{}\nM5\n", "Y".repeat(200));
        let err = controller.enqueue_program(&program).unwrap_err();
        assert!(matches!(
            err,
            Error::Streaming(StreamingError::ProgramLineTooLarge { line: 4, .. })
        ));
        assert_eq!(controller.queued_len(), 0);

        let count = controller.enqueue_program("G21\r\n\r\nG0 X0\r\nM5").unwrap();
        assert_eq!(count, 3);
        let texts: Vec<String> = controller.queued().map(|c| c.text().into_owned()).collect();
        assert_eq!(texts, vec!["G21", "G0 X0", "M5"]);
    }

    #[test]
    fn test_status_poll_and_stale_report() {
        let mut controller = StreamController::new(&StreamingSettings {
            status_poll_ms: Some(60_000),
            ..StreamingSettings::default()
        });
        let mut link = Loopback::new();

        // First tick polls before anything is queued
        let report = controller.service_tick(Some(&mut link)).unwrap();
        assert!(report.polled);
        assert_eq!(link.written, b"?");

        controller.enqueue("X".repeat(39)).unwrap();
        controller.service_tick(Some(&mut link)).unwrap();
        assert_eq!(controller.bytes_in_flight(), 40);

        // Reply to the earlier query: the 40 bytes were written after it
        link.incoming = b"<Idle|MPos:0,0,0|Bf:15,128>\r\n".to_vec();
        controller.service_tick(Some(&mut link)).unwrap();
        assert_eq!(controller.bytes_in_flight(), 40);
        assert_eq!(controller.commands_in_flight(), 1);
        assert!(controller.status().is_some());
    }

    #[test]
    fn test_abort_resets_window() {
        let mut controller = quiet(FlowControlMode::BufferReport);
        let mut link = Loopback::new();
        controller.enqueue("G0 X10").unwrap();
        controller.enqueue("G0 X20").unwrap();
        controller.service_tick(Some(&mut link)).unwrap();
        controller.enqueue("G0 X30").unwrap();

        let dropped = controller.abort(&mut link).unwrap();
        assert_eq!(dropped, 1);
        assert_eq!(link.written.last(), Some(&0x18));
        assert!(controller.is_drained());
        assert_eq!(controller.progress(), 0.0);
    }
}
