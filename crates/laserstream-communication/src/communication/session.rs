//! Streaming session
//!
//! Pairs a connection supervisor with a stream controller behind a single
//! handle, so a host loop only needs `connect`, `service_tick` and the job
//! control calls. A session is owned by one thread at a time; share it with
//! [`SharedSession`] when the tick loop and a control surface live apart.

use crate::communication::buffered::{StreamController, TickReport};
use crate::communication::catalog::{Device, DeviceCatalog};
use crate::communication::serial::LinkOpener;
use crate::communication::supervisor::ConnectionSupervisor;
use crate::firmware::grbl::RealtimeCommand;
use laserstream_core::{Command, ConnectionError, ConnectionState, MachineStatus, Result};
use laserstream_settings::{Config, FlowControlMode};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Session shared between threads
pub type SharedSession = Arc<Mutex<StreamingSession>>;

/// Serializable view of a session at one instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub connection: ConnectionState,
    pub device: Option<String>,
    pub flow_control: FlowControlMode,
    pub paused: bool,
    pub progress: f64,
    pub queued: usize,
    pub commands_in_flight: usize,
    pub bytes_in_flight: usize,
    pub capacity: usize,
    pub status: Option<MachineStatus>,
}

/// One connection plus the stream running over it
pub struct StreamingSession {
    id: Uuid,
    supervisor: ConnectionSupervisor,
    controller: StreamController,
}

impl StreamingSession {
    /// Session over the host's serial ports
    pub fn new(config: &Config) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_parts(
            ConnectionSupervisor::system(config.connection.clone()),
            StreamController::new(&config.streaming),
        ))
    }

    /// Session over an explicit catalog and link opener
    pub fn with_backend(
        config: &Config,
        catalog: DeviceCatalog,
        opener: Box<dyn LinkOpener>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_parts(
            ConnectionSupervisor::new(catalog, opener, config.connection.clone()),
            StreamController::new(&config.streaming),
        ))
    }

    fn from_parts(supervisor: ConnectionSupervisor, controller: StreamController) -> Self {
        let id = Uuid::new_v4();
        tracing::debug!(session = %id, "Created streaming session");
        Self {
            id,
            supervisor,
            controller,
        }
    }

    /// Wrap for sharing across threads
    pub fn into_shared(self) -> SharedSession {
        Arc::new(Mutex::new(self))
    }

    /// Unique id, used to tag log output
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Connect, or do nothing when already connected.
    ///
    /// A fresh link starts with an empty window; queued commands are kept and
    /// stream next.
    pub fn connect(&mut self, device: Option<Device>) -> Result<()> {
        let _span = tracing::info_span!("session", id = %self.id).entered();
        if self.supervisor.connect(device)? {
            self.controller.link_established();
        }
        Ok(())
    }

    /// Close the link and forget in-flight accounting. Idempotent.
    pub fn disconnect(&mut self) {
        let _span = tracing::info_span!("session", id = %self.id).entered();
        self.supervisor.disconnect();
        self.controller.link_closed();
    }

    /// Whether a usable link is open
    pub fn is_connected(&self) -> bool {
        self.supervisor.is_connected()
    }

    /// Connection lifecycle state
    pub fn connection_state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    /// Every serial device currently visible
    pub fn list_devices(&self) -> Result<Vec<Device>> {
        self.supervisor
            .catalog()
            .list_devices(self.supervisor.settings().baud_rate)
    }

    /// Run one scheduling step.
    ///
    /// An I/O failure moves the connection to `Failed` before it is returned.
    pub fn service_tick(&mut self) -> Result<TickReport> {
        let _span = tracing::trace_span!("session", id = %self.id).entered();
        let result = self.controller.service_tick(self.supervisor.link_mut());
        if let Err(e) = &result {
            if e.is_io_error() {
                self.supervisor.mark_failed(e);
            }
        }
        result
    }

    /// Queue one command
    pub fn enqueue(&mut self, command: impl Into<Command>) -> Result<()> {
        self.controller.enqueue(command)
    }

    /// Queue a whole program; see [`StreamController::enqueue_program`]
    pub fn enqueue_program(&mut self, text: &str) -> Result<usize> {
        self.controller.enqueue_program(text)
    }

    /// Pause or resume; `false` when there is nothing to do (nothing to
    /// pause, already paused, or already running)
    pub fn set_pause(&mut self, paused: bool) -> bool {
        self.controller.set_pause(paused)
    }

    /// Whether streaming is paused
    pub fn is_paused(&self) -> bool {
        self.controller.is_paused()
    }

    /// Job progress in [0, 1]
    pub fn progress(&self) -> f64 {
        self.controller.progress()
    }

    /// Drop queued commands; returns how many
    pub fn cancel(&mut self) -> usize {
        self.controller.cancel()
    }

    /// Cancel and soft-reset the firmware.
    ///
    /// Without a link this is a plain cancel.
    pub fn abort(&mut self) -> Result<usize> {
        let _span = tracing::info_span!("session", id = %self.id).entered();
        let result = match self.supervisor.link_mut() {
            Some(link) => self.controller.abort(link),
            None => return Ok(self.controller.cancel()),
        };
        if let Err(e) = &result {
            if e.is_io_error() {
                self.supervisor.mark_failed(e);
            }
        }
        result
    }

    /// Write a realtime byte now
    pub fn send_realtime(&mut self, command: RealtimeCommand) -> Result<()> {
        let Some(link) = self.supervisor.link_mut() else {
            return Err(ConnectionError::NotConnected.into());
        };
        let result = self.controller.send_realtime(link, command);
        if let Err(e) = &result {
            if e.is_io_error() {
                self.supervisor.mark_failed(e);
            }
        }
        result
    }

    /// Latest decoded status report
    pub fn status(&self) -> Option<&MachineStatus> {
        self.controller.status()
    }

    /// Nothing queued and nothing in flight
    pub fn is_drained(&self) -> bool {
        self.controller.is_drained()
    }

    /// Direct access to the stream controller
    pub fn controller(&self) -> &StreamController {
        &self.controller
    }

    /// Capture the current state
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id,
            connection: self.supervisor.state(),
            device: self.supervisor.device().map(|d| d.to_string()),
            flow_control: self.controller.flow_control(),
            paused: self.controller.is_paused(),
            progress: self.controller.progress(),
            queued: self.controller.queued_len(),
            commands_in_flight: self.controller.commands_in_flight(),
            bytes_in_flight: self.controller.bytes_in_flight(),
            capacity: self.controller.capacity(),
            status: self.controller.status().cloned(),
        }
    }
}
