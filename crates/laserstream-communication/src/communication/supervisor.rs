//! Connection lifecycle
//!
//! Owns at most one open link and moves between
//! `Disconnected -> Connecting -> Connected`, dropping to `Failed` when the
//! link dies underneath it. Devices are re-matched on every connect so a
//! board that re-enumerates under a new path is found again.

use crate::communication::catalog::{Device, DeviceCatalog};
use crate::communication::serial::{LinkOpener, SerialLink, SystemSerialOpener};
use laserstream_core::{ConnectionError, ConnectionState, Error, Result};
use laserstream_settings::ConnectionSettings;

/// Opens, tracks and closes the serial link
pub struct ConnectionSupervisor {
    catalog: DeviceCatalog,
    opener: Box<dyn LinkOpener>,
    settings: ConnectionSettings,
    state: ConnectionState,
    link: Option<Box<dyn SerialLink>>,
    device: Option<Device>,
}

impl ConnectionSupervisor {
    /// Supervisor over the host's real serial ports
    pub fn system(settings: ConnectionSettings) -> Self {
        let opener = SystemSerialOpener {
            read_timeout: settings.read_timeout(),
            write_timeout: settings.write_timeout(),
        };
        let catalog = DeviceCatalog::new(
            Box::new(crate::communication::catalog::SystemPorts),
            settings.match_strategy,
        );
        Self::new(catalog, Box::new(opener), settings)
    }

    /// Supervisor with an explicit catalog and opener
    pub fn new(catalog: DeviceCatalog, opener: Box<dyn LinkOpener>, settings: ConnectionSettings) -> Self {
        Self {
            catalog,
            opener,
            settings,
            state: ConnectionState::Disconnected,
            link: None,
            device: None,
        }
    }

    /// Open a link.
    ///
    /// Uses `device` when given, else the configured port, else the first
    /// catalog match. Returns `Ok(false)` without touching anything when
    /// already connected, `Ok(true)` after opening a fresh link. On failure
    /// the state is `Disconnected` and no link is held.
    pub fn connect(&mut self, device: Option<Device>) -> Result<bool> {
        if self.state == ConnectionState::Connected {
            return Ok(false);
        }

        if let Some(mut stale) = self.link.take() {
            stale.close();
        }
        self.state = ConnectionState::Connecting;

        match self.open(device) {
            Ok((device, link)) => {
                tracing::info!("Connected to {}", device);
                self.link = Some(link);
                self.device = Some(device);
                self.state = ConnectionState::Connected;
                Ok(true)
            }
            Err(e) => {
                tracing::warn!("Connect failed: {}", e);
                self.device = None;
                self.state = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    fn open(&self, device: Option<Device>) -> Result<(Device, Box<dyn SerialLink>)> {
        let device = match device {
            Some(device) => device,
            None => self.resolve_device()?,
        };

        let mut link = self.opener.open(&device)?;

        let settle = self.settings.settle_delay();
        if !settle.is_zero() {
            // Opening the port resets most boards; wait out the bootloader.
            std::thread::sleep(settle);
        }

        let flushed = link.flush_input().and_then(|_| link.flush_output());
        if let Err(e) = flushed {
            link.close();
            return Err(e);
        }
        Ok((device, link))
    }

    fn resolve_device(&self) -> Result<Device> {
        let baud_rate = self.settings.baud_rate;
        if let Some(port) = &self.settings.port {
            return Ok(Device::new(port.clone(), baud_rate));
        }

        let pattern = &self.settings.match_pattern;
        self.catalog.match_device(pattern, baud_rate).ok_or_else(|| {
            Error::from(ConnectionError::DeviceNotFound {
                pattern: pattern.clone(),
            })
        })
    }

    /// Close the link if any. Returns whether one was open.
    pub fn disconnect(&mut self) -> bool {
        let had_link = match self.link.take() {
            Some(mut link) => {
                link.close();
                true
            }
            None => false,
        };
        if had_link {
            tracing::info!("Disconnected");
        }
        self.device = None;
        self.state = ConnectionState::Disconnected;
        had_link
    }

    /// Drop a link that failed mid-stream; `connect` may be retried
    pub fn mark_failed(&mut self, cause: &Error) {
        if let Some(mut link) = self.link.take() {
            link.close();
        }
        tracing::error!("Connection failed: {}", cause);
        self.state = ConnectionState::Failed;
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether a usable link is open
    pub fn is_connected(&self) -> bool {
        self.state.is_connected() && self.link.is_some()
    }

    /// Device of the open (or last failed) link
    pub fn device(&self) -> Option<&Device> {
        self.device.as_ref()
    }

    /// The open link, if any
    pub fn link_mut(&mut self) -> Option<&mut dyn SerialLink> {
        match self.link.as_mut() {
            Some(link) => Some(link.as_mut()),
            None => None,
        }
    }

    /// Device catalog used for matching
    pub fn catalog(&self) -> &DeviceCatalog {
        &self.catalog
    }

    /// Connection settings in effect
    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }
}

impl Drop for ConnectionSupervisor {
    fn drop(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.close();
        }
    }
}
