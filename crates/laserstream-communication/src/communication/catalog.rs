//! Serial device discovery
//!
//! Enumerates the serial devices the OS currently exposes and picks the one a
//! controller is most likely attached to. Matching is platform dependent:
//! - Linux: USB vendor/product id ("2341" finds Arduino boards)
//! - macOS: device name prefix ("tty.usbmodem")
//! - Windows: device description prefix ("Arduino")
//!
//! Enumeration is a pure read; nothing here opens a device.

use laserstream_core::{ConnectionError, Result};
use laserstream_settings::MatchStrategy;
use serde::{Deserialize, Serialize};

/// Information about an enumerated serial port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialPortInfo {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    pub port_name: String,

    /// Port description (USB product string or port kind)
    pub description: String,

    /// Manufacturer name if available
    pub manufacturer: Option<String>,

    /// Serial number if available
    pub serial_number: Option<String>,

    /// USB vendor ID if applicable
    pub vid: Option<u16>,

    /// USB product ID if applicable
    pub pid: Option<u16>,
}

impl SerialPortInfo {
    /// Create a new port info
    pub fn new(port_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            description: description.into(),
            manufacturer: None,
            serial_number: None,
            vid: None,
            pid: None,
        }
    }

    /// Set manufacturer
    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }

    /// Set serial number
    pub fn with_serial_number(mut self, serial_number: impl Into<String>) -> Self {
        self.serial_number = Some(serial_number.into());
        self
    }

    /// Set USB IDs
    pub fn with_usb_ids(mut self, vid: u16, pid: u16) -> Self {
        self.vid = Some(vid);
        self.pid = Some(pid);
        self
    }

    /// Hardware id in the usual `USB VID:PID=2341:0043 SER=...` form.
    ///
    /// Empty for non-USB ports.
    pub fn hardware_id(&self) -> String {
        match (self.vid, self.pid) {
            (Some(vid), Some(pid)) => {
                let mut id = format!("USB VID:PID={:04X}:{:04X}", vid, pid);
                if let Some(serial) = &self.serial_number {
                    id.push_str(" SER=");
                    id.push_str(serial);
                }
                id
            }
            _ => String::new(),
        }
    }

    /// Final path component ("ttyUSB0", "cu.usbmodem1411", "COM3")
    pub fn file_name(&self) -> &str {
        self.port_name
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&self.port_name)
    }
}

/// A device ready to be opened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Device path or name
    pub path: String,
    /// Baud rate to open it at
    pub baud_rate: u32,
    /// Enumeration details, absent for explicitly named devices
    pub info: Option<SerialPortInfo>,
}

impl Device {
    /// An explicitly named device
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
            info: None,
        }
    }

    fn from_info(info: SerialPortInfo, baud_rate: u32) -> Self {
        Self {
            path: info.port_name.clone(),
            baud_rate,
            info: Some(info),
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.path, self.baud_rate)
    }
}

/// Source of serial port listings
pub trait DeviceEnumerator: Send + Sync {
    /// List every serial port currently visible
    fn enumerate(&self) -> Result<Vec<SerialPortInfo>>;
}

/// Enumerates the host's serial ports via the `serialport` crate
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPorts;

impl DeviceEnumerator for SystemPorts {
    fn enumerate(&self) -> Result<Vec<SerialPortInfo>> {
        let ports = serialport::available_ports().map_err(|e| {
            tracing::error!("Failed to enumerate serial ports: {}", e);
            ConnectionError::Enumeration {
                reason: e.to_string(),
            }
        })?;

        Ok(ports
            .into_iter()
            .map(|port| match port.port_type {
                serialport::SerialPortType::UsbPort(usb) => {
                    let description = usb.product.clone().unwrap_or_else(|| "USB Serial".into());
                    let mut info = SerialPortInfo::new(port.port_name, description)
                        .with_usb_ids(usb.vid, usb.pid);
                    if let Some(mfg) = usb.manufacturer {
                        info = info.with_manufacturer(mfg);
                    }
                    if let Some(serial) = usb.serial_number {
                        info = info.with_serial_number(serial);
                    }
                    info
                }
                serialport::SerialPortType::BluetoothPort => {
                    SerialPortInfo::new(port.port_name, "Bluetooth Serial")
                }
                serialport::SerialPortType::PciPort => {
                    SerialPortInfo::new(port.port_name, "PCI Serial")
                }
                serialport::SerialPortType::Unknown => {
                    SerialPortInfo::new(port.port_name, "Serial Port")
                }
            })
            .collect())
    }
}

/// Lists devices and matches them against a pattern
pub struct DeviceCatalog {
    enumerator: Box<dyn DeviceEnumerator>,
    strategy: MatchStrategy,
}

impl DeviceCatalog {
    /// Catalog over the host's real serial ports with the platform strategy
    pub fn system() -> Self {
        Self::new(Box::new(SystemPorts), MatchStrategy::platform_default())
    }

    /// Catalog over an arbitrary port source
    pub fn new(enumerator: Box<dyn DeviceEnumerator>, strategy: MatchStrategy) -> Self {
        Self {
            enumerator,
            strategy,
        }
    }

    /// Active match strategy
    pub fn strategy(&self) -> MatchStrategy {
        self.strategy
    }

    /// Every serial device currently visible, tagged with `baud_rate`
    pub fn list_devices(&self, baud_rate: u32) -> Result<Vec<Device>> {
        let ports = self.enumerator.enumerate()?;
        tracing::debug!("Enumerated {} serial device(s)", ports.len());
        Ok(ports
            .into_iter()
            .map(|info| Device::from_info(info, baud_rate))
            .collect())
    }

    /// First enumerated device matching `pattern`.
    ///
    /// Returns `None` when nothing matches. An enumeration failure is logged
    /// and also reported as `None`.
    pub fn match_device(&self, pattern: &str, baud_rate: u32) -> Option<Device> {
        let devices = match self.list_devices(baud_rate) {
            Ok(devices) => devices,
            Err(e) => {
                tracing::warn!("Device matching skipped: {}", e);
                return None;
            }
        };

        let found = devices.into_iter().find(|device| {
            device
                .info
                .as_ref()
                .is_some_and(|info| matches_pattern(info, pattern, self.strategy))
        });

        match &found {
            Some(device) => tracing::info!("Device {} matches '{}'", device.path, pattern),
            None => tracing::debug!("No device matches '{}' ({:?})", pattern, self.strategy),
        }
        found
    }
}

/// Check one port against a pattern under a strategy
pub fn matches_pattern(info: &SerialPortInfo, pattern: &str, strategy: MatchStrategy) -> bool {
    if pattern.is_empty() {
        return false;
    }

    match strategy {
        MatchStrategy::HardwareId => {
            let needle = pattern.to_ascii_uppercase();
            info.port_name.contains(pattern)
                || info.hardware_id().to_ascii_uppercase().contains(&needle)
        }
        MatchStrategy::NamePrefix => {
            info.file_name().starts_with(pattern)
                || info.port_name.starts_with(pattern)
                || info.description.starts_with(pattern)
                || info
                    .manufacturer
                    .as_deref()
                    .is_some_and(|m| m.starts_with(pattern))
        }
        MatchStrategy::Exact => info.port_name == pattern,
    }
}
