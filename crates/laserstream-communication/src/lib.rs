//! # Laserstream Communication
//!
//! Serial device discovery, connection supervision and flow-controlled
//! streaming of line commands to GRBL-family laser and CNC controllers.

pub mod communication;
pub mod firmware;

pub use communication::{
    ConnectionSupervisor, Device, DeviceCatalog, DeviceEnumerator, InFlightWindow, LinkOpener,
    NativeSerialLink, SerialLink, SerialPortInfo, SessionSnapshot, SharedSession,
    StreamController, StreamingSession, SystemPorts, SystemSerialOpener, TickReport,
};

pub use firmware::{Decoded, FirmwareLine, RealtimeCommand, StatusDecoder};
