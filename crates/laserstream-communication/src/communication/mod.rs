//! Serial transport and flow-controlled streaming
//!
//! Layers, bottom up:
//! - `catalog`: device enumeration and matching
//! - `serial`: the byte link to one device
//! - `window`: in-flight byte accounting
//! - `buffered`: queue, pause and progress on top of the window
//! - `supervisor`: connection lifecycle
//! - `session`: supervisor and controller behind one handle

pub mod buffered;
pub mod catalog;
pub mod serial;
pub mod session;
pub mod supervisor;
pub mod window;

pub use buffered::{StreamController, TickReport};
pub use catalog::{matches_pattern, Device, DeviceCatalog, DeviceEnumerator, SerialPortInfo, SystemPorts};
pub use serial::{write_all, LinkOpener, NativeSerialLink, SerialLink, SystemSerialOpener};
pub use session::{SessionSnapshot, SharedSession, StreamingSession};
pub use supervisor::ConnectionSupervisor;
pub use window::{InFlightWindow, WindowUpdate};
