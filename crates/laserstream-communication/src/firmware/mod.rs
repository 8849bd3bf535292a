//! Firmware protocol implementations
//!
//! Supported controllers:
//! - GRBL and GRBL-derived laser firmware (LasaurGrbl, grblHAL in GRBL mode)

pub mod grbl;

pub use grbl::{Decoded, FirmwareLine, RealtimeCommand, StatusDecoder};
