//! # Laserstream Core
//!
//! Core types and errors shared by the laserstream crates: the command and
//! status data model, connection states, and the layered error types.

pub mod data;
pub mod error;

pub use data::{
    BufferHeadroom, Command, ConnectionState, MachineState, MachineStatus, Position, RxReport,
    LINE_TERMINATOR,
};

pub use error::{ConnectionError, Error, Result, StreamingError};
