//! Serial port communication implementation
//!
//! Provides the low-level byte link to a controller over USB or RS-232.
//!
//! Supports:
//! - Opening a device at a given baud rate
//! - Bounded-time writes
//! - Non-blocking reads of whatever is buffered
//! - Discarding stale input/output after a reconnect
//! - Idempotent close

use crate::communication::catalog::Device;
use laserstream_core::{Error, Result};
use std::io::{self, Read, Write};
use std::time::Duration;

/// One open serial connection
pub trait SerialLink: Send {
    /// Device path this link was opened on
    fn name(&self) -> &str;

    /// Write bytes, returning how many were accepted.
    ///
    /// Never blocks longer than the link's write timeout.
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Read whatever is currently buffered; empty when nothing is
    fn read_available(&mut self) -> Result<Vec<u8>>;

    /// Discard unread input
    fn flush_input(&mut self) -> Result<()>;

    /// Discard unsent output
    fn flush_output(&mut self) -> Result<()>;

    /// Release the OS handle. Safe to call more than once.
    fn close(&mut self);

    /// False once closed
    fn is_open(&self) -> bool;
}

/// Opens links for devices
pub trait LinkOpener: Send {
    /// Open `device` or fail with a connection I/O error.
    ///
    /// Never returns a partially opened link.
    fn open(&self, device: &Device) -> Result<Box<dyn SerialLink>>;
}

/// Opens real ports through the `serialport` crate
#[derive(Debug, Clone, Copy)]
pub struct SystemSerialOpener {
    /// Poll timeout for reads
    pub read_timeout: Duration,
    /// Upper bound for a write
    pub write_timeout: Duration,
}

impl Default for SystemSerialOpener {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(10),
            write_timeout: Duration::from_millis(100),
        }
    }
}

impl LinkOpener for SystemSerialOpener {
    fn open(&self, device: &Device) -> Result<Box<dyn SerialLink>> {
        let link = NativeSerialLink::open(device, self.read_timeout, self.write_timeout)?;
        Ok(Box::new(link))
    }
}

/// Serial link backed by an OS serial port
pub struct NativeSerialLink {
    name: String,
    port: Option<Box<dyn serialport::SerialPort>>,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl NativeSerialLink {
    /// Open a serial port for `device`, 8N1 without flow control
    pub fn open(device: &Device, read_timeout: Duration, write_timeout: Duration) -> Result<Self> {
        let builder = serialport::new(&device.path, device.baud_rate)
            .timeout(read_timeout)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .flow_control(serialport::FlowControl::None);

        match builder.open() {
            Ok(port) => {
                tracing::info!("Opened serial port {}", device);
                Ok(Self {
                    name: device.path.clone(),
                    port: Some(port),
                    read_timeout,
                    write_timeout,
                })
            }
            Err(e) => {
                tracing::warn!("Failed to open serial port {}: {}", device.path, e);
                Err(Error::io(&device.path, describe_open_error(&e)))
            }
        }
    }

    fn port(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>> {
        match self.port.as_mut() {
            Some(port) => Ok(port),
            None => Err(Error::io(&self.name, "link is closed")),
        }
    }
}

fn describe_open_error(e: &serialport::Error) -> String {
    match e.kind() {
        serialport::ErrorKind::NoDevice => format!("device absent or busy ({})", e),
        serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied) => {
            format!("permission denied ({})", e)
        }
        serialport::ErrorKind::Io(io::ErrorKind::NotFound) => format!("device absent ({})", e),
        _ => e.to_string(),
    }
}

impl SerialLink for NativeSerialLink {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let (name, read_timeout, write_timeout) =
            (self.name.clone(), self.read_timeout, self.write_timeout);
        let port = self.port()?;

        // The port has a single timeout; raise it for the write and restore after.
        port.set_timeout(write_timeout)
            .map_err(|e| Error::io(&name, e))?;
        let written = match port.write(data) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(Error::io(&name, e)),
        };
        port.set_timeout(read_timeout)
            .map_err(|e| Error::io(&name, e))?;
        written
    }

    fn read_available(&mut self) -> Result<Vec<u8>> {
        let name = self.name.clone();
        let port = self.port()?;

        let pending = port.bytes_to_read().map_err(|e| Error::io(&name, e))? as usize;
        if pending == 0 {
            return Ok(Vec::new());
        }

        let mut buf = vec![0u8; pending];
        match port.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) => Err(Error::io(&name, e)),
        }
    }

    fn flush_input(&mut self) -> Result<()> {
        let name = self.name.clone();
        self.port()?
            .clear(serialport::ClearBuffer::Input)
            .map_err(|e| Error::io(&name, e))
    }

    fn flush_output(&mut self) -> Result<()> {
        let name = self.name.clone();
        self.port()?
            .clear(serialport::ClearBuffer::Output)
            .map_err(|e| Error::io(&name, e))
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            tracing::info!("Closed serial port {}", self.name);
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }
}

impl Drop for NativeSerialLink {
    fn drop(&mut self) {
        self.close();
    }
}

/// Write all of `data`, failing if the link stops accepting bytes.
///
/// A zero-length write (the link's write timeout expired) counts as failure
/// so a stalled device cannot hang the caller.
pub fn write_all(link: &mut dyn SerialLink, data: &[u8]) -> Result<()> {
    let mut offset = 0;
    while offset < data.len() {
        let n = link.write(&data[offset..])?;
        if n == 0 {
            return Err(Error::io(
                link.name().to_string(),
                format!("write stalled after {} of {} bytes", offset, data.len()),
            ));
        }
        offset += n;
    }
    Ok(())
}
