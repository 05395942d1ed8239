//! Serial device access
//!
//! The acquisition engine only sees two traits:
//! - [`DeviceOpener`] turns a path into an open device
//! - [`SerialDevice`] reads bytes; closing happens on drop
//!
//! Backends:
//! - Linux tty configured through termios2 ([`tty`])
//! - In-memory byte sources for tests, benches and loopback ([`memory`])

pub mod memory;
#[cfg(target_os = "linux")]
pub mod tty;

use std::io;
use thiserror::Error;

/// Errors raised while opening or configuring a device
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Failed to open device {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to configure device {path}: {source}")]
    Configure {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Serial devices are not supported on this platform")]
    Unsupported,
}

/// An open byte source
///
/// `read` may return fewer bytes than requested, including zero. The caller
/// decides what a short read means; it is never fatal at this level.
pub trait SerialDevice: Send {
    /// Read up to `buf.len()` bytes
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

impl<D: SerialDevice + ?Sized> SerialDevice for Box<D> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }
}

/// Opens devices by path
pub trait DeviceOpener: Send {
    /// Open and configure the device at `path`
    fn open(&self, path: &str) -> Result<Box<dyn SerialDevice>, DeviceError>;
}

/// Opener used when no backend exists for the target platform
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedOpener;

impl DeviceOpener for UnsupportedOpener {
    fn open(&self, _path: &str) -> Result<Box<dyn SerialDevice>, DeviceError> {
        Err(DeviceError::Unsupported)
    }
}

/// Opener for real serial ports on this platform
pub fn system_opener() -> Box<dyn DeviceOpener> {
    #[cfg(target_os = "linux")]
    {
        Box::new(tty::TtyOpener)
    }

    #[cfg(not(target_os = "linux"))]
    {
        Box::new(UnsupportedOpener)
    }
}
