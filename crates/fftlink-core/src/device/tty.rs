//! Linux serial backend
//!
//! The device runs at a non-standard 3 Mbaud rate, which needs the termios2
//! interface (`TCGETS2`/`TCSETS2` with `BOTHER`). Line settings: raw mode,
//! 8 data bits, no parity, 2 stop bits, no flow control. Reads return once
//! 32 bytes arrived or after 0.1 s without a new byte.

use super::{DeviceError, DeviceOpener, SerialDevice};
use crate::BAUD_RATE;
use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;

/// Minimum bytes per read (`VMIN`)
const READ_MIN_BYTES: u8 = 32;

/// Inter-byte timeout in tenths of a second (`VTIME`)
const READ_TIMEOUT_DECISECONDS: u8 = 1;

/// Opens `/dev/tty*` style paths
#[derive(Debug, Default, Clone, Copy)]
pub struct TtyOpener;

impl DeviceOpener for TtyOpener {
    fn open(&self, path: &str) -> Result<Box<dyn SerialDevice>, DeviceError> {
        Ok(Box::new(TtyDevice::open(path)?))
    }
}

/// An open and configured serial port
#[derive(Debug)]
pub struct TtyDevice {
    file: File,
    path: String,
}

impl TtyDevice {
    /// Open `path` read-only and apply the line settings
    pub fn open(path: &str) -> Result<Self, DeviceError> {
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NOCTTY)
            .open(path)
            .map_err(|source| DeviceError::Open {
                path: path.to_string(),
                source,
            })?;

        configure(&file).map_err(|source| DeviceError::Configure {
            path: path.to_string(),
            source,
        })?;

        tracing::info!(path, baud = BAUD_RATE, "Serial port configured");

        Ok(Self {
            file,
            path: path.to_string(),
        })
    }

    /// Device path
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl SerialDevice for TtyDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Drop for TtyDevice {
    fn drop(&mut self) {
        tracing::debug!(path = %self.path, "Closing serial port");
    }
}

fn configure(file: &File) -> io::Result<()> {
    let fd = file.as_raw_fd();

    // SAFETY: termios2 is a plain C struct; all-zero is a valid value and
    // TCGETS2 overwrites it entirely.
    let mut tty: libc::termios2 = unsafe { std::mem::zeroed() };
    // SAFETY: fd is open for the lifetime of `file`, `tty` is a valid out pointer.
    if unsafe { libc::ioctl(fd, libc::TCGETS2, &mut tty) } != 0 {
        return Err(io::Error::last_os_error());
    }

    tty.c_iflag = 0;
    tty.c_oflag = 0;
    tty.c_lflag = 0;

    tty.c_cc[libc::VMIN] = READ_MIN_BYTES;
    tty.c_cc[libc::VTIME] = READ_TIMEOUT_DECISECONDS;

    tty.c_cflag = (tty.c_cflag & !libc::CSIZE) | libc::CS8;
    tty.c_cflag |= libc::CLOCAL | libc::CREAD;
    tty.c_cflag &= !(libc::PARENB | libc::PARODD);
    tty.c_cflag |= libc::CSTOPB;
    tty.c_cflag &= !libc::CRTSCTS;

    tty.c_cflag &= !libc::CBAUD;
    tty.c_cflag |= libc::BOTHER;
    tty.c_ispeed = BAUD_RATE;
    tty.c_ospeed = BAUD_RATE;

    // SAFETY: same fd, `tty` fully initialised above.
    if unsafe { libc::ioctl(fd, libc::TCSETS2, &tty) } != 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_device_reports_open_error() {
        let err = TtyDevice::open("/dev/fftlink-does-not-exist").unwrap_err();
        assert!(matches!(err, DeviceError::Open { .. }));
    }

    #[test]
    fn test_regular_file_cannot_be_configured() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let err = TtyDevice::open(&path).unwrap_err();
        assert!(matches!(err, DeviceError::Configure { .. }));
    }
}
