//! In-memory byte sources
//!
//! - [`SliceDevice`]: a fixed byte sequence, zero-length reads once drained
//! - [`pipe`]: a feeder/opener pair; reads block until the requested byte
//!   count is available or the feeder hangs up, which mimics a tty with
//!   `VMIN` set and a device that paces its output

use super::{DeviceError, DeviceOpener, SerialDevice};
use crate::protocol::sample::encode_constant_frame;
use crate::signal::{lock, wait};
use std::collections::VecDeque;
use std::io::{self, ErrorKind};
use std::sync::{Arc, Condvar, Mutex};

/// Serves a fixed byte sequence
#[derive(Debug, Clone)]
pub struct SliceDevice {
    data: Vec<u8>,
    pos: usize,
}

impl SliceDevice {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not yet read
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

impl SerialDevice for SliceDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.remaining());
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

#[derive(Debug, Default)]
struct PipeState {
    data: VecDeque<u8>,
    hung_up: bool,
    opened: u32,
}

#[derive(Debug, Default)]
struct PipeShared {
    state: Mutex<PipeState>,
    readable: Condvar,
}

/// Create a pipe whose opener accepts only `path`
pub fn pipe(path: &str) -> (PipeFeeder, PipeOpener) {
    let shared = Arc::new(PipeShared::default());
    (
        PipeFeeder {
            shared: Arc::clone(&shared),
        },
        PipeOpener {
            shared,
            path: path.to_string(),
        },
    )
}

/// Writing end of a pipe
///
/// Dropping the feeder hangs up the pipe.
#[derive(Debug)]
pub struct PipeFeeder {
    shared: Arc<PipeShared>,
}

impl PipeFeeder {
    /// Append bytes and wake the reader
    pub fn push(&self, bytes: &[u8]) {
        let mut state = lock(&self.shared.state, "pipe");
        state.data.extend(bytes.iter().copied());
        self.shared.readable.notify_all();
    }

    /// Append one encoded frame with every sample equal to `value`
    pub fn push_constant_frame(&self, value: u16) {
        self.push(&encode_constant_frame(value));
    }

    /// Stop blocking readers; pending bytes can still be read
    pub fn hang_up(&self) {
        let mut state = lock(&self.shared.state, "pipe");
        state.hung_up = true;
        self.shared.readable.notify_all();
    }

    /// Bytes pushed but not read yet
    pub fn pending(&self) -> usize {
        lock(&self.shared.state, "pipe").data.len()
    }

    /// How many times the opener handed out a device
    pub fn open_count(&self) -> u32 {
        lock(&self.shared.state, "pipe").opened
    }
}

impl Drop for PipeFeeder {
    fn drop(&mut self) {
        self.hang_up();
    }
}

/// Opening end of a pipe
#[derive(Debug)]
pub struct PipeOpener {
    shared: Arc<PipeShared>,
    path: String,
}

impl DeviceOpener for PipeOpener {
    fn open(&self, path: &str) -> Result<Box<dyn SerialDevice>, DeviceError> {
        if path != self.path {
            return Err(DeviceError::Open {
                path: path.to_string(),
                source: io::Error::from(ErrorKind::NotFound),
            });
        }
        lock(&self.shared.state, "pipe").opened += 1;
        Ok(Box::new(PipeDevice {
            shared: Arc::clone(&self.shared),
        }))
    }
}

/// Reading end handed out by [`PipeOpener`]
#[derive(Debug)]
pub struct PipeDevice {
    shared: Arc<PipeShared>,
}

impl SerialDevice for PipeDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = lock(&self.shared.state, "pipe");
        while state.data.len() < buf.len() && !state.hung_up {
            state = wait(&self.shared.readable, state, "pipe");
        }
        let n = buf.len().min(state.data.len());
        for (dst, src) in buf.iter_mut().zip(state.data.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }
}
