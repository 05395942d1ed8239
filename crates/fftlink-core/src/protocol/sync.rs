//! Frame boundary synchronization
//!
//! Turns the raw device byte stream into a sequence of 512-byte frames.
//!
//! ## States
//!
//! - `Seeking`: scan single bytes until one carries a marker, take it and the
//!   next two bytes as frame bytes 0..3, then read the rest of the frame.
//!   The frame is emitted as-is.
//! - `Synchronized`: read whole frames in 32-byte chunks and verify the three
//!   marker bytes. A frame that fails verification is replaced by an all-zero
//!   frame and the synchronizer moves to `Resyncing`.
//! - `Resyncing`: same scan as `Seeking`, but the frame found by the scan is
//!   replaced by a second all-zero frame. That blank stands for the frame
//!   consumed while the stream was being realigned.
//!
//! A device fault therefore always shows up downstream as exactly two blank
//! frames followed by valid data.
//!
//! Short reads are not fatal: the bytes that did arrive are kept, the rest
//! of the chunk is zeroed and the read is counted. Leftovers of an earlier
//! frame never survive into the next one.
//!
//! A lost device is different. A read error, or a frame attempt that gets no
//! bytes at all, is returned as [`SyncError`] and the caller ends the session.

use super::sample::{has_marker, markers_valid, MARKER_BYTES};
use crate::device::SerialDevice;
use crate::{FRAME_BYTES, READ_CHUNK};
use std::io::{self, ErrorKind};
use thiserror::Error;

/// The device can no longer deliver frames
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Device read failed: {0}")]
    Io(#[from] io::Error),

    #[error("Device delivered no data")]
    NoData,
}

/// Synchronizer state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Looking for the first frame boundary
    Seeking,
    /// Aligned, frames are read in bulk and verified
    Synchronized,
    /// Alignment lost, next frame is found by scanning
    Resyncing,
}

/// What the synchronizer put into the frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// First frame after the initial boundary scan
    Acquired,
    /// Frame read in bulk with valid markers
    Valid,
    /// Blank replacing a frame whose markers were wrong
    FaultBlank,
    /// Blank replacing the frame consumed by the realignment scan
    ResyncBlank,
}

impl FrameOutcome {
    /// True for the all-zero replacement frames
    pub fn is_blank(self) -> bool {
        matches!(self, Self::FaultBlank | Self::ResyncBlank)
    }
}

/// Result of one [`FrameSynchronizer::next_frame`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReport {
    pub outcome: FrameOutcome,
    /// Reads that returned fewer bytes than requested while building this frame
    pub short_reads: u32,
}

/// Frame synchronizer over a [`SerialDevice`]
pub struct FrameSynchronizer<D: SerialDevice> {
    device: D,
    state: SyncState,
    sync_errors: u64,
    short_reads: u64,
    bytes_read: u64,
    last_scan_skipped: u64,
}

impl<D: SerialDevice> FrameSynchronizer<D> {
    /// Wrap an open device; starts in [`SyncState::Seeking`]
    pub fn new(device: D) -> Self {
        Self {
            device,
            state: SyncState::Seeking,
            sync_errors: 0,
            short_reads: 0,
            bytes_read: 0,
            last_scan_skipped: 0,
        }
    }

    /// Current state
    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Marker verification failures seen so far
    pub fn sync_errors(&self) -> u64 {
        self.sync_errors
    }

    /// Short reads seen so far
    pub fn short_reads(&self) -> u64 {
        self.short_reads
    }

    /// Total bytes delivered by the device
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Bytes discarded by the most recent boundary scan
    pub fn last_scan_skipped(&self) -> u64 {
        self.last_scan_skipped
    }

    /// Fill `frame` with the next frame of the stream
    ///
    /// On error `frame` holds no usable data and the device should be closed.
    pub fn next_frame(
        &mut self,
        frame: &mut [u8; FRAME_BYTES],
    ) -> Result<FrameReport, SyncError> {
        let mut short_reads = 0;

        let outcome = match self.state {
            SyncState::Seeking => {
                short_reads += self.acquire(frame)?;
                self.state = SyncState::Synchronized;
                tracing::info!(skipped = self.last_scan_skipped, "Synchronized");
                FrameOutcome::Acquired
            }
            SyncState::Synchronized => {
                let (short, got) = self.read_chunks(frame, 0)?;
                if got == 0 {
                    return Err(SyncError::NoData);
                }
                short_reads += short;
                if markers_valid(frame) {
                    FrameOutcome::Valid
                } else {
                    frame.fill(0);
                    self.sync_errors += 1;
                    self.state = SyncState::Resyncing;
                    tracing::warn!(
                        errors = self.sync_errors,
                        "Frame markers missing, synchronization lost"
                    );
                    FrameOutcome::FaultBlank
                }
            }
            SyncState::Resyncing => {
                short_reads += self.acquire(frame)?;
                frame.fill(0);
                self.state = SyncState::Synchronized;
                tracing::info!(
                    skipped = self.last_scan_skipped,
                    errors = self.sync_errors,
                    "Resynchronized"
                );
                FrameOutcome::ResyncBlank
            }
        };

        self.short_reads += u64::from(short_reads);
        Ok(FrameReport {
            outcome,
            short_reads,
        })
    }

    /// Scan for a marker byte and read one full frame starting there
    fn acquire(&mut self, frame: &mut [u8; FRAME_BYTES]) -> Result<u32, SyncError> {
        let mut short_reads = 0;
        let mut skipped = 0u64;
        let mut byte = [0u8; 1];

        loop {
            if self.read_some(&mut byte)? != 1 {
                tracing::warn!(skipped, "Device went quiet during marker scan");
                return Err(SyncError::NoData);
            }
            if has_marker(byte[0]) {
                break;
            }
            skipped += 1;
        }
        self.last_scan_skipped = skipped;
        frame[0] = byte[0];

        // Bytes 1 and 2 are taken as they come
        for i in 1..MARKER_BYTES {
            if self.read_some(&mut frame[i..=i])? != 1 {
                frame[i] = 0;
                short_reads += 1;
                tracing::warn!(offset = i, "Short read after marker byte");
            }
        }

        let (short, _) = self.read_chunks(frame, MARKER_BYTES)?;
        Ok(short_reads + short)
    }

    /// Read `frame[start..]` in chunks ending on `READ_CHUNK` boundaries
    ///
    /// Returns the short read count and the bytes received.
    fn read_chunks(
        &mut self,
        frame: &mut [u8; FRAME_BYTES],
        start: usize,
    ) -> Result<(u32, usize), SyncError> {
        let mut short_reads = 0;
        let mut received = 0;
        let mut pos = start;
        while pos < FRAME_BYTES {
            let end = ((pos / READ_CHUNK + 1) * READ_CHUNK).min(FRAME_BYTES);
            let got = self.read_some(&mut frame[pos..end])?;
            if got < end - pos {
                frame[pos + got..end].fill(0);
                short_reads += 1;
                tracing::warn!(offset = pos, requested = end - pos, got, "Short read, data lost");
            }
            received += got;
            pos = end;
        }
        Ok((short_reads, received))
    }

    fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.device.read(buf) {
                Ok(n) => {
                    self.bytes_read += n as u64;
                    return Ok(n);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::error!(error = %e, "Device read error");
                    return Err(e);
                }
            }
        }
    }
}
