//! Recording consumer
//!
//! Appends one text record per published frame while recording:
//!
//! ```text
//! {timestamp:12.5};{s0:5};{s1:5};...;{s255:5}\n
//! ```
//!
//! The timestamp is the frame index since record start times the frame
//! period. Record state lives behind a session mutex that is also held while a
//! record is written, so once [`RecordingConsumer::stop_recording`] returns
//! nothing else reaches the target.

use crate::exchange::FrameExchange;
use crate::protocol::sample::decode_frame;
use crate::signal::{lock, FrameSignal, Wake};
use crate::worker::{spawn_worker, WorkerHandle};
use crate::{FRAME_BYTES, FRAME_PERIOD_SECS, SAMPLES_PER_FRAME};
use serde::Serialize;
use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors returned to the operator when recording cannot start
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Failed to create output file {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Whether records are being written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecordingState {
    Idle,
    Recording,
}

struct Session {
    writer: Option<BufWriter<Box<dyn Write + Send>>>,
    /// Frame index of the next record
    timestamp: u64,
    /// Records accepted by the writer this session
    records: u64,
    line: String,
}

/// Consumer counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecorderStats {
    /// Wake-ups that found a new frame
    pub notifications: u64,
    /// Records written across all sessions
    pub records_written: u64,
    /// Frames published while this consumer was still busy
    pub frames_skipped: u64,
    /// Failed record writes
    pub write_errors: u64,
}

/// Writes decoded frames to a text target while recording
pub struct RecordingConsumer {
    exchange: Arc<FrameExchange>,
    signal: Arc<FrameSignal>,
    session: Mutex<Session>,
    last_sequence: AtomicU64,
    notifications: AtomicU64,
    records_written: AtomicU64,
    frames_skipped: AtomicU64,
    write_errors: AtomicU64,
}

impl RecordingConsumer {
    pub fn new(exchange: Arc<FrameExchange>, signal: Arc<FrameSignal>) -> Self {
        Self {
            exchange,
            signal,
            session: Mutex::new(Session {
                writer: None,
                timestamp: 0,
                records: 0,
                line: String::with_capacity(12 + SAMPLES_PER_FRAME * 6 + 1),
            }),
            last_sequence: AtomicU64::new(0),
            notifications: AtomicU64::new(0),
            records_written: AtomicU64::new(0),
            frames_skipped: AtomicU64::new(0),
            write_errors: AtomicU64::new(0),
        }
    }

    /// Current recording state
    pub fn state(&self) -> RecordingState {
        if lock(&self.session, "recorder").writer.is_some() {
            RecordingState::Recording
        } else {
            RecordingState::Idle
        }
    }

    /// Frame index the next record will carry
    pub fn timestamp(&self) -> u64 {
        lock(&self.session, "recorder").timestamp
    }

    /// Create (truncating) `path` and start recording into it
    ///
    /// Returns `Ok(false)` without touching the file if already recording.
    pub fn start_recording(&self, path: &Path) -> Result<bool, RecorderError> {
        let mut session = lock(&self.session, "recorder");
        if session.writer.is_some() {
            tracing::warn!(path = %path.display(), "Already recording, start ignored");
            return Ok(false);
        }

        let file = File::create(path).map_err(|source| RecorderError::Create {
            path: path.to_path_buf(),
            source,
        })?;
        session.writer = Some(BufWriter::new(Box::new(file)));
        session.timestamp = 0;
        session.records = 0;
        tracing::info!(path = %path.display(), "Recording started");
        Ok(true)
    }

    /// Start recording into an arbitrary writer
    ///
    /// Returns `false` if already recording.
    pub fn start_recording_to(&self, writer: Box<dyn Write + Send>) -> bool {
        let mut session = lock(&self.session, "recorder");
        if session.writer.is_some() {
            return false;
        }
        session.writer = Some(BufWriter::new(writer));
        session.timestamp = 0;
        session.records = 0;
        tracing::info!("Recording started");
        true
    }

    /// Flush and close the target; returns the records of this session
    ///
    /// Records whose write failed are not counted. `None` if not recording.
    pub fn stop_recording(&self) -> Option<u64> {
        let mut session = lock(&self.session, "recorder");
        let mut writer = session.writer.take()?;
        if let Err(e) = writer.flush() {
            tracing::error!(error = %e, "Failed to flush recording");
            self.write_errors.fetch_add(1, Ordering::Relaxed);
        }
        let records = session.records;
        tracing::info!(records, frames = session.timestamp, "Recording stopped");
        Some(records)
    }

    /// Handle one wake-up: read the ready frame and record it if recording
    ///
    /// Returns `true` if a record was written. A wake-up that finds the same
    /// frame as the previous one writes nothing.
    pub fn process_notification(&self) -> bool {
        let mut frame = [0u8; FRAME_BYTES];
        let Some(ready) = self.exchange.read_ready(&mut frame) else {
            return false;
        };

        let last = self.last_sequence.swap(ready.sequence, Ordering::Relaxed);
        if ready.sequence <= last {
            return false;
        }
        if last > 0 && ready.sequence > last + 1 {
            let skipped = ready.sequence - last - 1;
            self.frames_skipped.fetch_add(skipped, Ordering::Relaxed);
            tracing::debug!(skipped, sequence = ready.sequence, "Recorder skipped frames");
        }

        let written = self.write_record(&frame);
        self.notifications.fetch_add(1, Ordering::Relaxed);
        written
    }

    fn write_record(&self, frame: &[u8; FRAME_BYTES]) -> bool {
        let mut session = lock(&self.session, "recorder");
        let Session {
            writer,
            timestamp,
            records,
            line,
        } = &mut *session;
        let Some(writer) = writer.as_mut() else {
            return false;
        };

        let samples = decode_frame(frame);
        format_record(*timestamp, &samples, line);
        *timestamp += 1;

        match writer.write_all(line.as_bytes()) {
            Ok(()) => {
                *records += 1;
                self.records_written.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                let errors = self.write_errors.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::error!(error = %e, errors, "Failed to write record");
                false
            }
        }
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> RecorderStats {
        RecorderStats {
            notifications: self.notifications.load(Ordering::Relaxed),
            records_written: self.records_written.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
        }
    }

    /// Records written across all sessions
    pub fn records_written(&self) -> u64 {
        self.records_written.load(Ordering::Relaxed)
    }

    /// Run the consumer loop on a thread named `fftlink-record`
    ///
    /// On quit an open recording is flushed and closed.
    pub fn spawn(self: Arc<Self>) -> std::io::Result<WorkerHandle> {
        spawn_worker("fftlink-record", move || {
            tracing::debug!(signal = self.signal.name(), "Recording consumer started");
            while self.signal.wait() == Wake::Frame {
                self.process_notification();
            }
            self.stop_recording();
        })
    }
}

/// Format one record into `line`, replacing its contents
pub fn format_record(frame_index: u64, samples: &[u16; SAMPLES_PER_FRAME], line: &mut String) {
    line.clear();
    let seconds = frame_index as f64 * FRAME_PERIOD_SECS;
    // Writing into a String cannot fail
    let _ = write!(line, "{:12.5}", seconds);
    for s in samples {
        let _ = write!(line, ";{:5}", s);
    }
    line.push('\n');
}
