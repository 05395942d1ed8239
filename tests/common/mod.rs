//! Shared helpers for pipeline E2E tests

#![allow(dead_code)]

use fftlink_core::device::memory::{pipe, PipeFeeder};
use fftlink_core::display::{ColorMap, DisplaySink};
use fftlink_core::pipeline::PipelineStatus;
use fftlink_core::protocol::sample::encode_constant_frame;
use fftlink_core::{ControlHandle, Pipeline, FRAME_BYTES, SAMPLES_PER_FRAME};
use std::time::{Duration, Instant};

/// Path the pipe opener accepts
pub const DEVICE: &str = "/dev/ttyFFT0";

/// Upper bound for anything the workers should do promptly
pub const DEADLINE: Duration = Duration::from_secs(10);

/// Pipeline reading from an in-memory pipe
pub struct Rig {
    pub feeder: PipeFeeder,
    pub pipeline: Pipeline,
    pub control: ControlHandle,
}

impl Rig {
    pub fn new(sink: Box<dyn DisplaySink>) -> Self {
        Self::build(sink, None)
    }

    /// Rig whose display uses `color_map`
    pub fn with_color_map(sink: Box<dyn DisplaySink>, color_map: Box<dyn ColorMap>) -> Self {
        Self::build(sink, Some(color_map))
    }

    fn build(sink: Box<dyn DisplaySink>, color_map: Option<Box<dyn ColorMap>>) -> Self {
        let (feeder, opener) = pipe(DEVICE);
        let pipeline =
            Pipeline::spawn_with(Box::new(opener), sink, color_map).expect("spawn pipeline");
        let control = pipeline.control();
        Self {
            feeder,
            pipeline,
            control,
        }
    }

    /// Block until `cond` holds for the pipeline status
    pub fn wait_for(&self, what: &str, cond: impl Fn(&PipelineStatus) -> bool) -> PipelineStatus {
        let deadline = Instant::now() + DEADLINE;
        loop {
            let status = self.control.status();
            if cond(&status) {
                return status;
            }
            assert!(
                Instant::now() < deadline,
                "timed out waiting for {}: {:?}",
                what,
                status
            );
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Push one frame and wait until both consumers handled it
    pub fn feed_and_settle(&self, bytes: &[u8]) {
        let before = self.control.status();
        self.feeder.push(bytes);
        self.wait_for("frame to reach consumers", |s| {
            s.engine.frames_published == before.engine.frames_published + 1
                && s.recorder.notifications == before.recorder.notifications + 1
                && s.display.frames_drawn == before.display.frames_drawn + 1
        });
    }

    /// Push the first half of `frame` and wait until the engine consumed it
    ///
    /// The engine is then blocked inside the frame, past its stop check.
    pub fn park_mid_frame(&self, frame: &[u8; FRAME_BYTES]) {
        self.feeder.push(&frame[..FRAME_BYTES / 2]);
        let deadline = Instant::now() + DEADLINE;
        while self.feeder.pending() > 0 {
            assert!(Instant::now() < deadline, "engine never consumed half frame");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    pub fn feed_constant(&self, value: u16) {
        self.feed_and_settle(&encode_constant_frame(value));
    }

    /// Unblock the engine and join every worker
    pub fn finish(mut self) {
        self.feeder.hang_up();
        self.pipeline.shutdown();
    }
}

/// Frame with every marker bit cleared
pub fn corrupted_frame(value: u16) -> [u8; 512] {
    let mut frame = encode_constant_frame(value);
    for b in frame.iter_mut().take(3) {
        *b &= 0x3F;
    }
    frame
}

/// Parse recorded text into (timestamp, samples) pairs
pub fn parse_records(text: &str) -> Vec<(f64, Vec<u16>)> {
    text.lines()
        .map(|line| {
            let mut fields = line.split(';');
            let ts: f64 = fields
                .next()
                .expect("timestamp field")
                .trim()
                .parse()
                .expect("numeric timestamp");
            let samples: Vec<u16> = fields
                .map(|f| f.trim().parse().expect("numeric sample"))
                .collect();
            assert_eq!(samples.len(), SAMPLES_PER_FRAME, "record width");
            (ts, samples)
        })
        .collect()
}
