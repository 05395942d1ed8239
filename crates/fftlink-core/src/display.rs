//! Live spectrogram consumer
//!
//! Each frame becomes one column of a circular RGBA image: the column index
//! advances by one per frame and wraps at [`IMAGE_WIDTH`], bin `i` is drawn
//! at row `IMAGE_HEIGHT - 1 - i` so low bins sit at the bottom. Every
//! [`PRESENT_INTERVAL`]th frame the whole image goes to a [`DisplaySink`].

use crate::exchange::FrameExchange;
use crate::protocol::sample::decode_frame;
use crate::signal::{lock, FrameSignal, Wake};
use crate::worker::{spawn_worker, WorkerHandle};
use crate::{FRAME_BYTES, IMAGE_HEIGHT, IMAGE_WIDTH, MAX_SAMPLE, PRESENT_INTERVAL};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Bytes per RGBA pixel
const BYTES_PER_PIXEL: usize = 4;

/// Errors raised by display sinks
#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("Failed to write snapshot {path}: {source}")]
    Snapshot {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// RGBA pixel buffer, row-major, 4 bytes per pixel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBuffer {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
}

impl ImageBuffer {
    /// Create a buffer filled with `fill`
    pub fn new(width: usize, height: usize, fill: [u8; 4]) -> Self {
        let mut pixels = Vec::with_capacity(width * height * BYTES_PER_PIXEL);
        for _ in 0..width * height {
            pixels.extend_from_slice(&fill);
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Pixel at column `x`, row `y`
    ///
    /// # Panics
    /// Panics if the coordinates are outside the buffer.
    pub fn pixel(&self, x: usize, y: usize) -> [u8; 4] {
        let i = self.offset(x, y);
        [
            self.pixels[i],
            self.pixels[i + 1],
            self.pixels[i + 2],
            self.pixels[i + 3],
        ]
    }

    /// Overwrite the pixel at column `x`, row `y`
    pub fn set_pixel(&mut self, x: usize, y: usize, rgba: [u8; 4]) {
        let i = self.offset(x, y);
        self.pixels[i..i + BYTES_PER_PIXEL].copy_from_slice(&rgba);
    }

    /// Raw RGBA bytes
    pub fn as_raw(&self) -> &[u8] {
        &self.pixels
    }

    fn offset(&self, x: usize, y: usize) -> usize {
        assert!(x < self.width && y < self.height, "pixel ({x}, {y}) out of bounds");
        (y * self.width + x) * BYTES_PER_PIXEL
    }
}

/// Maps a sample value to an RGBA color
pub trait ColorMap: Send {
    fn color(&self, sample: u16) -> [u8; 4];
}

/// Log-scaled three-band ramp
///
/// `t = log10(1 + 9 * v / 4096)`, then dark blue to cyan, cyan to magenta,
/// magenta to white, one third of `t` each.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogRamp;

impl LogRamp {
    /// Blue level of the zero sample
    const FLOOR_BLUE: f32 = 47.0;
}

impl ColorMap for LogRamp {
    fn color(&self, sample: u16) -> [u8; 4] {
        let linear = f32::from(sample.min(MAX_SAMPLE)) / f32::from(MAX_SAMPLE + 1);
        let t = (1.0 + 9.0 * linear).log10().clamp(0.0, 1.0);
        let level = |x: f32| (x.clamp(0.0, 1.0) * 255.0) as u8;

        if t < 1.0 / 3.0 {
            let f = t * 3.0;
            let blue = (Self::FLOOR_BLUE + f * (255.0 - Self::FLOOR_BLUE)) as u8;
            [0, level(f), blue, 255]
        } else if t < 2.0 / 3.0 {
            let f = (t - 1.0 / 3.0) * 3.0;
            [level(f), level(1.0 - f), 255, 255]
        } else {
            let f = (t - 2.0 / 3.0) * 3.0;
            [255, level(f), 255, 255]
        }
    }
}

/// Receives the full image at the presentation cadence
pub trait DisplaySink: Send {
    fn present(&mut self, image: &ImageBuffer) -> Result<(), DisplayError>;
}

/// Sink that discards every image
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl DisplaySink for NullSink {
    fn present(&mut self, _image: &ImageBuffer) -> Result<(), DisplayError> {
        Ok(())
    }
}

/// Writes each presented image to a PNG file, replacing the previous one
#[derive(Debug, Clone)]
pub struct PngSnapshotSink {
    path: PathBuf,
}

impl PngSnapshotSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DisplaySink for PngSnapshotSink {
    fn present(&mut self, image: &ImageBuffer) -> Result<(), DisplayError> {
        image::save_buffer_with_format(
            &self.path,
            image.as_raw(),
            image.width() as u32,
            image.height() as u32,
            image::ColorType::Rgba8,
            image::ImageFormat::Png,
        )
        .map_err(|source| DisplayError::Snapshot {
            path: self.path.clone(),
            source,
        })
    }
}

/// Keeps the last presented image for inspection from another thread
#[derive(Debug, Clone, Default)]
pub struct CaptureSink {
    latest: Arc<Mutex<Option<ImageBuffer>>>,
    presents: Arc<AtomicU64>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the most recently presented image
    pub fn latest(&self) -> Option<ImageBuffer> {
        lock(&self.latest, "capture-sink").clone()
    }

    /// Number of images presented so far
    pub fn presents(&self) -> u64 {
        self.presents.load(Ordering::Relaxed)
    }
}

impl DisplaySink for CaptureSink {
    fn present(&mut self, image: &ImageBuffer) -> Result<(), DisplayError> {
        *lock(&self.latest, "capture-sink") = Some(image.clone());
        self.presents.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Display counters shared with the control thread
#[derive(Debug, Default)]
pub struct DisplayCounters {
    frames_drawn: AtomicU64,
    presents: AtomicU64,
    present_errors: AtomicU64,
    frames_skipped: AtomicU64,
    column: AtomicUsize,
}

/// Point-in-time copy of [`DisplayCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DisplayStats {
    pub frames_drawn: u64,
    pub presents: u64,
    pub present_errors: u64,
    pub frames_skipped: u64,
    /// Column of the most recently drawn frame
    pub column: usize,
}

impl DisplayCounters {
    pub fn snapshot(&self) -> DisplayStats {
        DisplayStats {
            frames_drawn: self.frames_drawn.load(Ordering::Relaxed),
            presents: self.presents.load(Ordering::Relaxed),
            present_errors: self.present_errors.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            column: self.column.load(Ordering::Relaxed),
        }
    }

    pub fn frames_drawn(&self) -> u64 {
        self.frames_drawn.load(Ordering::Relaxed)
    }
}

/// Draws published frames into the spectrogram
pub struct DisplayConsumer {
    exchange: Arc<FrameExchange>,
    signal: Arc<FrameSignal>,
    sink: Box<dyn DisplaySink>,
    color_map: Box<dyn ColorMap>,
    image: ImageBuffer,
    column: usize,
    /// Frames drawn since start, drives the present cadence
    drawn: u64,
    last_sequence: u64,
    counters: Arc<DisplayCounters>,
}

impl DisplayConsumer {
    /// Create a consumer with the [`LogRamp`] color map
    pub fn new(
        exchange: Arc<FrameExchange>,
        signal: Arc<FrameSignal>,
        sink: Box<dyn DisplaySink>,
    ) -> Self {
        let color_map: Box<dyn ColorMap> = Box::new(LogRamp);
        let background = color_map.color(0);
        Self {
            exchange,
            signal,
            sink,
            color_map,
            image: ImageBuffer::new(IMAGE_WIDTH, IMAGE_HEIGHT, background),
            // First frame lands in column 0
            column: IMAGE_WIDTH - 1,
            drawn: 0,
            last_sequence: 0,
            counters: Arc::new(DisplayCounters::default()),
        }
    }

    /// Replace the color map; the image is cleared to the new map's zero color
    pub fn with_color_map(mut self, color_map: Box<dyn ColorMap>) -> Self {
        self.image = ImageBuffer::new(IMAGE_WIDTH, IMAGE_HEIGHT, color_map.color(0));
        self.color_map = color_map;
        self
    }

    /// Counters readable while the consumer runs on its thread
    pub fn counters(&self) -> Arc<DisplayCounters> {
        Arc::clone(&self.counters)
    }

    /// Current image
    pub fn image(&self) -> &ImageBuffer {
        &self.image
    }

    /// Handle one wake-up; returns `true` if a column was drawn
    pub fn process_notification(&mut self) -> bool {
        let mut frame = [0u8; FRAME_BYTES];
        let Some(ready) = self.exchange.read_ready(&mut frame) else {
            return false;
        };
        if ready.sequence <= self.last_sequence {
            return false;
        }
        if self.last_sequence > 0 && ready.sequence > self.last_sequence + 1 {
            let skipped = ready.sequence - self.last_sequence - 1;
            self.counters
                .frames_skipped
                .fetch_add(skipped, Ordering::Relaxed);
        }
        self.last_sequence = ready.sequence;

        self.column = (self.column + 1) % IMAGE_WIDTH;
        let samples = decode_frame(&frame);
        for (i, &s) in samples.iter().enumerate() {
            self.image
                .set_pixel(self.column, IMAGE_HEIGHT - 1 - i, self.color_map.color(s));
        }

        if self.drawn % PRESENT_INTERVAL == 0 {
            match self.sink.present(&self.image) {
                Ok(()) => {
                    self.counters.presents.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.counters.present_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(error = %e, "Display present failed");
                }
            }
        }

        self.drawn += 1;
        self.counters.column.store(self.column, Ordering::Relaxed);
        self.counters.frames_drawn.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Run the consumer loop on a thread named `fftlink-display`
    pub fn spawn(mut self) -> std::io::Result<WorkerHandle> {
        spawn_worker("fftlink-display", move || {
            tracing::debug!(signal = self.signal.name(), "Display consumer started");
            while self.signal.wait() == Wake::Frame {
                self.process_notification();
            }
        })
    }
}
