//! fftlink core - serial spectrum acquisition
//!
//! Reads a continuous stream of 12-bit spectrum frames from a serial device,
//! keeps byte alignment with the frame markers, and hands every completed
//! frame to a CSV recorder and a live spectrogram through a double buffer.

pub mod device;
pub mod display;
pub mod engine;
pub mod exchange;
pub mod pipeline;
pub mod protocol;
pub mod recorder;
pub mod signal;
pub mod stats;
pub mod worker;

pub use display::{ColorMap, DisplaySink, ImageBuffer, LogRamp};
pub use engine::{AcquisitionEngine, AcquisitionEvent, AcquisitionState};
pub use exchange::FrameExchange;
pub use pipeline::{ControlHandle, Pipeline};
pub use protocol::sample::{decode_frame, decode_sample};
pub use recorder::{RecordingConsumer, RecordingState};
pub use stats::store::StatsStore;

/// Library version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date stamped by build.rs
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Samples (spectrum bins) carried by one frame
pub const SAMPLES_PER_FRAME: usize = 256;

/// Encoded frame size: two wire bytes per sample
pub const FRAME_BYTES: usize = SAMPLES_PER_FRAME * 2;

/// Chunk size for bulk reads once the stream is aligned
pub const READ_CHUNK: usize = 32;

/// Largest decodable sample value
pub const MAX_SAMPLE: u16 = 4095;

/// Time covered by one frame (seconds)
pub const FRAME_PERIOD_SECS: f64 = 0.00512;

/// Serial line rate expected by the device
pub const BAUD_RATE: u32 = 3_000_000;

/// Spectrogram width in columns (one column per frame)
pub const IMAGE_WIDTH: usize = 1000;

/// Spectrogram height in rows (one row per bin)
pub const IMAGE_HEIGHT: usize = SAMPLES_PER_FRAME;

/// The display sink is refreshed once every this many frames
pub const PRESENT_INTERVAL: u64 = 64;
