//! fftlink - serial spectrum acquisition
//!
//! Application layer over `fftlink-core`: persistent configuration and the
//! interactive operator console. The acquisition pipeline itself lives in the
//! core crate and is re-exported here.

pub mod config;
pub mod console;

pub use fftlink_core::{device, display, engine, pipeline, recorder, stats};

pub use fftlink_core::{ControlHandle, Pipeline, StatsStore};
pub use fftlink_core::{BUILD_DATE, VERSION};
