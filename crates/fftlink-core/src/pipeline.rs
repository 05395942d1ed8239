//! Pipeline assembly
//!
//! One producer and two consumers over a shared [`FrameExchange`]:
//!
//! ```text
//! device -> engine -> exchange -> signal -> recorder
//!                              -> signal -> display
//! ```
//!
//! [`Pipeline::spawn`] starts the three worker threads with the engine idle.
//! All operator requests go through a [`ControlHandle`].

use crate::device::DeviceOpener;
use crate::display::{ColorMap, DisplayConsumer, DisplayCounters, DisplaySink, DisplayStats};
use crate::engine::{
    AcquisitionEngine, AcquisitionEvent, AcquisitionState, CounterSnapshot, EngineControl,
    EngineCounters, EVENT_CHANNEL_CAPACITY,
};
use crate::exchange::FrameExchange;
use crate::recorder::{RecorderError, RecorderStats, RecordingConsumer, RecordingState};
use crate::signal::FrameSignal;
use crate::worker::WorkerHandle;
use crossbeam_channel::Receiver;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// Operator interface to a running pipeline
///
/// Cheap to clone; every request returns without waiting for the workers.
#[derive(Clone)]
pub struct ControlHandle {
    control: Arc<EngineControl>,
    recorder: Arc<RecordingConsumer>,
    record_signal: Arc<FrameSignal>,
    display_signal: Arc<FrameSignal>,
    engine_counters: Arc<EngineCounters>,
    display_counters: Arc<DisplayCounters>,
}

/// Combined status of all components
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PipelineStatus {
    pub acquisition: AcquisitionState,
    pub recording: RecordingState,
    pub engine: CounterSnapshot,
    pub recorder: RecorderStats,
    pub display: DisplayStats,
}

impl ControlHandle {
    /// Open `path` and start acquiring; `false` if already reading
    pub fn request_start(&self, path: &str) -> bool {
        self.control.start(path)
    }

    /// Finish the current frame, close the device, go idle
    pub fn request_stop(&self) {
        self.control.stop();
    }

    /// Start recording into `path`; `Ok(false)` if already recording
    pub fn request_record_start(&self, path: &Path) -> Result<bool, RecorderError> {
        self.recorder.start_recording(path)
    }

    /// Stop recording; returns the records written in the session
    pub fn request_record_stop(&self) -> Option<u64> {
        self.recorder.stop_recording()
    }

    /// Ask every worker to exit
    pub fn request_shutdown(&self) {
        self.control.shutdown();
        self.record_signal.shutdown();
        self.display_signal.shutdown();
    }

    pub fn recording_state(&self) -> RecordingState {
        self.recorder.state()
    }

    /// Snapshot of every counter
    pub fn status(&self) -> PipelineStatus {
        PipelineStatus {
            acquisition: self.control.state(),
            recording: self.recorder.state(),
            engine: self.engine_counters.snapshot(),
            recorder: self.recorder.stats(),
            display: self.display_counters.snapshot(),
        }
    }
}

/// Running pipeline: worker handles plus the control surface
pub struct Pipeline {
    control: ControlHandle,
    events: Receiver<AcquisitionEvent>,
    workers: Vec<WorkerHandle>,
}

impl Pipeline {
    /// Spawn the engine and both consumers with the default color map
    pub fn spawn(
        opener: Box<dyn DeviceOpener>,
        sink: Box<dyn DisplaySink>,
    ) -> std::io::Result<Self> {
        Self::spawn_with(opener, sink, None)
    }

    /// Spawn with an optional custom color map
    pub fn spawn_with(
        opener: Box<dyn DeviceOpener>,
        sink: Box<dyn DisplaySink>,
        color_map: Option<Box<dyn ColorMap>>,
    ) -> std::io::Result<Self> {
        let exchange = Arc::new(FrameExchange::new());
        let record_signal = Arc::new(FrameSignal::new("record"));
        let display_signal = Arc::new(FrameSignal::new("display"));
        let (tx, events) = crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY);

        let recorder = Arc::new(RecordingConsumer::new(
            Arc::clone(&exchange),
            Arc::clone(&record_signal),
        ));
        let mut display =
            DisplayConsumer::new(Arc::clone(&exchange), Arc::clone(&display_signal), sink);
        if let Some(map) = color_map {
            display = display.with_color_map(map);
        }
        let engine = AcquisitionEngine::new(opener, exchange)
            .with_consumer(Arc::clone(&record_signal))
            .with_consumer(Arc::clone(&display_signal))
            .with_events(tx);

        let control = ControlHandle {
            control: engine.control(),
            recorder: Arc::clone(&recorder),
            record_signal,
            display_signal,
            engine_counters: engine.counters(),
            display_counters: display.counters(),
        };

        let mut pipeline = Self {
            control,
            events,
            workers: Vec::with_capacity(3),
        };

        if let Err(e) = pipeline.start_workers(recorder, display, engine) {
            tracing::error!(error = %e, "Failed to spawn pipeline worker");
            pipeline.shutdown();
            return Err(e);
        }

        tracing::info!(workers = pipeline.workers.len(), "Pipeline started");
        Ok(pipeline)
    }

    // Consumers first so no notification is raised before they listen
    fn start_workers(
        &mut self,
        recorder: Arc<RecordingConsumer>,
        display: DisplayConsumer,
        engine: AcquisitionEngine,
    ) -> std::io::Result<()> {
        self.workers.push(recorder.spawn()?);
        self.workers.push(display.spawn()?);
        self.workers.push(engine.spawn()?);
        Ok(())
    }

    /// Control surface, clonable into other threads
    pub fn control(&self) -> ControlHandle {
        self.control.clone()
    }

    /// Engine events, delivered without blocking the engine
    pub fn events(&self) -> &Receiver<AcquisitionEvent> {
        &self.events
    }

    /// Names of workers that are still running
    pub fn alive_workers(&self) -> Vec<&str> {
        self.workers
            .iter()
            .filter(|w| w.is_alive())
            .map(|w| w.name())
            .collect()
    }

    /// Request shutdown and join every worker
    ///
    /// The engine exits once its current read returns, so this waits for the
    /// device to deliver or time out.
    pub fn shutdown(&mut self) {
        self.control.request_shutdown();
        for worker in &mut self.workers {
            tracing::debug!(worker = worker.name(), "Joining worker");
            worker.join();
        }
        self.workers.clear();
        tracing::info!("Pipeline stopped");
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::memory::pipe;
    use crate::device::UnsupportedOpener;
    use crate::display::NullSink;
    use std::time::{Duration, Instant};

    #[test]
    fn test_spawn_and_shutdown_idle() {
        let mut pipeline = Pipeline::spawn(Box::new(UnsupportedOpener), Box::new(NullSink)).unwrap();
        let mut alive = pipeline.alive_workers();
        alive.sort_unstable();
        assert_eq!(alive, ["fftlink-acquire", "fftlink-display", "fftlink-record"]);

        pipeline.shutdown();
        assert!(pipeline.alive_workers().is_empty());
    }

    #[test]
    fn test_open_failure_reaches_events() {
        let mut pipeline = Pipeline::spawn(Box::new(UnsupportedOpener), Box::new(NullSink)).unwrap();
        let control = pipeline.control();
        assert!(control.request_start("/dev/ttyUSB0"));

        let event = pipeline
            .events()
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        assert!(matches!(event, AcquisitionEvent::DeviceOpenFailed { .. }));
        pipeline.shutdown();
    }

    #[test]
    fn test_frames_reach_both_consumers() {
        let (feeder, opener) = pipe("/dev/ttyTEST0");
        let mut pipeline = Pipeline::spawn(Box::new(opener), Box::new(NullSink)).unwrap();
        let control = pipeline.control();
        assert!(control.request_start("/dev/ttyTEST0"));

        feeder.push_constant_frame(100);
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let status = control.status();
            if status.display.frames_drawn == 1 && status.recorder.notifications == 1 {
                assert_eq!(status.engine.frames_published, 1);
                assert_eq!(status.acquisition, AcquisitionState::Reading);
                break;
            }
            assert!(Instant::now() < deadline, "frame never reached consumers");
            std::thread::sleep(Duration::from_millis(1));
        }

        feeder.hang_up();
        pipeline.shutdown();
    }
}
