//! Acquisition engine (the producer)
//!
//! Runs on its own thread. While idle it blocks on the control condition
//! until a start or quit request arrives. While reading it loops:
//!
//! 1. synchronize the next frame from the device
//! 2. store it into the free exchange slot and publish it
//! 3. notify every consumer signal
//! 4. honour a pending stop or quit request
//!
//! Stop requests are only looked at between frames, so the current frame is
//! always completed before the device is closed. A device that fails or stops
//! delivering ends the session the same way, with a `DeviceLost` event first.

use crate::device::{DeviceOpener, SerialDevice};
use crate::exchange::FrameExchange;
use crate::protocol::sync::{FrameOutcome, FrameSynchronizer, SyncError};
use crate::signal::{lock, wait, FrameSignal};
use crate::worker::{spawn_worker, WorkerHandle};
use crate::FRAME_BYTES;
use crossbeam_channel::Sender;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};

/// Capacity of the engine event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Whether the engine holds an open device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AcquisitionState {
    /// No device open, waiting for a start request
    Idle,
    /// Device open (or being opened) and frames flowing
    Reading,
}

/// Notable engine transitions, delivered without ever blocking the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquisitionEvent {
    /// Device opened, synchronization starting
    DeviceOpened { path: String },
    /// Device could not be opened; engine is idle again
    DeviceOpenFailed { path: String, reason: String },
    /// First frame boundary found
    Synchronized,
    /// Marker verification failed; `total` counts faults since engine start
    SyncFault { total: u64 },
    /// Device failed or went silent; the session ends
    DeviceLost { path: String, reason: String },
    /// Device closed after a stop or quit request, or after it was lost
    Stopped { frames: u64, sync_errors: u64 },
}

#[derive(Debug)]
struct ControlState {
    state: AcquisitionState,
    start_path: Option<String>,
    stop_requested: bool,
    quit: bool,
}

/// Start/stop/quit flags shared between the control thread and the engine
#[derive(Debug)]
pub struct EngineControl {
    inner: Mutex<ControlState>,
    cond: Condvar,
}

impl EngineControl {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ControlState {
                state: AcquisitionState::Idle,
                start_path: None,
                stop_requested: false,
                quit: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Current acquisition state
    pub fn state(&self) -> AcquisitionState {
        lock(&self.inner, "engine-control").state
    }

    /// Ask the engine to open `path`
    ///
    /// Returns `false` if the engine is already reading, a start is already
    /// pending, or shutdown was requested.
    pub fn start(&self, path: &str) -> bool {
        let mut inner = lock(&self.inner, "engine-control");
        if inner.quit || inner.state != AcquisitionState::Idle || inner.start_path.is_some() {
            return false;
        }
        inner.start_path = Some(path.to_string());
        self.cond.notify_all();
        true
    }

    /// Ask the engine to finish its frame, close the device and go idle
    pub fn stop(&self) {
        let mut inner = lock(&self.inner, "engine-control");
        if inner.state == AcquisitionState::Reading {
            inner.stop_requested = true;
        }
        inner.start_path = None;
    }

    /// Ask the engine to stop and then exit its thread
    pub fn shutdown(&self) {
        let mut inner = lock(&self.inner, "engine-control");
        inner.quit = true;
        inner.stop_requested = true;
        inner.start_path = None;
        self.cond.notify_all();
    }

    /// Block while idle; returns the path to open, or `None` on quit
    fn wait_for_start(&self) -> Option<String> {
        let mut inner = lock(&self.inner, "engine-control");
        loop {
            if inner.quit {
                return None;
            }
            if let Some(path) = inner.start_path.take() {
                inner.state = AcquisitionState::Reading;
                inner.stop_requested = false;
                return Some(path);
            }
            inner = wait(&self.cond, inner, "engine-control");
        }
    }

    fn stop_requested(&self) -> bool {
        let inner = lock(&self.inner, "engine-control");
        inner.stop_requested || inner.quit
    }

    fn set_idle(&self) {
        let mut inner = lock(&self.inner, "engine-control");
        inner.state = AcquisitionState::Idle;
        inner.stop_requested = false;
    }
}

impl Default for EngineControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Running counters, readable from any thread
#[derive(Debug, Default)]
pub struct EngineCounters {
    frames_published: AtomicU64,
    blank_frames: AtomicU64,
    sync_errors: AtomicU64,
    short_reads: AtomicU64,
    open_failures: AtomicU64,
    device_losses: AtomicU64,
    sessions: AtomicU64,
}

/// Point-in-time copy of [`EngineCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub frames_published: u64,
    pub blank_frames: u64,
    pub sync_errors: u64,
    pub short_reads: u64,
    pub open_failures: u64,
    pub device_losses: u64,
    pub sessions: u64,
}

impl EngineCounters {
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            frames_published: self.frames_published.load(Ordering::Relaxed),
            blank_frames: self.blank_frames.load(Ordering::Relaxed),
            sync_errors: self.sync_errors.load(Ordering::Relaxed),
            short_reads: self.short_reads.load(Ordering::Relaxed),
            open_failures: self.open_failures.load(Ordering::Relaxed),
            device_losses: self.device_losses.load(Ordering::Relaxed),
            sessions: self.sessions.load(Ordering::Relaxed),
        }
    }

    /// Frames published since engine start
    pub fn frames_published(&self) -> u64 {
        self.frames_published.load(Ordering::Relaxed)
    }

    /// Synchronization faults since engine start
    pub fn sync_errors(&self) -> u64 {
        self.sync_errors.load(Ordering::Relaxed)
    }
}

/// Producer side of the pipeline
pub struct AcquisitionEngine {
    opener: Box<dyn DeviceOpener>,
    exchange: Arc<FrameExchange>,
    control: Arc<EngineControl>,
    counters: Arc<EngineCounters>,
    consumers: Vec<Arc<FrameSignal>>,
    events: Option<Sender<AcquisitionEvent>>,
}

impl AcquisitionEngine {
    /// Create an engine publishing into `exchange`
    pub fn new(opener: Box<dyn DeviceOpener>, exchange: Arc<FrameExchange>) -> Self {
        Self {
            opener,
            exchange,
            control: Arc::new(EngineControl::new()),
            counters: Arc::new(EngineCounters::default()),
            consumers: Vec::new(),
            events: None,
        }
    }

    /// Register a consumer to notify after every publish
    pub fn with_consumer(mut self, signal: Arc<FrameSignal>) -> Self {
        self.consumers.push(signal);
        self
    }

    /// Deliver [`AcquisitionEvent`]s to `events`
    pub fn with_events(mut self, events: Sender<AcquisitionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Shared control flags
    pub fn control(&self) -> Arc<EngineControl> {
        Arc::clone(&self.control)
    }

    /// Shared counters
    pub fn counters(&self) -> Arc<EngineCounters> {
        Arc::clone(&self.counters)
    }

    /// Run the engine on a thread named `fftlink-acquire`
    pub fn spawn(self) -> std::io::Result<WorkerHandle> {
        spawn_worker("fftlink-acquire", move || self.run())
    }

    /// Engine main loop; returns after a shutdown request
    pub fn run(self) {
        tracing::info!(consumers = self.consumers.len(), "Acquisition engine waiting for start");

        while let Some(path) = self.control.wait_for_start() {
            let device = match self.opener.open(&path) {
                Ok(device) => device,
                Err(e) => {
                    tracing::error!(path = %path, error = %e, "Failed to open device");
                    self.counters.open_failures.fetch_add(1, Ordering::Relaxed);
                    self.control.set_idle();
                    self.emit(AcquisitionEvent::DeviceOpenFailed {
                        path,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            tracing::info!(path = %path, "Device opened, seeking frame boundary");
            self.counters.sessions.fetch_add(1, Ordering::Relaxed);
            self.emit(AcquisitionEvent::DeviceOpened { path: path.clone() });

            let (frames, lost) = self.read_session(device);

            self.control.set_idle();
            if let Some(e) = lost {
                tracing::error!(path = %path, error = %e, "Device lost, closing");
                self.counters.device_losses.fetch_add(1, Ordering::Relaxed);
                self.emit(AcquisitionEvent::DeviceLost {
                    path: path.clone(),
                    reason: e.to_string(),
                });
            }
            let sync_errors = self.counters.sync_errors();
            tracing::info!(path = %path, frames, sync_errors, "Stopped reading");
            self.emit(AcquisitionEvent::Stopped {
                frames,
                sync_errors,
            });
        }

        tracing::info!("Acquisition engine shut down");
    }

    /// Read frames until stop is requested or the device is lost
    ///
    /// Returns frames published and the loss, if that ended the session.
    fn read_session(&self, device: Box<dyn SerialDevice>) -> (u64, Option<SyncError>) {
        let mut sync = FrameSynchronizer::new(device);
        let mut frame = [0u8; FRAME_BYTES];
        let mut frames = 0u64;
        let mut lost = None;

        loop {
            let report = match sync.next_frame(&mut frame) {
                Ok(report) => report,
                Err(e) => {
                    lost = Some(e);
                    break;
                }
            };
            if report.short_reads > 0 {
                self.counters
                    .short_reads
                    .fetch_add(u64::from(report.short_reads), Ordering::Relaxed);
            }

            match report.outcome {
                FrameOutcome::Acquired => self.emit(AcquisitionEvent::Synchronized),
                FrameOutcome::FaultBlank => {
                    let total = self.counters.sync_errors.fetch_add(1, Ordering::Relaxed) + 1;
                    self.emit(AcquisitionEvent::SyncFault { total });
                }
                FrameOutcome::Valid | FrameOutcome::ResyncBlank => {}
            }
            if report.outcome.is_blank() {
                self.counters.blank_frames.fetch_add(1, Ordering::Relaxed);
            }

            self.publish(&frame);
            frames += 1;

            if self.control.stop_requested() {
                break;
            }
        }

        // Dropping the synchronizer closes the device
        drop(sync);
        (frames, lost)
    }

    fn publish(&self, frame: &[u8; FRAME_BYTES]) {
        let ready = self.exchange.publish_frame(frame);
        self.counters.frames_published.fetch_add(1, Ordering::Relaxed);
        for consumer in &self.consumers {
            consumer.notify();
        }
        tracing::trace!(slot = ready.slot, sequence = ready.sequence, "Frame published");
    }

    fn emit(&self, event: AcquisitionEvent) {
        if let Some(tx) = &self.events {
            if tx.try_send(event).is_err() {
                tracing::debug!("Event channel full or closed, event dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::memory::{pipe, PipeFeeder};
    use crate::protocol::sample::{decode_frame, encode_constant_frame};
    use crate::signal::Wake;
    use std::time::{Duration, Instant};

    const PATH: &str = "/dev/ttyTEST0";

    struct Harness {
        feeder: PipeFeeder,
        control: Arc<EngineControl>,
        counters: Arc<EngineCounters>,
        exchange: Arc<FrameExchange>,
        signal: Arc<FrameSignal>,
        events: crossbeam_channel::Receiver<AcquisitionEvent>,
        worker: WorkerHandle,
    }

    fn harness() -> Harness {
        let (feeder, opener) = pipe(PATH);
        let exchange = Arc::new(FrameExchange::new());
        let signal = Arc::new(FrameSignal::new("test-consumer"));
        let (tx, events) = crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY);
        let engine = AcquisitionEngine::new(Box::new(opener), Arc::clone(&exchange))
            .with_consumer(Arc::clone(&signal))
            .with_events(tx);
        let control = engine.control();
        let counters = engine.counters();
        let worker = engine.spawn().unwrap();
        Harness {
            feeder,
            control,
            counters,
            exchange,
            signal,
            events,
            worker,
        }
    }

    fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out waiting for {}", what);
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn next_event(h: &Harness) -> AcquisitionEvent {
        h.events
            .recv_timeout(Duration::from_secs(5))
            .expect("engine event")
    }

    #[test]
    fn test_idle_until_started() {
        let mut h = harness();
        assert_eq!(h.control.state(), AcquisitionState::Idle);
        assert_eq!(h.feeder.open_count(), 0);
        h.control.shutdown();
        h.worker.join();
        assert_eq!(h.counters.snapshot(), CounterSnapshot::default());
    }

    #[test]
    fn test_open_failure_returns_to_idle() {
        let mut h = harness();
        assert!(h.control.start("/dev/ttyMISSING"));

        match next_event(&h) {
            AcquisitionEvent::DeviceOpenFailed { path, .. } => assert_eq!(path, "/dev/ttyMISSING"),
            other => panic!("unexpected event {:?}", other),
        }
        wait_until("idle", || h.control.state() == AcquisitionState::Idle);
        assert_eq!(h.counters.snapshot().open_failures, 1);

        // Operator may retry
        assert!(h.control.start(PATH));
        assert_eq!(next_event(&h), AcquisitionEvent::DeviceOpened { path: PATH.into() });

        h.control.shutdown();
        h.feeder.hang_up();
        h.worker.join();
    }

    #[test]
    fn test_frames_are_published_and_notified() {
        let mut h = harness();
        assert!(h.control.start(PATH));
        assert_eq!(next_event(&h), AcquisitionEvent::DeviceOpened { path: PATH.into() });
        assert!(!h.control.start(PATH), "start while reading is ignored");

        h.feeder.push_constant_frame(1000);
        assert_eq!(h.signal.wait(), Wake::Frame);
        assert_eq!(next_event(&h), AcquisitionEvent::Synchronized);

        let mut out = [0u8; FRAME_BYTES];
        let ready = h.exchange.read_ready(&mut out).unwrap();
        assert_eq!(ready.sequence, 1);
        assert!(decode_frame(&out).iter().all(|&v| v == 1000));

        h.feeder.push_constant_frame(1001);
        assert_eq!(h.signal.wait(), Wake::Frame);
        h.exchange.read_ready(&mut out).unwrap();
        assert!(decode_frame(&out).iter().all(|&v| v == 1001));

        h.control.shutdown();
        h.feeder.hang_up();
        h.worker.join();
        assert!(!h.worker.is_alive());
    }

    #[test]
    fn test_stop_finishes_frame_then_idles() {
        let mut h = harness();
        assert!(h.control.start(PATH));
        assert_eq!(next_event(&h), AcquisitionEvent::DeviceOpened { path: PATH.into() });

        h.feeder.push_constant_frame(5);
        let second = encode_constant_frame(6);
        h.feeder.push(&second[..FRAME_BYTES / 2]);
        // Engine is now blocked halfway through the second frame
        wait_until("half frame consumed", || {
            h.counters.frames_published() == 1 && h.feeder.pending() == 0
        });

        h.control.stop();
        // Stop is honoured only after the frame in progress completes
        h.feeder.push(&second[FRAME_BYTES / 2..]);

        wait_until("idle", || h.control.state() == AcquisitionState::Idle);
        assert_eq!(h.counters.frames_published(), 2);
        assert_eq!(next_event(&h), AcquisitionEvent::Synchronized);
        assert_eq!(
            next_event(&h),
            AcquisitionEvent::Stopped {
                frames: 2,
                sync_errors: 0
            }
        );

        // Restart opens the device again and re-seeks
        assert!(h.control.start(PATH));
        wait_until("second open", || h.feeder.open_count() == 2);

        h.control.shutdown();
        h.feeder.hang_up();
        h.worker.join();
        assert_eq!(h.counters.snapshot().sessions, 2);
    }

    #[test]
    fn test_hang_up_ends_session() {
        let mut h = harness();
        assert!(h.control.start(PATH));
        assert_eq!(next_event(&h), AcquisitionEvent::DeviceOpened { path: PATH.into() });

        h.feeder.push_constant_frame(1234);
        wait_until("first frame", || h.counters.frames_published() == 1);
        h.feeder.hang_up();

        wait_until("idle", || h.control.state() == AcquisitionState::Idle);
        assert_eq!(next_event(&h), AcquisitionEvent::Synchronized);
        match next_event(&h) {
            AcquisitionEvent::DeviceLost { path, .. } => assert_eq!(path, PATH),
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(
            next_event(&h),
            AcquisitionEvent::Stopped {
                frames: 1,
                sync_errors: 0
            }
        );

        // The last frame is not republished after the device went away
        std::thread::sleep(Duration::from_millis(20));
        let snapshot = h.counters.snapshot();
        assert_eq!(snapshot.frames_published, 1);
        assert_eq!(snapshot.device_losses, 1);
        assert_eq!(snapshot.sync_errors, 0);

        h.control.shutdown();
        h.worker.join();
    }

    #[test]
    fn test_sync_fault_is_reported_and_counted() {
        let mut h = harness();
        assert!(h.control.start(PATH));

        let mut bad = encode_constant_frame(77);
        for b in &mut bad[..3] {
            *b &= 0x3F;
        }
        h.feeder.push_constant_frame(77);
        h.feeder.push(&bad);
        h.feeder.push_constant_frame(77);
        wait_until("three frames", || h.counters.frames_published() == 3);

        let snapshot = h.counters.snapshot();
        assert_eq!(snapshot.sync_errors, 1);
        assert_eq!(snapshot.blank_frames, 2);

        let events: Vec<_> = std::iter::from_fn(|| h.events.try_recv().ok()).collect();
        assert!(events.contains(&AcquisitionEvent::SyncFault { total: 1 }));

        h.control.shutdown();
        h.feeder.hang_up();
        h.worker.join();
    }
}
