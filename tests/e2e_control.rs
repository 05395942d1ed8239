//! E2E tests for the operator control surface
//!
//! Start/stop/restart, open failures, lost devices, record failures and the
//! console.

mod common;

use common::{Rig, DEADLINE, DEVICE};
use fftlink::config::AppConfig;
use fftlink::console::Console;
use fftlink_core::display::NullSink;
use fftlink_core::protocol::sample::encode_constant_frame;
use fftlink_core::{AcquisitionEvent, AcquisitionState, FRAME_BYTES};
use std::path::PathBuf;
use std::time::Duration;

fn next_event(rig: &Rig) -> AcquisitionEvent {
    rig.pipeline
        .events()
        .recv_timeout(DEADLINE)
        .expect("engine event")
}

#[test]
fn test_open_failure_keeps_engine_idle() {
    let rig = Rig::new(Box::new(NullSink));
    assert!(rig.control.request_start("/dev/ttyDOESNOTEXIST"));

    match next_event(&rig) {
        AcquisitionEvent::DeviceOpenFailed { path, reason } => {
            assert_eq!(path, "/dev/ttyDOESNOTEXIST");
            assert!(!reason.is_empty());
        }
        other => panic!("unexpected event {:?}", other),
    }
    let status = rig.wait_for("idle", |s| s.acquisition == AcquisitionState::Idle);
    assert_eq!(status.engine.open_failures, 1);
    assert_eq!(rig.feeder.open_count(), 0);
    rig.finish();
}

#[test]
fn test_start_stop_restart() {
    let rig = Rig::new(Box::new(NullSink));

    assert!(rig.control.request_start(DEVICE));
    assert_eq!(
        next_event(&rig),
        AcquisitionEvent::DeviceOpened {
            path: DEVICE.to_string()
        }
    );
    assert!(!rig.control.request_start(DEVICE), "second start is ignored");

    rig.feed_constant(1);
    assert_eq!(next_event(&rig), AcquisitionEvent::Synchronized);

    // Stop takes effect once the frame in progress completes
    let second = encode_constant_frame(2);
    rig.park_mid_frame(&second);
    rig.control.request_stop();
    rig.feeder.push(&second[FRAME_BYTES / 2..]);
    let status = rig.wait_for("idle", |s| s.acquisition == AcquisitionState::Idle);
    assert_eq!(status.engine.frames_published, 2);
    assert_eq!(
        next_event(&rig),
        AcquisitionEvent::Stopped {
            frames: 2,
            sync_errors: 0
        }
    );

    // Restart re-opens the device and seeks the frame boundary again
    assert!(rig.control.request_start(DEVICE));
    assert_eq!(
        next_event(&rig),
        AcquisitionEvent::DeviceOpened {
            path: DEVICE.to_string()
        }
    );
    rig.feed_constant(3);
    assert_eq!(next_event(&rig), AcquisitionEvent::Synchronized);
    assert_eq!(rig.feeder.open_count(), 2);
    assert_eq!(rig.control.status().engine.sessions, 2);
    rig.finish();
}

#[test]
fn test_lost_device_ends_session() {
    let rig = Rig::new(Box::new(NullSink));
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("lost.csv");

    assert!(rig.control.request_start(DEVICE));
    assert!(rig.control.request_record_start(&output).unwrap());
    rig.feed_constant(1000);
    rig.feed_constant(1001);

    // Adapter unplugged: the pipe hangs up with nothing pending
    rig.feeder.hang_up();
    loop {
        match next_event(&rig) {
            AcquisitionEvent::DeviceLost { path, .. } => {
                assert_eq!(path, DEVICE);
                break;
            }
            AcquisitionEvent::SyncFault { .. } => panic!("loss reported as sync fault"),
            _ => {}
        }
    }
    let status = rig.wait_for("idle", |s| s.acquisition == AcquisitionState::Idle);
    assert_eq!(status.engine.frames_published, 2);
    assert_eq!(status.engine.device_losses, 1);

    // No stale frames keep flowing into the recording
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(rig.control.status().recorder.records_written, 2);
    assert_eq!(rig.control.request_record_stop(), Some(2));
    rig.finish();

    let text = std::fs::read_to_string(&output).unwrap();
    assert_eq!(text.lines().count(), 2);
}

#[test]
fn test_record_open_failure_stays_idle() {
    let rig = Rig::new(Box::new(NullSink));
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("no-such-dir").join("out.csv");

    assert!(rig.control.request_record_start(&path).is_err());
    assert_eq!(
        rig.control.recording_state(),
        fftlink_core::RecordingState::Idle
    );
    assert_eq!(rig.control.request_record_stop(), None);
    rig.finish();
}

#[test]
fn test_shutdown_while_reading() {
    let rig = Rig::new(Box::new(NullSink));
    assert!(rig.control.request_start(DEVICE));
    rig.feed_constant(9);

    rig.control.request_shutdown();
    // Engine is blocked in a read until the device delivers or hangs up
    rig.feeder.hang_up();
    let mut pipeline = rig.pipeline;
    pipeline.shutdown();
    assert!(pipeline.alive_workers().is_empty());
}

#[test]
fn test_console_drives_pipeline() {
    let rig = Rig::new(Box::new(NullSink));
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("console.csv");
    let config = AppConfig {
        device_path: DEVICE.to_string(),
        output_file: output.clone(),
        snapshot_file: None,
        auto_start: false,
    };
    let mut console = Console::new(rig.control.clone(), config);

    assert_eq!(console.handle_line("start").message, format!("Opening {}", DEVICE));
    assert!(console.handle_line("start").message.starts_with("Already reading"));
    assert!(console
        .handle_line("record")
        .message
        .starts_with("Recording to"));

    rig.feed_constant(2048);
    rig.feed_constant(2048);

    let applied = console.stats_mut().drain(rig.pipeline.events());
    assert!(applied.contains(&AcquisitionEvent::Synchronized));
    assert_eq!(console.stats().stats().sessions, 1);

    let status = console.handle_line("status").message;
    assert!(status.contains("Acquisition: Reading"), "{}", status);
    assert!(status.contains("Recorder: 2 records"), "{}", status);

    assert_eq!(
        console.handle_line("record stop").message,
        "Recording stopped, 2 records"
    );
    let reply = console.handle_line("quit");
    assert!(reply.quit);

    rig.finish();
    let text = std::fs::read_to_string(PathBuf::from(&output)).unwrap();
    assert_eq!(text.lines().count(), 2);
}
