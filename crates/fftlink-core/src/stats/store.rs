//! Event history storage
//!
//! Keeps running totals and a bounded history of synchronization faults so
//! that the console can show when the link was unstable.

use crate::engine::AcquisitionEvent;
use chrono::{DateTime, Utc};
use crossbeam_channel::Receiver;
use serde::Serialize;
use std::collections::VecDeque;

/// Maximum number of fault events kept in history
const MAX_FAULT_HISTORY: usize = 1000;

/// A synchronization fault with its timestamp
#[derive(Debug, Clone, Serialize)]
pub struct FaultEvent {
    /// When the fault was observed
    pub timestamp: DateTime<Utc>,
    /// Fault count since engine start, this one included
    pub total: u64,
}

/// Running statistics derived from engine events
#[derive(Debug, Default, Clone, Serialize)]
pub struct RunningStats {
    /// Device currently open, if any
    pub device: Option<String>,
    /// Last device open failure
    pub last_open_error: Option<String>,
    /// Successful device opens
    pub sessions: u64,
    /// Failed device opens
    pub open_failures: u64,
    /// Sessions ended because the device failed or went silent
    pub device_losses: u64,
    /// Reason of the most recent device loss
    pub last_device_error: Option<String>,
    /// Times the frame boundary was acquired
    pub synchronizations: u64,
    /// Synchronization faults since engine start
    pub sync_errors: u64,
    /// Frames read by completed sessions
    pub frames: u64,
    /// When the current session was opened
    pub session_started: Option<DateTime<Utc>>,
    /// Time of the most recent fault
    pub last_fault: Option<DateTime<Utc>>,
}

/// Serializable view for the console
#[derive(Debug, Clone, Serialize)]
pub struct StatsSummary {
    #[serde(flatten)]
    pub stats: RunningStats,
    /// Faults currently held in history
    pub faults_in_history: usize,
    /// Faults per minute over the history window, if it spans any time
    pub fault_rate_per_min: Option<f64>,
}

/// Statistics store for engine events
#[derive(Debug)]
pub struct StatsStore {
    /// Recent faults, oldest first
    fault_history: VecDeque<FaultEvent>,
    /// Maximum history size
    max_size: usize,
    stats: RunningStats,
}

impl StatsStore {
    /// Create a new statistics store
    pub fn new() -> Self {
        Self {
            fault_history: VecDeque::with_capacity(MAX_FAULT_HISTORY),
            max_size: MAX_FAULT_HISTORY,
            stats: RunningStats::default(),
        }
    }

    /// Apply one engine event
    pub fn record_event(&mut self, event: &AcquisitionEvent) {
        self.record_event_at(event, Utc::now());
    }

    /// Apply one engine event observed at `now`
    pub fn record_event_at(&mut self, event: &AcquisitionEvent, now: DateTime<Utc>) {
        match event {
            AcquisitionEvent::DeviceOpened { path } => {
                self.stats.device = Some(path.clone());
                self.stats.sessions += 1;
                self.stats.session_started = Some(now);
                self.stats.last_open_error = None;
            }
            AcquisitionEvent::DeviceOpenFailed { path, reason } => {
                self.stats.open_failures += 1;
                self.stats.last_open_error = Some(format!("{}: {}", path, reason));
            }
            AcquisitionEvent::Synchronized => {
                self.stats.synchronizations += 1;
            }
            AcquisitionEvent::SyncFault { total } => {
                self.stats.sync_errors = *total;
                self.stats.last_fault = Some(now);
                if self.fault_history.len() >= self.max_size {
                    self.fault_history.pop_front();
                }
                self.fault_history.push_back(FaultEvent {
                    timestamp: now,
                    total: *total,
                });
            }
            AcquisitionEvent::DeviceLost { path, reason } => {
                self.stats.device_losses += 1;
                self.stats.last_device_error = Some(format!("{}: {}", path, reason));
            }
            AcquisitionEvent::Stopped {
                frames,
                sync_errors,
            } => {
                self.stats.device = None;
                self.stats.session_started = None;
                self.stats.frames += frames;
                self.stats.sync_errors = *sync_errors;
            }
        }
    }

    /// Apply every event waiting in `events` without blocking
    ///
    /// Returns the applied events, oldest first.
    pub fn drain(&mut self, events: &Receiver<AcquisitionEvent>) -> Vec<AcquisitionEvent> {
        let applied: Vec<_> = events.try_iter().collect();
        for event in &applied {
            self.record_event(event);
        }
        applied
    }

    /// Get fault history, oldest first
    pub fn fault_history(&self) -> &VecDeque<FaultEvent> {
        &self.fault_history
    }

    /// Get running statistics
    pub fn stats(&self) -> &RunningStats {
        &self.stats
    }

    /// Snapshot for display
    pub fn summary(&self) -> StatsSummary {
        let fault_rate_per_min = match (self.fault_history.front(), self.fault_history.back()) {
            (Some(first), Some(last)) if last.timestamp > first.timestamp => {
                let span = (last.timestamp - first.timestamp).num_milliseconds() as f64 / 60_000.0;
                Some((self.fault_history.len() - 1) as f64 / span)
            }
            _ => None,
        };

        StatsSummary {
            stats: self.stats.clone(),
            faults_in_history: self.fault_history.len(),
            fault_rate_per_min,
        }
    }

    /// Clear history and totals
    pub fn clear(&mut self) {
        self.fault_history.clear();
        self.stats = RunningStats::default();
    }
}

impl Default for StatsStore {
    fn default() -> Self {
        Self::new()
    }
}
