//! Interactive operator console
//!
//! Turns text commands into [`ControlHandle`] requests:
//!
//! | Command            | Effect                                    |
//! |--------------------|-------------------------------------------|
//! | `start [device]`   | open the device and start acquiring       |
//! | `stop`             | close the device and any recording        |
//! | `record [file]`    | start writing records                     |
//! | `record stop`      | stop writing records                      |
//! | `status`           | print counters and event statistics       |
//! | `help`             | list commands                             |
//! | `quit`             | stop everything and exit                  |

use crate::config::AppConfig;
use fftlink_core::{ControlHandle, StatsStore};
use std::path::PathBuf;

/// A parsed console command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start(Option<String>),
    Stop,
    RecordStart(Option<PathBuf>),
    RecordStop,
    Status,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

impl Command {
    /// Parse one input line
    pub fn parse(line: &str) -> Self {
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else {
            return Command::Empty;
        };
        let arg = words.next().map(str::to_string);
        if words.next().is_some() {
            return Command::Unknown(line.trim().to_string());
        }

        match (head.to_ascii_lowercase().as_str(), arg) {
            ("start", device) => Command::Start(device),
            ("stop", None) => Command::Stop,
            ("record", Some(a)) if a.eq_ignore_ascii_case("stop") => Command::RecordStop,
            ("record", file) => Command::RecordStart(file.map(PathBuf::from)),
            ("status", None) => Command::Status,
            ("help" | "?", None) => Command::Help,
            ("quit" | "exit" | "q", None) => Command::Quit,
            _ => Command::Unknown(line.trim().to_string()),
        }
    }
}

/// Result of handling one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Text for the operator
    pub message: String,
    /// Whether the console should exit
    pub quit: bool,
}

impl Reply {
    fn say(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            quit: false,
        }
    }
}

/// Console state: the pipeline control surface plus event statistics
pub struct Console {
    control: ControlHandle,
    config: AppConfig,
    stats: StatsStore,
}

impl Console {
    pub fn new(control: ControlHandle, config: AppConfig) -> Self {
        Self {
            control,
            config,
            stats: StatsStore::new(),
        }
    }

    /// Event statistics, fed by the caller from the pipeline event channel
    pub fn stats_mut(&mut self) -> &mut StatsStore {
        &mut self.stats
    }

    pub fn stats(&self) -> &StatsStore {
        &self.stats
    }

    /// Parse and execute one line
    pub fn handle_line(&mut self, line: &str) -> Reply {
        self.execute(Command::parse(line))
    }

    /// Execute a parsed command
    pub fn execute(&mut self, command: Command) -> Reply {
        match command {
            Command::Start(device) => {
                let path = device.unwrap_or_else(|| self.config.device_path.clone());
                if self.control.request_start(&path) {
                    Reply::say(format!("Opening {}", path))
                } else {
                    Reply::say("Already reading; use 'stop' first")
                }
            }
            Command::Stop => {
                self.control.request_stop();
                match self.control.request_record_stop() {
                    Some(records) => Reply::say(format!(
                        "Stopping acquisition, recording closed with {} records",
                        records
                    )),
                    None => Reply::say("Stopping acquisition"),
                }
            }
            Command::RecordStart(file) => {
                let path = file.unwrap_or_else(|| self.config.output_file.clone());
                match self.control.request_record_start(&path) {
                    Ok(true) => Reply::say(format!("Recording to {}", path.display())),
                    Ok(false) => Reply::say("Already recording; use 'record stop' first"),
                    Err(e) => {
                        tracing::error!(error = %e, "Record start failed");
                        Reply::say(format!("Error: {}", e))
                    }
                }
            }
            Command::RecordStop => match self.control.request_record_stop() {
                Some(records) => Reply::say(format!("Recording stopped, {} records", records)),
                None => Reply::say("Not recording"),
            },
            Command::Status => Reply::say(self.status_text()),
            Command::Help => Reply::say(help_text()),
            Command::Quit => {
                if let Some(records) = self.control.request_record_stop() {
                    tracing::info!(records, "Recording closed on quit");
                }
                self.control.request_shutdown();
                Reply {
                    message: "Shutting down".to_string(),
                    quit: true,
                }
            }
            Command::Empty => Reply::say(""),
            Command::Unknown(text) => Reply::say(format!("Unknown command: {} (try 'help')", text)),
        }
    }

    fn status_text(&self) -> String {
        let status = self.control.status();
        let summary = self.stats.summary();
        let mut lines = vec![
            format!(
                "Acquisition: {:?} | Recording: {:?}",
                status.acquisition, status.recording
            ),
            format!(
                "Frames: {} published, {} blank | Sync errors: {} | Short reads: {}",
                status.engine.frames_published,
                status.engine.blank_frames,
                status.engine.sync_errors,
                status.engine.short_reads
            ),
            format!(
                "Recorder: {} records, {} skipped, {} write errors",
                status.recorder.records_written,
                status.recorder.frames_skipped,
                status.recorder.write_errors
            ),
            format!(
                "Display: {} frames, {} presents, column {}",
                status.display.frames_drawn, status.display.presents, status.display.column
            ),
        ];
        if let Some(device) = &summary.stats.device {
            lines.push(format!("Device: {}", device));
        }
        if let Some(err) = &summary.stats.last_open_error {
            lines.push(format!("Last open error: {}", err));
        }
        if let Some(err) = &summary.stats.last_device_error {
            lines.push(format!(
                "Device lost {} times, last: {}",
                summary.stats.device_losses, err
            ));
        }
        if let Some(rate) = summary.fault_rate_per_min {
            lines.push(format!("Fault rate: {:.1}/min", rate));
        }
        lines.join("\n")
    }
}

/// Command overview
pub fn help_text() -> String {
    [
        "Commands:",
        "  start [device]   Open the serial device and start acquiring",
        "  stop             Close the device and stop recording",
        "  record [file]    Start recording frames to a CSV file",
        "  record stop      Stop recording",
        "  status           Show counters",
        "  help             Show this help",
        "  quit             Stop everything and exit",
    ]
    .join("\n")
}
