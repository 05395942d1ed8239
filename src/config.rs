//! Persistent application configuration
//!
//! Stores the device path, output file and snapshot settings in a JSON file
//! at `<data_dir>/fftlink/config.json`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_device_path() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_output_file() -> PathBuf {
    PathBuf::from("spectrum.csv")
}

/// Persistent application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Serial device to open on `start`
    #[serde(default = "default_device_path")]
    pub device_path: String,
    /// Record target used when `record` is given no file name
    #[serde(default = "default_output_file")]
    pub output_file: PathBuf,
    /// PNG file refreshed with the spectrogram (None = no snapshots)
    #[serde(default)]
    pub snapshot_file: Option<PathBuf>,
    /// Start acquisition as soon as the program starts
    #[serde(default)]
    pub auto_start: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            device_path: default_device_path(),
            output_file: default_output_file(),
            snapshot_file: None,
            auto_start: false,
        }
    }
}

impl AppConfig {
    /// Config file path: `<data_dir>/fftlink/config.json`
    pub fn path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fftlink")
            .join("config.json")
    }

    /// Load config from the default location
    pub fn load() -> Self {
        Self::load_from(&Self::path())
    }

    /// Load config from `path`, falling back to defaults on any error
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "Loaded config from disk");
                    config
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to parse config, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!(path = %path.display(), "No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Save config to disk, creating parent directories if needed
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), "Config saved to disk");
        Ok(())
    }
}
