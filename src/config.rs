//! Configuration management.
//!
//! Settings are loaded from a TOML file (default `config/default.toml`) via
//! the `config` crate. Every field carries a serde default so the application
//! also runs with no config file at all, which is what the demo workflow uses.

use crate::error::AcqError;
use config::Config;
use serde::Deserialize;

/// Top-level application settings.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    /// Log filter applied at startup ("off", "error", "warn", "info",
    /// "debug", "trace").
    pub log_level: LogLevel,
    /// Live-feed acquisition parameters.
    pub acquisition: AcquisitionSettings,
    /// Persistence defaults.
    pub storage: StorageSettings,
    /// Motion controller connection.
    pub stage: StageSettings,
    /// Scan range and timing.
    pub scan: ScanSettings,
}

/// Log level wrapper so the config file can use plain strings.
#[derive(Debug, Deserialize, Clone)]
#[serde(transparent)]
pub struct LogLevel(pub String);

impl Default for LogLevel {
    fn default() -> Self {
        Self("info".to_string())
    }
}

impl LogLevel {
    /// Map the configured string onto a `log` filter, defaulting to `Info`
    /// for unrecognized values.
    pub fn to_level_filter(&self) -> log::LevelFilter {
        match self.0.to_ascii_lowercase().as_str() {
            "off" => log::LevelFilter::Off,
            "error" => log::LevelFilter::Error,
            "warn" => log::LevelFilter::Warn,
            "debug" => log::LevelFilter::Debug,
            "trace" => log::LevelFilter::Trace,
            _ => log::LevelFilter::Info,
        }
    }
}

/// Live-feed acquisition parameters.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AcquisitionSettings {
    /// Spectrometer integration time in milliseconds (> 0).
    pub integration_time_ms: u32,
    /// Acquisition loop cycle interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Pixel count of the demo backend.
    pub demo_pixels: usize,
    /// Whether the startup fallback may end on the demo backend.
    pub allow_demo: bool,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            integration_time_ms: 100,
            poll_interval_ms: 100,
            demo_pixels: 2048,
            allow_demo: true,
        }
    }
}

/// Persistence defaults.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageSettings {
    /// Default dataset output path.
    pub default_path: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            default_path: "spectra.json".to_string(),
        }
    }
}

/// Serial link and axis selection for the motion controller.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StageSettings {
    /// Serial port the controller is attached to.
    pub port: String,
    /// RS-232 baud rate (controller default 19200, 8-N-1).
    pub baud_rate: u32,
    /// Axis number (1..=3). Configuration, not protocol state.
    pub axis: u8,
    /// Serial read timeout in milliseconds.
    pub read_timeout_ms: u64,
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 19_200,
            axis: 2,
            read_timeout_ms: 1_000,
        }
    }
}

/// FROG scan sequencing parameters.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScanSettings {
    /// First stage position.
    pub start: f64,
    /// End of the scan range (exclusive, arange semantics).
    pub stop: f64,
    /// Step magnitude; the sign is derived from start/stop ordering.
    pub step: f64,
    /// Wait after motion stop before trusting a spectrum (mechanical
    /// ringing, dark-current drift).
    pub settle_ms: u64,
    /// Motion-status poll interval.
    pub status_poll_ms: u64,
    /// Spectrum-pending poll interval.
    pub pending_poll_ms: u64,
    /// Give up on a requested spectrum after this long; prevents a dead
    /// acquisition loop from deadlocking the scan.
    pub pending_timeout_ms: u64,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            start: 10.0,
            stop: 11.0,
            step: 0.1,
            settle_ms: 200,
            status_poll_ms: 50,
            pending_poll_ms: 20,
            pending_timeout_ms: 5_000,
        }
    }
}

impl Settings {
    /// Load settings from `config/<name>.toml`, falling back to defaults when
    /// the file does not exist.
    pub fn new(config_name: Option<&str>) -> Result<Self, AcqError> {
        let config_path = format!("config/{}", config_name.unwrap_or("default"));
        let s = Config::builder()
            .add_source(config::File::with_name(&config_path).required(false))
            .build()
            .map_err(AcqError::Config)?;

        s.try_deserialize().map_err(AcqError::Config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let s = Settings::default();
        assert!(s.acquisition.integration_time_ms > 0);
        assert_eq!(s.stage.baud_rate, 19_200);
        assert!((1..=3).contains(&s.stage.axis));
        assert!(s.scan.pending_timeout_ms > s.scan.pending_poll_ms);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let s = Settings::new(Some("does_not_exist")).unwrap();
        assert_eq!(s.acquisition.poll_interval_ms, 100);
    }
}
