use anyhow::{ensure, Result};
use serde::Deserialize;
use std::path::PathBuf;

use crate::nearest::MAX_NEAREST;
use crate::observer::ObserverLocation;
use crate::satellite::TrackOptions;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub observer: ObserverConfig,
    pub satellites: SatellitesConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub settings: SettingsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
pub struct ObserverConfig {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub height_m: f64,
}

impl ObserverConfig {
    pub fn location(&self) -> ObserverLocation {
        ObserverLocation::new(self.latitude, self.longitude)
    }
}

#[derive(Debug, Deserialize)]
pub struct SatellitesConfig {
    pub tle_file: PathBuf,
    /// Satellite to track on startup when none was saved.
    #[serde(default)]
    pub track: Option<String>,
    #[serde(default = "default_max_nearest")]
    pub max_nearest: usize,
}

fn default_max_nearest() -> usize {
    MAX_NEAREST
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub position_interval_ms: u64,
    pub path_interval_secs: u64,
    pub path_steps: usize,
    pub path_step_minutes: u64,
    pub marker_stride: usize,
    pub show_path: bool,
    /// How often the nearest-satellite list is re-ranked.
    pub rank_interval_secs: u64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            position_interval_ms: 1000,
            path_interval_secs: 60,
            path_steps: 100,
            path_step_minutes: 1,
            marker_stride: 5,
            show_path: false,
            rank_interval_secs: 30,
        }
    }
}

const SECONDS_PER_DAY: u64 = 86_400;

impl TrackingConfig {
    /// Every interval must lie between one unit and one day, which keeps the
    /// conversions to `chrono::Duration` in range.
    fn validate(&self) -> Result<()> {
        ensure!(
            (1..=SECONDS_PER_DAY * 1000).contains(&self.position_interval_ms),
            "tracking.position_interval_ms must be between 1 and {}",
            SECONDS_PER_DAY * 1000
        );
        ensure!(
            (1..=SECONDS_PER_DAY).contains(&self.path_interval_secs),
            "tracking.path_interval_secs must be between 1 and {SECONDS_PER_DAY}"
        );
        ensure!(
            (1..=SECONDS_PER_DAY / 60).contains(&self.path_step_minutes),
            "tracking.path_step_minutes must be between 1 and {}",
            SECONDS_PER_DAY / 60
        );
        ensure!(
            (1..=SECONDS_PER_DAY).contains(&self.rank_interval_secs),
            "tracking.rank_interval_secs must be between 1 and {SECONDS_PER_DAY}"
        );
        ensure!(
            (1..=10_000).contains(&self.path_steps),
            "tracking.path_steps must be between 1 and 10000"
        );
        Ok(())
    }

    pub fn track_options(&self) -> TrackOptions {
        TrackOptions {
            position_interval: chrono::Duration::milliseconds(self.position_interval_ms as i64),
            path_interval: chrono::Duration::seconds(self.path_interval_secs as i64),
            path_steps: self.path_steps,
            path_step: chrono::Duration::minutes(self.path_step_minutes as i64),
            marker_stride: self.marker_stride,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub refresh_rate: u64, // milliseconds
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self { refresh_rate: 250 }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    /// DuckDB file; defaults to the platform data directory.
    pub database: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.tracking.validate()?;
        ensure!(
            (1..=60_000).contains(&self.display.refresh_rate),
            "display.refresh_rate must be between 1 and 60000 ms"
        );
        Ok(())
    }
}

/// `~/.local/share/satgazer` or the platform equivalent.
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("satgazer")
}
