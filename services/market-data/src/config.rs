//! Pipeline configuration
//!
//! Loaded from a JSON file; every field has a default so a config only needs
//! the keys it changes.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tick_store::slicer::{DEFAULT_OVERLAP_RATIO, DEFAULT_STEP_RATIO, MIN_OVERLAP_RATIO};
use types::time::DEFAULT_TZ_OFFSET;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Stem of the tick store to read (`<stem>.bin` / `<stem>.idx`).
    pub tick_store: PathBuf,
    pub bar_1m_store: PathBuf,
    pub bar_5m_store: PathBuf,
    pub day_store: PathBuf,
    pub tick_capacity: usize,
    pub bar_capacity: usize,
    pub day_capacity: usize,
    /// Seconds east of UTC.
    pub tz_offset: i64,
    /// Rows one minute of ticks occupies across all symbols.
    pub ticks_per_minute: usize,
    pub overlap_ratio: f64,
    pub step_ratio: f64,
    /// Copy top-of-book from the last tick into bars.
    pub include_quote: bool,
    pub poll_interval_ms: u64,
    /// Keep polling after catching up.
    pub live: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tick_store: PathBuf::from("data/tick"),
            bar_1m_store: PathBuf::from("data/bar_1m"),
            bar_5m_store: PathBuf::from("data/bar_5m"),
            day_store: PathBuf::from("data/bar_1d"),
            tick_capacity: 6000 * 4 * 60 * 20,
            bar_capacity: 6000 * 4 * 60,
            day_capacity: 6000,
            tz_offset: DEFAULT_TZ_OFFSET,
            ticks_per_minute: 6000 * 20,
            overlap_ratio: DEFAULT_OVERLAP_RATIO,
            step_ratio: DEFAULT_STEP_RATIO,
            include_quote: true,
            poll_interval_ms: 500,
            live: false,
        }
    }
}

impl PipelineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_capacity == 0 || self.bar_capacity == 0 || self.day_capacity == 0 {
            return Err(ConfigError::Invalid(
                "store capacities must be positive".to_string(),
            ));
        }
        if self.ticks_per_minute == 0 {
            return Err(ConfigError::Invalid(
                "ticks_per_minute must be positive".to_string(),
            ));
        }
        if self.overlap_ratio < MIN_OVERLAP_RATIO {
            return Err(ConfigError::Invalid(format!(
                "overlap_ratio {} is below {}",
                self.overlap_ratio, MIN_OVERLAP_RATIO
            )));
        }
        if self.step_ratio < self.overlap_ratio * 2.0 {
            return Err(ConfigError::Invalid(format!(
                "step_ratio {} must be at least twice overlap_ratio {}",
                self.step_ratio, self.overlap_ratio
            )));
        }
        if self.tz_offset.abs() > 14 * 3600 {
            return Err(ConfigError::Invalid(format!(
                "tz_offset {} is out of range",
                self.tz_offset
            )));
        }
        Ok(())
    }
}
