//! Engine configuration.
//!
//! Stored as TOML. Every field has a default, so an empty file (or no
//! file at all) is a valid configuration:
//!
//! ```toml
//! lookahead_steps = 64
//! tick_interval = "25ms"
//! schedule_ahead = "100ms"
//! flush_timeout = "500ms"
//! prime_loops = 2
//! latency_window = 64
//! worker_logging = false
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Tuning knobs for the transport and the generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Steps the generator fills ahead of the requested step.
    pub lookahead_steps: u64,
    /// Generator tick period, e.g. "25ms".
    pub tick_interval: String,
    /// How far ahead of the clock the scheduler renders.
    pub schedule_ahead: String,
    /// How long a flush may go unanswered before it is reported lost.
    pub flush_timeout: String,
    /// On start, prime this many passes through the arrangement.
    pub prime_loops: u64,
    /// Number of latency samples kept for rolling statistics.
    pub latency_window: usize,
    /// Log every generator buffer fill.
    pub worker_logging: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lookahead_steps: 64,
            tick_interval: "25ms".to_string(),
            schedule_ahead: "100ms".to_string(),
            flush_timeout: "500ms".to_string(),
            prime_loops: 2,
            latency_window: 64,
            worker_logging: false,
        }
    }
}

impl EngineConfig {
    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::Config(format!("config file not found at {:?}", path)));
        }
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load configuration or fall back to defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path.as_ref()) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Using default engine configuration: {}", e);
                Self::default()
            }
        }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that durations parse and counts are usable.
    pub fn validate(&self) -> Result<()> {
        if self.lookahead_steps == 0 {
            return Err(Error::Config("lookahead_steps must be at least 1".to_string()));
        }
        if self.tick_interval()?.is_zero() {
            return Err(Error::Config("tick_interval must be positive".to_string()));
        }
        self.schedule_ahead()?;
        self.flush_timeout()?;
        Ok(())
    }

    pub fn tick_interval(&self) -> Result<Duration> {
        Ok(humantime::parse_duration(&self.tick_interval)?)
    }

    pub fn schedule_ahead(&self) -> Result<Duration> {
        Ok(humantime::parse_duration(&self.schedule_ahead)?)
    }

    pub fn flush_timeout(&self) -> Result<Duration> {
        Ok(humantime::parse_duration(&self.flush_timeout)?)
    }
}
