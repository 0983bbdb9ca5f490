//! Settings loaded from a TOML file

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use ulogview_types::{MemoryUsagePolicy, Result};

/// Bounds of the continuous reading update interval in milliseconds
pub const MIN_UPDATE_INTERVAL_MS: u64 = 50;
pub const MAX_UPDATE_INTERVAL_MS: u64 = 1000;

/// Process-wide settings used by sessions
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Interval between two updates of continuously read logs
    pub continuous_reading_update_interval_ms: u64,
    /// Cap of logs kept per continuous reader
    pub max_continuous_log_count: usize,
    pub memory_usage_policy: MemoryUsagePolicy,
    /// Shrink collections after every disposal batch
    pub save_memory_aggressively: bool,
    /// Timeout when opening marked log files
    pub marked_file_open_timeout_ms: u64,
    /// Maximum number of files read at the same time
    pub file_reading_concurrency: usize,
    /// Logs evaluated between two filtering progress reports
    pub filter_chunk_size: usize,
    /// Delay before saving marked logs after a change
    pub save_marked_logs_delay_ms: u64,
    /// Delay before applying changed filter parameters
    pub filter_update_delay_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            continuous_reading_update_interval_ms: 100,
            max_continuous_log_count: 1_000_000,
            memory_usage_policy: MemoryUsagePolicy::Balance,
            save_memory_aggressively: false,
            marked_file_open_timeout_ms: 10_000,
            file_reading_concurrency: 2,
            filter_chunk_size: ulogview_logs::DEFAULT_CHUNK_SIZE,
            save_marked_logs_delay_ms: 1000,
            filter_update_delay_ms: 0,
        }
    }
}

impl Settings {
    /// Parse settings from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        tracing::debug!(path = %path.display(), "Loaded settings");
        Ok(settings)
    }

    /// Parse settings from a TOML file, using defaults when it is missing
    /// or invalid
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No settings file, using defaults");
            return Self::default();
        }
        match Self::load(path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to load settings");
                Self::default()
            }
        }
    }

    /// Update interval clamped to the supported range
    pub fn continuous_reading_update_interval(&self) -> Duration {
        Duration::from_millis(
            self.continuous_reading_update_interval_ms
                .clamp(MIN_UPDATE_INTERVAL_MS, MAX_UPDATE_INTERVAL_MS),
        )
    }

    pub fn marked_file_open_timeout(&self) -> Duration {
        Duration::from_millis(self.marked_file_open_timeout_ms)
    }

    pub fn save_marked_logs_delay(&self) -> Duration {
        Duration::from_millis(self.save_marked_logs_delay_ms)
    }

    pub fn filter_update_delay(&self) -> Duration {
        Duration::from_millis(self.filter_update_delay_ms)
    }
}
