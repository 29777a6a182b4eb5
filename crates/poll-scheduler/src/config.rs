//! Scheduler Configuration

use crate::error::SchedulerError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// How subsets are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Subsets run one at a time, each for the session duration
    Serial,
    /// The whole registry runs as a single pool
    Parallel,
}

/// Configuration for one polling session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of concurrent requester/evaluator slot pairs
    pub pool_size: usize,
    /// Dispatch queue capacity; admission blocks past this
    pub queue_capacity: usize,
    /// Per-slot timeout for matching a batch response (ms)
    pub slot_timeout_ms: u64,
    /// Wall-clock duration each subset is scheduled for (s)
    pub session_duration_secs: u64,
    /// Fastest allowed poll interval (s)
    pub interval_min_secs: f64,
    /// Slowest allowed poll interval (s)
    pub interval_max_secs: f64,
    /// Schedule blacklisted requests anyway
    pub include_blacklisted: bool,
    /// Admission tick period (ms)
    pub tick_ms: u64,
    /// Transport read timeout per receive call (ms)
    pub read_timeout_ms: u64,
    /// Serial polling passes used to measure execution durations
    pub calibration_iterations: usize,
    /// Subset scheduling mode
    pub dispatch_mode: DispatchMode,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            queue_capacity: 20,
            slot_timeout_ms: 3000,
            session_duration_secs: 600,
            interval_min_secs: 1.0,
            interval_max_secs: 100.0,
            include_blacklisted: false,
            tick_ms: 100,
            read_timeout_ms: 500,
            calibration_iterations: 10,
            dispatch_mode: DispatchMode::Serial,
        }
    }
}

impl SchedulerConfig {
    /// Load from a TOML file with `DIDPOLL_*` environment overrides
    pub fn from_file(path: &Path) -> Result<Self, SchedulerError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix("DIDPOLL"))
            .build()?;
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check internal consistency
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.pool_size == 0 {
            return Err(SchedulerError::InvalidConfig(
                "pool_size must be at least 1".into(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(SchedulerError::InvalidConfig(
                "queue_capacity must be at least 1".into(),
            ));
        }
        if self.interval_min_secs <= 0.0 || self.interval_max_secs < self.interval_min_secs {
            return Err(SchedulerError::InvalidConfig(format!(
                "interval bounds [{}, {}] are invalid",
                self.interval_min_secs, self.interval_max_secs
            )));
        }
        Ok(())
    }

    pub fn slot_timeout(&self) -> Duration {
        Duration::from_millis(self.slot_timeout_ms)
    }

    pub fn session_duration(&self) -> Duration {
        Duration::from_secs(self.session_duration_secs)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}
