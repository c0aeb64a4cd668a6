//! Session configuration.

use std::time::Duration;

use crate::error::ConfigError;
use crate::trace::RotationConfig;

/// Configuration for a monitoring session.
///
/// All values have working defaults; use the `with_*` builders to override.
/// Validation happens once, at session start, before the sampler thread is
/// spawned — an invalid configuration means the session never starts.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Nominal time between sampling ticks.
    pub sampling_interval: Duration,
    /// Trace retention window in seconds.
    pub retention_seconds: i64,
    /// Throttle floor for eviction work, in seconds.
    pub cleanup_interval_seconds: i64,
    /// Evict expired rows opportunistically on append.
    pub auto_cleanup: bool,
    /// Process to attribute energy to. `None` means the calling process.
    pub pid: Option<u32>,
    /// How often the worker logs a running attributed-energy summary.
    pub summary_interval_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sampling_interval: Duration::from_secs(1),
            retention_seconds: 3600,
            cleanup_interval_seconds: 60,
            auto_cleanup: true,
            pid: None,
            summary_interval_seconds: 900,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sampling_interval(mut self, interval: Duration) -> Self {
        self.sampling_interval = interval;
        self
    }

    pub fn with_retention_seconds(mut self, seconds: i64) -> Self {
        self.retention_seconds = seconds;
        self
    }

    pub fn with_cleanup_interval_seconds(mut self, seconds: i64) -> Self {
        self.cleanup_interval_seconds = seconds;
        self
    }

    pub fn with_auto_cleanup(mut self, auto_cleanup: bool) -> Self {
        self.auto_cleanup = auto_cleanup;
        self
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    pub fn with_summary_interval_seconds(mut self, seconds: u64) -> Self {
        self.summary_interval_seconds = seconds;
        self
    }

    /// The process id energy is attributed to.
    pub fn target_pid(&self) -> u32 {
        self.pid.unwrap_or_else(std::process::id)
    }

    /// Reject out-of-range values before the session starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sampling_interval.is_zero() {
            return Err(ConfigError::InvalidSamplingInterval);
        }
        if self.retention_seconds <= 0 {
            return Err(ConfigError::InvalidRetention(self.retention_seconds));
        }
        if self.cleanup_interval_seconds <= 0 {
            return Err(ConfigError::InvalidCleanupInterval(
                self.cleanup_interval_seconds,
            ));
        }
        Ok(())
    }

    /// Rotation settings shared by every group's trace pair.
    pub fn rotation(&self) -> RotationConfig {
        RotationConfig {
            retention_seconds: self.retention_seconds,
            auto_cleanup: self.auto_cleanup,
            cleanup_interval_seconds: self.cleanup_interval_seconds,
        }
    }
}
