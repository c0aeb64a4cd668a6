//! Bounded, time-ordered trace storage with throttled rotation.
//!
//! A [`RotatingTrace`] keeps a limited history window, similar to log
//! rotation: rows older than the configured retention window are evicted so
//! memory stays bounded across long-running sessions.
//!
//! Eviction is throttled. Cleaning on every append would cost O(n) per
//! append, which is unacceptable at high sampling rates, so opportunistic
//! cleanup runs at most once per `cleanup_interval_seconds`. The documented
//! consequence: rows may outlive the nominal retention window by up to one
//! cleanup interval between cleanups. [`RotatingTrace::force_cleanup`]
//! bypasses the throttle for deterministic tests and for reclaiming memory
//! immediately after a retention shrink.

use std::collections::VecDeque;

use log::{debug, warn};
use serde::Serialize;

use crate::clock;
use crate::error::{ConfigError, TraceError};

/// Configuration for trace rotation behavior.
#[derive(Debug, Clone)]
pub struct RotationConfig {
    /// Time window to maintain, in seconds.
    pub retention_seconds: i64,
    /// Evict expired rows opportunistically on append.
    pub auto_cleanup: bool,
    /// Minimum seconds between opportunistic cleanups.
    pub cleanup_interval_seconds: i64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            retention_seconds: 3600,
            auto_cleanup: true,
            cleanup_interval_seconds: 60,
        }
    }
}

impl RotationConfig {
    pub fn new(retention_seconds: i64) -> Self {
        Self {
            retention_seconds,
            ..Self::default()
        }
    }

    pub fn with_auto_cleanup(mut self, auto_cleanup: bool) -> Self {
        self.auto_cleanup = auto_cleanup;
        self
    }

    pub fn with_cleanup_interval_seconds(mut self, seconds: i64) -> Self {
        self.cleanup_interval_seconds = seconds;
        self
    }

    /// Both intervals must be positive.
    pub fn validate(&self) -> Result<(), ConfigError> {
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
}

/// Anything storable in a [`RotatingTrace`].
pub trait TraceRow {
    fn timestamp_ms(&self) -> i64;
}

/// One per-interval energy observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergyRow {
    pub timestamp_ms: i64,
    /// Energy measured over the interval ending at `timestamp_ms`, in joules.
    pub joules: f64,
}

impl TraceRow for EnergyRow {
    fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }
}

/// One per-interval utilization observation.
///
/// Shares are opaque comparable magnitudes — same unit, same interval. The
/// invariant `0 <= process_share <= active_share` holds for well-formed rows;
/// `active_share == 0` is a legitimate idle interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UtilizationRow {
    pub timestamp_ms: i64,
    /// Utilization of the monitored process over the interval.
    pub process_share: f64,
    /// Summed utilization of all active entities over the interval.
    pub active_share: f64,
}

impl TraceRow for UtilizationRow {
    fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }
}

/// Read-only snapshot of a trace's shape.
#[derive(Debug, Clone, Serialize)]
pub struct TraceStats {
    /// Number of retained rows.
    pub row_count: usize,
    /// Seconds between the oldest and newest retained rows.
    pub span_seconds: f64,
    /// Age of the oldest retained row, in seconds.
    pub oldest_age_seconds: f64,
}

/// A bounded, time-ordered, append-only store with a retention window.
///
/// Rows must be appended in non-decreasing timestamp order; an out-of-order
/// row is rejected (and dropped) rather than silently reordered.
pub struct RotatingTrace<R: TraceRow> {
    rows: VecDeque<R>,
    config: RotationConfig,
    /// When eviction last *ran* — throttling is based on elapsed time since
    /// the last attempt, not since the last effective removal.
    last_cleanup_ms: i64,
}

impl<R: TraceRow> RotatingTrace<R> {
    /// A trace with the given retention window and default rotation behavior.
    pub fn new(retention_seconds: i64) -> Result<Self, ConfigError> {
        Self::with_config(RotationConfig::new(retention_seconds))
    }

    pub fn with_config(config: RotationConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            rows: VecDeque::new(),
            config,
            last_cleanup_ms: clock::monotonic_ms(),
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn retention_seconds(&self) -> i64 {
        self.config.retention_seconds
    }

    pub fn config(&self) -> &RotationConfig {
        &self.config
    }

    /// Retained rows, oldest first.
    pub fn rows(&self) -> impl Iterator<Item = &R> + '_ {
        self.rows.iter()
    }

    /// Retained rows strictly newer than `start_ms`, oldest first.
    pub fn rows_since(&self, start_ms: i64) -> impl Iterator<Item = &R> + '_ {
        let skip = self.rows.partition_point(|r| r.timestamp_ms() <= start_ms);
        self.rows.iter().skip(skip)
    }

    /// Timestamp of the newest retained row.
    pub fn last_timestamp_ms(&self) -> Option<i64> {
        self.rows.back().map(TraceRow::timestamp_ms)
    }

    /// Append a row, enforcing non-decreasing timestamp order.
    ///
    /// If `auto_cleanup` is enabled and at least one cleanup interval has
    /// elapsed since the last attempt, expired rows are evicted before
    /// returning.
    pub fn append(&mut self, row: R) -> Result<(), TraceError> {
        if let Some(last) = self.rows.back() {
            if row.timestamp_ms() < last.timestamp_ms() {
                let err = TraceError::NonMonotonicTimestamp {
                    last: last.timestamp_ms(),
                    got: row.timestamp_ms(),
                };
                warn!("dropping out-of-order trace row: {err}");
                return Err(err);
            }
        }
        self.rows.push_back(row);

        if self.config.auto_cleanup {
            let now = clock::monotonic_ms();
            if now - self.last_cleanup_ms >= self.config.cleanup_interval_seconds * 1000 {
                self.cleanup_at(now);
            }
        }
        Ok(())
    }

    /// Evict every row with `timestamp <= now - retention`. Returns the
    /// number of rows removed. `last_cleanup_ms` is updated even when
    /// nothing was removed.
    pub fn cleanup(&mut self) -> usize {
        self.cleanup_at(clock::monotonic_ms())
    }

    /// Evict expired rows immediately, ignoring the throttle.
    pub fn force_cleanup(&mut self) -> usize {
        self.cleanup()
    }

    fn cleanup_at(&mut self, now_ms: i64) -> usize {
        let cutoff = now_ms - self.config.retention_seconds * 1000;
        let before = self.rows.len();
        while self
            .rows
            .front()
            .is_some_and(|r| r.timestamp_ms() <= cutoff)
        {
            self.rows.pop_front();
        }
        self.last_cleanup_ms = now_ms;
        let removed = before - self.rows.len();
        if removed > 0 {
            debug!(
                "evicted {removed} trace rows older than {} s",
                self.config.retention_seconds
            );
        }
        removed
    }

    /// Shape snapshot. Never mutates and never triggers cleanup.
    pub fn stats(&self) -> TraceStats {
        let now = clock::monotonic_ms();
        let (span_seconds, oldest_age_seconds) = match (self.rows.front(), self.rows.back()) {
            (Some(oldest), Some(newest)) => (
                (newest.timestamp_ms() - oldest.timestamp_ms()) as f64 / 1000.0,
                (now - oldest.timestamp_ms()) as f64 / 1000.0,
            ),
            _ => (0.0, 0.0),
        };
        TraceStats {
            row_count: self.rows.len(),
            span_seconds,
            oldest_age_seconds,
        }
    }

    /// Drop all rows.
    pub fn clear(&mut self) {
        self.rows.clear();
        self.last_cleanup_ms = clock::monotonic_ms();
    }

    /// Update the retention window. Takes effect at the next cleanup; call
    /// [`Self::force_cleanup`] to reclaim memory immediately after a shrink.
    pub fn set_retention_seconds(&mut self, seconds: i64) -> Result<(), ConfigError> {
        if seconds <= 0 {
            return Err(ConfigError::InvalidRetention(seconds));
        }
        self.config.retention_seconds = seconds;
        Ok(())
    }

    pub fn set_cleanup_interval_seconds(&mut self, seconds: i64) -> Result<(), ConfigError> {
        if seconds <= 0 {
            return Err(ConfigError::InvalidCleanupInterval(seconds));
        }
        self.config.cleanup_interval_seconds = seconds;
        Ok(())
    }
}
