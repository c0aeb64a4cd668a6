//! Error taxonomy.
//!
//! Per-tick collector failures are absorbed by the sampler and never abort a
//! session; configuration and registration failures surface synchronously at
//! session start. Counter wraparound is deliberately *not* represented here —
//! it is resolved arithmetically in [`crate::collector`].

use thiserror::Error;

/// A collector failed to produce a reading this tick.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// The hardware source could not be read right now. Transient: the
    /// sampler retries next tick, and marks the device group degraded after
    /// three consecutive occurrences.
    #[error("hardware source unavailable: {0}")]
    Unavailable(String),

    /// The hardware source is not readable by this user. Fatal for the
    /// collector's device group only; the group is disabled for the
    /// remainder of the session.
    #[error("permission denied reading hardware source: {0}")]
    PermissionDenied(String),
}

/// Invalid configuration, rejected before any thread is spawned.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("retention window must be positive, got {0} s")]
    InvalidRetention(i64),

    #[error("cleanup interval must be positive, got {0} s")]
    InvalidCleanupInterval(i64),

    #[error("sampling interval must be positive")]
    InvalidSamplingInterval,
}

/// A rotating-trace append was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TraceError {
    /// The caller supplied a timestamp older than the newest retained row.
    /// The ordering invariant takes precedence: the row is dropped.
    #[error("non-monotonic timestamp: {got} ms is older than the last row at {last} ms")]
    NonMonotonicTimestamp { last: i64, got: i64 },
}

/// Failure to start a monitoring session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("collector for device group `{group}` failed at registration: {source}")]
    Collector {
        group: String,
        #[source]
        source: CollectorError,
    },

    #[error("two collectors registered for device group `{0}`")]
    DuplicateGroup(String),

    #[error("no collectors registered")]
    NoCollectors,

    #[error("failed to spawn sampler thread: {0}")]
    Spawn(#[from] std::io::Error),
}
