//! # wattscope-core
//!
//! **Process-attributed energy telemetry.**
//!
//! A background sampler polls cumulative hardware energy counters — CPU
//! package energy from RAPL powercap zones, discrete GPU energy from vendor
//! management counters — at a fixed cadence, correlates each interval with
//! the monitored process's share of *active* system utilization, and
//! attributes a proportional slice of the measured energy to that process.
//!
//! ## Quick Start
//!
//! ```no_run
//! use wattscope_core::{Collector, MonitoringSession, RaplCpu, SessionConfig};
//!
//! let collectors: Vec<Collector> = RaplCpu::discover_default()
//!     .into_iter()
//!     .map(Collector::RaplCpu)
//!     .collect();
//!
//! let (output, summary) = MonitoringSession::monitor(
//!     SessionConfig::default(),
//!     collectors,
//!     || {
//!         // ... the workload being measured ...
//!         42
//!     },
//! )?;
//!
//! println!("workload consumed ≈ {:.2} J", summary.total_joules);
//! # Ok::<(), wattscope_core::SessionError>(())
//! ```
//!
//! ## Architecture
//!
//! Collectors → Sampler (per-tick deltas) → Energy Groups (rotating trace
//! pair + attribution) → session queries.
//!
//! - The sampler is one dedicated thread per session; all collectors are
//!   polled sequentially each tick so device groups share one timestamp.
//! - Counter wraparound is resolved arithmetically when the counter width
//!   is known and clamped defensively when it is not — deltas are never
//!   negative.
//! - Attribution divides each interval's energy among *active* entities
//!   only; idle intervals attribute nothing, and an interval with zero
//!   active utilization contributes zero rather than a division error.
//! - Traces rotate on a retention window with throttled eviction, bounding
//!   memory for long-running sessions; rows may outlive the window by up to
//!   one cleanup interval.
//! - Entering a session starts the sampler; every exit path — normal stop,
//!   early return, panic — stops and joins it before control returns.

pub mod clock;
pub mod collector;
pub mod config;
pub mod error;
pub mod group;
pub mod procfs;
pub mod sampler;
pub mod session;
pub mod trace;

pub use collector::{
    Collector, EnergyReading, GpuVendor, MetricKind, RaplCpu, Synthetic, UtilizationReading,
    clamped_delta, energy_delta_joules, utilization_shares, wrap_delta,
};
pub use config::SessionConfig;
pub use error::{CollectorError, ConfigError, SessionError, TraceError};
pub use group::{DEGRADED_AFTER_FAILURES, EnergyGroup, GroupStatus, GroupTraceStats};
pub use procfs::ProcReader;
pub use sampler::SamplerState;
pub use session::{MonitoringSession, SessionSummary};
pub use trace::{
    EnergyRow, RotatingTrace, RotationConfig, TraceRow, TraceStats, UtilizationRow,
};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
