//! Energy collectors: one capability surface over the hardware backends.
//!
//! A collector produces, on demand, a cumulative energy reading and a
//! utilization snapshot (system-wide and for the monitored process) for one
//! device group. Backends form a closed set of tagged variants selected at
//! session configuration time — enum dispatch keeps the hot sampling loop
//! free of virtual calls while staying pluggable.
//!
//! Counter wraparound is handled arithmetically here, never as an error:
//! when the counter width is known, a reading smaller than its predecessor
//! is treated as exactly one wrap of `2^width` units; when the width is
//! unknown, a negative raw delta is clamped to zero and flagged instead of
//! corrupting cumulative totals.

pub mod gpu;
pub mod rapl;
pub mod synthetic;

use log::warn;

use crate::error::CollectorError;

pub use gpu::GpuVendor;
pub use rapl::RaplCpu;
pub use synthetic::Synthetic;

/// How a utilization metric behaves across readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Monotonically accumulating (e.g. CPU seconds); the interval share is
    /// the difference of two consecutive readings.
    Cumulative,
    /// Point-in-time magnitude (e.g. device memory bytes in use); the
    /// interval share is the newest reading.
    Gauge,
}

/// A cumulative energy counter reading. Immutable once produced.
#[derive(Debug, Clone)]
pub struct EnergyReading {
    pub device_group: String,
    /// Monotonic timestamp, milliseconds (see [`crate::clock`]).
    pub timestamp_ms: i64,
    /// Raw counter value in device-specific units. Non-decreasing until
    /// wraparound.
    pub counter: u64,
    /// Joules per raw counter unit.
    pub joules_per_unit: f64,
    /// Counter width in bits, when the device's wrap modulus is exactly
    /// `2^width`. `None` selects defensive delta clamping.
    pub counter_width: Option<u32>,
}

/// A utilization snapshot for the monitored process. Immutable once produced.
///
/// `process_metric` and `total_metric` are opaque comparable magnitudes in
/// the same unit over the same interval; `0 <= process <= total` when both
/// are well-defined, and `total == 0` is a legitimate idle interval.
#[derive(Debug, Clone)]
pub struct UtilizationReading {
    pub device_group: String,
    pub timestamp_ms: i64,
    pub pid: u32,
    pub process_metric: f64,
    /// System-wide total for the same metric, idle excluded.
    pub total_metric: f64,
    pub kind: MetricKind,
}

/// The closed set of hardware backends.
pub enum Collector {
    /// CPU package energy from a powercap (RAPL) zone.
    RaplCpu(RaplCpu),
    /// Discrete GPU energy from a vendor management counter tree.
    GpuVendor(GpuVendor),
    /// Deterministic in-memory backend for tests and demos.
    Synthetic(Synthetic),
}

impl Collector {
    /// Stable identifier of the device group this collector feeds.
    pub fn device_group(&self) -> &str {
        match self {
            Collector::RaplCpu(c) => c.device_group(),
            Collector::GpuVendor(c) => c.device_group(),
            Collector::Synthetic(c) => c.device_group(),
        }
    }

    /// Whether the backing hardware source exists on this machine.
    pub fn is_available(&self) -> bool {
        match self {
            Collector::RaplCpu(c) => c.is_available(),
            Collector::GpuVendor(c) => c.is_available(),
            Collector::Synthetic(c) => c.is_available(),
        }
    }

    /// Read the cumulative energy counter and the utilization snapshot for
    /// `pid`. Bounded, non-blocking file I/O; a source that cannot be read
    /// reports [`CollectorError::Unavailable`] rather than stalling the
    /// sampler.
    pub fn sample(
        &mut self,
        pid: u32,
    ) -> Result<(EnergyReading, UtilizationReading), CollectorError> {
        match self {
            Collector::RaplCpu(c) => c.sample(pid),
            Collector::GpuVendor(c) => c.sample(pid),
            Collector::Synthetic(c) => c.sample(pid),
        }
    }
}

/// Counter delta across one tick for a counter of known `width` bits,
/// resolving at most one wraparound: when `current < previous` the delta is
/// `(2^width - 1 - previous) + current + 1`, never negative.
pub fn wrap_delta(previous: u64, current: u64, width: u32) -> u64 {
    if current >= previous {
        return current - previous;
    }
    let modulus: u128 = if width >= 64 {
        1u128 << 64
    } else {
        1u128 << width
    };
    ((current as u128 + modulus - previous as u128) % modulus) as u64
}

/// Defensive delta for a counter of unknown width: a negative raw delta is
/// clamped to zero. Returns the delta and whether clamping occurred.
pub fn clamped_delta(previous: u64, current: u64) -> (u64, bool) {
    if current >= previous {
        (current - previous, false)
    } else {
        (0, true)
    }
}

/// Energy consumed between two consecutive readings, in joules.
pub fn energy_delta_joules(previous: &EnergyReading, current: &EnergyReading) -> f64 {
    let raw = match current.counter_width {
        Some(width) => wrap_delta(previous.counter, current.counter, width),
        None => {
            let (delta, clamped) = clamped_delta(previous.counter, current.counter);
            if clamped {
                warn!(
                    "negative raw energy delta on {} clamped to zero (counter width unknown)",
                    current.device_group
                );
            }
            delta
        }
    };
    raw as f64 * current.joules_per_unit
}

/// Interval `(process_share, active_share)` from two consecutive
/// utilization readings. Shares are clamped to the `process <= active`
/// invariant; both are zero across an idle interval.
pub fn utilization_shares(
    previous: &UtilizationReading,
    current: &UtilizationReading,
) -> (f64, f64) {
    let (process, active) = match current.kind {
        MetricKind::Cumulative => (
            (current.process_metric - previous.process_metric).max(0.0),
            (current.total_metric - previous.total_metric).max(0.0),
        ),
        MetricKind::Gauge => (
            current.process_metric.max(0.0),
            current.total_metric.max(0.0),
        ),
    };
    (process.min(active), active)
}
