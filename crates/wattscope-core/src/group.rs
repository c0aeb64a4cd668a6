//! Per-device-class aggregation and proportional energy attribution.
//!
//! An [`EnergyGroup`] owns one device class's trace pair (energy and
//! utilization, appended in lockstep with identical timestamps) plus the
//! all-time attributed total, which survives trace rotation.
//!
//! Attribution normalizes the monitored process's utilization against the
//! summed utilization of all *active* entities in the interval — idle time
//! is never in the denominator — and multiplies that share by the
//! interval's measured energy. Summing attributed energy over all active
//! entities reproduces the interval's total; an interval with nothing
//! active attributes zero to everyone rather than dividing by zero.

use serde::Serialize;

use crate::error::{ConfigError, TraceError};
use crate::trace::{EnergyRow, RotatingTrace, RotationConfig, TraceStats, UtilizationRow};

/// Consecutive `Unavailable` failures after which a group is marked
/// degraded.
pub const DEGRADED_AFTER_FAILURES: u32 = 3;

/// Health of a device group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupStatus {
    /// Sampling normally.
    Healthy,
    /// Repeated transient failures; excluded from attribution until the
    /// next successful sample.
    Degraded,
    /// Permission denied; out of the session for good.
    Disabled,
}

/// Trace shape for one group, energy and utilization side by side.
#[derive(Debug, Clone, Serialize)]
pub struct GroupTraceStats {
    pub energy: TraceStats,
    pub utilization: TraceStats,
}

/// One device class's samples, traces, and attribution state.
pub struct EnergyGroup {
    id: String,
    energy: RotatingTrace<EnergyRow>,
    utilization: RotatingTrace<UtilizationRow>,
    attributed_joules: f64,
    status: GroupStatus,
    consecutive_failures: u32,
}

impl EnergyGroup {
    pub fn new(id: impl Into<String>, rotation: RotationConfig) -> Result<Self, ConfigError> {
        let energy = RotatingTrace::with_config(rotation.clone())?;
        let utilization = RotatingTrace::with_config(rotation)?;
        Ok(Self {
            id: id.into(),
            energy,
            utilization,
            attributed_joules: 0.0,
            status: GroupStatus::Healthy,
            consecutive_failures: 0,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> GroupStatus {
        self.status
    }

    /// Append one interval observation to both traces and fold its
    /// attributed share into the all-time total.
    ///
    /// The energy trace's ordering check runs first; because both rows
    /// carry the same timestamp, either both traces accept the row pair or
    /// neither does, so the pair can never diverge.
    pub fn append(
        &mut self,
        delta_joules: f64,
        process_share: f64,
        active_share: f64,
        timestamp_ms: i64,
    ) -> Result<(), TraceError> {
        self.energy.append(EnergyRow {
            timestamp_ms,
            joules: delta_joules,
        })?;
        self.utilization.append(UtilizationRow {
            timestamp_ms,
            process_share,
            active_share,
        })?;
        self.attributed_joules += attribute(delta_joules, process_share, active_share);
        Ok(())
    }

    /// All-time energy attributed to the monitored process, in joules.
    /// Unlike the traces, this total is never rotated away.
    pub fn attributed_joules(&self) -> f64 {
        self.attributed_joules
    }

    /// Energy attributed to the monitored process over retained rows newer
    /// than `start_ms`. Intervals with no active entity contribute zero.
    pub fn attributed_energy_since(&self, start_ms: i64) -> f64 {
        let mut total = 0.0;
        let mut utilization = self.utilization.rows_since(start_ms).peekable();
        for row in self.energy.rows_since(start_ms) {
            // Rows are appended pairwise with identical timestamps; realign
            // defensively if the traces ever disagree.
            while utilization
                .peek()
                .is_some_and(|u| u.timestamp_ms < row.timestamp_ms)
            {
                utilization.next();
            }
            let Some(share) = utilization.peek() else {
                break;
            };
            if share.timestamp_ms != row.timestamp_ms {
                continue;
            }
            total += attribute(row.joules, share.process_share, share.active_share);
            utilization.next();
        }
        total
    }

    /// Update the retention window on both traces. Validation happens
    /// before either trace is touched: both change or neither does.
    pub fn set_retention(&mut self, seconds: i64) -> Result<(), ConfigError> {
        if seconds <= 0 {
            return Err(ConfigError::InvalidRetention(seconds));
        }
        self.energy.set_retention_seconds(seconds)?;
        self.utilization.set_retention_seconds(seconds)?;
        Ok(())
    }

    pub fn stats(&self) -> GroupTraceStats {
        GroupTraceStats {
            energy: self.energy.stats(),
            utilization: self.utilization.stats(),
        }
    }

    /// Evict expired rows from both traces immediately. Returns total rows
    /// removed.
    pub fn force_cleanup(&mut self) -> usize {
        self.energy.force_cleanup() + self.utilization.force_cleanup()
    }

    /// Record a transient sampling failure. Returns `true` when this
    /// failure is the one that degrades the group.
    pub(crate) fn record_failure(&mut self) -> bool {
        if self.status == GroupStatus::Disabled {
            return false;
        }
        self.consecutive_failures += 1;
        if self.consecutive_failures >= DEGRADED_AFTER_FAILURES
            && self.status == GroupStatus::Healthy
        {
            self.status = GroupStatus::Degraded;
            return true;
        }
        false
    }

    /// Record a successful sample. Returns `true` when the group recovers
    /// from a degraded state.
    pub(crate) fn record_success(&mut self) -> bool {
        self.consecutive_failures = 0;
        if self.status == GroupStatus::Degraded {
            self.status = GroupStatus::Healthy;
            return true;
        }
        false
    }

    /// Take the group out of the session permanently.
    pub(crate) fn disable(&mut self) {
        self.status = GroupStatus::Disabled;
    }
}

/// Proportional attribution for one interval: the process's share of the
/// active utilization, times the interval's energy. An idle interval
/// (`active_share <= 0`) attributes nothing — by convention, not by error.
fn attribute(joules: f64, process_share: f64, active_share: f64) -> f64 {
    if active_share <= 0.0 {
        return 0.0;
    }
    joules * (process_share / active_share)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock;

    fn group() -> EnergyGroup {
        EnergyGroup::new("test:0", RotationConfig::new(3600)).unwrap()
    }

    // -----------------------------------------------------------------------
    // Attribution
    // -----------------------------------------------------------------------

    #[test]
    fn attribution_is_proportional_to_active_share() {
        let mut g = group();
        let now = clock::monotonic_ms();
        // 8 J over an interval where the process held 1 of 4 active units.
        g.append(8.0, 1.0, 4.0, now).unwrap();
        assert!((g.attributed_joules() - 2.0).abs() < 1e-12);
        assert!((g.attributed_energy_since(i64::MIN) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn attribution_conserves_interval_energy_across_entities() {
        // Three entities splitting one interval's activity: their
        // attributed energies must sum back to the measured total.
        let now = clock::monotonic_ms();
        let joules = 12.5;
        let shares = [3.0, 1.5, 0.5];
        let active: f64 = shares.iter().sum();

        let mut attributed_sum = 0.0;
        for share in shares {
            let mut g = group();
            g.append(joules, share, active, now).unwrap();
            attributed_sum += g.attributed_joules();
        }
        let relative_error = (attributed_sum - joules).abs() / joules;
        assert!(relative_error < 1e-9, "conservation violated: {relative_error}");
    }

    #[test]
    fn idle_interval_attributes_zero_not_an_error() {
        let mut g = group();
        let now = clock::monotonic_ms();
        g.append(5.0, 0.0, 0.0, now).unwrap();
        assert_eq!(g.attributed_joules(), 0.0);
        assert_eq!(g.attributed_energy_since(i64::MIN), 0.0);
    }

    #[test]
    fn attributed_energy_since_respects_the_boundary() {
        let mut g = group();
        let now = clock::monotonic_ms();
        g.append(4.0, 1.0, 1.0, now).unwrap();
        g.append(6.0, 1.0, 1.0, now + 1000).unwrap();
        // Strictly-newer-than semantics: the row at `now` is excluded.
        assert!((g.attributed_energy_since(now) - 6.0).abs() < 1e-12);
        assert!((g.attributed_energy_since(now - 1) - 10.0).abs() < 1e-12);
    }

    #[test]
    fn accumulator_survives_rotation() {
        let mut g = EnergyGroup::new("test:0", RotationConfig::new(1)).unwrap();
        let now = clock::monotonic_ms();
        g.append(3.0, 1.0, 1.0, now - 10_000).unwrap();
        g.force_cleanup();
        assert_eq!(g.stats().energy.row_count, 0);
        assert!((g.attributed_joules() - 3.0).abs() < 1e-12);
        // The windowed query, by contrast, only sees retained rows.
        assert_eq!(g.attributed_energy_since(i64::MIN), 0.0);
    }

    // -----------------------------------------------------------------------
    // Trace pairing
    // -----------------------------------------------------------------------

    #[test]
    fn append_rejects_out_of_order_rows_leaving_both_traces_aligned() {
        let mut g = group();
        let now = clock::monotonic_ms();
        g.append(1.0, 0.5, 1.0, now).unwrap();
        let err = g.append(1.0, 0.5, 1.0, now - 5).unwrap_err();
        assert!(matches!(err, TraceError::NonMonotonicTimestamp { .. }));
        let stats = g.stats();
        assert_eq!(stats.energy.row_count, 1);
        assert_eq!(stats.utilization.row_count, 1);
    }

    #[test]
    fn set_retention_is_atomic_across_the_pair() {
        let mut g = group();
        assert_eq!(
            g.set_retention(-1),
            Err(ConfigError::InvalidRetention(-1))
        );
        let stats_before = g.stats();
        g.set_retention(60).unwrap();
        // Both traces now share the shrunk window.
        let now = clock::monotonic_ms();
        g.append(1.0, 1.0, 1.0, now - 120_000).unwrap();
        g.force_cleanup();
        let stats = g.stats();
        assert_eq!(stats.energy.row_count, stats_before.energy.row_count);
        assert_eq!(stats.utilization.row_count, 0);
    }

    // -----------------------------------------------------------------------
    // Status transitions
    // -----------------------------------------------------------------------

    #[test]
    fn degrades_after_three_consecutive_failures_and_recovers() {
        let mut g = group();
        assert!(!g.record_failure());
        assert!(!g.record_failure());
        assert_eq!(g.status(), GroupStatus::Healthy);
        assert!(g.record_failure(), "third failure degrades");
        assert_eq!(g.status(), GroupStatus::Degraded);
        // Further failures keep it degraded without re-announcing.
        assert!(!g.record_failure());
        assert!(g.record_success(), "first success recovers");
        assert_eq!(g.status(), GroupStatus::Healthy);
    }

    #[test]
    fn interleaved_successes_reset_the_failure_count() {
        let mut g = group();
        g.record_failure();
        g.record_failure();
        g.record_success();
        g.record_failure();
        g.record_failure();
        assert_eq!(g.status(), GroupStatus::Healthy);
    }

    #[test]
    fn disabled_is_terminal() {
        let mut g = group();
        g.disable();
        assert_eq!(g.status(), GroupStatus::Disabled);
        assert!(!g.record_failure());
        g.record_success();
        assert_eq!(g.status(), GroupStatus::Disabled);
    }
}
