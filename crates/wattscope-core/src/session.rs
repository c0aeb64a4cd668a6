//! Scoped monitoring sessions.
//!
//! A [`MonitoringSession`] owns the sampler thread and every device group
//! registered with it. Entering (via [`MonitoringSession::start`] or the
//! scoped [`MonitoringSession::monitor`] helper) spawns the worker; the
//! worker is stopped and joined on *every* exit path — explicit
//! [`MonitoringSession::stop`], early return, or a panic unwinding through
//! the owner — so no sampling thread can outlive its session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use log::{info, warn};
use serde::Serialize;
use uuid::Uuid;

use crate::collector::Collector;
use crate::config::SessionConfig;
use crate::error::{CollectorError, SessionError};
use crate::group::{EnergyGroup, GroupStatus, GroupTraceStats};
use crate::sampler::{Sampler, SamplerShared, SamplerState};

/// End-of-session accounting, also serialized into the final log line.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub duration_seconds: f64,
    /// Energy attributed to the monitored process across all device groups,
    /// in joules.
    pub total_joules: f64,
    /// Per-device-group attributed energy, in joules.
    pub per_group_joules: HashMap<String, f64>,
    pub group_status: HashMap<String, GroupStatus>,
}

/// A running monitoring session.
pub struct MonitoringSession {
    id: Uuid,
    started: Instant,
    config: SessionConfig,
    shared: Arc<SamplerShared>,
    sampler: Sampler,
    stopped: bool,
}

impl std::fmt::Debug for MonitoringSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitoringSession")
            .field("id", &self.id)
            .field("started", &self.started)
            .field("config", &self.config)
            .field("stopped", &self.stopped)
            .finish_non_exhaustive()
    }
}

impl MonitoringSession {
    /// Validate the configuration, register the collectors, and start the
    /// background sampler.
    ///
    /// Fails synchronously — before any thread is spawned — on invalid
    /// configuration, an empty or duplicated collector set, or a collector
    /// whose hardware source is absent.
    pub fn start(
        config: SessionConfig,
        collectors: Vec<Collector>,
    ) -> Result<MonitoringSession, SessionError> {
        config.validate()?;
        if collectors.is_empty() {
            return Err(SessionError::NoCollectors);
        }

        let rotation = config.rotation();
        let mut groups = HashMap::new();
        for collector in &collectors {
            let group_id = collector.device_group().to_string();
            if !collector.is_available() {
                return Err(SessionError::Collector {
                    group: group_id,
                    source: CollectorError::Unavailable(
                        "not present on this system".to_string(),
                    ),
                });
            }
            let group = EnergyGroup::new(&group_id, rotation.clone())?;
            if groups.insert(group_id.clone(), Mutex::new(group)).is_some() {
                return Err(SessionError::DuplicateGroup(group_id));
            }
        }

        let shared = Arc::new(SamplerShared::new(groups));
        let sampler = Sampler::spawn(config.clone(), collectors, Arc::clone(&shared))?;

        let id = Uuid::new_v4();
        info!(
            "monitoring session {id} started: {} device groups, pid {}, sampling every {:?}",
            shared.groups.len(),
            config.target_pid(),
            config.sampling_interval
        );
        Ok(MonitoringSession {
            id,
            started: Instant::now(),
            config,
            shared,
            sampler,
            stopped: false,
        })
    }

    /// Run `f` inside a scoped session.
    ///
    /// The sampler starts before `f` and is stopped and joined after it —
    /// including when `f` panics, in which case the worker is released
    /// during unwinding, before the panic reaches the caller.
    pub fn monitor<F, R>(
        config: SessionConfig,
        collectors: Vec<Collector>,
        f: F,
    ) -> Result<(R, SessionSummary), SessionError>
    where
        F: FnOnce() -> R,
    {
        let session = MonitoringSession::start(config, collectors)?;
        let output = f();
        let summary = session.stop();
        Ok((output, summary))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current sampler lifecycle state.
    pub fn sampler_state(&self) -> SamplerState {
        self.shared.state()
    }

    /// All-time energy attributed to the monitored process, summed across
    /// device groups, in joules.
    pub fn total_consumed_energy(&self) -> f64 {
        self.shared
            .groups
            .values()
            .map(|g| g.lock().unwrap().attributed_joules())
            .sum()
    }

    /// Per-device-group attributed energy, in joules.
    pub fn consumed_energy(&self) -> HashMap<String, f64> {
        self.for_each_group(|group| group.attributed_joules())
    }

    /// Attributed energy over retained rows newer than `start_ms`, summed
    /// across device groups.
    pub fn attributed_energy_since(&self, start_ms: i64) -> f64 {
        self.shared
            .groups
            .values()
            .map(|g| g.lock().unwrap().attributed_energy_since(start_ms))
            .sum()
    }

    /// Trace shape per device group.
    pub fn trace_stats(&self) -> HashMap<String, GroupTraceStats> {
        self.for_each_group(EnergyGroup::stats)
    }

    /// Health per device group.
    pub fn group_status(&self) -> HashMap<String, GroupStatus> {
        self.for_each_group(EnergyGroup::status)
    }

    fn for_each_group<T>(&self, f: impl Fn(&EnergyGroup) -> T) -> HashMap<String, T> {
        self.shared
            .groups
            .iter()
            .map(|(id, group)| (id.clone(), f(&group.lock().unwrap())))
            .collect()
    }

    /// Stop the sampler, join its thread, and return the final accounting.
    pub fn stop(mut self) -> SessionSummary {
        self.shutdown()
    }

    fn shutdown(&mut self) -> SessionSummary {
        self.sampler.stop();
        self.stopped = true;

        let summary = SessionSummary {
            session_id: self.id.to_string(),
            duration_seconds: self.started.elapsed().as_secs_f64(),
            total_joules: self.total_consumed_energy(),
            per_group_joules: self.consumed_energy(),
            group_status: self.group_status(),
        };
        match serde_json::to_string(&summary) {
            Ok(json) => info!("monitoring session {} concluded: {json}", self.id),
            Err(err) => warn!(
                "monitoring session {} concluded ({:.3} J); summary not serializable: {err}",
                self.id, summary.total_joules
            ),
        }
        summary
    }
}

impl Drop for MonitoringSession {
    fn drop(&mut self) {
        if !self.stopped {
            let _ = self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::Synthetic;
    use crate::error::ConfigError;
    use std::time::Duration;

    fn fast_config() -> SessionConfig {
        SessionConfig::default().with_sampling_interval(Duration::from_millis(2))
    }

    fn synthetic(id: &str) -> Collector {
        Collector::Synthetic(Synthetic::new(id))
    }

    #[test]
    fn start_rejects_invalid_configuration() {
        let config = SessionConfig::default().with_retention_seconds(0);
        let err = MonitoringSession::start(config, vec![synthetic("synthetic:0")]).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Config(ConfigError::InvalidRetention(0))
        ));
    }

    #[test]
    fn start_rejects_empty_collector_set() {
        let err = MonitoringSession::start(fast_config(), Vec::new()).unwrap_err();
        assert!(matches!(err, SessionError::NoCollectors));
    }

    #[test]
    fn start_rejects_duplicate_device_groups() {
        let err = MonitoringSession::start(
            fast_config(),
            vec![synthetic("synthetic:0"), synthetic("synthetic:0")],
        )
        .unwrap_err();
        assert!(matches!(err, SessionError::DuplicateGroup(id) if id == "synthetic:0"));
    }

    #[test]
    fn queries_work_while_the_session_runs() {
        let session =
            MonitoringSession::start(fast_config(), vec![synthetic("synthetic:0")]).unwrap();
        assert_eq!(session.sampler_state(), SamplerState::Running);

        std::thread::sleep(Duration::from_millis(50));
        // Reads race the worker; they must be consistent, not torn.
        let total = session.total_consumed_energy();
        assert!(total > 0.0);
        let per_group = session.consumed_energy();
        assert_eq!(per_group.len(), 1);
        let stats = session.trace_stats();
        let group_stats = &stats["synthetic:0"];
        assert_eq!(
            group_stats.energy.row_count,
            group_stats.utilization.row_count
        );

        let summary = session.stop();
        assert!(summary.total_joules >= total);
        assert_eq!(summary.group_status["synthetic:0"], GroupStatus::Healthy);
    }

    #[test]
    fn stop_joins_the_worker_and_reports_totals() {
        let session = MonitoringSession::start(
            fast_config(),
            vec![synthetic("synthetic:0"), synthetic("synthetic:1")],
        )
        .unwrap();
        std::thread::sleep(Duration::from_millis(50));
        let summary = session.stop();

        assert!(summary.duration_seconds > 0.0);
        assert_eq!(summary.per_group_joules.len(), 2);
        let per_group_sum: f64 = summary.per_group_joules.values().sum();
        assert!((summary.total_joules - per_group_sum).abs() < 1e-9);
    }

    #[test]
    fn drop_tears_the_worker_down() {
        let collector = Synthetic::new("synthetic:0");
        let samples = collector.sample_counter();
        {
            let _session = MonitoringSession::start(
                fast_config(),
                vec![Collector::Synthetic(collector)],
            )
            .unwrap();
            std::thread::sleep(Duration::from_millis(20));
        }
        // The session is gone; sampling must have ceased.
        let after_drop = samples.load(std::sync::atomic::Ordering::Relaxed);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(samples.load(std::sync::atomic::Ordering::Relaxed), after_drop);
    }
}
