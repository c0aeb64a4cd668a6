//! Background sampling worker.
//!
//! One dedicated thread per monitoring session polls every registered
//! collector sequentially at a fixed nominal interval, so all device groups
//! share one consistent per-tick timestamp. Per group, consecutive readings
//! become one energy delta and one pair of utilization shares, appended
//! under that group's lock together with the attribution update — readers
//! never observe a half-written tick.
//!
//! Teardown signals a condvar the sleep waits on, so the worker observes a
//! stop within one sampling interval at most, finishes its in-flight tick
//! whole, and only then transitions to `Stopped`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::clock;
use crate::collector::{self, Collector, EnergyReading, UtilizationReading};
use crate::config::SessionConfig;
use crate::error::CollectorError;
use crate::group::{DEGRADED_AFTER_FAILURES, EnergyGroup, GroupStatus};

/// Sampler lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

impl SamplerState {
    fn from_u8(value: u8) -> SamplerState {
        match value {
            0 => SamplerState::Idle,
            1 => SamplerState::Running,
            2 => SamplerState::Stopping,
            _ => SamplerState::Stopped,
        }
    }
}

/// State shared between the worker thread and session-side readers.
///
/// The worker is the sole writer of every group; callers take the same
/// per-group mutex for reads.
pub(crate) struct SamplerShared {
    pub(crate) groups: HashMap<String, Mutex<EnergyGroup>>,
    state: AtomicU8,
    stop: Mutex<bool>,
    wakeup: Condvar,
}

impl SamplerShared {
    pub(crate) fn new(groups: HashMap<String, Mutex<EnergyGroup>>) -> Self {
        Self {
            groups,
            state: AtomicU8::new(SamplerState::Idle as u8),
            stop: Mutex::new(false),
            wakeup: Condvar::new(),
        }
    }

    pub(crate) fn state(&self) -> SamplerState {
        SamplerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: SamplerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn signal_stop(&self) {
        let mut stop = self.stop.lock().unwrap();
        *stop = true;
        self.wakeup.notify_all();
    }

    fn stop_requested(&self) -> bool {
        *self.stop.lock().unwrap()
    }

    /// Sleep until `timeout` elapses or a stop is signalled. Returns `true`
    /// when stopping.
    fn wait_for_stop(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut stop = self.stop.lock().unwrap();
        while !*stop {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self.wakeup.wait_timeout(stop, deadline - now).unwrap();
            stop = guard;
        }
        true
    }
}

/// Handle to the worker thread. Stopping is idempotent and blocks until the
/// thread has been joined.
pub(crate) struct Sampler {
    shared: Arc<SamplerShared>,
    handle: Option<JoinHandle<()>>,
}

impl Sampler {
    /// Spawn the worker: `Idle → Running`.
    pub(crate) fn spawn(
        config: SessionConfig,
        collectors: Vec<Collector>,
        shared: Arc<SamplerShared>,
    ) -> std::io::Result<Sampler> {
        shared.set_state(SamplerState::Running);
        let worker_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("wattscope-sampler".to_string())
            .spawn(move || run_loop(config, collectors, worker_shared))?;
        Ok(Sampler {
            shared,
            handle: Some(handle),
        })
    }

    /// `Running → Stopping`, then block until the worker reports `Stopped`.
    pub(crate) fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if self.shared.state() == SamplerState::Running {
            self.shared.set_state(SamplerState::Stopping);
        }
        self.shared.signal_stop();
        if handle.join().is_err() {
            error!("sampler worker panicked");
            self.shared.set_state(SamplerState::Stopped);
        }
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Last readings per device group; turns consecutive samples into interval
/// deltas. The first sample after creation is baseline-only.
#[derive(Default)]
struct DeltaTracker {
    last_energy: Option<EnergyReading>,
    last_utilization: Option<UtilizationReading>,
}

impl DeltaTracker {
    fn advance(
        &mut self,
        energy: EnergyReading,
        utilization: UtilizationReading,
    ) -> Option<(f64, f64, f64)> {
        let delta = match (&self.last_energy, &self.last_utilization) {
            (Some(previous_energy), Some(previous_utilization)) => {
                let joules = collector::energy_delta_joules(previous_energy, &energy);
                let (process_share, active_share) =
                    collector::utilization_shares(previous_utilization, &utilization);
                Some((joules, process_share, active_share))
            }
            _ => None,
        };
        self.last_energy = Some(energy);
        self.last_utilization = Some(utilization);
        delta
    }
}

fn run_loop(config: SessionConfig, mut collectors: Vec<Collector>, shared: Arc<SamplerShared>) {
    let pid = config.target_pid();
    let interval = config.sampling_interval;
    let summary_every = Duration::from_secs(config.summary_interval_seconds.max(1));
    let mut trackers: HashMap<String, DeltaTracker> = collectors
        .iter()
        .map(|c| (c.device_group().to_string(), DeltaTracker::default()))
        .collect();
    let mut last_summary = Instant::now();

    loop {
        if shared.stop_requested() {
            break;
        }
        let tick_started = Instant::now();
        let timestamp_ms = clock::monotonic_ms();

        for collector in &mut collectors {
            let group_id = collector.device_group().to_string();
            let Some(group_mutex) = shared.groups.get(&group_id) else {
                continue;
            };
            if group_mutex.lock().unwrap().status() == GroupStatus::Disabled {
                continue;
            }

            match collector.sample(pid) {
                Ok((energy, utilization)) => {
                    let Some(tracker) = trackers.get_mut(&group_id) else {
                        continue;
                    };
                    let delta = tracker.advance(energy, utilization);
                    let mut group = group_mutex.lock().unwrap();
                    if group.record_success() {
                        info!("device group {group_id} recovered, resuming attribution");
                    }
                    if let Some((joules, process_share, active_share)) = delta {
                        if let Err(err) =
                            group.append(joules, process_share, active_share, timestamp_ms)
                        {
                            warn!("device group {group_id}: {err}");
                        }
                    }
                }
                Err(CollectorError::Unavailable(reason)) => {
                    debug!("device group {group_id} unavailable this tick: {reason}");
                    if group_mutex.lock().unwrap().record_failure() {
                        warn!(
                            "device group {group_id} degraded after {DEGRADED_AFTER_FAILURES} \
                             consecutive failures"
                        );
                    }
                }
                Err(CollectorError::PermissionDenied(reason)) => {
                    group_mutex.lock().unwrap().disable();
                    error!("device group {group_id} disabled for this session: {reason}");
                }
            }
        }

        if last_summary.elapsed() >= summary_every {
            let total: f64 = shared
                .groups
                .values()
                .map(|g| g.lock().unwrap().attributed_joules())
                .sum();
            info!(
                "attributed energy so far: {total:.3} J across {} device groups",
                shared.groups.len()
            );
            last_summary = Instant::now();
        }

        // Sleep the remainder of the interval, floored at zero; a stop
        // signal wakes the condvar immediately.
        let sleep = interval.saturating_sub(tick_started.elapsed());
        if shared.wait_for_stop(sleep) {
            break;
        }
    }

    shared.set_state(SamplerState::Stopped);
    debug!("sampler worker stopped");
}
