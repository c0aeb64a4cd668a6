//! Deterministic in-memory collector for tests and demos.
//!
//! Emits a fixed energy step per sample and fixed utilization growth, with
//! scriptable failures and counter-wrap injection, so sampler and session
//! behavior can be asserted exactly without hardware.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::clock;
use crate::error::CollectorError;

use super::{EnergyReading, MetricKind, UtilizationReading};

#[derive(Debug, Clone, Copy)]
enum Scripted {
    Succeed,
    Unavailable,
    PermissionDenied,
}

/// A scripted, hardware-free collector.
pub struct Synthetic {
    device_group: String,
    counter: u64,
    counter_step: u64,
    joules_per_unit: f64,
    counter_width: Option<u32>,
    kind: MetricKind,
    process_metric: f64,
    total_metric: f64,
    process_step: f64,
    active_step: f64,
    script: VecDeque<Scripted>,
    samples: Arc<AtomicU64>,
}

impl Synthetic {
    /// A collector that gains 1000 counter units (1 J at 1 mJ/unit) per
    /// sample, with the monitored process holding a quarter of the active
    /// utilization.
    pub fn new(device_group: impl Into<String>) -> Self {
        Self {
            device_group: device_group.into(),
            counter: 0,
            counter_step: 1000,
            joules_per_unit: 1e-3,
            counter_width: Some(32),
            kind: MetricKind::Cumulative,
            process_metric: 0.0,
            total_metric: 0.0,
            process_step: 0.25,
            active_step: 1.0,
            script: VecDeque::new(),
            samples: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Counter units gained per sample.
    pub fn with_counter_step(mut self, step: u64) -> Self {
        self.counter_step = step;
        self
    }

    /// Starting counter value — park it near the wrap modulus to exercise
    /// wraparound handling.
    pub fn with_counter_start(mut self, counter: u64) -> Self {
        self.counter = counter;
        self
    }

    pub fn with_counter_width(mut self, width: Option<u32>) -> Self {
        self.counter_width = width;
        self
    }

    /// Cumulative utilization growth per sample for the monitored process
    /// and for the active total.
    pub fn with_shares(mut self, process_step: f64, active_step: f64) -> Self {
        self.kind = MetricKind::Cumulative;
        self.process_step = process_step;
        self.active_step = active_step;
        self
    }

    /// Fixed gauge utilization reported by every sample.
    pub fn with_gauge_shares(mut self, process_metric: f64, total_metric: f64) -> Self {
        self.kind = MetricKind::Gauge;
        self.process_metric = process_metric;
        self.total_metric = total_metric;
        self
    }

    /// Queue `n` successful samples ahead of whatever is scripted next.
    pub fn succeed_next(mut self, n: usize) -> Self {
        self.script.extend(std::iter::repeat_n(Scripted::Succeed, n));
        self
    }

    /// Queue `n` `Unavailable` failures.
    pub fn fail_next(mut self, n: usize) -> Self {
        self.script
            .extend(std::iter::repeat_n(Scripted::Unavailable, n));
        self
    }

    /// Queue one `PermissionDenied` failure.
    pub fn deny_permission_next(mut self) -> Self {
        self.script.push_back(Scripted::PermissionDenied);
        self
    }

    /// Shared count of successful samples; keeps counting after the
    /// collector has been moved into a session, which lets tests observe
    /// whether the sampler is still alive.
    pub fn sample_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.samples)
    }

    pub fn device_group(&self) -> &str {
        &self.device_group
    }

    pub fn is_available(&self) -> bool {
        true
    }

    pub fn sample(
        &mut self,
        pid: u32,
    ) -> Result<(EnergyReading, UtilizationReading), CollectorError> {
        match self.script.pop_front() {
            Some(Scripted::Unavailable) => {
                return Err(CollectorError::Unavailable(
                    "scripted unavailability".to_string(),
                ));
            }
            Some(Scripted::PermissionDenied) => {
                return Err(CollectorError::PermissionDenied(
                    "scripted denial".to_string(),
                ));
            }
            Some(Scripted::Succeed) | None => {}
        }

        let timestamp_ms = clock::monotonic_ms();
        self.counter = advance(self.counter, self.counter_step, self.counter_width);
        if self.kind == MetricKind::Cumulative {
            self.process_metric += self.process_step;
            self.total_metric += self.active_step;
        }
        self.samples.fetch_add(1, Ordering::Relaxed);

        Ok((
            EnergyReading {
                device_group: self.device_group.clone(),
                timestamp_ms,
                counter: self.counter,
                joules_per_unit: self.joules_per_unit,
                counter_width: self.counter_width,
            },
            UtilizationReading {
                device_group: self.device_group.clone(),
                timestamp_ms,
                pid,
                process_metric: self.process_metric,
                total_metric: self.total_metric,
                kind: self.kind,
            },
        ))
    }
}

/// Advance a counter within its wrap modulus.
fn advance(counter: u64, step: u64, width: Option<u32>) -> u64 {
    match width {
        Some(w) if w < 64 => {
            let modulus = 1u128 << w;
            ((counter as u128 + step as u128) % modulus) as u64
        }
        _ => counter.wrapping_add(step),
    }
}
