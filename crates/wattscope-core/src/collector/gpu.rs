//! Discrete GPU energy via a vendor management counter tree.
//!
//! The vendor's management API (register layout, library calls) is outside
//! this crate; what the core consumes is an exported counter directory, one
//! subdirectory per device:
//!
//! ```text
//! <root>/gpu0/energy_mj      cumulative energy counter, millijoules
//! <root>/gpu0/procs/<pid>    device memory bytes held by each active process
//! <root>/gpu1/...
//! ```
//!
//! Per-process device memory is the utilization proxy: the monitored
//! process's share is its own allocation, and the active total is the sum
//! over every process currently resident on the device — a process with no
//! entry simply is not active there. Both are gauges, so the newest reading
//! describes the interval.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use crate::clock;
use crate::error::CollectorError;
use crate::procfs::read_trimmed;

use super::{EnergyReading, MetricKind, UtilizationReading};

/// One discrete GPU.
pub struct GpuVendor {
    device_group: String,
    dir: PathBuf,
}

impl GpuVendor {
    /// Discover one collector per `gpu<n>` subdirectory of `root` that
    /// exposes an energy counter.
    pub fn discover(root: impl AsRef<Path>) -> Vec<GpuVendor> {
        let root = root.as_ref();
        let mut found = Vec::new();
        let Ok(entries) = fs::read_dir(root) else {
            debug!("vendor counter root {} not readable", root.display());
            return found;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(dir_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !dir_name.starts_with("gpu") || !path.join("energy_mj").exists() {
                continue;
            }
            found.push(GpuVendor {
                device_group: format!("gpu:{}", &dir_name[3..]),
                dir: path,
            });
        }
        found.sort_by(|a, b| a.device_group.cmp(&b.device_group));
        debug!("discovered {} GPU counter trees", found.len());
        found
    }

    pub fn device_group(&self) -> &str {
        &self.device_group
    }

    pub fn is_available(&self) -> bool {
        self.dir.join("energy_mj").exists()
    }

    pub fn sample(
        &self,
        pid: u32,
    ) -> Result<(EnergyReading, UtilizationReading), CollectorError> {
        let timestamp_ms = clock::monotonic_ms();

        let raw = read_trimmed(&self.dir.join("energy_mj"))?;
        let counter: u64 = raw.parse().map_err(|err| {
            CollectorError::Unavailable(format!("malformed energy_mj: {err}"))
        })?;

        let (process_metric, total_metric) = self.read_memory_shares(pid)?;

        Ok((
            EnergyReading {
                device_group: self.device_group.clone(),
                timestamp_ms,
                counter,
                joules_per_unit: 1e-3,
                // Vendor counters do not advertise a wrap modulus; deltas
                // fall back to clamp-and-flag.
                counter_width: None,
            },
            UtilizationReading {
                device_group: self.device_group.clone(),
                timestamp_ms,
                pid,
                process_metric,
                total_metric,
                kind: MetricKind::Gauge,
            },
        ))
    }

    /// Monitored process's device memory and the active total across all
    /// resident processes. A missing per-pid entry means the process holds
    /// nothing on this device — that is idle, not an error.
    fn read_memory_shares(&self, pid: u32) -> Result<(f64, f64), CollectorError> {
        let procs = self.dir.join("procs");
        let entries = fs::read_dir(&procs).map_err(|err| {
            CollectorError::Unavailable(format!("{}: {err}", procs.display()))
        })?;

        let mut process_bytes = 0.0;
        let mut total_bytes = 0.0;
        for entry in entries.flatten() {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let Ok(bytes) = read_trimmed(&entry.path())?.parse::<f64>() else {
                continue;
            };
            total_bytes += bytes;
            if name.parse::<u32>() == Ok(pid) {
                process_bytes = bytes;
            }
        }
        Ok((process_bytes, total_bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_gpu(root: &Path, dir: &str, energy_mj: &str, procs: &[(u32, u64)]) {
        let gpu = root.join(dir);
        fs::create_dir_all(gpu.join("procs")).unwrap();
        fs::write(gpu.join("energy_mj"), energy_mj).unwrap();
        for (pid, bytes) in procs {
            fs::write(gpu.join("procs").join(pid.to_string()), bytes.to_string()).unwrap();
        }
    }

    #[test]
    fn discovers_gpu_directories() {
        let dir = tempfile::tempdir().unwrap();
        write_gpu(dir.path(), "gpu0", "1000", &[]);
        write_gpu(dir.path(), "gpu1", "2000", &[]);
        fs::create_dir_all(dir.path().join("not-a-gpu")).unwrap();

        let collectors = GpuVendor::discover(dir.path());
        let groups: Vec<&str> = collectors.iter().map(|c| c.device_group()).collect();
        assert_eq!(groups, vec!["gpu:0", "gpu:1"]);
    }

    #[test]
    fn sample_reports_process_and_active_memory() {
        let dir = tempfile::tempdir().unwrap();
        write_gpu(
            dir.path(),
            "gpu0",
            "123456",
            &[(42, 1_000_000), (7, 3_000_000)],
        );
        let collector = GpuVendor::discover(dir.path()).into_iter().next().unwrap();

        let (energy, utilization) = collector.sample(42).unwrap();
        assert_eq!(energy.counter, 123_456);
        assert_eq!(energy.joules_per_unit, 1e-3);
        assert_eq!(energy.counter_width, None);
        assert_eq!(utilization.kind, MetricKind::Gauge);
        assert_eq!(utilization.process_metric, 1_000_000.0);
        assert_eq!(utilization.total_metric, 4_000_000.0);
    }

    #[test]
    fn absent_process_is_idle_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        write_gpu(dir.path(), "gpu0", "1", &[(7, 500)]);
        let collector = GpuVendor::discover(dir.path()).into_iter().next().unwrap();

        let (_, utilization) = collector.sample(42).unwrap();
        assert_eq!(utilization.process_metric, 0.0);
        assert_eq!(utilization.total_metric, 500.0);
    }

    #[test]
    fn empty_device_is_a_zero_active_interval() {
        let dir = tempfile::tempdir().unwrap();
        write_gpu(dir.path(), "gpu0", "1", &[]);
        let collector = GpuVendor::discover(dir.path()).into_iter().next().unwrap();

        let (_, utilization) = collector.sample(42).unwrap();
        assert_eq!(utilization.process_metric, 0.0);
        assert_eq!(utilization.total_metric, 0.0);
    }

    #[test]
    fn missing_counter_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        write_gpu(dir.path(), "gpu0", "1", &[]);
        let collector = GpuVendor::discover(dir.path()).into_iter().next().unwrap();
        fs::remove_file(dir.path().join("gpu0").join("energy_mj")).unwrap();

        assert!(!collector.is_available());
        assert!(matches!(
            collector.sample(42),
            Err(CollectorError::Unavailable(_))
        ));
    }
}
