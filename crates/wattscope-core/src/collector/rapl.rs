//! CPU package energy via Linux powercap (RAPL) sysfs zones.
//!
//! Each `intel-rapl:<n>` directory under the powercap root is one package
//! zone exposing a cumulative `energy_uj` counter (microjoules). One
//! collector is created per package zone, so every package is its own
//! device group and wraparound is resolved per counter. The `psys` platform
//! zone is excluded: it overlaps the package zones and would double-count.
//!
//! RAPL literature:
//! <https://www.researchgate.net/publication/322308215_RAPL_in_Action_Experiences_in_Using_RAPL_for_Power_Measurements>

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use crate::clock;
use crate::error::CollectorError;
use crate::procfs::{ProcReader, read_trimmed};

use super::{EnergyReading, MetricKind, UtilizationReading};

/// Default powercap sysfs root on Linux.
pub const DEFAULT_POWERCAP_ROOT: &str = "/sys/class/powercap";

/// One RAPL package zone.
pub struct RaplCpu {
    device_group: String,
    zone_path: PathBuf,
    /// `Some(bits)` only when the zone's wrap modulus is exactly `2^bits`;
    /// powercap advertises the modulus via `max_energy_range_uj`.
    counter_width: Option<u32>,
    proc_reader: ProcReader,
}

impl RaplCpu {
    /// Discover one collector per package zone under the default root.
    pub fn discover_default() -> Vec<RaplCpu> {
        Self::discover(DEFAULT_POWERCAP_ROOT)
    }

    /// Discover one collector per package zone under `root`.
    pub fn discover(root: impl AsRef<Path>) -> Vec<RaplCpu> {
        let root = root.as_ref();
        let mut found = Vec::new();
        let Ok(entries) = fs::read_dir(root) else {
            debug!("powercap root {} not readable", root.display());
            return found;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(dir_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            // Package zones are `intel-rapl:<n>`; a second colon marks a
            // subcomponent (cores/dram/...) nested inside a package.
            if !dir_name.starts_with("intel-rapl") || dir_name.matches(':').count() != 1 {
                continue;
            }
            let Ok(zone_name) = read_trimmed(&path.join("name")) else {
                continue;
            };
            if zone_name == "psys" {
                continue;
            }
            found.push(Self::for_zone(&path, &zone_name));
        }
        found.sort_by(|a, b| a.device_group.cmp(&b.device_group));
        debug!("discovered {} RAPL package zones", found.len());
        found
    }

    fn for_zone(path: &Path, zone_name: &str) -> RaplCpu {
        let counter_width = read_trimmed(&path.join("max_energy_range_uj"))
            .ok()
            .and_then(|raw| raw.parse::<u64>().ok())
            .and_then(|max_range| {
                let modulus = max_range.checked_add(1)?;
                modulus
                    .is_power_of_two()
                    .then(|| modulus.trailing_zeros())
            });
        RaplCpu {
            device_group: format!("cpu:{zone_name}"),
            zone_path: path.to_path_buf(),
            counter_width,
            proc_reader: ProcReader::new(),
        }
    }

    /// Override the procfs root (tests).
    pub fn with_proc_reader(mut self, reader: ProcReader) -> Self {
        self.proc_reader = reader;
        self
    }

    pub fn device_group(&self) -> &str {
        &self.device_group
    }

    pub fn counter_width(&self) -> Option<u32> {
        self.counter_width
    }

    pub fn is_available(&self) -> bool {
        self.zone_path.join("energy_uj").exists()
    }

    pub fn sample(
        &self,
        pid: u32,
    ) -> Result<(EnergyReading, UtilizationReading), CollectorError> {
        let timestamp_ms = clock::monotonic_ms();

        let raw = read_trimmed(&self.zone_path.join("energy_uj"))?;
        let counter: u64 = raw.parse().map_err(|err| {
            CollectorError::Unavailable(format!("malformed energy_uj: {err}"))
        })?;

        let process_metric = self.proc_reader.process_cpu_seconds(pid)?;
        let total_metric = self.proc_reader.system_active_cpu_seconds()?;

        Ok((
            EnergyReading {
                device_group: self.device_group.clone(),
                timestamp_ms,
                counter,
                joules_per_unit: 1e-6,
                counter_width: self.counter_width,
            },
            UtilizationReading {
                device_group: self.device_group.clone(),
                timestamp_ms,
                pid,
                process_metric,
                total_metric,
                kind: MetricKind::Cumulative,
            },
        ))
    }
}
