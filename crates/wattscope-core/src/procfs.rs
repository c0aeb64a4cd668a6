//! Minimal `/proc` readers for CPU-time correlation.
//!
//! The attribution denominator must exclude idle time, so the system-wide
//! metric sums only the *active* columns of `/proc/stat` (idle and iowait
//! are skipped). Both metrics are reported in seconds and accumulate
//! monotonically, which lets the sampler turn consecutive readings into
//! interval shares.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::CollectorError;

/// Read a file and trim it, mapping I/O failures into the collector error
/// taxonomy (permission problems are fatal for a group, everything else is
/// transient).
pub(crate) fn read_trimmed(path: &Path) -> Result<String, CollectorError> {
    match std::fs::read_to_string(path) {
        Ok(raw) => Ok(raw.trim().to_string()),
        Err(err) if err.kind() == ErrorKind::PermissionDenied => Err(
            CollectorError::PermissionDenied(format!("{}: {err}", path.display())),
        ),
        Err(err) => Err(CollectorError::Unavailable(format!(
            "{}: {err}",
            path.display()
        ))),
    }
}

/// Jiffies per second, from the kernel's `USER_HZ`.
fn clock_ticks_per_second() -> f64 {
    // SAFETY: sysconf takes no pointers and only returns a value.
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 { ticks as f64 } else { 100.0 }
}

/// CPU-time reader over a procfs root (configurable for tests).
#[derive(Debug, Clone)]
pub struct ProcReader {
    root: PathBuf,
}

impl Default for ProcReader {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcReader {
    pub fn new() -> Self {
        Self::with_root("/proc")
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Cumulative CPU seconds (user + system) consumed by `pid`.
    pub fn process_cpu_seconds(&self, pid: u32) -> Result<f64, CollectorError> {
        let path = self.root.join(pid.to_string()).join("stat");
        let raw = read_trimmed(&path)?;
        // comm may contain spaces and parentheses; fields resume after the
        // last ')'.
        let (_, rest) = raw.rsplit_once(')').ok_or_else(|| {
            CollectorError::Unavailable(format!("malformed stat for pid {pid}"))
        })?;
        let fields: Vec<&str> = rest.split_whitespace().collect();
        let utime = parse_jiffies(&fields, 11, pid)?;
        let stime = parse_jiffies(&fields, 12, pid)?;
        Ok((utime + stime) as f64 / clock_ticks_per_second())
    }

    /// Cumulative *active* CPU seconds across all CPUs: user + nice +
    /// system + irq + softirq + steal. Idle and iowait are excluded.
    pub fn system_active_cpu_seconds(&self) -> Result<f64, CollectorError> {
        let raw = read_trimmed(&self.root.join("stat"))?;
        let line = raw
            .lines()
            .find(|l| l.starts_with("cpu "))
            .ok_or_else(|| CollectorError::Unavailable("no cpu line in stat".to_string()))?;

        let mut active: u64 = 0;
        for (i, field) in line.split_whitespace().skip(1).enumerate() {
            // columns: user nice system idle iowait irq softirq steal ...
            if i == 3 || i == 4 {
                continue;
            }
            if i > 7 {
                break;
            }
            active += field.parse::<u64>().map_err(|err| {
                CollectorError::Unavailable(format!("malformed stat column {i}: {err}"))
            })?;
        }
        Ok(active as f64 / clock_ticks_per_second())
    }
}

fn parse_jiffies(fields: &[&str], index: usize, pid: u32) -> Result<u64, CollectorError> {
    fields
        .get(index)
        .and_then(|f| f.parse::<u64>().ok())
        .ok_or_else(|| {
            CollectorError::Unavailable(format!(
                "stat field {index} missing or malformed for pid {pid}"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    /// 51 jiffies of utime, 49 of stime (fields 14 and 15 of proc(5)).
    const PID_STAT: &str = "1234 (some (weird) name) S 1 1234 1234 0 -1 4194304 \
                            100 0 0 0 51 49 0 0 20 0 1 0 100 1000000 100 \
                            18446744073709551615 1 1 0 0 0 0 0 0 0 0 0 0 17 0 0 0";

    const SYSTEM_STAT: &str = "cpu  100 20 30 9000 500 10 20 5 0 0\n\
                               cpu0 50 10 15 4500 250 5 10 2 0 0\n\
                               intr 12345\n";

    fn fake_proc() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("1234")).unwrap();
        fs::write(dir.path().join("1234").join("stat"), PID_STAT).unwrap();
        fs::write(dir.path().join("stat"), SYSTEM_STAT).unwrap();
        dir
    }

    #[test]
    fn reads_process_cpu_seconds() {
        let dir = fake_proc();
        let reader = ProcReader::with_root(dir.path());
        let seconds = reader.process_cpu_seconds(1234).unwrap();
        let expected = 100.0 / clock_ticks_per_second();
        assert!((seconds - expected).abs() < 1e-9);
    }

    #[test]
    fn reads_system_active_seconds_excluding_idle_and_iowait() {
        let dir = fake_proc();
        let reader = ProcReader::with_root(dir.path());
        let seconds = reader.system_active_cpu_seconds().unwrap();
        // user 100 + nice 20 + system 30 + irq 10 + softirq 20 + steal 5
        let expected = 185.0 / clock_ticks_per_second();
        assert!((seconds - expected).abs() < 1e-9);
    }

    #[test]
    fn missing_pid_is_unavailable() {
        let dir = fake_proc();
        let reader = ProcReader::with_root(dir.path());
        let err = reader.process_cpu_seconds(9).unwrap_err();
        assert!(matches!(err, CollectorError::Unavailable(_)));
    }

    #[test]
    fn malformed_stat_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("7")).unwrap();
        fs::write(dir.path().join("7").join("stat"), "garbage with no paren").unwrap();
        let reader = ProcReader::with_root(dir.path());
        assert!(matches!(
            reader.process_cpu_seconds(7),
            Err(CollectorError::Unavailable(_))
        ));
    }
}
