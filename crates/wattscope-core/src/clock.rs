//! Monotonic millisecond clock.
//!
//! All trace timestamps and retention arithmetic use milliseconds elapsed
//! since an arbitrary per-process epoch (the first call in this process).
//! Unlike wall-clock time, this never jumps backwards.

use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Milliseconds since the process-local epoch.
pub fn monotonic_ms() -> i64 {
    EPOCH.get_or_init(Instant::now).elapsed().as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_ms_never_decreases() {
        let a = monotonic_ms();
        let b = monotonic_ms();
        assert!(b >= a);
    }
}
