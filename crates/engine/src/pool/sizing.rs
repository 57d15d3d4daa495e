//! Pool sizing helpers
//!
//! Guidance only: the pool never resizes itself. Feed the result into
//! [`PoolConfig`](super::PoolConfig) or the live setters.

use std::time::Duration;

/// Number of cores available to this process (at least 1)
pub fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1)
}

/// Worker count for CPU-bound work: cores + 1
pub fn cpu_bound() -> usize {
    available_cores() + 1
}

/// Worker count for mixed CPU/wait work
///
/// `cores × target_utilization × (1 + wait / compute)`, rounded up and
/// never below 1. `target_utilization` is clamped to `0.0..=1.0`.
pub fn mixed(cores: usize, target_utilization: f64, wait: Duration, compute: Duration) -> usize {
    let utilization = target_utilization.clamp(0.0, 1.0);
    let compute = compute.as_secs_f64();
    let ratio = if compute > 0.0 {
        wait.as_secs_f64() / compute
    } else {
        0.0
    };
    let workers = (cores as f64 * utilization * (1.0 + ratio)).ceil();
    (workers as usize).max(1)
}
