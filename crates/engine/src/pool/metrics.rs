//! Pool metrics
//!
//! Counters are lock-free atomics; gauges are read under the pool lock
//! when a snapshot is taken.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use super::Lifecycle;
use crate::handle::TaskState;

#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    rejected: AtomicU64,
    dropped: AtomicU64,
}

impl PoolCounters {
    pub(crate) fn submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the terminal state of a task the pool handled
    pub(crate) fn finished(&self, state: TaskState) {
        let counter = match state {
            TaskState::Completed => &self.completed,
            TaskState::Failed => &self.failed,
            TaskState::Cancelled => &self.cancelled,
            TaskState::Pending | TaskState::Running => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Live gauges captured under the pool lock
#[derive(Debug, Clone, Copy)]
pub(crate) struct Gauges {
    pub lifecycle: Lifecycle,
    pub pool_size: usize,
    pub largest_pool_size: usize,
    pub active_workers: usize,
    pub idle_workers: usize,
    pub queue_depth: usize,
}

/// Read-only snapshot of pool activity for an external collector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolMetrics {
    /// Lifecycle at snapshot time
    pub lifecycle: Lifecycle,
    /// Live worker threads
    pub pool_size: usize,
    /// Most workers ever alive at once
    pub largest_pool_size: usize,
    /// Tasks executing right now
    pub active_workers: usize,
    /// Workers waiting for work
    pub idle_workers: usize,
    /// Tasks waiting in the queue
    pub queue_depth: usize,
    /// Tasks admitted
    pub submitted: u64,
    /// Tasks that finished with a value
    pub completed: u64,
    /// Tasks that finished with an error
    pub failed: u64,
    /// Tasks that ended cancelled, before or during execution
    pub cancelled: u64,
    /// Submissions refused
    pub rejected: u64,
    /// Tasks discarded by a lossy saturation policy
    pub dropped: u64,
}

impl PoolMetrics {
    pub(crate) fn capture(gauges: Gauges, counters: &PoolCounters) -> Self {
        Self {
            lifecycle: gauges.lifecycle,
            pool_size: gauges.pool_size,
            largest_pool_size: gauges.largest_pool_size,
            active_workers: gauges.active_workers,
            idle_workers: gauges.idle_workers,
            queue_depth: gauges.queue_depth,
            submitted: counters.submitted.load(Ordering::Relaxed),
            completed: counters.completed.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            cancelled: counters.cancelled.load(Ordering::Relaxed),
            rejected: counters.rejected.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Tasks that reached any terminal state through the pool
    pub fn finished(&self) -> u64 {
        self.completed + self.failed + self.cancelled
    }
}
