//! Bounded worker pool
//!
//! This module provides:
//! - [`WorkerPool`] - worker threads pulling from one task queue
//! - [`PoolConfig`] - sizing, queue shape and saturation policy
//! - [`PoolHooks`] - pre/post-execution callbacks
//! - [`PoolMetrics`] - read-only activity snapshot
//! - [`sizing`] - worker-count formulas
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        WorkerPool                            │
//! │                                                              │
//! │  submit() ──► core workers? ──► queue room? ──► grow to max? │
//! │                   │                 │               │        │
//! │                   ▼                 ▼               ▼        │
//! │             spawn worker       enqueue task    spawn worker  │
//! │                                                     │        │
//! │                                          saturated  ▼        │
//! │                     Reject | Drop | DropOldest | RunInline | │
//! │                     Block                                    │
//! │                                                              │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │ Workers [1] [2] ... [N ≤ max_size]                   │    │
//! │  │ (pull from queue, idle past keep_alive -> retire)    │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Lifecycle: `Running --drain()--> Draining --last task done--> Terminated`
//! and `Running --terminate_now()--> Draining --workers exit--> Terminated`.
//! Only the pool lock guards the queue and worker counters, and it is never
//! held while task bodies, hooks or completion listeners run.

mod config;
mod hooks;
mod metrics;
mod queue;
pub mod sizing;
mod worker;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

pub use config::{PoolConfig, QueueOrder, SaturationPolicy};
pub use hooks::{AfterExecute, BeforeExecute, OnTerminated, PoolHooks};
pub use metrics::PoolMetrics;

use self::metrics::{Gauges, PoolCounters};
use self::queue::TaskQueue;
use self::worker::Runner;
use crate::error::{ConfigError, RejectedSubmission};
use crate::handle::ResultHandle;
use crate::task::{deadline_after, CancellationToken, PendingTask, Task, TaskContext, TaskId};

/// Pool lifecycle; transitions only move forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    /// Accepting and running tasks
    Running,
    /// No longer accepting tasks; finishing (or abandoning) the rest
    Draining,
    /// All workers have exited
    Terminated,
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Draining => write!(f, "draining"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// Mutable pool state, guarded by `Shared::state`
struct PoolState {
    lifecycle: Lifecycle,
    /// Abrupt termination: workers exit without taking queued work
    stop: bool,
    queue: TaskQueue,
    capacity: Option<usize>,
    policy: SaturationPolicy,
    core_size: usize,
    max_size: usize,
    keep_alive: Duration,
    allow_core_timeout: bool,
    /// Live workers, including reserved ones whose thread is starting
    workers: usize,
    /// Workers blocked waiting for work
    idle: usize,
    /// Tasks executing right now
    active: usize,
    /// Tasks handed to pool workers and not yet finished
    busy: usize,
    largest: usize,
    next_worker_id: u64,
    running: HashMap<TaskId, CancellationToken>,
}

impl PoolState {
    /// Whether the queue may take another task
    ///
    /// A bounded capacity limits the tasks in flight: waiting in the queue
    /// plus held by pool workers.
    fn has_room(&self) -> bool {
        match self.capacity {
            None => true,
            Some(0) => self.idle > self.queue.len(),
            Some(capacity) => self.queue.len() + self.busy < capacity,
        }
    }

    fn reserve_worker(&mut self) -> u64 {
        self.workers += 1;
        self.largest = self.largest.max(self.workers);
        self.next_worker_id += 1;
        self.next_worker_id
    }

    fn gauges(&self) -> Gauges {
        Gauges {
            lifecycle: self.lifecycle,
            pool_size: self.workers,
            largest_pool_size: self.largest,
            active_workers: self.active,
            idle_workers: self.idle,
            queue_depth: self.queue.len(),
        }
    }
}

/// Result of the locked admission decision
enum Admission {
    Spawn { task: PendingTask, worker_id: u64 },
    Queued { helper: Option<u64> },
    Inline(PendingTask),
    Dropped { discarded: PendingTask, admitted: bool },
    Rejected { reason: RejectedSubmission, task: PendingTask },
}

/// What a worker should do next
enum Next {
    Run(PendingTask),
    Exit { terminated: bool },
}

/// State shared between the pool handle and its worker threads
struct Shared {
    name: String,
    state: Mutex<PoolState>,
    work_available: Condvar,
    space_available: Condvar,
    terminated: Condvar,
    counters: PoolCounters,
    hooks: PoolHooks,
    broken: AtomicBool,
}

impl Shared {
    fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }

    /// Admit a bound task; runs the decision under the lock, effects outside it
    fn admit(
        self: &Arc<Self>,
        task: PendingTask,
        deadline: Option<Instant>,
    ) -> Result<(), RejectedSubmission> {
        match self.decide(task, deadline) {
            Admission::Spawn { task, worker_id } => {
                let task_id = task.id();
                self.start_worker(worker_id, Some(task)).inspect_err(|_| {
                    self.counters.rejected();
                })?;
                self.counters.submitted();
                debug!(pool = %self.name, %task_id, worker_id, "task handed to new worker");
                Ok(())
            }
            Admission::Queued { helper } => {
                self.counters.submitted();
                if let Some(worker_id) = helper {
                    if let Err(e) = self.start_worker(worker_id, None) {
                        warn!(pool = %self.name, error = %e, "failed to start worker for queued task");
                    }
                }
                Ok(())
            }
            Admission::Inline(task) => {
                self.counters.submitted();
                debug!(pool = %self.name, task_id = %task.id(), "saturated; running task on caller thread");
                worker::run_task(self, task, Runner::Caller);
                Ok(())
            }
            Admission::Dropped {
                discarded,
                admitted,
            } => {
                if admitted {
                    self.counters.submitted();
                }
                self.counters.dropped();
                debug!(pool = %self.name, task_id = %discarded.id(), "saturated; task dropped");
                drop(discarded);
                Ok(())
            }
            Admission::Rejected { reason, task } => {
                self.counters.rejected();
                warn!(pool = %self.name, task_id = %task.id(), %reason, "task rejected");
                drop(task);
                Err(reason)
            }
        }
    }

    fn decide(&self, task: PendingTask, deadline: Option<Instant>) -> Admission {
        let mut state = self.state.lock();
        loop {
            if self.is_broken() {
                return Admission::Rejected {
                    reason: RejectedSubmission::PoolBroken,
                    task,
                };
            }
            if state.lifecycle != Lifecycle::Running {
                return Admission::Rejected {
                    reason: RejectedSubmission::PoolClosed,
                    task,
                };
            }

            if state.workers < state.core_size {
                let worker_id = state.reserve_worker();
                state.busy += 1;
                return Admission::Spawn { task, worker_id };
            }

            if state.has_room() {
                state.queue.push(task);
                self.work_available.notify_one();
                let helper = (state.workers == 0).then(|| state.reserve_worker());
                return Admission::Queued { helper };
            }

            if state.workers < state.max_size {
                let worker_id = state.reserve_worker();
                state.busy += 1;
                return Admission::Spawn { task, worker_id };
            }

            match state.policy {
                SaturationPolicy::Reject => {
                    return Admission::Rejected {
                        reason: RejectedSubmission::Saturated {
                            capacity: state.capacity.unwrap_or(0),
                        },
                        task,
                    };
                }
                SaturationPolicy::Drop => {
                    return Admission::Dropped {
                        discarded: task,
                        admitted: false,
                    };
                }
                SaturationPolicy::DropOldest => {
                    return match state.queue.pop_oldest() {
                        Some(oldest) => {
                            state.queue.push(task);
                            self.work_available.notify_one();
                            Admission::Dropped {
                                discarded: oldest,
                                admitted: true,
                            }
                        }
                        // Direct hand-off keeps nothing queued to discard.
                        None => Admission::Dropped {
                            discarded: task,
                            admitted: false,
                        },
                    };
                }
                SaturationPolicy::RunInline => return Admission::Inline(task),
                SaturationPolicy::Block => match deadline {
                    Some(deadline) => {
                        if Instant::now() >= deadline {
                            return Admission::Rejected {
                                reason: RejectedSubmission::TimedOut,
                                task,
                            };
                        }
                        self.space_available.wait_until(&mut state, deadline);
                    }
                    None => self.space_available.wait(&mut state),
                },
            }
        }
    }

    /// Start a worker whose slot was reserved under the lock
    fn start_worker(
        self: &Arc<Self>,
        worker_id: u64,
        first: Option<PendingTask>,
    ) -> Result<(), RejectedSubmission> {
        let carries_task = first.is_some();
        match worker::spawn(self, worker_id, first) {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(pool = %self.name, worker_id, error = %e, "failed to spawn worker thread");
                let (orphans, terminated) = {
                    let mut state = self.state.lock();
                    state.workers -= 1;
                    if carries_task {
                        state.busy -= 1;
                    }
                    let orphans = if state.workers == 0 && state.lifecycle != Lifecycle::Running {
                        state.queue.drain()
                    } else {
                        Vec::new()
                    };
                    self.space_available.notify_all();
                    (orphans, self.try_terminate(&mut state))
                };
                drop(orphans);
                if terminated {
                    self.fire_terminated();
                }
                Err(RejectedSubmission::WorkerSpawn(e.to_string()))
            }
        }
    }

    /// Block a worker until there is a task for it or it should exit
    fn next_task(&self) -> Next {
        let mut state = self.state.lock();
        let mut timed_out = false;
        loop {
            let closing = state.lifecycle != Lifecycle::Running && state.queue.is_empty();
            if state.stop || self.is_broken() || closing {
                return self.retire(&mut state);
            }
            if state.workers > state.max_size && (state.workers > 1 || state.queue.is_empty()) {
                return self.retire(&mut state);
            }

            if let Some(task) = state.queue.pop() {
                state.busy += 1;
                self.space_available.notify_one();
                return Next::Run(task);
            }

            let timed = state.allow_core_timeout || state.workers > state.core_size;
            if timed && timed_out {
                return self.retire(&mut state);
            }

            state.idle += 1;
            // An idle worker is room for a direct hand-off.
            self.space_available.notify_one();
            if timed {
                let keep_alive = state.keep_alive;
                timed_out = self
                    .work_available
                    .wait_for(&mut state, keep_alive)
                    .timed_out();
            } else {
                self.work_available.wait(&mut state);
            }
            state.idle -= 1;
        }
    }

    fn retire(&self, state: &mut PoolState) -> Next {
        state.workers -= 1;
        self.space_available.notify_all();
        Next::Exit {
            terminated: self.try_terminate(state),
        }
    }

    /// Move `Draining -> Terminated` once no worker and no queued task remain
    fn try_terminate(&self, state: &mut PoolState) -> bool {
        if state.lifecycle == Lifecycle::Draining && state.workers == 0 && state.queue.is_empty() {
            state.lifecycle = Lifecycle::Terminated;
            self.terminated.notify_all();
            self.space_available.notify_all();
            info!(pool = %self.name, "Worker pool terminated");
            true
        } else {
            false
        }
    }

    fn fire_terminated(&self) {
        if let Some(hook) = &self.hooks.on_terminated {
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| hook())).is_err() {
                warn!(pool = %self.name, "on_terminated hook panicked");
            }
        }
    }

    /// A worker's own loop failed: the pool can no longer be trusted
    ///
    /// Admission stops, the queue is abandoned and running tasks are
    /// interrupted. The pool stays `Draining` until the remaining workers
    /// have finished their tasks and exited. `retiring` is set when the
    /// caller is the failed worker leaving the pool.
    fn mark_broken(&self, reason: &str, retiring: bool) {
        error!(pool = %self.name, %reason, "worker loop panicked; pool is broken");
        self.broken.store(true, Ordering::Release);

        let (orphans, tokens, terminated) = {
            let mut state = self.state.lock();
            if retiring {
                state.workers -= 1;
            }
            if state.lifecycle == Lifecycle::Running {
                state.lifecycle = Lifecycle::Draining;
            }
            state.stop = true;
            let orphans = state.queue.drain();
            let tokens: Vec<_> = state.running.values().cloned().collect();
            self.work_available.notify_all();
            self.space_available.notify_all();
            (orphans, tokens, self.try_terminate(&mut state))
        };

        for token in &tokens {
            token.cancel();
        }
        drop(orphans);
        if terminated {
            self.fire_terminated();
        }
    }
}

/// Bounded concurrent task-execution pool
///
/// Construct once and pass by reference (or `Arc`) to every consumer; the
/// owner decides when to [`drain`](Self::drain) or
/// [`terminate_now`](Self::terminate_now). Dropping the pool starts a
/// non-blocking drain.
///
/// A task must not wait on its own pool's results while every worker is
/// busy doing the same; that is the one way to deadlock it.
///
/// # Example
///
/// ```
/// use workyard_engine::{PoolConfig, SaturationPolicy, Task, WorkerPool};
///
/// let pool = WorkerPool::new(
///     PoolConfig::new(1, 4)
///         .with_queue_capacity(16)
///         .with_saturation_policy(SaturationPolicy::Block),
/// )
/// .unwrap();
///
/// let handles: Vec<_> = (0..8)
///     .map(|i| pool.submit(Task::new(move |_| Ok(i * i))).unwrap())
///     .collect();
/// let total: i32 = handles.iter().map(|h| h.get().unwrap()).sum();
/// assert_eq!(total, 140);
///
/// pool.drain();
/// assert!(pool.is_terminated());
/// ```
pub struct WorkerPool {
    shared: Arc<Shared>,
}

impl WorkerPool {
    /// Create a pool
    pub fn new(config: PoolConfig) -> Result<Self, ConfigError> {
        Self::with_hooks(config, PoolHooks::default())
    }

    /// Create a pool with execution hooks
    pub fn with_hooks(config: PoolConfig, hooks: PoolHooks) -> Result<Self, ConfigError> {
        config.validate()?;

        info!(
            pool = %config.name,
            core_size = config.core_size,
            max_size = config.max_size,
            queue_capacity = ?config.queue_capacity,
            policy = %config.saturation_policy,
            "Starting worker pool"
        );

        let state = PoolState {
            lifecycle: Lifecycle::Running,
            stop: false,
            queue: TaskQueue::new(config.queue_order),
            capacity: config.queue_capacity,
            policy: config.saturation_policy,
            core_size: config.core_size,
            max_size: config.max_size,
            keep_alive: config.keep_alive,
            allow_core_timeout: config.allow_core_timeout,
            workers: 0,
            idle: 0,
            active: 0,
            busy: 0,
            largest: 0,
            next_worker_id: 0,
            running: HashMap::new(),
        };

        let pool = Self {
            shared: Arc::new(Shared {
                name: config.name.clone(),
                state: Mutex::new(state),
                work_available: Condvar::new(),
                space_available: Condvar::new(),
                terminated: Condvar::new(),
                counters: PoolCounters::default(),
                hooks,
                broken: AtomicBool::new(false),
            }),
        };

        if config.prestart_core {
            pool.prestart_core_threads();
        }
        Ok(pool)
    }

    /// Pool name
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Submit a task
    ///
    /// Under the `Block` policy this waits for space without a deadline;
    /// see [`submit_timeout`](Self::submit_timeout).
    pub fn submit<V>(&self, task: Task<V>) -> Result<ResultHandle<V>, RejectedSubmission>
    where
        V: Send + Sync + 'static,
    {
        let (pending, handle) = task.bind();
        self.shared.admit(pending, None)?;
        Ok(handle)
    }

    /// Submit a closure as a task
    pub fn submit_fn<V, F>(&self, work: F) -> Result<ResultHandle<V>, RejectedSubmission>
    where
        V: Send + Sync + 'static,
        F: FnOnce(&TaskContext) -> anyhow::Result<V> + Send + 'static,
    {
        self.submit(Task::new(work))
    }

    /// Submit a task, waiting at most `timeout` for space under the `Block` policy
    pub fn submit_timeout<V>(
        &self,
        task: Task<V>,
        timeout: Duration,
    ) -> Result<ResultHandle<V>, RejectedSubmission>
    where
        V: Send + Sync + 'static,
    {
        let (pending, handle) = task.bind();
        self.shared.admit(pending, deadline_after(timeout))?;
        Ok(handle)
    }

    /// Submit a task that was returned by [`terminate_now`](Self::terminate_now)
    ///
    /// Its original result handle keeps tracking it. On rejection the task
    /// is dropped and its handle resolves to `Cancelled`.
    pub fn resubmit(&self, task: PendingTask) -> Result<(), RejectedSubmission> {
        self.shared.admit(task, None)
    }

    /// Submit every task and wait until all are terminal
    ///
    /// If a submission is rejected, the tasks already submitted are
    /// cancelled and the rejection is returned.
    pub fn invoke_all<V, I>(&self, tasks: I) -> Result<Vec<ResultHandle<V>>, RejectedSubmission>
    where
        V: Send + Sync + 'static,
        I: IntoIterator<Item = Task<V>>,
    {
        let mut handles = Vec::new();
        for task in tasks {
            match self.submit(task) {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    for handle in &handles {
                        handle.cancel(true);
                    }
                    return Err(err);
                }
            }
        }
        for handle in &handles {
            handle.wait();
        }
        Ok(handles)
    }

    /// Stop accepting tasks and let queued and running ones finish (non-blocking)
    #[instrument(skip(self), fields(pool = %self.shared.name))]
    pub fn shutdown(&self) {
        let (helper, terminated) = {
            let mut state = self.shared.state.lock();
            if state.lifecycle != Lifecycle::Running {
                return;
            }
            state.lifecycle = Lifecycle::Draining;
            info!(
                queued = state.queue.len(),
                active = state.active,
                "Draining worker pool"
            );
            self.shared.work_available.notify_all();
            self.shared.space_available.notify_all();
            // Queued work with no worker left (e.g. a failed spawn) still needs one.
            let helper = (state.workers == 0 && !state.queue.is_empty())
                .then(|| state.reserve_worker());
            (helper, self.shared.try_terminate(&mut state))
        };

        if let Some(worker_id) = helper {
            let _ = self.shared.start_worker(worker_id, None);
        }
        if terminated {
            self.shared.fire_terminated();
        }
    }

    /// Stop accepting tasks, finish everything already accepted, and wait
    /// for `Terminated`
    ///
    /// Must not be called from one of this pool's own workers.
    pub fn drain(&self) {
        self.shutdown();
        let mut state = self.shared.state.lock();
        while state.lifecycle != Lifecycle::Terminated {
            self.shared.terminated.wait(&mut state);
        }
    }

    /// Stop accepting tasks, signal running tasks to cancel, and return the
    /// queued tasks that never started
    ///
    /// Running tasks are not returned; their outcome is observed through
    /// their handles.
    #[instrument(skip(self), fields(pool = %self.shared.name))]
    pub fn terminate_now(&self) -> Vec<PendingTask> {
        let (tasks, tokens, terminated) = {
            let mut state = self.shared.state.lock();
            if state.lifecycle == Lifecycle::Running {
                state.lifecycle = Lifecycle::Draining;
            }
            state.stop = true;
            let tasks = state.queue.drain();
            let tokens: Vec<_> = state.running.values().cloned().collect();
            self.shared.work_available.notify_all();
            self.shared.space_available.notify_all();
            (tasks, tokens, self.shared.try_terminate(&mut state))
        };

        info!(
            returned = tasks.len(),
            interrupted = tokens.len(),
            "Terminating worker pool"
        );
        for token in &tokens {
            token.cancel();
        }
        if terminated {
            self.shared.fire_terminated();
        }
        tasks
    }

    /// Wait until the pool is `Terminated` or `timeout` elapses
    ///
    /// Returns true if terminated.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = deadline_after(timeout);
        let mut state = self.shared.state.lock();
        while state.lifecycle != Lifecycle::Terminated {
            let Some(deadline) = deadline else {
                self.shared.terminated.wait(&mut state);
                continue;
            };
            if self
                .shared
                .terminated
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return state.lifecycle == Lifecycle::Terminated;
            }
        }
        true
    }

    /// Current lifecycle
    pub fn lifecycle(&self) -> Lifecycle {
        self.shared.state.lock().lifecycle
    }

    /// True once the pool stopped accepting tasks
    pub fn is_shutdown(&self) -> bool {
        self.lifecycle() != Lifecycle::Running
    }

    /// True once every worker has exited
    pub fn is_terminated(&self) -> bool {
        self.lifecycle() == Lifecycle::Terminated
    }

    /// True if the pool hit an internal defect
    pub fn is_broken(&self) -> bool {
        self.shared.is_broken()
    }

    /// Remove queued tasks whose handles were already cancelled
    ///
    /// Returns how many were removed.
    pub fn purge(&self) -> usize {
        let removed = {
            let mut state = self.shared.state.lock();
            let removed = state.queue.take_cancelled();
            if !removed.is_empty() {
                self.shared.space_available.notify_all();
            }
            removed
        };
        for task in &removed {
            self.shared.counters.finished(task.state());
        }
        removed.len()
    }

    /// Start every core worker now instead of on demand
    ///
    /// Returns how many workers were started.
    pub fn prestart_core_threads(&self) -> usize {
        let ids: Vec<u64> = {
            let mut state = self.shared.state.lock();
            if state.lifecycle != Lifecycle::Running {
                return 0;
            }
            let missing = state.core_size.saturating_sub(state.workers);
            (0..missing).map(|_| state.reserve_worker()).collect()
        };
        ids.into_iter()
            .filter(|id| self.shared.start_worker(*id, None).is_ok())
            .count()
    }

    /// Current core size
    pub fn core_size(&self) -> usize {
        self.shared.state.lock().core_size
    }

    /// Current maximum size
    pub fn max_size(&self) -> usize {
        self.shared.state.lock().max_size
    }

    /// Current keep-alive
    pub fn keep_alive(&self) -> Duration {
        self.shared.state.lock().keep_alive
    }

    /// Configured saturation policy
    pub fn saturation_policy(&self) -> SaturationPolicy {
        self.shared.state.lock().policy
    }

    /// Configured queue capacity
    pub fn queue_capacity(&self) -> Option<usize> {
        self.shared.state.lock().capacity
    }

    /// Change the core size
    ///
    /// Growing starts workers for already-queued work; shrinking lets idle
    /// workers above the new size retire after `keep_alive`.
    pub fn set_core_size(&self, core_size: usize) -> Result<(), ConfigError> {
        let ids: Vec<u64> = {
            let mut state = self.shared.state.lock();
            if core_size > state.max_size {
                return Err(ConfigError::MaxBelowCore {
                    core: core_size,
                    max: state.max_size,
                });
            }
            let previous = state.core_size;
            state.core_size = core_size;
            debug!(pool = %self.shared.name, previous, core_size, "core size changed");

            if core_size < previous {
                self.shared.work_available.notify_all();
                Vec::new()
            } else if state.lifecycle == Lifecycle::Running {
                let wanted = core_size
                    .saturating_sub(state.workers)
                    .min(state.queue.len());
                (0..wanted).map(|_| state.reserve_worker()).collect()
            } else {
                Vec::new()
            }
        };
        for id in ids {
            let _ = self.shared.start_worker(id, None);
        }
        Ok(())
    }

    /// Change the maximum size
    pub fn set_max_size(&self, max_size: usize) -> Result<(), ConfigError> {
        let mut state = self.shared.state.lock();
        if max_size == 0 {
            return Err(ConfigError::ZeroMaxSize);
        }
        if max_size < state.core_size {
            return Err(ConfigError::MaxBelowCore {
                core: state.core_size,
                max: max_size,
            });
        }
        let previous = state.max_size;
        state.max_size = max_size;
        debug!(pool = %self.shared.name, previous, max_size, "max size changed");
        self.shared.work_available.notify_all();
        self.shared.space_available.notify_all();
        Ok(())
    }

    /// Change how long surplus workers may idle
    pub fn set_keep_alive(&self, keep_alive: Duration) {
        let mut state = self.shared.state.lock();
        state.keep_alive = keep_alive;
        self.shared.work_available.notify_all();
    }

    /// Snapshot of pool activity
    pub fn metrics(&self) -> PoolMetrics {
        let gauges = self.shared.state.lock().gauges();
        PoolMetrics::capture(gauges, &self.shared.counters)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.shared.name)
            .field("lifecycle", &self.lifecycle())
            .field("broken", &self.is_broken())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use crate::handle::TaskState;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::thread;

    /// A task that blocks until released, reporting when it starts
    fn gated(started: mpsc::Sender<()>, release: Arc<(Mutex<bool>, Condvar)>) -> Task<()> {
        Task::new(move |_| {
            let _ = started.send(());
            let (lock, cvar) = &*release;
            let mut open = lock.lock();
            while !*open {
                cvar.wait(&mut open);
            }
            Ok(())
        })
    }

    fn gate() -> Arc<(Mutex<bool>, Condvar)> {
        Arc::new((Mutex::new(false), Condvar::new()))
    }

    fn open(gate: &Arc<(Mutex<bool>, Condvar)>) {
        *gate.0.lock() = true;
        gate.1.notify_all();
    }

    #[test]
    fn test_invalid_config_is_refused() {
        assert!(matches!(
            WorkerPool::new(PoolConfig::new(3, 1)),
            Err(ConfigError::MaxBelowCore { .. })
        ));
    }

    #[test]
    fn test_submit_and_get() {
        let pool = WorkerPool::new(PoolConfig::fixed(2)).unwrap();
        let handle = pool.submit_fn(|_| Ok("hello".to_string())).unwrap();
        assert_eq!(handle.get().unwrap(), "hello");
        pool.drain();
        assert_eq!(pool.metrics().completed, 1);
    }

    #[test]
    fn test_failure_does_not_kill_worker() {
        let pool = WorkerPool::new(PoolConfig::single_thread()).unwrap();
        let failing = pool
            .submit_fn::<u32, _>(|_| Err(anyhow::anyhow!("bad input")))
            .unwrap();
        let panicking = pool.submit_fn::<u32, _>(|_| panic!("oops")).unwrap();
        let fine = pool.submit_fn(|_| Ok(3u32)).unwrap();

        assert!(failing.get().unwrap_err().is_failed());
        assert!(panicking.get().unwrap_err().is_failed());
        assert_eq!(fine.get().unwrap(), 3);

        pool.drain();
        let metrics = pool.metrics();
        assert_eq!(metrics.failed, 2);
        assert_eq!(metrics.completed, 1);
        assert_eq!(metrics.largest_pool_size, 1);
        assert!(!pool.is_broken());
    }

    #[test]
    fn test_closed_pool_rejects() {
        let pool = WorkerPool::new(PoolConfig::fixed(1)).unwrap();
        pool.drain();
        assert_eq!(pool.lifecycle(), Lifecycle::Terminated);
        let err = pool.submit_fn(|_| Ok(1)).unwrap_err();
        assert_eq!(err, RejectedSubmission::PoolClosed);
        assert_eq!(pool.metrics().rejected, 1);
    }

    #[test]
    fn test_drain_on_idle_pool_terminates_immediately() {
        let pool = WorkerPool::new(PoolConfig::fixed(2)).unwrap();
        pool.drain();
        assert!(pool.is_terminated());
        assert!(pool.await_termination(Duration::ZERO));
    }

    #[test]
    fn test_await_termination_times_out_while_running() {
        let pool = WorkerPool::new(PoolConfig::fixed(1)).unwrap();
        let release = gate();
        let (started_tx, started_rx) = mpsc::channel();
        let handle = pool.submit(gated(started_tx, Arc::clone(&release))).unwrap();
        started_rx.recv().unwrap();

        pool.shutdown();
        assert_eq!(pool.lifecycle(), Lifecycle::Draining);
        assert!(!pool.await_termination(Duration::from_millis(20)));

        open(&release);
        assert!(pool.await_termination(Duration::from_secs(5)));
        assert_eq!(handle.state(), TaskState::Completed);
    }

    #[test]
    fn test_direct_handoff_needs_idle_worker() {
        let pool = WorkerPool::new(PoolConfig::new(0, 1).with_direct_handoff()).unwrap();
        let release = gate();
        let (started_tx, started_rx) = mpsc::channel();

        pool.submit(gated(started_tx, Arc::clone(&release))).unwrap();
        started_rx.recv().unwrap();

        let err = pool.submit_fn(|_| Ok(())).unwrap_err();
        assert_eq!(err, RejectedSubmission::Saturated { capacity: 0 });

        open(&release);
        pool.drain();
    }

    #[test]
    fn test_bounded_capacity_counts_running_tasks() {
        let pool = WorkerPool::new(
            PoolConfig::fixed(1)
                .with_queue_capacity(2)
                .with_saturation_policy(SaturationPolicy::Reject),
        )
        .unwrap();
        let release = gate();
        let (started_tx, started_rx) = mpsc::channel();
        let running = pool.submit(gated(started_tx, Arc::clone(&release))).unwrap();
        started_rx.recv().unwrap();

        let queued = pool.submit_fn(|_| Ok(())).unwrap();
        let err = pool.submit_fn(|_| Ok(())).unwrap_err();
        assert_eq!(err, RejectedSubmission::Saturated { capacity: 2 });

        open(&release);
        running.get().unwrap();
        queued.get().unwrap();
        // Finished tasks give their slots back.
        let deadline = Instant::now() + Duration::from_secs(5);
        let again = loop {
            match pool.submit_fn(|_| Ok(5)) {
                Ok(handle) => break handle,
                Err(_) if Instant::now() < deadline => thread::sleep(Duration::from_millis(1)),
                Err(err) => panic!("slot never released: {err}"),
            }
        };
        assert_eq!(again.get().unwrap(), 5);
        pool.drain();
    }

    #[test]
    fn test_drop_policy_cancels_new_task() {
        let pool = WorkerPool::new(
            PoolConfig::fixed(1)
                .with_queue_capacity(2)
                .with_saturation_policy(SaturationPolicy::Drop),
        )
        .unwrap();
        let release = gate();
        let (started_tx, started_rx) = mpsc::channel();
        pool.submit(gated(started_tx, Arc::clone(&release))).unwrap();
        started_rx.recv().unwrap();

        let queued = pool.submit_fn(|_| Ok(1)).unwrap();
        let dropped = pool.submit_fn(|_| Ok(2)).unwrap();
        assert!(dropped.is_cancelled());

        open(&release);
        assert_eq!(queued.get().unwrap(), 1);
        pool.drain();
        assert_eq!(pool.metrics().dropped, 1);
    }

    #[test]
    fn test_drop_oldest_policy_discards_head_of_queue() {
        let pool = WorkerPool::new(
            PoolConfig::fixed(1)
                .with_queue_capacity(3)
                .with_saturation_policy(SaturationPolicy::DropOldest),
        )
        .unwrap();
        let release = gate();
        let (started_tx, started_rx) = mpsc::channel();
        pool.submit(gated(started_tx, Arc::clone(&release))).unwrap();
        started_rx.recv().unwrap();

        let oldest = pool.submit_fn(|_| Ok(1)).unwrap();
        let middle = pool.submit_fn(|_| Ok(2)).unwrap();
        let newest = pool.submit_fn(|_| Ok(3)).unwrap();
        assert!(oldest.is_cancelled());

        open(&release);
        assert_eq!(middle.get().unwrap(), 2);
        assert_eq!(newest.get().unwrap(), 3);
        assert!(matches!(oldest.get(), Err(TaskError::Cancelled)));
        pool.drain();
    }

    #[test]
    fn test_run_inline_policy_uses_caller_thread() {
        let pool = WorkerPool::new(
            PoolConfig::fixed(1)
                .with_queue_capacity(0)
                .with_saturation_policy(SaturationPolicy::RunInline),
        )
        .unwrap();
        let release = gate();
        let (started_tx, started_rx) = mpsc::channel();
        pool.submit(gated(started_tx, Arc::clone(&release))).unwrap();
        started_rx.recv().unwrap();

        let caller = thread::current().id();
        let handle = pool
            .submit_fn(move |_| Ok(thread::current().id() == caller))
            .unwrap();
        assert!(handle.is_done());
        assert!(handle.get().unwrap());

        open(&release);
        pool.drain();
    }

    #[test]
    fn test_block_policy_waits_for_space() {
        let pool = Arc::new(
            WorkerPool::new(
                PoolConfig::fixed(1)
                    .with_queue_capacity(2)
                    .with_saturation_policy(SaturationPolicy::Block),
            )
            .unwrap(),
        );
        let release = gate();
        let (started_tx, started_rx) = mpsc::channel();
        pool.submit(gated(started_tx, Arc::clone(&release))).unwrap();
        started_rx.recv().unwrap();
        pool.submit_fn(|_| Ok(0)).unwrap();

        let err = pool
            .submit_timeout(Task::new(|_| Ok(1)), Duration::from_millis(20))
            .unwrap_err();
        assert_eq!(err, RejectedSubmission::TimedOut);

        let submitter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.submit_fn(|_| Ok(2)).unwrap().get().unwrap())
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!submitter.is_finished());

        open(&release);
        assert_eq!(submitter.join().unwrap(), 2);
        pool.drain();
    }

    #[test]
    fn test_workers_grow_to_max_then_retire() {
        let pool = WorkerPool::new(
            PoolConfig::new(1, 3)
                .with_queue_capacity(0)
                .with_keep_alive(Duration::from_millis(20)),
        )
        .unwrap();
        let release = gate();
        let (started_tx, started_rx) = mpsc::channel();
        for _ in 0..3 {
            pool.submit(gated(started_tx.clone(), Arc::clone(&release)))
                .unwrap();
        }
        for _ in 0..3 {
            started_rx.recv().unwrap();
        }
        assert_eq!(pool.metrics().pool_size, 3);

        open(&release);
        let deadline = Instant::now() + Duration::from_secs(5);
        while pool.metrics().pool_size > 1 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(pool.metrics().pool_size, 1);
        assert_eq!(pool.metrics().largest_pool_size, 3);
        pool.drain();
    }

    #[test]
    fn test_live_resize() {
        let pool = WorkerPool::new(PoolConfig::new(1, 2)).unwrap();
        assert!(pool.set_max_size(0).is_err());
        assert!(matches!(
            pool.set_core_size(5),
            Err(ConfigError::MaxBelowCore { core: 5, max: 2 })
        ));
        pool.set_max_size(6).unwrap();
        pool.set_core_size(4).unwrap();
        pool.set_keep_alive(Duration::from_millis(5));
        assert_eq!(pool.core_size(), 4);
        assert_eq!(pool.max_size(), 6);
        assert_eq!(pool.keep_alive(), Duration::from_millis(5));
        assert!(matches!(
            pool.set_max_size(3),
            Err(ConfigError::MaxBelowCore { core: 4, max: 3 })
        ));
        pool.drain();
    }

    #[test]
    fn test_prestart_core_threads() {
        let pool = WorkerPool::new(PoolConfig::fixed(3).with_prestart_core(true)).unwrap();
        assert_eq!(pool.metrics().pool_size, 3);
        assert_eq!(pool.prestart_core_threads(), 0);
        pool.drain();
        assert_eq!(pool.metrics().pool_size, 0);
    }

    #[test]
    fn test_purge_removes_cancelled_queued_tasks() {
        let pool = WorkerPool::new(PoolConfig::fixed(1)).unwrap();
        let release = gate();
        let (started_tx, started_rx) = mpsc::channel();
        pool.submit(gated(started_tx, Arc::clone(&release))).unwrap();
        started_rx.recv().unwrap();

        let doomed: Vec<_> = (0..3).map(|i| pool.submit_fn(move |_| Ok(i)).unwrap()).collect();
        let kept = pool.submit_fn(|_| Ok(99)).unwrap();
        for handle in &doomed {
            assert!(handle.cancel(false));
        }
        assert_eq!(pool.metrics().queue_depth, 4);
        assert_eq!(pool.purge(), 3);
        assert_eq!(pool.metrics().queue_depth, 1);

        open(&release);
        assert_eq!(kept.get().unwrap(), 99);
        pool.drain();
    }

    #[test]
    fn test_invoke_all() {
        let pool = WorkerPool::new(PoolConfig::fixed(4)).unwrap();
        let handles = pool
            .invoke_all((0..10).map(|i| Task::new(move |_| Ok(i * 2))))
            .unwrap();
        assert!(handles.iter().all(|h| h.is_done()));
        let values: Vec<i32> = handles.iter().map(|h| h.get().unwrap()).collect();
        assert_eq!(values, (0..10).map(|i| i * 2).collect::<Vec<_>>());
        pool.drain();
    }

    #[test]
    fn test_hooks_run_around_tasks() {
        let before = Arc::new(AtomicUsize::new(0));
        let after = Arc::new(AtomicUsize::new(0));
        let terminated = Arc::new(AtomicUsize::new(0));
        let hooks = PoolHooks::new()
            .with_before_execute({
                let before = Arc::clone(&before);
                move |_| {
                    before.fetch_add(1, Ordering::SeqCst);
                }
            })
            .with_after_execute({
                let after = Arc::clone(&after);
                move |_, state| {
                    if state == TaskState::Failed {
                        after.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
            .with_on_terminated({
                let terminated = Arc::clone(&terminated);
                move || {
                    terminated.fetch_add(1, Ordering::SeqCst);
                }
            });

        let pool = WorkerPool::with_hooks(PoolConfig::fixed(2), hooks).unwrap();
        pool.submit_fn(|_| Ok(())).unwrap().wait();
        pool.submit_fn::<(), _>(|_| anyhow::bail!("nope")).unwrap().wait();
        pool.drain();
        pool.drain();

        assert_eq!(before.load(Ordering::SeqCst), 2);
        assert_eq!(after.load(Ordering::SeqCst), 1);
        assert_eq!(terminated.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_before_hook_fails_task_only() {
        let hooks = PoolHooks::new().with_before_execute(|_| panic!("hook exploded"));
        let pool = WorkerPool::with_hooks(PoolConfig::fixed(1), hooks).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let handle = pool
            .submit_fn(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        match handle.get() {
            Err(TaskError::Failed(failure)) => {
                assert!(failure.to_string().contains("hook exploded"))
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert!(!pool.is_broken());
        pool.drain();
    }

    #[test]
    fn test_huge_timeouts_wait_untimed() {
        let pool = Arc::new(
            WorkerPool::new(
                PoolConfig::fixed(1)
                    .with_queue_capacity(1)
                    .with_saturation_policy(SaturationPolicy::Block),
            )
            .unwrap(),
        );
        let release = gate();
        let (started_tx, started_rx) = mpsc::channel();
        pool.submit(gated(started_tx, Arc::clone(&release))).unwrap();
        started_rx.recv().unwrap();

        let submitter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                pool.submit_timeout(Task::new(|_| Ok(6)), Duration::MAX)
                    .unwrap()
                    .get()
                    .unwrap()
            })
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!submitter.is_finished());
        open(&release);
        assert_eq!(submitter.join().unwrap(), 6);

        let closer = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                pool.shutdown();
            })
        };
        assert!(pool.await_termination(Duration::MAX));
        closer.join().unwrap();
    }

    #[test]
    fn test_broken_pool_refuses_work() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let hooks = PoolHooks::new().with_on_terminated(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let pool = WorkerPool::with_hooks(PoolConfig::fixed(1), hooks).unwrap();

        pool.shared.mark_broken("simulated bookkeeping defect", false);

        assert!(pool.is_broken());
        assert!(pool.is_terminated());
        assert!(pool.await_termination(Duration::ZERO));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        let err = pool.submit_fn(|_| Ok(1)).unwrap_err();
        assert_eq!(err, RejectedSubmission::PoolBroken);
    }

    #[test]
    fn test_broken_pool_terminates_after_running_tasks_finish() {
        let pool = WorkerPool::new(PoolConfig::fixed(1)).unwrap();
        let release = gate();
        let (started_tx, started_rx) = mpsc::channel();
        let straggler = pool.submit(gated(started_tx, Arc::clone(&release))).unwrap();
        started_rx.recv().unwrap();
        let queued = pool.submit_fn(|_| Ok(2)).unwrap();

        pool.shared.mark_broken("simulated bookkeeping defect", false);

        assert!(pool.is_broken());
        assert_eq!(pool.lifecycle(), Lifecycle::Draining);
        assert!(queued.is_cancelled());
        assert!(!pool.await_termination(Duration::from_millis(20)));

        open(&release);
        assert!(pool.await_termination(Duration::from_secs(5)));
        assert_eq!(straggler.state(), TaskState::Completed);
    }

    #[test]
    fn test_dropping_pool_drains_in_background() {
        let pool = WorkerPool::new(PoolConfig::fixed(1)).unwrap();
        let handle = pool
            .submit_fn(|ctx| {
                ctx.sleep(Duration::from_millis(20))?;
                Ok(7)
            })
            .unwrap();
        drop(pool);
        assert_eq!(handle.get().unwrap(), 7);
    }
}
