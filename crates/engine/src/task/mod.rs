//! Units of work
//!
//! - [`Task`] - a typed closure plus submission metadata
//! - [`PendingTask`] - a type-erased task that has not started yet
//! - [`TaskContext`] - task-scoped state handed to the closure
//! - [`CancellationToken`] - the cooperative cancellation signal

mod context;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use context::{CancellationToken, TaskContext};
pub(crate) use context::deadline_after;

use crate::error::{Cancelled, TaskFailure};
use crate::handle::{Outcome, ResultHandle, StateCell, TaskState};

/// Unique submission id (UUID v7, time-ordered)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Generate a fresh id
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// The underlying UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Deterministic key derived from a task's logical inputs
///
/// Stable for the lifetime of the process; not meant to be persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fingerprint(u64);

impl Fingerprint {
    /// Fingerprint any hashable value
    pub fn of<T: Hash + ?Sized>(value: &T) -> Self {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        Self(hasher.finish())
    }

    /// Wrap a precomputed fingerprint
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw fingerprint value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

type Work<V> = Box<dyn FnOnce(&TaskContext) -> anyhow::Result<V> + Send>;

/// A unit of work producing a `V` or failing
///
/// Immutable once submitted. The closure receives a [`TaskContext`] and
/// may return [`Cancelled`] (usually via `ctx.checkpoint()?`) to end in the
/// `Cancelled` state.
pub struct Task<V> {
    id: TaskId,
    fingerprint: Option<Fingerprint>,
    priority: i32,
    work: Work<V>,
}

impl<V> std::fmt::Debug for Task<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("fingerprint", &self.fingerprint)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

impl<V: Send + Sync + 'static> Task<V> {
    /// Create a task from a closure
    pub fn new<F>(work: F) -> Self
    where
        F: FnOnce(&TaskContext) -> anyhow::Result<V> + Send + 'static,
    {
        Self {
            id: TaskId::new(),
            fingerprint: None,
            priority: 0,
            work: Box::new(work),
        }
    }

    /// Attach a fingerprint
    pub fn with_fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }

    /// Set the priority (only consulted by priority-ordered queues; higher runs first)
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Submission id
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Fingerprint, if any
    pub fn fingerprint(&self) -> Option<Fingerprint> {
        self.fingerprint
    }

    /// Priority
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Split into the erased runnable form and the reader handle
    pub(crate) fn bind(self) -> (PendingTask, ResultHandle<V>) {
        let cell = Arc::new(StateCell::new(self.id));
        let handle = ResultHandle::from_cell(Arc::clone(&cell));
        let pending = PendingTask {
            id: self.id,
            fingerprint: self.fingerprint,
            priority: self.priority,
            submitted_at: Instant::now(),
            job: Box::new(Bound {
                cell,
                work: Some(self.work),
            }),
        };
        (pending, handle)
    }
}

/// Type-erased execution interface of a bound task
pub(crate) trait Runnable: Send {
    /// Claim for execution (`Pending -> Running`)
    fn try_start(&self) -> bool;

    /// Cancellation token of the task
    fn token(&self) -> CancellationToken;

    /// Current state of the task
    fn state(&self) -> TaskState;

    /// Execute the claimed task and record its outcome
    fn run(self: Box<Self>, ctx: &TaskContext) -> TaskState;

    /// Record a failure for a claimed task without running its body
    fn fail(self: Box<Self>, failure: TaskFailure) -> TaskState;
}

struct Bound<V> {
    cell: Arc<StateCell<V>>,
    work: Option<Work<V>>,
}

impl<V: Send + Sync + 'static> Runnable for Bound<V> {
    fn try_start(&self) -> bool {
        self.cell.try_start()
    }

    fn token(&self) -> CancellationToken {
        self.cell.token().clone()
    }

    fn state(&self) -> TaskState {
        self.cell.state()
    }

    fn run(mut self: Box<Self>, ctx: &TaskContext) -> TaskState {
        let Some(work) = self.work.take() else {
            return self.cell.state();
        };

        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| work(ctx))) {
            Ok(Ok(value)) => Outcome::Completed(value),
            Ok(Err(err)) if err.is::<Cancelled>() => Outcome::Cancelled,
            Ok(Err(err)) => Outcome::Failed(TaskFailure::new(err)),
            Err(payload) => Outcome::Failed(TaskFailure::msg(format!(
                "task panicked: {}",
                panic_message(payload.as_ref())
            ))),
        };
        self.cell.finish(TaskState::Running, outcome);
        self.cell.state()
    }

    fn fail(mut self: Box<Self>, failure: TaskFailure) -> TaskState {
        self.work = None;
        self.cell.finish(TaskState::Running, Outcome::Failed(failure));
        self.cell.state()
    }
}

impl<V> Drop for Bound<V> {
    fn drop(&mut self) {
        // Never ran: make sure no reader waits forever.
        if self.work.take().is_some() && !self.cell.cancel_pending() {
            self.cell.finish(
                TaskState::Running,
                Outcome::Failed(TaskFailure::msg("task was abandoned after it started")),
            );
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// A task that was accepted but never started
///
/// Returned by [`WorkerPool::terminate_now`](crate::WorkerPool::terminate_now)
/// so the caller can resubmit it elsewhere. Its result handle stays valid
/// across resubmission. Dropping a `PendingTask` cancels its handle.
pub struct PendingTask {
    id: TaskId,
    fingerprint: Option<Fingerprint>,
    priority: i32,
    submitted_at: Instant,
    pub(crate) job: Box<dyn Runnable>,
}

impl PendingTask {
    /// Submission id
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Fingerprint, if any
    pub fn fingerprint(&self) -> Option<Fingerprint> {
        self.fingerprint
    }

    /// Priority
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// When the task was first submitted
    pub fn submitted_at(&self) -> Instant {
        self.submitted_at
    }

    /// Current state of the underlying handle
    pub fn state(&self) -> TaskState {
        self.job.state()
    }

    /// Build the execution context for a claimed task
    pub(crate) fn context(&self) -> TaskContext {
        TaskContext::new(
            self.id,
            self.fingerprint,
            self.job.token(),
            self.submitted_at,
        )
    }
}

impl std::fmt::Debug for PendingTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingTask")
            .field("id", &self.id)
            .field("fingerprint", &self.fingerprint)
            .field("priority", &self.priority)
            .field("state", &self.job.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;

    #[test]
    fn test_task_ids_are_unique() {
        let a = TaskId::new();
        let b = TaskId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string(), a.as_uuid().to_string());
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        assert_eq!(Fingerprint::of("resize:42"), Fingerprint::of("resize:42"));
        assert_ne!(Fingerprint::of("resize:42"), Fingerprint::of("resize:43"));
        assert_eq!(Fingerprint::from_raw(0xff).to_string(), "00000000000000ff");
    }

    #[test]
    fn test_task_builder() {
        let fp = Fingerprint::of(&7u32);
        let task = Task::new(|_| Ok(1u8)).with_fingerprint(fp).with_priority(5);
        assert_eq!(task.fingerprint(), Some(fp));
        assert_eq!(task.priority(), 5);
    }

    #[test]
    fn test_bound_run_completes_handle() {
        let (pending, handle) = Task::new(|_| Ok("done")).bind();
        assert!(pending.job.try_start());
        let ctx = pending.context();
        assert_eq!(pending.job.run(&ctx), TaskState::Completed);
        assert_eq!(handle.get().unwrap(), "done");
    }

    #[test]
    fn test_bound_maps_cancelled_error() {
        let (pending, handle) = Task::new(|ctx: &TaskContext| {
            ctx.token().cancel();
            ctx.checkpoint()?;
            Ok(1)
        })
        .bind();
        assert!(pending.job.try_start());
        let ctx = pending.context();
        assert_eq!(pending.job.run(&ctx), TaskState::Cancelled);
        assert!(matches!(handle.get(), Err(TaskError::Cancelled)));
    }

    #[test]
    fn test_bound_captures_panic() {
        let (pending, handle) = Task::<u32>::new(|_| panic!("kaboom")).bind();
        assert!(pending.job.try_start());
        let ctx = pending.context();
        assert_eq!(pending.job.run(&ctx), TaskState::Failed);
        match handle.get() {
            Err(TaskError::Failed(failure)) => {
                assert_eq!(failure.to_string(), "task panicked: kaboom")
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_dropping_unstarted_task_cancels_handle() {
        let (pending, handle) = Task::new(|_| Ok(1)).bind();
        drop(pending);
        assert!(handle.is_cancelled());
    }

    #[test]
    fn test_dropping_started_task_fails_handle() {
        let (pending, handle) = Task::new(|_| Ok(1)).bind();
        assert!(pending.job.try_start());
        drop(pending);
        assert!(handle.get().unwrap_err().is_failed());
    }
}
