//! Task execution context

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::{Fingerprint, TaskId};
use crate::error::Cancelled;

/// Deadline `timeout` from now; `None` when it lies past what `Instant` can
/// represent, which callers treat as an untimed wait
pub(crate) fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

#[derive(Debug, Default)]
struct TokenInner {
    cancelled: AtomicBool,
    lock: Mutex<()>,
    signal: Condvar,
}

/// Cooperative cancellation signal
///
/// Raising the signal never stops a task by force. The running body polls
/// [`is_cancelled`](Self::is_cancelled) or blocks in
/// [`wait_timeout`](Self::wait_timeout), which returns early once raised.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

impl CancellationToken {
    /// Create a token that has not been raised
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal and wake every blocked waiter
    pub fn cancel(&self) {
        // Store under the lock so a waiter cannot miss the wakeup between
        // its flag check and its wait.
        let _guard = self.inner.lock.lock();
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.signal.notify_all();
    }

    /// Check if the signal was raised
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Block for up to `timeout`, returning early if the signal is raised
    ///
    /// Returns true if cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = deadline_after(timeout);
        let mut guard = self.inner.lock.lock();
        while !self.is_cancelled() {
            match deadline {
                Some(deadline) => {
                    if self.inner.signal.wait_until(&mut guard, deadline).timed_out() {
                        break;
                    }
                }
                None => self.inner.signal.wait(&mut guard),
            }
        }
        self.is_cancelled()
    }
}

/// Context handed to every task body
///
/// Carries task-scoped state explicitly. Worker threads are reused across
/// unrelated tasks, so nothing here lives in thread-local storage.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use workyard_engine::{Task, TaskContext};
///
/// let task = Task::new(|ctx: &TaskContext| {
///     for _ in 0..10 {
///         ctx.checkpoint()?;
///         ctx.sleep(Duration::from_millis(1))?;
///     }
///     Ok(ctx.elapsed())
/// });
/// # let _ = task;
/// ```
#[derive(Debug, Clone)]
pub struct TaskContext {
    id: TaskId,
    fingerprint: Option<Fingerprint>,
    token: CancellationToken,
    submitted_at: Instant,
    started_at: Instant,
}

impl TaskContext {
    pub(crate) fn new(
        id: TaskId,
        fingerprint: Option<Fingerprint>,
        token: CancellationToken,
        submitted_at: Instant,
    ) -> Self {
        Self {
            id,
            fingerprint,
            token,
            submitted_at,
            started_at: Instant::now(),
        }
    }

    /// Id of the running task
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Fingerprint of the running task, if it has one
    pub fn fingerprint(&self) -> Option<Fingerprint> {
        self.fingerprint
    }

    /// Cancellation token of the running task
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Check if cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Return `Err(Cancelled)` once cancellation was requested
    ///
    /// Meant to be used with `?` at well-defined points in a task body.
    pub fn checkpoint(&self) -> Result<(), Cancelled> {
        if self.token.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, waking early with `Err(Cancelled)` if signalled
    pub fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        if self.token.wait_timeout(duration) {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// When the task was submitted
    pub fn submitted_at(&self) -> Instant {
        self.submitted_at
    }

    /// When the task started executing
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Time spent executing so far
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Time the task waited between submission and start
    pub fn queued_for(&self) -> Duration {
        self.started_at.saturating_duration_since(self.submitted_at)
    }
}
