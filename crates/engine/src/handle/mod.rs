//! Result handles
//!
//! A [`ResultHandle`] exposes the eventual outcome of one task. Handles are
//! cheap to clone; every clone reads the same single-assignment cell.
//!
//! # State Machine
//!
//! ```text
//! ┌─────────┐  worker claims  ┌─────────┐  body returns   ┌───────────┐
//! │ Pending │ ──────────────► │ Running │ ──────────────► │ Completed │
//! └─────────┘                 └─────────┘                 │ Failed    │
//!      │                                                  │ Cancelled │
//!      │              cancel() before start               └───────────┘
//!      └──────────────────────────────────────────────────────► Cancelled
//! ```

mod cell;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::TaskError;
use crate::task::{deadline_after, TaskId};

pub(crate) use cell::{Outcome, StateCell};

/// Observable state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Accepted but not yet claimed by a worker
    Pending,
    /// Executing on a worker
    Running,
    /// Finished with a value
    Completed,
    /// Finished with an error
    Failed,
    /// Cancelled before or during execution
    Cancelled,
}

impl TaskState {
    /// True for `Completed`, `Failed` and `Cancelled`
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Running => 1,
            Self::Completed => 2,
            Self::Failed => 3,
            Self::Cancelled => 4,
        }
    }

    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Pending,
            1 => Self::Running,
            2 => Self::Completed,
            3 => Self::Failed,
            _ => Self::Cancelled,
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Handle to the eventual outcome of a submitted task
///
/// The submitter only ever reads; the write right belongs to the worker
/// executing the task, or to the pool when the task is cancelled before it
/// starts.
///
/// # Example
///
/// ```
/// use workyard_engine::{PoolConfig, Task, WorkerPool};
///
/// let pool = WorkerPool::new(PoolConfig::new(2, 2)).unwrap();
/// let handle = pool.submit(Task::new(|_ctx| Ok(21 * 2))).unwrap();
/// assert_eq!(handle.get().unwrap(), 42);
/// // Terminal outcomes are stable across reads.
/// assert_eq!(handle.get().unwrap(), 42);
/// pool.drain();
/// ```
pub struct ResultHandle<V> {
    cell: Arc<StateCell<V>>,
}

impl<V> Clone for ResultHandle<V> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<V> std::fmt::Debug for ResultHandle<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultHandle")
            .field("id", &self.cell.id())
            .field("state", &self.cell.state())
            .finish()
    }
}

impl<V> ResultHandle<V> {
    pub(crate) fn from_cell(cell: Arc<StateCell<V>>) -> Self {
        Self { cell }
    }

    /// Id of the task behind this handle
    pub fn id(&self) -> TaskId {
        self.cell.id()
    }

    /// Current state
    pub fn state(&self) -> TaskState {
        self.cell.state()
    }

    /// True once a terminal state is reached
    pub fn is_done(&self) -> bool {
        self.cell.state().is_terminal()
    }

    /// True if the task ended `Cancelled`
    pub fn is_cancelled(&self) -> bool {
        self.cell.state() == TaskState::Cancelled
    }

    /// Request cancellation
    ///
    /// A `Pending` task moves straight to `Cancelled` and never runs. For a
    /// `Running` task with `interrupt_if_running`, the task's cancellation
    /// signal is raised and the worker's response decides the final state.
    /// Returns false if the task already finished, or if it is running and
    /// interruption was not requested.
    pub fn cancel(&self, interrupt_if_running: bool) -> bool {
        loop {
            match self.cell.state() {
                TaskState::Pending => {
                    if self.cell.cancel_pending() {
                        return true;
                    }
                    // Lost the race to a worker or another canceller; re-read.
                }
                TaskState::Running => {
                    if interrupt_if_running {
                        self.cell.token().cancel();
                        return true;
                    }
                    return false;
                }
                _ => return false,
            }
        }
    }

    /// Block until the task is terminal and return the final state
    ///
    /// Unlike [`get`](Self::get) this needs no `Clone` on the value.
    pub fn wait(&self) -> TaskState {
        self.cell.wait().state()
    }

    /// Block for at most `timeout`; `None` if the task is still not terminal
    pub fn wait_timeout(&self, timeout: Duration) -> Option<TaskState> {
        match deadline_after(timeout) {
            Some(deadline) => self.cell.wait_until(deadline).map(|outcome| outcome.state()),
            None => Some(self.wait()),
        }
    }

    /// Check if both handles refer to the same task
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    pub(crate) fn on_terminal(&self, listener: Box<dyn FnOnce() + Send>) {
        self.cell.on_terminal(listener);
    }
}

impl<V: Clone> ResultHandle<V> {
    /// Block until the task is terminal, then return its value or error
    pub fn get(&self) -> Result<V, TaskError> {
        self.cell.wait().to_result()
    }

    /// Block for at most `timeout`
    ///
    /// Expiry returns [`TaskError::TimedOut`] and leaves the task untouched.
    pub fn get_timeout(&self, timeout: Duration) -> Result<V, TaskError> {
        match deadline_after(timeout) {
            Some(deadline) => self.get_deadline(deadline),
            None => self.get(),
        }
    }

    /// Block until `deadline` at the latest
    pub fn get_deadline(&self, deadline: Instant) -> Result<V, TaskError> {
        match self.cell.wait_until(deadline) {
            Some(outcome) => outcome.to_result(),
            None => Err(TaskError::TimedOut),
        }
    }

    /// Return the outcome if terminal, without blocking
    pub fn try_get(&self) -> Option<Result<V, TaskError>> {
        self.cell.peek().map(|outcome| outcome.to_result())
    }

    /// Await the outcome from async code
    pub async fn wait_async(&self) -> Result<V, TaskError> {
        self.cell.wait_async().await.to_result()
    }
}
