//! Single-assignment state cell backing a result handle

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;

use super::TaskState;
use crate::error::{TaskError, TaskFailure};
use crate::task::{CancellationToken, TaskId};

/// Terminal outcome stored in a cell
#[derive(Debug)]
pub(crate) enum Outcome<V> {
    Completed(V),
    Failed(TaskFailure),
    Cancelled,
}

impl<V> Outcome<V> {
    pub(crate) fn state(&self) -> TaskState {
        match self {
            Self::Completed(_) => TaskState::Completed,
            Self::Failed(_) => TaskState::Failed,
            Self::Cancelled => TaskState::Cancelled,
        }
    }
}

impl<V: Clone> Outcome<V> {
    pub(crate) fn to_result(&self) -> Result<V, TaskError> {
        match self {
            Self::Completed(value) => Ok(value.clone()),
            Self::Failed(failure) => Err(TaskError::Failed(failure.clone())),
            Self::Cancelled => Err(TaskError::Cancelled),
        }
    }
}

type Listener = Box<dyn FnOnce() + Send>;

/// State cell shared by the submitter (reader) and the executing worker (writer)
///
/// The atomic `state` is the single arbiter of transitions. A terminal
/// transition is a compare-and-set from an expected non-terminal state, so
/// exactly one writer wins and every later attempt is a no-op. The outcome
/// slot is written while the winner still holds `slot`, which means a
/// reader that observes a terminal state always finds the outcome once it
/// takes the lock.
pub(crate) struct StateCell<V> {
    id: TaskId,
    state: AtomicU8,
    slot: Mutex<Option<Arc<Outcome<V>>>>,
    ready: Condvar,
    notify: Notify,
    token: CancellationToken,
    listeners: Mutex<Vec<Listener>>,
}

impl<V> StateCell<V> {
    pub(crate) fn new(id: TaskId) -> Self {
        Self {
            id,
            state: AtomicU8::new(TaskState::Pending.as_u8()),
            slot: Mutex::new(None),
            ready: Condvar::new(),
            notify: Notify::new(),
            token: CancellationToken::new(),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Claim the task for execution: `Pending -> Running`
    pub(crate) fn try_start(&self) -> bool {
        self.state
            .compare_exchange(
                TaskState::Pending.as_u8(),
                TaskState::Running.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Set the terminal outcome if the cell is still in `expected`
    ///
    /// Returns false (dropping `outcome`) if another writer got there first.
    pub(crate) fn finish(&self, expected: TaskState, outcome: Outcome<V>) -> bool {
        debug_assert!(!expected.is_terminal());
        {
            let mut slot = self.slot.lock();
            if self
                .state
                .compare_exchange(
                    expected.as_u8(),
                    outcome.state().as_u8(),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_err()
            {
                return false;
            }
            *slot = Some(Arc::new(outcome));
            self.ready.notify_all();
        }
        self.notify.notify_waiters();

        let listeners = std::mem::take(&mut *self.listeners.lock());
        for listener in listeners {
            listener();
        }
        true
    }

    /// Cancel a task that never started
    pub(crate) fn cancel_pending(&self) -> bool {
        self.finish(TaskState::Pending, Outcome::Cancelled)
    }

    /// Run `listener` once the cell is terminal (immediately if it already is)
    pub(crate) fn on_terminal(&self, listener: Listener) {
        {
            let mut listeners = self.listeners.lock();
            if !self.state().is_terminal() {
                listeners.push(listener);
                return;
            }
        }
        listener();
    }

    pub(crate) fn peek(&self) -> Option<Arc<Outcome<V>>> {
        self.slot.lock().clone()
    }

    /// Block until terminal
    pub(crate) fn wait(&self) -> Arc<Outcome<V>> {
        let mut slot = self.slot.lock();
        loop {
            if let Some(outcome) = slot.as_ref() {
                return Arc::clone(outcome);
            }
            self.ready.wait(&mut slot);
        }
    }

    /// Block until terminal or until `deadline` passes
    pub(crate) fn wait_until(&self, deadline: Instant) -> Option<Arc<Outcome<V>>> {
        let mut slot = self.slot.lock();
        loop {
            if let Some(outcome) = slot.as_ref() {
                return Some(Arc::clone(outcome));
            }
            if self.ready.wait_until(&mut slot, deadline).timed_out() {
                return slot.as_ref().map(Arc::clone);
            }
        }
    }

    /// Wait for the terminal outcome without blocking the thread
    pub(crate) async fn wait_async(&self) -> Arc<Outcome<V>> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(outcome) = self.peek() {
                return outcome;
            }
            notified.await;
        }
    }
}
