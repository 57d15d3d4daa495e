//! Execution hooks
//!
//! Worker customization by composition: the pool calls these closures
//! around each task instead of requiring a custom worker type. Hooks run on
//! the worker thread with no pool lock held.

use std::sync::Arc;

use crate::handle::TaskState;
use crate::task::TaskContext;

/// Called on the worker before a task body runs
pub type BeforeExecute = Arc<dyn Fn(&TaskContext) + Send + Sync>;

/// Called on the worker after a task reached its terminal state
pub type AfterExecute = Arc<dyn Fn(&TaskContext, TaskState) + Send + Sync>;

/// Called once when the pool reaches `Terminated`
pub type OnTerminated = Arc<dyn Fn() + Send + Sync>;

/// Optional callbacks around task execution
///
/// # Example
///
/// ```
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
/// use workyard_engine::{PoolConfig, PoolHooks, Task, WorkerPool};
///
/// let started = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&started);
/// let hooks = PoolHooks::new().with_before_execute(move |_ctx| {
///     counter.fetch_add(1, Ordering::SeqCst);
/// });
///
/// let pool = WorkerPool::with_hooks(PoolConfig::fixed(1), hooks).unwrap();
/// pool.submit(Task::new(|_| Ok(()))).unwrap().get().unwrap();
/// pool.drain();
/// assert_eq!(started.load(Ordering::SeqCst), 1);
/// ```
#[derive(Clone, Default)]
pub struct PoolHooks {
    pub(crate) before_execute: Option<BeforeExecute>,
    pub(crate) after_execute: Option<AfterExecute>,
    pub(crate) on_terminated: Option<OnTerminated>,
}

impl PoolHooks {
    /// No hooks
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pre-execution hook
    ///
    /// A panic here fails the task without running its body.
    pub fn with_before_execute<F>(mut self, hook: F) -> Self
    where
        F: Fn(&TaskContext) + Send + Sync + 'static,
    {
        self.before_execute = Some(Arc::new(hook));
        self
    }

    /// Set the post-execution hook
    ///
    /// A panic here is logged; the task outcome is already recorded.
    pub fn with_after_execute<F>(mut self, hook: F) -> Self
    where
        F: Fn(&TaskContext, TaskState) + Send + Sync + 'static,
    {
        self.after_execute = Some(Arc::new(hook));
        self
    }

    /// Set the termination hook
    pub fn with_on_terminated<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_terminated = Some(Arc::new(hook));
        self
    }
}

impl std::fmt::Debug for PoolHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolHooks")
            .field("before_execute", &self.before_execute.is_some())
            .field("after_execute", &self.after_execute.is_some())
            .field("on_terminated", &self.on_terminated.is_some())
            .finish()
    }
}
