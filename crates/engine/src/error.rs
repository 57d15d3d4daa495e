//! Error taxonomy for the execution engine
//!
//! - [`RejectedSubmission`] - a task was not admitted to a pool
//! - [`TaskError`] - the outcome of a task was not a value
//! - [`Cancelled`] - returned from a task body to propagate cancellation
//! - [`ConfigError`] - a pool or cache configuration is invalid

use std::sync::Arc;

/// Reasons a pool refuses a task
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RejectedSubmission {
    /// Pool is draining or terminated
    #[error("pool is closed")]
    PoolClosed,

    /// Queue and workers are saturated under the reject policy
    #[error("pool is saturated (queue capacity {capacity})")]
    Saturated { capacity: usize },

    /// Pool hit an internal defect and no longer runs work
    #[error("pool is broken")]
    PoolBroken,

    /// The operating system refused to start a worker thread
    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawn(String),

    /// A blocking submission gave up waiting for queue space
    #[error("timed out waiting for queue space")]
    TimedOut,
}

/// Failure raised by a task body
///
/// Cheap to clone so every reader of a handle observes the same failure.
#[derive(Debug, Clone)]
pub struct TaskFailure(Arc<anyhow::Error>);

impl TaskFailure {
    /// Wrap an error raised by a task body
    pub fn new(error: anyhow::Error) -> Self {
        Self(Arc::new(error))
    }

    /// Build a failure from a plain message
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(anyhow::anyhow!(message.into()))
    }

    /// Access the underlying error
    pub fn error(&self) -> &anyhow::Error {
        &self.0
    }

    /// Attempt to downcast the underlying error
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    {
        self.0.downcast_ref::<E>()
    }
}

impl std::fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#}", self.0)
    }
}

impl std::error::Error for TaskFailure {}

/// Non-value outcomes observed through a result handle
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    /// Task body returned an error or panicked
    #[error("task failed: {0}")]
    Failed(TaskFailure),

    /// Task was cancelled before or during execution
    #[error("task was cancelled")]
    Cancelled,

    /// A bounded wait expired before the task finished
    #[error("timed out waiting for task")]
    TimedOut,
}

impl TaskError {
    /// True if the task itself failed
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// True if the task was cancelled
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// True if only the wait expired
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut)
    }
}

/// Cancellation signal surfaced by a task body
///
/// Task bodies return this (usually through `ctx.checkpoint()?`) to end
/// in the `Cancelled` state instead of `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("task observed cancellation")]
pub struct Cancelled;

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Maximum pool size must be positive
    #[error("max_size must be at least 1")]
    ZeroMaxSize,

    /// Core size may not exceed maximum size
    #[error("core_size ({core}) must not exceed max_size ({max})")]
    MaxBelowCore { core: usize, max: usize },

    /// Discarding the oldest entry of a priority queue can discard the most urgent task
    #[error("drop_oldest saturation policy cannot be combined with a priority queue")]
    DropOldestWithPriority,

    /// A configuration value read from the environment did not parse
    #[error("invalid value for {var}: {value}")]
    InvalidEnv { var: String, value: String },
}
