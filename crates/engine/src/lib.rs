//! # Workyard Engine
//!
//! A bounded, in-process task-execution engine: a worker pool that accepts
//! units of work, runs them with controlled parallelism, and reports each
//! outcome through a single-assignment result handle.
//!
//! ## Features
//!
//! - **Bounded pool**: core/max workers, keep-alive, FIFO or priority queue
//! - **Saturation policies**: reject, drop, drop-oldest, run-inline or block
//! - **Cooperative cancellation**: a per-task token polled by the task body
//! - **Completion feed**: consume results in the order they finish
//! - **Single-flight cache**: at most one computation per key at a time
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐   ┌──────────────────────┐
//! │   CompletionFeed     │   │  SingleFlightCache   │
//! │ (completion order)   │   │ (key -> handle map)  │
//! └──────────────────────┘   └──────────────────────┘
//!            │                          │
//!            └────────────┬─────────────┘
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        WorkerPool                            │
//! │  (admission, saturation policy, worker threads, lifecycle)  │
//! └─────────────────────────────────────────────────────────────┘
//!                         │
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │             Task ──bind──► PendingTask + ResultHandle        │
//! │  (CAS state cell: Pending -> Running -> terminal, once)      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! No pool, cache or feed lock is held while a task body, hook or
//! completion listener runs.
//!
//! ## Example
//!
//! ```
//! use workyard_engine::prelude::*;
//!
//! let pool = WorkerPool::new(PoolConfig::new(2, 4).with_queue_capacity(32)).unwrap();
//!
//! let handle = pool
//!     .submit(Task::new(|ctx| {
//!         ctx.checkpoint()?;
//!         Ok("done")
//!     }))
//!     .unwrap();
//! assert_eq!(handle.get().unwrap(), "done");
//!
//! pool.drain();
//! ```

pub mod cache;
pub mod error;
pub mod feed;
pub mod handle;
pub mod pool;
pub mod task;

/// Prelude for common imports
pub mod prelude {
    pub use crate::cache::{CacheMetrics, EvictionPolicy, SingleFlightCache};
    pub use crate::error::{Cancelled, ConfigError, RejectedSubmission, TaskError, TaskFailure};
    pub use crate::feed::CompletionFeed;
    pub use crate::handle::{ResultHandle, TaskState};
    pub use crate::pool::{
        Lifecycle, PoolConfig, PoolHooks, PoolMetrics, QueueOrder, SaturationPolicy, WorkerPool,
    };
    pub use crate::task::{CancellationToken, Fingerprint, PendingTask, Task, TaskContext, TaskId};
}

pub use cache::{CacheMetrics, EvictionPolicy, SingleFlightCache};
pub use error::{Cancelled, ConfigError, RejectedSubmission, TaskError, TaskFailure};
pub use feed::CompletionFeed;
pub use handle::{ResultHandle, TaskState};
pub use pool::{
    sizing, Lifecycle, PoolConfig, PoolHooks, PoolMetrics, QueueOrder, SaturationPolicy,
    WorkerPool,
};
pub use task::{CancellationToken, Fingerprint, PendingTask, Task, TaskContext, TaskId};
