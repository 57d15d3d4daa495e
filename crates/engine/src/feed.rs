//! Completion-ordered result feed
//!
//! Each task submitted through a [`CompletionFeed`] registers a completion
//! listener on its handle; when the task turns terminal the listener pushes
//! the handle onto an internal queue that [`take`](CompletionFeed::take)
//! and [`poll`](CompletionFeed::poll) drain. Consumers therefore see results
//! in the order they finished, not the order they were submitted.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::RejectedSubmission;
use crate::handle::ResultHandle;
use crate::pool::WorkerPool;
use crate::task::{deadline_after, Task, TaskContext, TaskId};

struct Completed<V> {
    queue: Mutex<VecDeque<ResultHandle<V>>>,
    ready: Condvar,
}

/// Consume task results in completion order
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use workyard_engine::{CompletionFeed, PoolConfig, Task, WorkerPool};
///
/// let pool = Arc::new(WorkerPool::new(PoolConfig::fixed(2)).unwrap());
/// let feed = CompletionFeed::new(Arc::clone(&pool));
/// for i in 0..3u64 {
///     feed.submit(Task::new(move |_| Ok(i))).unwrap();
/// }
///
/// let mut values: Vec<u64> = (0..3).map(|_| feed.take().get().unwrap()).collect();
/// values.sort();
/// assert_eq!(values, vec![0, 1, 2]);
/// assert_eq!(feed.outstanding(), 0);
/// ```
pub struct CompletionFeed<V> {
    pool: Arc<WorkerPool>,
    completed: Arc<Completed<V>>,
    outstanding: AtomicUsize,
}

impl<V: Send + Sync + 'static> CompletionFeed<V> {
    /// Create a feed submitting to `pool`
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        Self {
            pool,
            completed: Arc::new(Completed {
                queue: Mutex::new(VecDeque::new()),
                ready: Condvar::new(),
            }),
            outstanding: AtomicUsize::new(0),
        }
    }

    /// Pool this feed submits to
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Submit a task; its handle becomes available through `take`/`poll`
    /// once it is terminal
    ///
    /// A rejected task never appears in the feed.
    pub fn submit(&self, task: Task<V>) -> Result<TaskId, RejectedSubmission> {
        let (pending, handle) = task.bind();
        let id = handle.id();
        self.pool.resubmit(pending)?;
        self.outstanding.fetch_add(1, Ordering::AcqRel);

        let completed = Arc::clone(&self.completed);
        let finished = handle.clone();
        handle.on_terminal(Box::new(move || {
            completed.queue.lock().push_back(finished);
            completed.ready.notify_one();
        }));
        Ok(id)
    }

    /// Submit a closure as a task
    pub fn submit_fn<F>(&self, work: F) -> Result<TaskId, RejectedSubmission>
    where
        F: FnOnce(&TaskContext) -> anyhow::Result<V> + Send + 'static,
    {
        self.submit(Task::new(work))
    }

    /// Block until a submitted task is terminal and return its handle
    ///
    /// Blocks forever if nothing is outstanding; check
    /// [`outstanding`](Self::outstanding) first when that is possible.
    pub fn take(&self) -> ResultHandle<V> {
        let mut queue = self.completed.queue.lock();
        loop {
            if let Some(handle) = queue.pop_front() {
                self.outstanding.fetch_sub(1, Ordering::AcqRel);
                return handle;
            }
            self.completed.ready.wait(&mut queue);
        }
    }

    /// Return the next terminal handle without blocking
    pub fn poll(&self) -> Option<ResultHandle<V>> {
        let handle = self.completed.queue.lock().pop_front()?;
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        Some(handle)
    }

    /// Wait at most `timeout` for the next terminal handle
    pub fn poll_timeout(&self, timeout: Duration) -> Option<ResultHandle<V>> {
        let Some(deadline) = deadline_after(timeout) else {
            return Some(self.take());
        };
        let mut queue = self.completed.queue.lock();
        loop {
            if let Some(handle) = queue.pop_front() {
                self.outstanding.fetch_sub(1, Ordering::AcqRel);
                return Some(handle);
            }
            if self
                .completed
                .ready
                .wait_until(&mut queue, deadline)
                .timed_out()
            {
                let handle = queue.pop_front()?;
                self.outstanding.fetch_sub(1, Ordering::AcqRel);
                return Some(handle);
            }
        }
    }

    /// Tasks submitted but not yet returned by `take`/`poll`
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }
}

impl<V> std::fmt::Debug for CompletionFeed<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionFeed")
            .field("pool", &self.pool.name())
            .field("outstanding", &self.outstanding.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::TaskState;
    use crate::pool::PoolConfig;

    #[test]
    fn test_results_arrive_in_completion_order() {
        let pool = Arc::new(WorkerPool::new(PoolConfig::fixed(3)).unwrap());
        let feed = CompletionFeed::new(Arc::clone(&pool));
        for delay in [60u64, 5, 30] {
            feed.submit_fn(move |ctx| {
                ctx.sleep(Duration::from_millis(delay))?;
                Ok(delay)
            })
            .unwrap();
        }

        let order: Vec<u64> = (0..3).map(|_| feed.take().get().unwrap()).collect();
        assert_eq!(order, vec![5, 30, 60]);
        pool.drain();
    }

    #[test]
    fn test_poll_is_non_blocking() {
        let pool = Arc::new(WorkerPool::new(PoolConfig::fixed(1)).unwrap());
        let feed: CompletionFeed<u32> = CompletionFeed::new(Arc::clone(&pool));
        assert!(feed.poll().is_none());
        assert!(feed.poll_timeout(Duration::from_millis(10)).is_none());

        feed.submit_fn(|_| Ok(1)).unwrap();
        let handle = feed.poll_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(handle.get().unwrap(), 1);
        assert_eq!(feed.outstanding(), 0);
        pool.drain();
    }

    #[test]
    fn test_poll_with_huge_timeout_waits_for_completion() {
        let pool = Arc::new(WorkerPool::new(PoolConfig::fixed(1)).unwrap());
        let feed: CompletionFeed<u32> = CompletionFeed::new(Arc::clone(&pool));
        feed.submit_fn(|ctx| {
            ctx.sleep(Duration::from_millis(20))?;
            Ok(8)
        })
        .unwrap();
        let handle = feed.poll_timeout(Duration::MAX).unwrap();
        assert_eq!(handle.get().unwrap(), 8);
        assert_eq!(feed.outstanding(), 0);
        pool.drain();
    }

    #[test]
    fn test_failed_and_cancelled_tasks_are_delivered() {
        let pool = Arc::new(WorkerPool::new(PoolConfig::fixed(1)).unwrap());
        let feed: CompletionFeed<u32> = CompletionFeed::new(Arc::clone(&pool));
        feed.submit_fn(|_| anyhow::bail!("broken")).unwrap();
        feed.submit_fn(|ctx| {
            ctx.checkpoint()?;
            ctx.token().cancel();
            ctx.checkpoint()?;
            Ok(0)
        })
        .unwrap();

        let mut states: Vec<TaskState> = (0..2).map(|_| feed.take().state()).collect();
        states.sort_by_key(|state| state.to_string());
        assert_eq!(states, vec![TaskState::Cancelled, TaskState::Failed]);
        pool.drain();
    }

    #[test]
    fn test_rejected_task_never_appears() {
        let pool = Arc::new(WorkerPool::new(PoolConfig::fixed(1)).unwrap());
        pool.drain();
        let feed: CompletionFeed<u32> = CompletionFeed::new(Arc::clone(&pool));
        assert_eq!(
            feed.submit_fn(|_| Ok(1)).unwrap_err(),
            RejectedSubmission::PoolClosed
        );
        assert_eq!(feed.outstanding(), 0);
        assert!(feed.poll_timeout(Duration::from_millis(10)).is_none());
    }
}
