//! Task queue shapes
//!
//! The queue itself is unbounded; capacity and hand-off rules are applied
//! by the pool, which also knows how many workers are idle.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};

use super::config::QueueOrder;
use crate::handle::TaskState;
use crate::task::PendingTask;

struct Prioritized {
    priority: i32,
    seq: u64,
    task: PendingTask,
}

impl PartialEq for Prioritized {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Prioritized {}

impl PartialOrd for Prioritized {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Prioritized {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then earlier submission.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

pub(crate) enum TaskQueue {
    Fifo(VecDeque<PendingTask>),
    Priority {
        heap: BinaryHeap<Prioritized>,
        next_seq: u64,
    },
}

impl TaskQueue {
    pub(crate) fn new(order: QueueOrder) -> Self {
        match order {
            QueueOrder::Fifo => Self::Fifo(VecDeque::new()),
            QueueOrder::Priority => Self::Priority {
                heap: BinaryHeap::new(),
                next_seq: 0,
            },
        }
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            Self::Fifo(queue) => queue.len(),
            Self::Priority { heap, .. } => heap.len(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn push(&mut self, task: PendingTask) {
        match self {
            Self::Fifo(queue) => queue.push_back(task),
            Self::Priority { heap, next_seq } => {
                let seq = *next_seq;
                *next_seq += 1;
                heap.push(Prioritized {
                    priority: task.priority(),
                    seq,
                    task,
                });
            }
        }
    }

    /// Next task to run
    pub(crate) fn pop(&mut self) -> Option<PendingTask> {
        match self {
            Self::Fifo(queue) => queue.pop_front(),
            Self::Priority { heap, .. } => heap.pop().map(|entry| entry.task),
        }
    }

    /// Oldest queued task; priority queues never give one up this way
    pub(crate) fn pop_oldest(&mut self) -> Option<PendingTask> {
        match self {
            Self::Fifo(queue) => queue.pop_front(),
            Self::Priority { .. } => None,
        }
    }

    /// Remove everything, in run order
    pub(crate) fn drain(&mut self) -> Vec<PendingTask> {
        let mut drained = Vec::with_capacity(self.len());
        while let Some(task) = self.pop() {
            drained.push(task);
        }
        drained
    }

    /// Remove tasks whose handles were already cancelled
    pub(crate) fn take_cancelled(&mut self) -> Vec<PendingTask> {
        let is_dead = |task: &PendingTask| task.state() == TaskState::Cancelled;
        match self {
            Self::Fifo(queue) => {
                let (dead, live): (VecDeque<_>, VecDeque<_>) =
                    std::mem::take(queue).into_iter().partition(is_dead);
                *queue = live;
                dead.into_iter().collect()
            }
            Self::Priority { heap, .. } => {
                let (dead, live): (Vec<_>, Vec<_>) = std::mem::take(heap)
                    .into_vec()
                    .into_iter()
                    .partition(|entry| is_dead(&entry.task));
                *heap = BinaryHeap::from(live);
                dead.into_iter().map(|entry| entry.task).collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;

    fn pending(priority: i32) -> PendingTask {
        Task::new(move |_| Ok(priority)).with_priority(priority).bind().0
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = TaskQueue::new(QueueOrder::Fifo);
        let ids: Vec<_> = (0..3)
            .map(|_| {
                let task = pending(0);
                let id = task.id();
                queue.push(task);
                id
            })
            .collect();
        assert_eq!(queue.len(), 3);
        let popped: Vec<_> = queue.drain().iter().map(PendingTask::id).collect();
        assert_eq!(popped, ids);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_priority_order_is_stable() {
        let mut queue = TaskQueue::new(QueueOrder::Priority);
        let low = pending(1);
        let high = pending(9);
        let mid_first = pending(5);
        let mid_second = pending(5);
        let expected = vec![high.id(), mid_first.id(), mid_second.id(), low.id()];

        queue.push(low);
        queue.push(mid_first);
        queue.push(high);
        queue.push(mid_second);

        let popped: Vec<_> = queue.drain().iter().map(PendingTask::id).collect();
        assert_eq!(popped, expected);
    }

    #[test]
    fn test_priority_queue_never_drops_oldest() {
        let mut queue = TaskQueue::new(QueueOrder::Priority);
        queue.push(pending(1));
        assert!(queue.pop_oldest().is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_take_cancelled() {
        let mut queue = TaskQueue::new(QueueOrder::Fifo);
        let (keep, _keep_handle) = Task::new(|_| Ok(1)).bind();
        let (dead, dead_handle) = Task::new(|_| Ok(2)).bind();
        let keep_id = keep.id();
        queue.push(dead);
        queue.push(keep);

        assert!(dead_handle.cancel(false));
        let removed = queue.take_cancelled();
        assert_eq!(removed.len(), 1);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop().map(|t| t.id()), Some(keep_id));
    }
}
