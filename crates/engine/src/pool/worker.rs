//! Worker threads
//!
//! Each worker runs an optional first task, then pulls from the queue until
//! [`Shared::next_task`](super::Shared) tells it to exit. A panic escaping
//! the loop itself (never a task body, which is isolated) breaks the pool.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use tracing::{debug, warn};

use super::{Next, PoolState, Shared};
use crate::error::TaskFailure;
use crate::task::{panic_message, PendingTask};

/// Thread a task executes on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Runner {
    /// A pool worker; the task holds one in-flight slot
    Worker,
    /// The submitting thread (`RunInline`)
    Caller,
}

/// Spawn a worker thread for a slot already reserved in the pool state
pub(super) fn spawn(
    shared: &Arc<Shared>,
    worker_id: u64,
    first: Option<PendingTask>,
) -> std::io::Result<()> {
    let shared = Arc::clone(shared);
    thread::Builder::new()
        .name(format!("{}-worker-{}", shared.name, worker_id))
        .spawn(move || run(shared, worker_id, first))
        .map(|_| ())
}

fn run(shared: Arc<Shared>, worker_id: u64, first: Option<PendingTask>) {
    debug!(pool = %shared.name, worker_id, "worker started");

    match panic::catch_unwind(AssertUnwindSafe(|| work_loop(&shared, first))) {
        Ok(terminated) => {
            debug!(pool = %shared.name, worker_id, "worker exited");
            if terminated {
                shared.fire_terminated();
            }
        }
        Err(payload) => shared.mark_broken(&panic_message(payload.as_ref()), true),
    }
}

/// Returns true if this worker's exit terminated the pool
fn work_loop(shared: &Shared, mut first: Option<PendingTask>) -> bool {
    loop {
        let task = match first.take() {
            Some(task) => task,
            None => match shared.next_task() {
                Next::Run(task) => task,
                Next::Exit { terminated } => return terminated,
            },
        };
        run_task(shared, task, Runner::Worker);
    }
}

/// Execute one task on the current thread
///
/// Used by workers and by the `RunInline` saturation policy.
pub(super) fn run_task(shared: &Shared, task: PendingTask, runner: Runner) {
    if !task.job.try_start() {
        // Cancelled while queued.
        shared.counters.finished(task.state());
        if runner == Runner::Worker {
            release_slot(&mut shared.state.lock(), shared);
        }
        return;
    }

    let ctx = task.context();
    let task_id = ctx.id();
    {
        let mut state = shared.state.lock();
        state.active += 1;
        if state.stop {
            ctx.token().cancel();
        }
        state.running.insert(task_id, ctx.token().clone());
    }
    debug!(pool = %shared.name, %task_id, queued_for = ?ctx.queued_for(), "task started");

    let final_state = match &shared.hooks.before_execute {
        Some(hook) => match panic::catch_unwind(AssertUnwindSafe(|| hook(&ctx))) {
            Ok(()) => task.job.run(&ctx),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(pool = %shared.name, %task_id, %message, "before_execute hook panicked");
                task.job.fail(TaskFailure::msg(format!(
                    "before-execute hook panicked: {message}"
                )))
            }
        },
        None => task.job.run(&ctx),
    };

    if let Some(hook) = &shared.hooks.after_execute {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| hook(&ctx, final_state))) {
            let message = panic_message(payload.as_ref());
            warn!(pool = %shared.name, %task_id, %message, "after_execute hook panicked");
        }
    }

    shared.counters.finished(final_state);
    {
        let mut state = shared.state.lock();
        state.active -= 1;
        state.running.remove(&task_id);
        if runner == Runner::Worker {
            release_slot(&mut state, shared);
        }
    }
    debug!(pool = %shared.name, %task_id, state = %final_state, elapsed = ?ctx.elapsed(), "task finished");
}

/// Give back the in-flight slot a worker task held
fn release_slot(state: &mut PoolState, shared: &Shared) {
    state.busy -= 1;
    shared.space_available.notify_all();
}
