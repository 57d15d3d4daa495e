// Cancellation command: interrupt a running task

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use serde::Serialize;
use tracing::info;
use workyard_engine::{PoolConfig, TaskError, TaskState, WorkerPool};

use crate::output::{millis, print_field, OutputFormat};
use crate::PoolArgs;

/// Upper bound on polls before the task gives up waiting to be interrupted
const MAX_POLLS: u64 = 1_000_000;

#[derive(Debug, Serialize)]
struct CancelReport {
    task_id: String,
    poll_interval_ms: u64,
    iterations: u64,
    cancel_accepted: bool,
    final_state: TaskState,
    stop_latency_us: u128,
}

pub fn run(pool_args: &PoolArgs, output: OutputFormat, poll_ms: u64) -> Result<()> {
    let config = pool_args.apply(PoolConfig::fixed(1).with_name("cancel"))?;
    let pool = WorkerPool::new(config)?;
    let poll = Duration::from_millis(poll_ms);
    let (started_tx, started_rx) = mpsc::channel();

    let polls = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&polls);
    let handle = pool.submit_fn(move |ctx| -> anyhow::Result<u64> {
        let _ = started_tx.send(());
        for _ in 0..MAX_POLLS {
            ctx.checkpoint()?;
            counter.fetch_add(1, Ordering::Relaxed);
            thread::sleep(poll);
        }
        Ok(MAX_POLLS)
    })?;

    started_rx
        .recv_timeout(Duration::from_secs(10))
        .map_err(|_| anyhow!("task did not start"))?;
    thread::sleep(poll * 3);

    info!(task_id = %handle.id(), "Interrupting running task");
    let requested = Instant::now();
    let cancel_accepted = handle.cancel(true);
    let outcome = handle.get_timeout(Duration::from_secs(10));
    let latency = requested.elapsed();
    pool.drain();

    if matches!(outcome, Err(TaskError::TimedOut)) {
        return Err(anyhow!("task ignored cancellation for 10s"));
    }

    let report = CancelReport {
        task_id: handle.id().to_string(),
        poll_interval_ms: poll_ms,
        iterations: polls.load(Ordering::Relaxed),
        cancel_accepted,
        final_state: handle.state(),
        stop_latency_us: latency.as_micros(),
    };

    if output.is_text() {
        print_field("Task", &report.task_id);
        print_field("Cancel accepted", &report.cancel_accepted.to_string());
        print_field("Final state", &report.final_state.to_string());
        print_field("Polls before stop", &report.iterations.to_string());
        print_field("Stop latency", &millis(latency));
        print_field("Poll interval", &millis(poll));
    } else {
        output.print_value(&report)?;
    }

    Ok(())
}
