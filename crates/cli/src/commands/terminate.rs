// Terminate command: stop a busy pool immediately

use std::collections::BTreeSet;
use std::sync::mpsc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::Serialize;
use tracing::info;
use workyard_engine::{Cancelled, PoolConfig, TaskId, TaskState, WorkerPool};

use crate::output::{print_field, OutputFormat, Table};
use crate::PoolArgs;

/// How long a running task parks before finishing on its own
const PARK_LIMIT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct RunningTask {
    task_id: String,
    final_state: TaskState,
}

#[derive(Debug, Serialize)]
struct TerminateReport {
    queued: usize,
    returned: usize,
    returned_match_queued: bool,
    running: Vec<RunningTask>,
    terminated: bool,
}

pub fn run(pool_args: &PoolArgs, output: OutputFormat, running: usize, queued: usize) -> Result<()> {
    let config = pool_args.apply(PoolConfig::fixed(running.max(1)).with_name("terminate").unbounded())?;
    let pool = WorkerPool::new(config)?;
    let (started_tx, started_rx) = mpsc::channel();

    let mut parked = Vec::with_capacity(running);
    for _ in 0..running {
        let started_tx = started_tx.clone();
        parked.push(pool.submit_fn(move |ctx| -> anyhow::Result<()> {
            let _ = started_tx.send(());
            if ctx.token().wait_timeout(PARK_LIMIT) {
                return Err(Cancelled.into());
            }
            Ok(())
        })?);
    }
    for _ in 0..running {
        started_rx
            .recv_timeout(Duration::from_secs(10))
            .map_err(|_| anyhow!("running task did not start"))?;
    }

    let mut waiting = BTreeSet::new();
    for index in 0..queued {
        let handle = pool.submit_fn(move |_| Ok(index))?;
        waiting.insert(handle.id());
    }

    info!(running, queued, "Terminating pool");
    let returned = pool.terminate_now();
    let returned_ids: BTreeSet<TaskId> = returned.iter().map(|task| task.id()).collect();
    let terminated = pool.await_termination(Duration::from_secs(10));

    let report = TerminateReport {
        queued,
        returned: returned.len(),
        returned_match_queued: returned_ids == waiting,
        running: parked
            .iter()
            .map(|handle| RunningTask {
                task_id: handle.id().to_string(),
                final_state: handle.wait(),
            })
            .collect(),
        terminated,
    };
    drop(returned);

    if output.is_text() {
        print_field("Queued", &report.queued.to_string());
        print_field("Returned", &report.returned.to_string());
        print_field("Match queued", &report.returned_match_queued.to_string());
        print_field("Terminated", &report.terminated.to_string());
        println!();
        let table = Table::print_header(&[("RUNNING TASK", 36), ("FINAL", 10)]);
        for task in &report.running {
            let state = task.final_state.to_string();
            table.print_row([task.task_id.as_str(), state.as_str()]);
        }
    } else {
        output.print_value(&report)?;
    }

    Ok(())
}
