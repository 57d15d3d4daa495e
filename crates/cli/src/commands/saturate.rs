// Saturation command: submit more work than the pool admits

use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tracing::info;
use workyard_engine::{PoolConfig, PoolMetrics, SaturationPolicy, Task, TaskState, WorkerPool};

use crate::output::{print_field, OutputFormat, Table};
use crate::PoolArgs;

#[derive(Debug, Serialize)]
struct Submission {
    index: u32,
    accepted: bool,
    /// Rejection reason, if refused
    #[serde(skip_serializing_if = "Option::is_none")]
    rejection: Option<String>,
    /// State right after submission
    #[serde(skip_serializing_if = "Option::is_none")]
    initial_state: Option<TaskState>,
    /// State once the pool drained
    #[serde(skip_serializing_if = "Option::is_none")]
    final_state: Option<TaskState>,
}

#[derive(Debug, Serialize)]
struct SaturateReport {
    pool: PoolConfig,
    accepted: usize,
    rejected: usize,
    submissions: Vec<Submission>,
    metrics: PoolMetrics,
}

pub fn run(pool_args: &PoolArgs, output: OutputFormat, tasks: u32, hold_ms: u64) -> Result<()> {
    let base = PoolConfig::new(1, 1)
        .with_name("saturate")
        .with_queue_capacity(2)
        .with_saturation_policy(SaturationPolicy::Reject);
    let config = pool_args.apply(base)?;
    let pool = WorkerPool::new(config.clone())?;

    info!(tasks, policy = %config.saturation_policy, "Submitting tasks back-to-back");
    let mut submissions = Vec::with_capacity(tasks as usize);
    let mut handles = Vec::new();
    for index in 0..tasks {
        let task = Task::new(move |ctx| {
            ctx.sleep(Duration::from_millis(hold_ms))?;
            Ok(index)
        });
        match pool.submit(task) {
            Ok(handle) => {
                submissions.push(Submission {
                    index,
                    accepted: true,
                    rejection: None,
                    initial_state: Some(handle.state()),
                    final_state: None,
                });
                handles.push((submissions.len() - 1, handle));
            }
            Err(err) => submissions.push(Submission {
                index,
                accepted: false,
                rejection: Some(err.to_string()),
                initial_state: None,
                final_state: None,
            }),
        }
    }

    pool.drain();
    for (slot, handle) in handles {
        submissions[slot].final_state = Some(handle.state());
    }

    let accepted = submissions.iter().filter(|s| s.accepted).count();
    let report = SaturateReport {
        pool: config,
        accepted,
        rejected: submissions.len() - accepted,
        submissions,
        metrics: pool.metrics(),
    };

    if output.is_text() {
        print_field("Policy", &report.pool.saturation_policy.to_string());
        print_field("Accepted", &report.accepted.to_string());
        print_field("Rejected", &report.rejected.to_string());
        println!();
        let table = Table::print_header(&[("#", 4), ("RESULT", 44), ("FINAL", 10)]);
        for submission in &report.submissions {
            let result = match &submission.rejection {
                Some(reason) => format!("rejected: {reason}"),
                None => "accepted".to_string(),
            };
            let final_state = submission
                .final_state
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string());
            let index = submission.index.to_string();
            table.print_row([index.as_str(), result.as_str(), final_state.as_str()]);
        }
    } else {
        output.print_value(&report)?;
    }

    Ok(())
}
