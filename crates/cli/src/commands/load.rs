// Load command: random workload against an environment-configured pool

use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use futures::future::join_all;
use rand::Rng;
use serde::Serialize;
use tracing::{info, warn};
use workyard_engine::{PoolConfig, PoolMetrics, TaskError, WorkerPool};

use crate::output::{millis, print_field, OutputFormat};
use crate::PoolArgs;

#[derive(Debug, Default, Serialize)]
struct Outcomes {
    completed: usize,
    failed: usize,
    cancelled: usize,
    rejected: usize,
}

#[derive(Debug, Serialize)]
struct LoadReport {
    pool: PoolConfig,
    tasks: usize,
    elapsed_ms: u128,
    throughput_per_sec: f64,
    outcomes: Outcomes,
    metrics: PoolMetrics,
}

pub fn run(
    pool_args: &PoolArgs,
    output: OutputFormat,
    tasks: usize,
    max_work_ms: u64,
    fail_rate: f64,
) -> Result<()> {
    if !(0.0..=1.0).contains(&fail_rate) {
        bail!("--fail-rate must be between 0 and 1, got {fail_rate}");
    }

    let base = PoolConfig::from_env().context("Failed to read pool configuration")?;
    let config = pool_args.apply(base)?;
    let pool = WorkerPool::new(config.clone())?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .context("Failed to build runtime")?;

    info!(tasks, max_work_ms, fail_rate, pool = %config.name, "Starting load run");
    let started = Instant::now();
    let mut rng = rand::thread_rng();
    let mut outcomes = Outcomes::default();
    let mut handles = Vec::with_capacity(tasks);
    for index in 0..tasks {
        let work = Duration::from_millis(rng.gen_range(0..=max_work_ms));
        let fails = rng.gen_bool(fail_rate);
        let submitted = pool.submit_fn(move |ctx| {
            ctx.sleep(work)?;
            if fails {
                bail!("simulated failure in task {index}");
            }
            Ok(work.as_millis() as u64)
        });
        match submitted {
            Ok(handle) => handles.push(handle),
            Err(err) => {
                warn!(index, error = %err, "Submission refused");
                outcomes.rejected += 1;
            }
        }
    }

    let results = runtime.block_on(join_all(handles.iter().map(|h| h.wait_async())));
    let elapsed = started.elapsed();
    for result in results {
        match result {
            Ok(_) => outcomes.completed += 1,
            Err(TaskError::Cancelled) => outcomes.cancelled += 1,
            Err(_) => outcomes.failed += 1,
        }
    }
    pool.drain();

    let report = LoadReport {
        pool: config,
        tasks,
        elapsed_ms: elapsed.as_millis(),
        throughput_per_sec: tasks as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
        outcomes,
        metrics: pool.metrics(),
    };

    if output.is_text() {
        print_field("Pool", &report.pool.name);
        print_field("Policy", &report.pool.saturation_policy.to_string());
        print_field(
            "Workers",
            &format!("{}..{}", report.pool.core_size, report.pool.max_size),
        );
        print_field("Tasks", &report.tasks.to_string());
        print_field("Elapsed", &millis(elapsed));
        print_field("Throughput", &format!("{:.1}/s", report.throughput_per_sec));
        println!();
        print_field("Completed", &report.outcomes.completed.to_string());
        print_field("Failed", &report.outcomes.failed.to_string());
        print_field("Cancelled", &report.outcomes.cancelled.to_string());
        print_field("Rejected", &report.outcomes.rejected.to_string());
        print_field("Dropped", &report.metrics.dropped.to_string());
        print_field("Largest pool", &report.metrics.largest_pool_size.to_string());
    } else {
        output.print_value(&report)?;
    }

    Ok(())
}
