// Completion-order feed command

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;
use workyard_engine::{CompletionFeed, PoolConfig, TaskState, WorkerPool};

use crate::output::{millis, print_field, OutputFormat, Table};
use crate::PoolArgs;

#[derive(Debug, Serialize)]
struct FeedEntry {
    task_id: String,
    state: TaskState,
    value: Option<u32>,
    finished_after_ms: u128,
}

#[derive(Debug, Serialize)]
struct FeedReport {
    pool: PoolConfig,
    results: Vec<FeedEntry>,
    total_ms: u128,
}

pub fn run(pool_args: &PoolArgs, output: OutputFormat, tasks: u32, sleep_ms: u64) -> Result<()> {
    let config = pool_args.apply(PoolConfig::fixed(1).with_name("feed"))?;
    let pool = Arc::new(WorkerPool::new(config.clone())?);
    let feed = CompletionFeed::new(Arc::clone(&pool));

    info!(tasks, sleep_ms, "Submitting tasks to completion feed");
    let started = Instant::now();
    for index in 0..tasks {
        feed.submit_fn(move |ctx| {
            ctx.sleep(Duration::from_millis(sleep_ms))?;
            Ok(index)
        })
        .with_context(|| format!("Failed to submit task {index}"))?;
    }

    let mut results = Vec::with_capacity(tasks as usize);
    while feed.outstanding() > 0 {
        let handle = feed.take();
        results.push(FeedEntry {
            task_id: handle.id().to_string(),
            state: handle.state(),
            value: handle.try_get().and_then(|outcome| outcome.ok()),
            finished_after_ms: started.elapsed().as_millis(),
        });
    }
    let total = started.elapsed();
    pool.drain();

    let report = FeedReport {
        pool: config,
        results,
        total_ms: total.as_millis(),
    };

    if output.is_text() {
        let table = Table::print_header(&[("TASK", 36), ("STATE", 10), ("VALUE", 6), ("AFTER", 8)]);
        for entry in &report.results {
            let value = entry
                .value
                .map(|v| v.to_string())
                .unwrap_or_else(|| "-".to_string());
            let state = entry.state.to_string();
            let after = format!("{}ms", entry.finished_after_ms);
            table.print_row([entry.task_id.as_str(), state.as_str(), value.as_str(), after.as_str()]);
        }
        println!();
        print_field("Total", &millis(total));
    } else {
        output.print_value(&report)?;
    }

    Ok(())
}
