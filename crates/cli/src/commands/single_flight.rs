// Single-flight cache command

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use tracing::info;
use workyard_engine::{CacheMetrics, PoolConfig, SingleFlightCache, WorkerPool};

use crate::output::{millis, print_field, OutputFormat};
use crate::PoolArgs;

const KEY: &str = "x";

#[derive(Debug, Serialize)]
struct SingleFlightReport {
    callers: usize,
    computations: usize,
    distinct_results: Vec<String>,
    elapsed_ms: u128,
    cache: CacheMetrics,
}

pub fn run(
    pool_args: &PoolArgs,
    output: OutputFormat,
    callers: usize,
    compute_ms: u64,
) -> Result<()> {
    let config = pool_args.apply(PoolConfig::new(4, 8).with_name("single-flight"))?;
    let pool = Arc::new(WorkerPool::new(config)?);
    let cache: Arc<SingleFlightCache<String, String>> =
        Arc::new(SingleFlightCache::new(Arc::clone(&pool)));
    let computations = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(callers.max(1)));

    info!(callers, key = KEY, "Starting concurrent lookups");
    let started = Instant::now();
    let threads: Vec<_> = (0..callers)
        .map(|caller| {
            let cache = Arc::clone(&cache);
            let computations = Arc::clone(&computations);
            let barrier = Arc::clone(&barrier);
            thread::Builder::new()
                .name(format!("caller-{caller}"))
                .spawn(move || -> Result<String> {
                    barrier.wait();
                    let handle = cache.get_or_compute(KEY.to_string(), move |ctx| {
                        computations.fetch_add(1, Ordering::SeqCst);
                        ctx.sleep(Duration::from_millis(compute_ms))?;
                        Ok(format!("value computed by task {}", ctx.id()))
                    })?;
                    Ok(handle.get()?)
                })
                .context("Failed to spawn caller thread")
        })
        .collect::<Result<_>>()?;

    let mut distinct = BTreeSet::new();
    for caller in threads {
        let value = caller
            .join()
            .map_err(|_| anyhow!("caller thread panicked"))??;
        distinct.insert(value);
    }
    let elapsed = started.elapsed();
    pool.drain();

    let report = SingleFlightReport {
        callers,
        computations: computations.load(Ordering::SeqCst),
        distinct_results: distinct.into_iter().collect(),
        elapsed_ms: elapsed.as_millis(),
        cache: cache.metrics(),
    };

    if output.is_text() {
        print_field("Callers", &report.callers.to_string());
        print_field("Computations", &report.computations.to_string());
        print_field("Distinct results", &report.distinct_results.len().to_string());
        if let Some(value) = report.distinct_results.first() {
            print_field("Result", value);
        }
        print_field(
            "Cache hits/misses",
            &format!("{}/{}", report.cache.hits, report.cache.misses),
        );
        print_field("Elapsed", &millis(elapsed));
    } else {
        output.print_value(&report)?;
    }

    Ok(())
}
