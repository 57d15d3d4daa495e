// Workyard CLI
//
// Design Decision: Use clap derive for ergonomic argument parsing.
// Design Decision: Each subcommand drives one engine behavior end to end and
// prints a report; text/json/yaml output formats for scripting.
// Design Decision: Pool flags override the subcommand's own pool shape, so
// the same scenario can be replayed under a different saturation policy.

mod commands;
mod output;
mod telemetry;

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use workyard_engine::{PoolConfig, SaturationPolicy};

#[derive(Parser)]
#[command(name = "workyard")]
#[command(about = "Workyard CLI - Drive the bounded task-execution engine")]
#[command(version)]
pub struct Cli {
    /// Output format
    #[arg(long, short, global = true, default_value = "text", value_parser = ["text", "json", "yaml"])]
    pub output: String,

    #[command(flatten)]
    pub pool: PoolArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Pool overrides shared by every subcommand
#[derive(Args, Debug, Clone, Default)]
pub struct PoolArgs {
    /// Core worker count
    #[arg(long, global = true)]
    pub core_size: Option<usize>,

    /// Maximum worker count
    #[arg(long, global = true)]
    pub max_size: Option<usize>,

    /// Tasks in flight (queued plus running): a number, 0 for direct hand-off, or "unbounded"
    #[arg(long, global = true)]
    pub queue_capacity: Option<String>,

    /// Saturation policy (reject, drop, drop-oldest, run-inline, block)
    #[arg(long, global = true)]
    pub policy: Option<SaturationPolicy>,

    /// Idle time before surplus workers retire, in milliseconds
    #[arg(long, global = true)]
    pub keep_alive_ms: Option<u64>,
}

impl PoolArgs {
    /// Apply the overrides on top of a base configuration
    pub fn apply(&self, mut config: PoolConfig) -> Result<PoolConfig> {
        match (self.core_size, self.max_size) {
            (Some(core), Some(max)) => {
                config.core_size = core;
                config.max_size = max;
            }
            (Some(core), None) => {
                config.core_size = core;
                config.max_size = config.max_size.max(core);
            }
            (None, Some(max)) => {
                config.max_size = max;
                config.core_size = config.core_size.min(max);
            }
            (None, None) => {}
        }

        if let Some(raw) = &self.queue_capacity {
            config.queue_capacity = if raw.eq_ignore_ascii_case("unbounded") {
                None
            } else {
                match raw.parse() {
                    Ok(capacity) => Some(capacity),
                    Err(_) => bail!("invalid --queue-capacity: {raw}"),
                }
            };
        }

        if let Some(policy) = self.policy {
            config.saturation_policy = policy;
        }
        if let Some(millis) = self.keep_alive_ms {
            config.keep_alive = Duration::from_millis(millis);
        }

        config.validate().context("Invalid pool configuration")?;
        Ok(config)
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Collect results in completion order from a one-worker pool
    Feed {
        /// Tasks to submit
        #[arg(long, default_value = "3")]
        tasks: u32,

        /// Time each task sleeps, in milliseconds
        #[arg(long, default_value = "50")]
        sleep_ms: u64,
    },

    /// Overfill a bounded pool and report which submissions were refused
    Saturate {
        /// Tasks to submit back-to-back
        #[arg(long, default_value = "5")]
        tasks: u32,

        /// Time each task holds its worker, in milliseconds
        #[arg(long, default_value = "200")]
        hold_ms: u64,
    },

    /// Ask many concurrent callers for the same cached computation
    SingleFlight {
        /// Concurrent callers
        #[arg(long, default_value = "100")]
        callers: usize,

        /// Time the computation takes, in milliseconds
        #[arg(long, default_value = "100")]
        compute_ms: u64,
    },

    /// Interrupt a running task and measure how fast it stops
    Cancel {
        /// Interval at which the task checks for cancellation, in milliseconds
        #[arg(long, default_value = "5")]
        poll_ms: u64,
    },

    /// Terminate a busy pool and report the never-started tasks
    Terminate {
        /// Tasks occupying workers
        #[arg(long, default_value = "2")]
        running: usize,

        /// Tasks left waiting in the queue
        #[arg(long, default_value = "5")]
        queued: usize,
    },

    /// Run a random workload and print pool metrics
    Load {
        /// Tasks to submit
        #[arg(long, default_value = "200")]
        tasks: usize,

        /// Upper bound on simulated work per task, in milliseconds
        #[arg(long, default_value = "20")]
        max_work_ms: u64,

        /// Probability that a task fails
        #[arg(long, default_value = "0.05")]
        fail_rate: f64,
    },
}

fn main() -> Result<()> {
    telemetry::init_telemetry(telemetry::TelemetryConfig::from_env());

    let cli = Cli::parse();
    let output_format = output::OutputFormat::from_str(&cli.output);

    match cli.command {
        Commands::Feed { tasks, sleep_ms } => {
            commands::feed::run(&cli.pool, output_format, tasks, sleep_ms)
        }
        Commands::Saturate { tasks, hold_ms } => {
            commands::saturate::run(&cli.pool, output_format, tasks, hold_ms)
        }
        Commands::SingleFlight {
            callers,
            compute_ms,
        } => commands::single_flight::run(&cli.pool, output_format, callers, compute_ms),
        Commands::Cancel { poll_ms } => commands::cancel::run(&cli.pool, output_format, poll_ms),
        Commands::Terminate { running, queued } => {
            commands::terminate::run(&cli.pool, output_format, running, queued)
        }
        Commands::Load {
            tasks,
            max_work_ms,
            fail_rate,
        } => commands::load::run(&cli.pool, output_format, tasks, max_work_ms, fail_rate),
    }
}
