//! Worker pool configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::sizing;
use crate::error::ConfigError;

/// Behavior when a bounded queue is full and no worker can be added
///
/// `Drop` and `DropOldest` are lossy: the discarded task never runs and
/// its handle resolves to `Cancelled`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaturationPolicy {
    /// Refuse the task with [`RejectedSubmission::Saturated`](crate::RejectedSubmission::Saturated)
    #[default]
    Reject,
    /// Discard the new task
    Drop,
    /// Discard the oldest queued task and admit the new one
    DropOldest,
    /// Run the task on the submitting thread
    RunInline,
    /// Block the submitter until space frees up
    Block,
}

impl SaturationPolicy {
    /// True for policies that may discard work
    pub fn is_lossy(self) -> bool {
        matches!(self, Self::Drop | Self::DropOldest)
    }
}

impl std::fmt::Display for SaturationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reject => write!(f, "reject"),
            Self::Drop => write!(f, "drop"),
            Self::DropOldest => write!(f, "drop_oldest"),
            Self::RunInline => write!(f, "run_inline"),
            Self::Block => write!(f, "block"),
        }
    }
}

impl std::str::FromStr for SaturationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "reject" => Ok(Self::Reject),
            "drop" => Ok(Self::Drop),
            "drop_oldest" => Ok(Self::DropOldest),
            "run_inline" => Ok(Self::RunInline),
            "block" => Ok(Self::Block),
            other => Err(format!("unknown saturation policy: {other}")),
        }
    }
}

/// Ordering of the task queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueOrder {
    /// First in, first out
    #[default]
    Fifo,
    /// Highest task priority first, FIFO among equal priorities
    Priority,
}

impl std::str::FromStr for QueueOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fifo" => Ok(Self::Fifo),
            "priority" => Ok(Self::Priority),
            other => Err(format!("unknown queue order: {other}")),
        }
    }
}

/// Worker pool configuration
///
/// `queue_capacity` selects the queue shape: `None` is unbounded,
/// `Some(0)` is a direct hand-off to an idle worker, `Some(n)` admits at
/// most `n` tasks in flight (queued plus held by workers) before the pool
/// grows past its core or applies the saturation policy.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use workyard_engine::{PoolConfig, SaturationPolicy};
///
/// let config = PoolConfig::new(2, 8)
///     .with_name("thumbnails")
///     .with_queue_capacity(64)
///     .with_keep_alive(Duration::from_secs(30))
///     .with_saturation_policy(SaturationPolicy::Block);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Pool name, used as the worker thread-name prefix
    pub name: String,

    /// Workers kept alive even when idle
    pub core_size: usize,

    /// Upper bound on live workers
    pub max_size: usize,

    /// How long a worker above `core_size` may idle before retiring
    #[serde(with = "duration_millis")]
    pub keep_alive: Duration,

    /// Queue capacity (`None` = unbounded, `Some(0)` = direct hand-off,
    /// `Some(n)` = at most `n` queued plus running tasks)
    pub queue_capacity: Option<usize>,

    /// Queue ordering
    pub queue_order: QueueOrder,

    /// What to do when saturated
    pub saturation_policy: SaturationPolicy,

    /// Let core workers retire after `keep_alive` too
    pub allow_core_timeout: bool,

    /// Start all core workers at construction
    pub prestart_core: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let workers = sizing::cpu_bound();
        Self {
            name: "workyard".to_string(),
            core_size: workers,
            max_size: workers,
            keep_alive: Duration::from_secs(60),
            queue_capacity: None,
            queue_order: QueueOrder::Fifo,
            saturation_policy: SaturationPolicy::Reject,
            allow_core_timeout: false,
            prestart_core: false,
        }
    }
}

impl PoolConfig {
    /// Create a configuration with the given core and maximum sizes
    pub fn new(core_size: usize, max_size: usize) -> Self {
        Self {
            core_size,
            max_size,
            ..Default::default()
        }
    }

    /// Fixed number of workers with an unbounded queue
    pub fn fixed(workers: usize) -> Self {
        Self::new(workers, workers)
    }

    /// One worker with an unbounded queue: strict serial execution
    pub fn single_thread() -> Self {
        Self::fixed(1)
    }

    /// Set the pool name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the keep-alive duration
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Bound the tasks in flight (queued plus running)
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    /// Hand tasks directly to idle workers without queueing
    pub fn with_direct_handoff(self) -> Self {
        self.with_queue_capacity(0)
    }

    /// Remove the queue bound
    pub fn unbounded(mut self) -> Self {
        self.queue_capacity = None;
        self
    }

    /// Set the queue ordering
    pub fn with_queue_order(mut self, order: QueueOrder) -> Self {
        self.queue_order = order;
        self
    }

    /// Set the saturation policy
    pub fn with_saturation_policy(mut self, policy: SaturationPolicy) -> Self {
        self.saturation_policy = policy;
        self
    }

    /// Let core workers retire when idle
    pub fn with_allow_core_timeout(mut self, allow: bool) -> Self {
        self.allow_core_timeout = allow;
        self
    }

    /// Start all core workers at construction
    pub fn with_prestart_core(mut self, prestart: bool) -> Self {
        self.prestart_core = prestart;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_size == 0 {
            return Err(ConfigError::ZeroMaxSize);
        }
        if self.core_size > self.max_size {
            return Err(ConfigError::MaxBelowCore {
                core: self.core_size,
                max: self.max_size,
            });
        }
        if self.queue_order == QueueOrder::Priority
            && self.saturation_policy == SaturationPolicy::DropOldest
        {
            return Err(ConfigError::DropOldestWithPriority);
        }
        Ok(())
    }

    /// Load configuration from `WORKYARD_*` environment variables
    ///
    /// Unset variables keep their defaults; malformed ones are errors.
    /// - `WORKYARD_POOL_NAME`
    /// - `WORKYARD_CORE_SIZE`, `WORKYARD_MAX_SIZE`
    /// - `WORKYARD_KEEP_ALIVE_MS`
    /// - `WORKYARD_QUEUE_CAPACITY` (`unbounded` or a number)
    /// - `WORKYARD_QUEUE_ORDER` (`fifo` or `priority`)
    /// - `WORKYARD_SATURATION_POLICY`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(name) = lookup("WORKYARD_POOL_NAME") {
            config.name = name;
        }

        let core = parse_var::<usize>(&lookup, "WORKYARD_CORE_SIZE")?;
        let max = parse_var::<usize>(&lookup, "WORKYARD_MAX_SIZE")?;
        match (core, max) {
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

        if let Some(millis) = parse_var::<u64>(&lookup, "WORKYARD_KEEP_ALIVE_MS")? {
            config.keep_alive = Duration::from_millis(millis);
        }

        if let Some(raw) = lookup("WORKYARD_QUEUE_CAPACITY") {
            config.queue_capacity = if raw.trim().eq_ignore_ascii_case("unbounded") {
                None
            } else {
                Some(raw.trim().parse().map_err(|_| invalid("WORKYARD_QUEUE_CAPACITY", &raw))?)
            };
        }

        if let Some(order) = parse_var::<QueueOrder>(&lookup, "WORKYARD_QUEUE_ORDER")? {
            config.queue_order = order;
        }

        if let Some(policy) = parse_var::<SaturationPolicy>(&lookup, "WORKYARD_SATURATION_POLICY")? {
            config.saturation_policy = policy;
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| invalid(var, &raw)),
        None => Ok(None),
    }
}

fn invalid(var: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnv {
        var: var.to_string(),
        value: value.to_string(),
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
