//! Cache eviction policy and metrics

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bounds applied to terminal cache entries
///
/// In-flight entries are never evicted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionPolicy {
    /// Keep at most this many entries, evicting the oldest terminal ones first
    #[serde(default)]
    pub max_entries: Option<usize>,

    /// Evict terminal entries older than this
    #[serde(default, with = "option_duration_millis")]
    pub ttl: Option<Duration>,
}

impl EvictionPolicy {
    /// Keep everything until explicitly evicted
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Set the entry bound
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    /// Set the time-to-live
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// True if neither bound is set
    pub fn is_unbounded(&self) -> bool {
        self.max_entries.is_none() && self.ttl.is_none()
    }
}

#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    cleanups: AtomicU64,
}

impl CacheCounters {
    pub(crate) fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn evicted(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn cleaned_up(&self) {
        self.cleanups.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, entries: usize) -> CacheMetrics {
        CacheMetrics {
            entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            cleanups: self.cleanups.load(Ordering::Relaxed),
        }
    }
}

/// Read-only snapshot of cache activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetrics {
    /// Entries currently held
    pub entries: usize,
    /// Lookups answered by an existing entry
    pub hits: u64,
    /// Lookups that started a computation
    pub misses: u64,
    /// Terminal entries removed by eviction
    pub evictions: u64,
    /// Cancelled entries replaced on a later lookup
    pub cleanups: u64,
}

impl CacheMetrics {
    /// Fraction of lookups answered by an existing entry
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Serde support for optional Duration as milliseconds
mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.map(|d| d.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
