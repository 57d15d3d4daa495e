//! Single-flight result cache
//!
//! Maps a key to the [`ResultHandle`] of the one computation for that key.
//! Concurrent callers asking for the same key share that handle, so the
//! computation runs at most once at a time per key.
//!
//! ```text
//! get_or_compute(k) ──► entry(k) ──┬─ live entry ──────────► hit: clone handle
//!                                  │
//!                                  ├─ cancelled / expired ─► replace ─┐
//!                                  │                                  ├─► submit to pool
//!                                  └─ vacant ──────────────► insert ──┘   (lock released)
//! ```
//!
//! Cancelled entries are replaced lazily on the next lookup for their key.
//! Eviction only ever removes terminal entries.

mod eviction;

use std::hash::Hash;
use std::sync::Arc;
use std::time::Instant;

use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use tracing::debug;

pub use eviction::{CacheMetrics, EvictionPolicy};

use self::eviction::CacheCounters;
use crate::error::RejectedSubmission;
use crate::handle::{ResultHandle, TaskState};
use crate::pool::WorkerPool;
use crate::task::{Fingerprint, Task, TaskContext};

struct Entry<V> {
    handle: ResultHandle<V>,
    inserted_at: Instant,
}

impl<V> Entry<V> {
    fn new(handle: ResultHandle<V>) -> Self {
        Self {
            handle,
            inserted_at: Instant::now(),
        }
    }

    fn is_reusable(&self, policy: &EvictionPolicy) -> bool {
        match self.handle.state() {
            TaskState::Cancelled => false,
            state if state.is_terminal() => policy
                .ttl
                .map_or(true, |ttl| self.inserted_at.elapsed() < ttl),
            _ => true,
        }
    }
}

enum Lookup<V> {
    Hit(ResultHandle<V>),
    Miss { replaced: Option<Entry<V>> },
}

/// Fingerprint-keyed cache guaranteeing one computation per key
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use workyard_engine::{PoolConfig, SingleFlightCache, WorkerPool};
///
/// let pool = Arc::new(WorkerPool::new(PoolConfig::fixed(2)).unwrap());
/// let cache = SingleFlightCache::new(Arc::clone(&pool));
///
/// let first = cache.get_or_compute("answer", |_| Ok(42)).unwrap();
/// let second = cache.get_or_compute("answer", |_| Ok(0)).unwrap();
/// assert!(first.ptr_eq(&second));
/// assert_eq!(second.get().unwrap(), 42);
/// assert_eq!(cache.metrics().hits, 1);
/// ```
pub struct SingleFlightCache<K, V> {
    pool: Arc<WorkerPool>,
    entries: DashMap<K, Entry<V>>,
    policy: EvictionPolicy,
    counters: CacheCounters,
}

impl<K, V> SingleFlightCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Create a cache with no eviction bounds
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        Self::with_policy(pool, EvictionPolicy::default())
    }

    /// Create a cache with an eviction policy
    pub fn with_policy(pool: Arc<WorkerPool>, policy: EvictionPolicy) -> Self {
        Self {
            pool,
            entries: DashMap::new(),
            policy,
            counters: CacheCounters::default(),
        }
    }

    /// Pool computations run on
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Eviction policy in effect
    pub fn policy(&self) -> &EvictionPolicy {
        &self.policy
    }

    /// Return the handle for `key`, starting `compute` only if no live
    /// entry exists
    ///
    /// An entry whose handle ended `Cancelled` (or a terminal entry past its
    /// TTL) is replaced by a fresh computation. If the pool rejects the
    /// computation, the new entry is removed again and the rejection is
    /// returned.
    pub fn get_or_compute<F>(
        &self,
        key: K,
        compute: F,
    ) -> Result<ResultHandle<V>, RejectedSubmission>
    where
        F: FnOnce(&TaskContext) -> anyhow::Result<V> + Send + 'static,
    {
        let fingerprint = Fingerprint::of(&key);
        let (pending, handle) = Task::new(compute).with_fingerprint(fingerprint).bind();

        let lookup = match self.entries.entry(key.clone()) {
            MapEntry::Occupied(mut occupied) => {
                if occupied.get().is_reusable(&self.policy) {
                    Lookup::Hit(occupied.get().handle.clone())
                } else {
                    let previous = occupied.insert(Entry::new(handle.clone()));
                    Lookup::Miss {
                        replaced: Some(previous),
                    }
                }
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(Entry::new(handle.clone()));
                Lookup::Miss { replaced: None }
            }
        };

        match lookup {
            Lookup::Hit(existing) => {
                self.counters.hit();
                // Lost to an existing computation; the local attempt never runs.
                drop(pending);
                Ok(existing)
            }
            Lookup::Miss { replaced } => {
                self.counters.miss();
                if let Some(previous) = replaced {
                    if previous.handle.is_cancelled() {
                        self.counters.cleaned_up();
                        debug!(%fingerprint, "replacing cancelled cache entry");
                    }
                }

                if let Err(err) = self.pool.resubmit(pending) {
                    self.entries
                        .remove_if(&key, |_, entry| entry.handle.ptr_eq(&handle));
                    return Err(err);
                }
                debug!(%fingerprint, task_id = %handle.id(), "cache miss; computation submitted");

                self.run_eviction();
                Ok(handle)
            }
        }
    }

    /// Peek at the entry for `key` without counting a hit or miss
    pub fn get(&self, key: &K) -> Option<ResultHandle<V>> {
        self.entries.get(key).map(|entry| entry.handle.clone())
    }

    /// Remove the entry for `key` if its computation is terminal
    ///
    /// Returns true if an entry was removed.
    pub fn evict(&self, key: &K) -> bool {
        let removed = self
            .entries
            .remove_if(key, |_, entry| entry.handle.is_done())
            .is_some();
        if removed {
            self.counters.evicted(1);
        }
        removed
    }

    /// Apply the eviction policy to terminal entries
    ///
    /// Expired entries go first, then the oldest terminal entries until the
    /// size bound holds. Returns how many entries were removed.
    pub fn run_eviction(&self) -> usize {
        if self.policy.is_unbounded() {
            return 0;
        }
        let mut evicted = 0;

        if let Some(ttl) = self.policy.ttl {
            self.entries.retain(|_, entry| {
                let expired = entry.handle.is_done() && entry.inserted_at.elapsed() >= ttl;
                if expired {
                    evicted += 1;
                }
                !expired
            });
        }

        if let Some(max_entries) = self.policy.max_entries {
            let excess = self.entries.len().saturating_sub(max_entries);
            if excess > 0 {
                let mut candidates: Vec<(K, Instant)> = self
                    .entries
                    .iter()
                    .filter(|entry| entry.handle.is_done())
                    .map(|entry| (entry.key().clone(), entry.inserted_at))
                    .collect();
                candidates.sort_by_key(|(_, inserted_at)| *inserted_at);

                for (key, _) in candidates.into_iter().take(excess) {
                    if self
                        .entries
                        .remove_if(&key, |_, entry| entry.handle.is_done())
                        .is_some()
                    {
                        evicted += 1;
                    }
                }
            }
        }

        if evicted > 0 {
            self.counters.evicted(evicted as u64);
            debug!(evicted, remaining = self.entries.len(), "cache eviction ran");
        }
        evicted
    }

    /// Remove every terminal entry, keeping in-flight ones
    pub fn clear_terminal(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.handle.is_done());
        before.saturating_sub(self.entries.len())
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of cache activity
    pub fn metrics(&self) -> CacheMetrics {
        self.counters.snapshot(self.entries.len())
    }
}

impl<K, V> std::fmt::Debug for SingleFlightCache<K, V>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlightCache")
            .field("pool", &self.pool.name())
            .field("entries", &self.entries.len())
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use crate::pool::PoolConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn pool(workers: usize) -> Arc<WorkerPool> {
        Arc::new(WorkerPool::new(PoolConfig::fixed(workers)).unwrap())
    }

    #[test]
    fn test_second_lookup_is_a_hit() {
        let cache = SingleFlightCache::new(pool(2));
        let runs = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let runs = Arc::clone(&runs);
            let handle = cache
                .get_or_compute("k".to_string(), move |_| {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(5)
                })
                .unwrap();
            assert_eq!(handle.get().unwrap(), 5);
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        let metrics = cache.metrics();
        assert_eq!((metrics.hits, metrics.misses), (2, 1));
        assert_eq!(metrics.entries, 1);
    }

    #[test]
    fn test_failure_stays_cached() {
        let cache: SingleFlightCache<u32, u32> = SingleFlightCache::new(pool(1));
        let first = cache.get_or_compute(1, |_| anyhow::bail!("boom")).unwrap();
        assert!(first.get().unwrap_err().is_failed());

        let second = cache.get_or_compute(1, |_| Ok(1)).unwrap();
        assert!(second.ptr_eq(&first));
    }

    #[test]
    fn test_cancelled_entry_is_replaced_on_next_lookup() {
        let pool = Arc::new(WorkerPool::new(PoolConfig::fixed(1)).unwrap());
        let cache: SingleFlightCache<&str, u32> = SingleFlightCache::new(Arc::clone(&pool));

        // Occupy the only worker so the cached computation stays queued.
        let blocker = pool
            .submit_fn(|ctx| {
                ctx.sleep(Duration::from_secs(10))?;
                Ok(0u32)
            })
            .unwrap();
        let cancelled = cache.get_or_compute("k", |_| Ok(1)).unwrap();
        assert!(cancelled.cancel(false));
        assert!(cache.get(&"k").unwrap().is_cancelled());

        let fresh = cache.get_or_compute("k", |_| Ok(2)).unwrap();
        assert!(!fresh.ptr_eq(&cancelled));
        blocker.cancel(true);
        assert_eq!(fresh.get().unwrap(), 2);
        assert!(matches!(cancelled.get(), Err(TaskError::Cancelled)));
        assert_eq!(cache.metrics().cleanups, 1);
        pool.drain();
    }

    #[test]
    fn test_rejected_computation_is_not_cached() {
        let pool = pool(1);
        pool.drain();
        let cache: SingleFlightCache<u8, u8> = SingleFlightCache::new(Arc::clone(&pool));
        let err = cache.get_or_compute(7, |_| Ok(7)).unwrap_err();
        assert_eq!(err, RejectedSubmission::PoolClosed);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_evict_only_removes_terminal_entries() {
        let pool = pool(1);
        let cache: SingleFlightCache<&str, u32> = SingleFlightCache::new(Arc::clone(&pool));
        let running = cache
            .get_or_compute("slow", |ctx| {
                ctx.sleep(Duration::from_secs(10))?;
                Ok(0)
            })
            .unwrap();
        assert!(!cache.evict(&"slow"));
        running.cancel(true);
        running.wait();
        assert!(cache.evict(&"slow"));
        assert!(cache.get(&"slow").is_none());
        assert_eq!(cache.metrics().evictions, 1);
    }

    #[test]
    fn test_size_bound_evicts_oldest_terminal_entries() {
        let cache: SingleFlightCache<u32, u32> = SingleFlightCache::with_policy(
            pool(2),
            EvictionPolicy::unbounded().with_max_entries(2),
        );
        for key in 0..4 {
            cache.get_or_compute(key, move |_| Ok(key)).unwrap().wait();
        }
        cache.run_eviction();

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&0).is_none());
        assert!(cache.get(&3).is_some());
        assert!(cache.metrics().evictions >= 2);
    }

    #[test]
    fn test_ttl_expires_terminal_entries() {
        let cache: SingleFlightCache<u32, u32> = SingleFlightCache::with_policy(
            pool(1),
            EvictionPolicy::unbounded().with_ttl(Duration::from_millis(20)),
        );
        let first = cache.get_or_compute(1, |_| Ok(1)).unwrap();
        first.wait();
        std::thread::sleep(Duration::from_millis(40));

        let second = cache.get_or_compute(1, |_| Ok(2)).unwrap();
        assert!(!second.ptr_eq(&first));
        assert_eq!(second.get().unwrap(), 2);
    }

    #[test]
    fn test_clear_terminal() {
        let cache: SingleFlightCache<u32, u32> = SingleFlightCache::new(pool(2));
        for key in 0..3 {
            cache.get_or_compute(key, move |_| Ok(key)).unwrap().wait();
        }
        assert_eq!(cache.clear_terminal(), 3);
        assert!(cache.is_empty());
    }
}
