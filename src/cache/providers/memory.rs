//! In-process TTL cache
//!
//! Entries live in a `DashMap` keyed by cache key. Expiry is enforced lazily
//! on read; a full sweep runs whenever a write pushes the map above
//! `cleanup_threshold`, and optionally on a fixed interval via
//! [`MemoryCache::spawn_sweeper`].

use crate::cache::entry::{CacheEntry, CacheStats};
use crate::cache::errors::CacheResult;
use crate::cache::traits::CacheService;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

/// Process-local cache tier
///
/// Cloning is cheap and yields a handle to the same map.
#[derive(Clone)]
pub struct MemoryCache {
    inner: Arc<MemoryCacheInner>,
}

struct MemoryCacheInner {
    entries: DashMap<String, CacheEntry>,
    cleanup_threshold: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("entries", &self.inner.entries.len())
            .field("cleanup_threshold", &self.inner.cleanup_threshold)
            .finish()
    }
}

impl MemoryCache {
    pub fn new(cleanup_threshold: usize) -> Self {
        Self {
            inner: Arc::new(MemoryCacheInner {
                entries: DashMap::new(),
                cleanup_threshold,
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
            }),
        }
    }

    pub fn get_value(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        // The RefMut is consumed by the closure so the shard lock is released
        // before any removal below.
        let lookup = self.inner.entries.get_mut(key).map(|mut entry| {
            if entry.is_expired_at(now) {
                None
            } else {
                entry.touch(now);
                Some(entry.value.clone())
            }
        });

        match lookup {
            Some(Some(value)) => {
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Some(None) => {
                self.inner
                    .entries
                    .remove_if(key, |_, entry| entry.is_expired_at(now));
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key = key, "Expired entry evicted on read");
                None
            }
            None => {
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn set_value(&self, key: &str, value: &str, ttl: Duration) {
        self.inner
            .entries
            .insert(key.to_string(), CacheEntry::new(key, value, ttl));

        if self.inner.entries.len() > self.inner.cleanup_threshold {
            let removed = self.sweep_expired();
            debug!(
                removed = removed,
                threshold = self.inner.cleanup_threshold,
                "Cleanup threshold exceeded, swept expired entries"
            );
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        self.inner.entries.remove(key).is_some()
    }

    /// Checks presence without touching hit/miss counters
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        let expired = match self.inner.entries.get(key) {
            Some(entry) => entry.is_expired_at(now),
            None => return false,
        };
        if expired {
            self.inner
                .entries
                .remove_if(key, |_, entry| entry.is_expired_at(now));
        }
        !expired
    }

    /// Snapshot of a live entry including its access bookkeeping
    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        let now = Instant::now();
        self.inner
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired_at(now))
            .map(|entry| entry.value().clone())
    }

    /// Remove every expired entry, returning how many were dropped
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.inner.entries.retain(|_, entry| {
            let keep = !entry.is_expired_at(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    pub fn clear_all(&self) {
        self.inner.entries.clear();
    }

    /// Current counters; `size` may include expired entries not yet swept
    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            size: self.inner.entries.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Run [`sweep_expired`](Self::sweep_expired) every `interval`
    ///
    /// The task holds only a weak reference and exits once every handle to
    /// this cache has been dropped.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<MemoryCacheInner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    debug!("Memory cache dropped, stopping expiry sweeper");
                    break;
                };
                let removed = MemoryCache { inner }.sweep_expired();
                if removed > 0 {
                    debug!(removed = removed, "Periodic expiry sweep");
                }
            }
        })
    }
}

impl CacheService for MemoryCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        Ok(self.get_value(key))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        self.set_value(key, value, ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        Ok(self.contains(key))
    }

    async fn clear(&self) -> CacheResult<()> {
        self.clear_all();
        Ok(())
    }

    async fn stats(&self) -> CacheResult<CacheStats> {
        Ok(self.snapshot())
    }

    fn provider_name(&self) -> &'static str {
        "memory"
    }

    fn is_distributed(&self) -> bool {
        false
    }
}
