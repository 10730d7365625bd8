//! Cache entries and statistics

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Longest lifetime an entry can have; larger TTLs are clamped to it
pub const MAX_ENTRY_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// A stored value with its expiry and access bookkeeping
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    /// Serialized payload
    pub value: String,
    pub expires_at: Instant,
    pub hit_count: u64,
    pub last_accessed: Instant,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            key: key.into(),
            value: value.into(),
            expires_at: expiry_after(now, ttl),
            hit_count: 0,
            last_accessed: now,
        }
    }

    /// An entry is expired once `expires_at <= now`
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at <= now
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    pub fn ttl_remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    pub(crate) fn touch(&mut self, now: Instant) {
        self.hit_count += 1;
        self.last_accessed = now;
    }
}

fn expiry_after(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl.min(MAX_ENTRY_TTL)).unwrap_or(now)
}

/// Hit/miss counters and current size of a cache tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
}

impl CacheStats {
    /// `hits / (hits + misses)`, or 0.0 before any lookups
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            size: 2,
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_at_deadline() {
        let entry = CacheEntry::new("k", "v", Duration::from_secs(10));
        assert!(!entry.is_expired());
        assert_eq!(entry.ttl_remaining(), Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(entry.is_expired());
        assert_eq!(entry.ttl_remaining(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_ttl_is_clamped() {
        let entry = CacheEntry::new("k", "v", Duration::from_secs(u64::MAX));
        assert!(!entry.is_expired());
        assert_eq!(entry.ttl_remaining(), MAX_ENTRY_TTL);

        let forever = CacheEntry::new("k", "v", Duration::MAX);
        assert_eq!(forever.ttl_remaining(), MAX_ENTRY_TTL);
    }
}
