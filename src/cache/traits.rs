//! Cache service trait definition

use super::entry::CacheStats;
use super::errors::CacheResult;
use std::time::Duration;

/// Contract shared by every cache tier
///
/// Implementations absorb their own operational failures (a durable tier
/// delegates to its fallback, an in-memory tier cannot fail), so an `Err` here
/// only ever comes from the guard layer in `CacheManager`.
pub trait CacheService: Send + Sync {
    /// Returns `Ok(Some(value))` on a hit, `Ok(None)` on a miss or expired entry.
    fn get(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = CacheResult<Option<String>>> + Send;

    /// Store `value` under `key` for `ttl`
    fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl std::future::Future<Output = CacheResult<()>> + Send;

    fn delete(&self, key: &str) -> impl std::future::Future<Output = CacheResult<()>> + Send;

    fn exists(&self, key: &str) -> impl std::future::Future<Output = CacheResult<bool>> + Send;

    /// Remove every entry from the tier that is currently active
    fn clear(&self) -> impl std::future::Future<Output = CacheResult<()>> + Send;

    fn stats(&self) -> impl std::future::Future<Output = CacheResult<CacheStats>> + Send;

    /// Get the name of the cache provider
    fn provider_name(&self) -> &'static str;

    /// Whether state is shared across process instances
    fn is_distributed(&self) -> bool;
}
