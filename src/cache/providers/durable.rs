//! Durable cache tier backed by Redis
//!
//! A single connection attempt is made at construction, in the background,
//! bounded by `connect_timeout`. Until it succeeds (and forever, if it fails)
//! every call is served by the in-memory fallback. Once connected, any call
//! that errors is logged and answered by the fallback for that call only.

use super::memory::MemoryCache;
use crate::cache::entry::CacheStats;
use crate::cache::errors::{CacheError, CacheResult};
use crate::cache::traits::CacheService;
use crate::config::redact_url;
use crate::constants::defaults;
use redis::aio::MultiplexedConnection;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const SCAN_BATCH: u64 = 100;

/// Lifecycle of the one-shot connection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DurableCacheOptions {
    /// Prepended to every key; `clear()` removes only keys under it
    pub key_prefix: String,
    pub connect_timeout: Duration,
}

impl Default for DurableCacheOptions {
    fn default() -> Self {
        Self {
            key_prefix: defaults::DURABLE_KEY_PREFIX.to_string(),
            connect_timeout: Duration::from_millis(defaults::DURABLE_CONNECT_TIMEOUT_MS),
        }
    }
}

/// Redis tier with per-call fallback to a [`MemoryCache`]
#[derive(Clone)]
pub struct DurableCache {
    inner: Arc<DurableInner>,
}

struct DurableInner {
    connection: OnceLock<MultiplexedConnection>,
    status: watch::Sender<ConnectionStatus>,
    fallback: MemoryCache,
    key_prefix: String,
    url: String,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl fmt::Debug for DurableCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DurableCache")
            .field("url", &self.inner.url)
            .field("status", &self.connection_status())
            .field("key_prefix", &self.inner.key_prefix)
            .finish()
    }
}

impl DurableCache {
    /// Start connecting to `url` and return immediately
    ///
    /// Must be called from within a Tokio runtime. A malformed URL leaves the
    /// cache permanently `Disconnected`; it never returns an error.
    pub fn connect(url: &str, fallback: MemoryCache, options: DurableCacheOptions) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Connecting);
        let inner = Arc::new(DurableInner {
            connection: OnceLock::new(),
            status,
            fallback,
            key_prefix: options.key_prefix,
            url: redact_url(url),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        });

        match redis::Client::open(url) {
            Ok(client) => {
                let task_inner = Arc::clone(&inner);
                let connect_timeout = options.connect_timeout;
                tokio::spawn(async move {
                    let attempt = tokio::time::timeout(
                        connect_timeout,
                        client.get_multiplexed_async_connection(),
                    )
                    .await;
                    task_inner.finish_connect(attempt, connect_timeout);
                });
            }
            Err(e) => {
                warn!(
                    url = %inner.url,
                    error = %e,
                    "Invalid durable cache URL, using in-memory fallback"
                );
                inner.status.send_replace(ConnectionStatus::Disconnected);
            }
        }

        Self { inner }
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        *self.inner.status.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_status() == ConnectionStatus::Connected
    }

    /// Wait until the connection attempt has resolved either way
    pub async fn wait_for_connection(&self) -> ConnectionStatus {
        let mut rx = self.inner.status.subscribe();
        let resolved = rx
            .wait_for(|status| *status != ConnectionStatus::Connecting)
            .await
            .map(|status| *status);
        // Sender lives in `inner`, which we hold; the error arm is unreachable in practice.
        resolved.unwrap_or_else(|_| self.connection_status())
    }

    pub fn fallback(&self) -> &MemoryCache {
        &self.inner.fallback
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{}", self.inner.key_prefix, key)
    }

    fn connection(&self) -> Option<MultiplexedConnection> {
        self.inner.connection.get().cloned()
    }

    fn log_fallback(&self, operation: &str, key: Option<&str>, error: &redis::RedisError) {
        warn!(
            operation = operation,
            key = key,
            error = %error,
            "Durable cache operation failed, serving from in-memory fallback"
        );
    }

    async fn delete_prefixed(&self, conn: &mut MultiplexedConnection) -> CacheResult<u64> {
        let pattern = format!("{}*", self.inner.key_prefix);
        let mut deleted: u64 = 0;
        let mut cursor: u64 = 0;

        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(conn)
                .await?;

            if !keys.is_empty() {
                let count: u64 = redis::cmd("DEL").arg(&keys).query_async(conn).await?;
                deleted += count;
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        Ok(deleted)
    }

    async fn count_prefixed(&self, conn: &mut MultiplexedConnection) -> CacheResult<usize> {
        let pattern = format!("{}*", self.inner.key_prefix);
        let mut total = 0;
        let mut cursor: u64 = 0;

        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(conn)
                .await?;
            total += keys.len();
            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        Ok(total)
    }
}

impl DurableInner {
    fn finish_connect(
        &self,
        attempt: Result<redis::RedisResult<MultiplexedConnection>, tokio::time::error::Elapsed>,
        connect_timeout: Duration,
    ) {
        let failure = match attempt {
            Ok(Ok(conn)) => {
                if self.connection.set(conn).is_ok() {
                    self.status.send_replace(ConnectionStatus::Connected);
                    info!(url = %self.url, "Durable cache connected");
                    return;
                }
                CacheError::ConnectionError("connection already initialized".to_string())
            }
            Ok(Err(e)) => CacheError::from(e),
            Err(_) => CacheError::Timeout(format!(
                "connect exceeded {}ms",
                connect_timeout.as_millis()
            )),
        };

        self.status.send_replace(ConnectionStatus::Disconnected);
        warn!(
            url = %self.url,
            error = %failure,
            "Durable cache unavailable, using in-memory fallback"
        );
    }
}

impl CacheService for DurableCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let Some(mut conn) = self.connection() else {
            return self.inner.fallback.get(key).await;
        };

        let result: redis::RedisResult<Option<String>> = redis::cmd("GET")
            .arg(self.namespaced(key))
            .query_async(&mut conn)
            .await;

        match result {
            Ok(value) => {
                if value.is_some() {
                    self.inner.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(key = key, "Cache HIT");
                } else {
                    self.inner.misses.fetch_add(1, Ordering::Relaxed);
                    debug!(key = key, "Cache MISS");
                }
                Ok(value)
            }
            Err(e) => {
                self.log_fallback("get", Some(key), &e);
                self.inner.fallback.get(key).await
            }
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let Some(mut conn) = self.connection() else {
            return self.inner.fallback.set(key, value, ttl).await;
        };

        let ttl_seconds = ttl.as_secs().max(1);
        let result = redis::cmd("SETEX")
            .arg(self.namespaced(key))
            .arg(ttl_seconds)
            .arg(value)
            .query_async::<()>(&mut conn)
            .await;

        match result {
            Ok(()) => {
                debug!(key = key, ttl_seconds = ttl_seconds, "Cache SET");
                Ok(())
            }
            Err(e) => {
                self.log_fallback("set", Some(key), &e);
                self.inner.fallback.set(key, value, ttl).await
            }
        }
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let Some(mut conn) = self.connection() else {
            return self.inner.fallback.delete(key).await;
        };

        match redis::cmd("DEL")
            .arg(self.namespaced(key))
            .query_async::<()>(&mut conn)
            .await
        {
            Ok(()) => {
                debug!(key = key, "Cache DEL");
                Ok(())
            }
            Err(e) => {
                self.log_fallback("delete", Some(key), &e);
                self.inner.fallback.delete(key).await
            }
        }
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let Some(mut conn) = self.connection() else {
            return self.inner.fallback.exists(key).await;
        };

        match redis::cmd("EXISTS")
            .arg(self.namespaced(key))
            .query_async::<u64>(&mut conn)
            .await
        {
            Ok(count) => Ok(count > 0),
            Err(e) => {
                self.log_fallback("exists", Some(key), &e);
                self.inner.fallback.exists(key).await
            }
        }
    }

    async fn clear(&self) -> CacheResult<()> {
        let Some(mut conn) = self.connection() else {
            return self.inner.fallback.clear().await;
        };

        match self.delete_prefixed(&mut conn).await {
            Ok(deleted) => {
                info!(
                    prefix = %self.inner.key_prefix,
                    deleted = deleted,
                    "Durable cache cleared"
                );
                Ok(())
            }
            Err(e) => {
                warn!(
                    error = %e,
                    "Durable cache clear failed, clearing in-memory fallback"
                );
                self.inner.fallback.clear().await
            }
        }
    }

    async fn stats(&self) -> CacheResult<CacheStats> {
        let Some(mut conn) = self.connection() else {
            return self.inner.fallback.stats().await;
        };

        match self.count_prefixed(&mut conn).await {
            Ok(size) => Ok(CacheStats {
                hits: self.inner.hits.load(Ordering::Relaxed),
                misses: self.inner.misses.load(Ordering::Relaxed),
                size,
            }),
            Err(e) => {
                warn!(error = %e, "Durable cache stats unavailable, reporting fallback");
                self.inner.fallback.stats().await
            }
        }
    }

    fn provider_name(&self) -> &'static str {
        "redis"
    }

    fn is_distributed(&self) -> bool {
        true
    }
}
