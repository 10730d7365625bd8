//! Cache manager with integrated circuit breaker
//!
//! Uses enum dispatch over the two tiers. The tier is chosen lazily on first
//! use: a configured durable URL selects [`DurableCache`] (which itself falls
//! back to memory), otherwise [`MemoryCache`] is used directly.
//!
//! Every public operation is infallible from the caller's point of view. A
//! failure, timeout or open circuit turns `get` into a miss, `exists` into
//! `false`, and writes into no-ops, always with a log line.

use super::entry::CacheStats;
use super::errors::{CacheError, CacheResult};
use super::providers::{ConnectionStatus, DurableCache, DurableCacheOptions, MemoryCache};
use super::traits::CacheService;
use crate::config::ResilienceConfig;
use crate::constants::components;
use crate::logging::log_cache_operation;
use crate::resilience::{CircuitBreaker, CircuitBreakerError, CircuitState};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
enum CacheBackend {
    /// Boxed to keep the enum small
    Durable(Box<DurableCache>),
    Memory(MemoryCache),
}

impl CacheBackend {
    fn provider_name(&self) -> &'static str {
        match self {
            Self::Durable(s) => s.provider_name(),
            Self::Memory(s) => s.provider_name(),
        }
    }

    fn is_distributed(&self) -> bool {
        match self {
            Self::Durable(s) => s.is_distributed(),
            Self::Memory(s) => s.is_distributed(),
        }
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        match self {
            Self::Durable(s) => s.get(key).await,
            Self::Memory(s) => s.get(key).await,
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        match self {
            Self::Durable(s) => s.set(key, value, ttl).await,
            Self::Memory(s) => s.set(key, value, ttl).await,
        }
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        match self {
            Self::Durable(s) => s.delete(key).await,
            Self::Memory(s) => s.delete(key).await,
        }
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        match self {
            Self::Durable(s) => s.exists(key).await,
            Self::Memory(s) => s.exists(key).await,
        }
    }

    async fn clear(&self) -> CacheResult<()> {
        match self {
            Self::Durable(s) => s.clear().await,
            Self::Memory(s) => s.clear().await,
        }
    }

    async fn stats(&self) -> CacheResult<CacheStats> {
        match self {
            Self::Durable(s) => s.stats().await,
            Self::Memory(s) => s.stats().await,
        }
    }
}

/// Unified cache facade used by the request executor
///
/// The circuit breaker only exists when a durable tier is configured; the
/// in-memory tier cannot fail.
pub struct CacheManager {
    config: ResilienceConfig,
    backend: OnceLock<CacheBackend>,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("backend", &self.backend.get())
            .field(
                "circuit_breaker",
                &self.circuit_breaker.as_ref().map(|cb| cb.state()),
            )
            .finish()
    }
}

impl CacheManager {
    pub fn new(config: ResilienceConfig) -> Self {
        let circuit_breaker = config.durable_cache_url.as_ref().map(|_| {
            let cb_config = config.circuit_breaker_config();
            info!(
                failure_threshold = cb_config.failure_threshold,
                open_duration_ms = cb_config.open_duration.as_millis() as u64,
                "Cache circuit breaker initialized"
            );
            Arc::new(CircuitBreaker::new(components::CACHE, cb_config))
        });

        Self {
            config,
            backend: OnceLock::new(),
            circuit_breaker,
        }
    }

    /// Select the backend now instead of on first use
    ///
    /// Must be called from within a Tokio runtime.
    pub fn warmup(&self) {
        let backend = self.backend();
        debug!(provider = backend.provider_name(), "Cache backend ready");
    }

    fn backend(&self) -> &CacheBackend {
        self.backend.get_or_init(|| self.create_backend())
    }

    fn create_backend(&self) -> CacheBackend {
        let memory = MemoryCache::new(self.config.cache_cleanup_threshold);
        if let Some(interval) = self.config.cache_sweep_interval() {
            memory.spawn_sweeper(interval);
        }

        match &self.config.durable_cache_url {
            Some(url) => {
                let options = DurableCacheOptions {
                    key_prefix: self.config.durable_key_prefix.clone(),
                    connect_timeout: self.config.durable_connect_timeout(),
                };
                info!(
                    url = %crate::config::redact_url(url),
                    "Durable cache selected, connecting in background"
                );
                CacheBackend::Durable(Box::new(DurableCache::connect(url, memory, options)))
            }
            None => {
                info!(
                    cleanup_threshold = self.config.cache_cleanup_threshold,
                    "No durable cache configured, using in-memory cache"
                );
                CacheBackend::Memory(memory)
            }
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.backend().provider_name()
    }

    pub fn is_distributed(&self) -> bool {
        self.backend().is_distributed()
    }

    /// `None` in memory-only mode
    pub fn circuit_state(&self) -> Option<CircuitState> {
        self.circuit_breaker.as_ref().map(|cb| cb.state())
    }

    /// `None` in memory-only mode
    pub fn durable_status(&self) -> Option<ConnectionStatus> {
        match self.backend() {
            CacheBackend::Durable(s) => Some(s.connection_status()),
            CacheBackend::Memory(_) => None,
        }
    }

    /// Resolve the durable connection attempt, if there is one
    pub async fn wait_for_durable(&self) -> Option<ConnectionStatus> {
        match self.backend() {
            CacheBackend::Durable(s) => Some(s.wait_for_connection().await),
            CacheBackend::Memory(_) => None,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.config.default_ttl()
    }

    /// Run `operation` under the per-call deadline and, if present, the breaker.
    /// Returns `fallback` on any failure.
    async fn guarded<T, F, Fut>(
        &self,
        operation: &'static str,
        key: Option<&str>,
        fallback: T,
        f: F,
    ) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<T>>,
    {
        let timeout = self.config.cache_operation_timeout();
        let bounded = || async move {
            match tokio::time::timeout(timeout, f()).await {
                Ok(result) => result,
                Err(_) => Err(CacheError::Timeout(format!(
                    "{operation} exceeded {}ms",
                    timeout.as_millis()
                ))),
            }
        };

        let started = Instant::now();
        let result = match &self.circuit_breaker {
            Some(cb) => cb.call(bounded).await,
            None => bounded().await.map_err(CircuitBreakerError::OperationFailed),
        };
        let elapsed_ms = Some(started.elapsed().as_millis() as u64);
        let provider = self.provider_name();

        match result {
            Ok(value) => {
                log_cache_operation(operation, provider, key, "ok", elapsed_ms);
                value
            }
            Err(CircuitBreakerError::CircuitOpen { .. }) => {
                log_cache_operation(operation, provider, key, "circuit_open", elapsed_ms);
                fallback
            }
            Err(CircuitBreakerError::OperationFailed(e)) => {
                log_cache_operation(operation, provider, key, "error", elapsed_ms);
                warn!(
                    operation = operation,
                    key = key,
                    error = %e,
                    "Cache operation failed, continuing without cache"
                );
                fallback
            }
        }
    }

    /// Raw string lookup; `None` on miss or any failure
    pub async fn get(&self, key: &str) -> Option<String> {
        let backend = self.backend();
        self.guarded("get", Some(key), None, || backend.get(key))
            .await
    }

    pub async fn set(&self, key: &str, value: &str, ttl: Duration) {
        let backend = self.backend();
        self.guarded("set", Some(key), (), || backend.set(key, value, ttl))
            .await
    }

    pub async fn delete(&self, key: &str) {
        let backend = self.backend();
        self.guarded("delete", Some(key), (), || backend.delete(key))
            .await
    }

    pub async fn exists(&self, key: &str) -> bool {
        let backend = self.backend();
        self.guarded("exists", Some(key), false, || backend.exists(key))
            .await
    }

    pub async fn clear(&self) {
        let backend = self.backend();
        self.guarded("clear", None, (), || backend.clear()).await
    }

    /// Zeroed stats when the active tier cannot report
    pub async fn stats(&self) -> CacheStats {
        let backend = self.backend();
        self.guarded("stats", None, CacheStats::default(), || backend.stats())
            .await
    }

    /// Typed lookup; an entry that fails to decode is evicted and reported as a miss
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = key, error = %e, "Undecodable cache entry, evicting");
                self.delete(key).await;
                None
            }
        }
    }

    pub async fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) {
        match serde_json::to_string(value) {
            Ok(raw) => self.set(key, &raw, ttl).await,
            Err(e) => warn!(key = key, error = %e, "Value not serializable, skipping cache write"),
        }
    }
}
