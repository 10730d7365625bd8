//! # Request Executor
//!
//! Orchestration patterns over [`CacheManager`] and a handler
//! [`CircuitBreaker`]:
//!
//! - [`execute`](RequestExecutor::execute): cache-aside with detached write-back
//! - [`execute_batch`](RequestExecutor::execute_batch): sequential bounded chunks
//! - [`execute_stream`](RequestExecutor::execute_stream): lazy ND-JSON emission
//! - [`execute_parallel`](RequestExecutor::execute_parallel): shared-deadline fan-out
//!
//! Concurrent misses on one key each run the handler and overwrite the entry;
//! there is no single-flight de-duplication.

mod batch;
mod cache_aside;
mod parallel;
mod stream;
pub mod types;

pub use parallel::Fetcher;
pub use stream::ndjson_headers;
pub use types::{
    BatchOptions, BatchOutcome, ExecuteOptions, Outcome, ParallelOptions, RequestContext,
    ResponseMeta, StreamOptions, StreamSummary, Validator,
};

use crate::cache::CacheManager;
use crate::config::ResilienceConfig;
use crate::constants::components;
use crate::resilience::CircuitBreaker;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

pub struct RequestExecutor {
    cache: Arc<CacheManager>,
    handler_breaker: Arc<CircuitBreaker>,
    config: ResilienceConfig,
    /// Bounds detached cache write-backs
    write_slots: Arc<Semaphore>,
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("cache", &self.cache)
            .field("handler_circuit", &self.handler_breaker.state())
            .field("pending_cache_writes", &self.pending_cache_writes())
            .finish()
    }
}

impl RequestExecutor {
    pub fn new(cache: Arc<CacheManager>, config: ResilienceConfig) -> Self {
        let handler_breaker = Arc::new(CircuitBreaker::new(
            components::HANDLER,
            config.circuit_breaker_config(),
        ));
        let write_slots = Arc::new(Semaphore::new(config.max_pending_cache_writes));
        Self {
            cache,
            handler_breaker,
            config,
            write_slots,
        }
    }

    /// Share one handler breaker between several executors
    pub fn with_handler_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.handler_breaker = breaker;
        self
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub fn handler_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.handler_breaker
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    /// Write-backs currently in flight
    pub fn pending_cache_writes(&self) -> usize {
        self.config
            .max_pending_cache_writes
            .saturating_sub(self.write_slots.available_permits())
    }

    /// Detached `cache.set`; the caller never observes its outcome
    fn spawn_write_back(&self, key: &str, payload: String, ttl: Duration) {
        let permit = match Arc::clone(&self.write_slots).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(
                    key = key,
                    limit = self.config.max_pending_cache_writes,
                    "Too many pending cache writes, skipping write-back"
                );
                return;
            }
        };

        let cache = Arc::clone(&self.cache);
        let key = key.to_string();
        tokio::spawn(async move {
            let _permit = permit;
            cache.set(&key, &payload, ttl).await;
            debug!(key = %key, "Cache write-back complete");
        });
    }
}
