//! Shared fixtures for integration tests
#![allow(dead_code)]

use resilient_cache::{CacheManager, RequestExecutor, ResilienceConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Loopback port 1 refuses connections, so the durable tier never connects
pub const UNREACHABLE_REDIS_URL: &str = "redis://127.0.0.1:1";

/// Defaults with the background sweeper off so paused-time tests stay deterministic
pub fn test_config() -> ResilienceConfig {
    ResilienceConfig {
        cache_sweep_interval_seconds: 0,
        ..Default::default()
    }
}

pub fn unreachable_durable_config() -> ResilienceConfig {
    ResilienceConfig {
        durable_connect_timeout_ms: 250,
        cache_sweep_interval_seconds: 0,
        ..ResilienceConfig::with_durable_cache(UNREACHABLE_REDIS_URL)
    }
}

pub fn executor_with(config: ResilienceConfig) -> RequestExecutor {
    let cache = Arc::new(CacheManager::new(config.clone()));
    RequestExecutor::new(cache, config)
}

/// Wait until every detached write-back has landed
pub async fn settle_writes(executor: &RequestExecutor) {
    for _ in 0..1000 {
        if executor.pending_cache_writes() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("cache write-backs did not settle");
}

/// Counts handler invocations
#[derive(Clone, Default)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hit(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("backend unavailable")]
pub struct BackendUnavailable;
