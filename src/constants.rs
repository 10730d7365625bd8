//! # System Constants
//!
//! Defaults for every recognized configuration option, HTTP surface names and
//! the cache status tag attached to every executor outcome.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default values for `ResilienceConfig`
pub mod defaults {
    pub const DEFAULT_TTL_SECONDS: u64 = 300;
    pub const CACHE_CLEANUP_THRESHOLD: usize = 1000;
    pub const CIRCUIT_FAILURE_THRESHOLD: u32 = 5;
    pub const CIRCUIT_OPEN_DURATION_MS: u64 = 30_000;
    pub const REQUEST_TIMEOUT_MS: u64 = 10_000;
    pub const MAX_BATCH_SIZE: usize = 100;
    pub const BATCH_CHUNK_SIZE: usize = 10;
    pub const STREAM_CHUNK_SIZE: usize = 100;
    pub const COMPRESSION_THRESHOLD_BYTES: usize = 1024;
    pub const POOL_MAX_CONNECTIONS: usize = 10;
    pub const POOL_POLL_INTERVAL_MS: u64 = 100;
    pub const CACHE_OPERATION_TIMEOUT_MS: u64 = 1000;
    pub const DURABLE_CONNECT_TIMEOUT_MS: u64 = 5000;
    pub const DURABLE_KEY_PREFIX: &str = "cache:";
    pub const CACHE_SWEEP_INTERVAL_SECONDS: u64 = 60;
    pub const MAX_PENDING_CACHE_WRITES: usize = 256;
}

/// Response header names used when wrapping an HTTP handler
pub mod headers {
    pub const X_CACHE: &str = "X-Cache";
    pub const X_RESPONSE_TIME: &str = "X-Response-Time";
    pub const CONTENT_ENCODING: &str = "Content-Encoding";
    pub const CONTENT_TYPE: &str = "Content-Type";
    pub const TRANSFER_ENCODING: &str = "Transfer-Encoding";
}

pub mod content_types {
    pub const NDJSON: &str = "application/x-ndjson";
}

/// Environment variables consulted outside the `config` loader
pub mod env {
    pub const CONFIG_PREFIX: &str = "RESILIENT_CACHE";
    pub const CONFIG_SEPARATOR: &str = "__";
    pub const CONFIG_FILE: &str = "resilient-cache.toml";
    pub const ENVIRONMENT: &str = "RESILIENT_CACHE_ENV";
    pub const LOG_FORMAT: &str = "RESILIENT_CACHE_LOG_FORMAT";
}

/// Component names used for circuit breakers and log fields
pub mod components {
    pub const CACHE: &str = "cache";
    pub const HANDLER: &str = "handler";
}

/// Whether a result was served from cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_status_header_values() {
        assert_eq!(CacheStatus::Hit.to_string(), "HIT");
        assert_eq!(CacheStatus::Miss.as_str(), "MISS");
        assert_eq!(
            serde_json::to_string(&CacheStatus::Hit).unwrap(),
            "\"HIT\""
        );
    }
}
