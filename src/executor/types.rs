//! Request context, per-call options and outcome metadata

use crate::constants::{headers, CacheStatus};
use crate::error::{ExecutorError, ExecutorResult};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Per-request metadata handed to handlers
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: Uuid,
    /// Cache key, when the operation has one
    pub key: Option<String>,
    pub started_at: Instant,
}

impl RequestContext {
    pub fn new(key: Option<&str>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            key: key.map(str::to_string),
            started_at: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed().as_millis() as u64
    }
}

/// Input check run before any cache or handler work
pub type Validator<Req> = Arc<dyn Fn(&Req) -> Result<(), String> + Send + Sync>;

/// Options for [`RequestExecutor::execute`](super::RequestExecutor::execute)
pub struct ExecuteOptions<Req> {
    pub use_cache: bool,
    /// Only read-only operations consult or populate the cache
    pub read_only: bool,
    /// Falls back to `default_ttl_seconds`
    pub ttl: Option<Duration>,
    /// Falls back to `request_timeout_ms`
    pub timeout: Option<Duration>,
    pub validator: Option<Validator<Req>>,
}

impl<Req> Default for ExecuteOptions<Req> {
    fn default() -> Self {
        Self {
            use_cache: true,
            read_only: true,
            ttl: None,
            timeout: None,
            validator: None,
        }
    }
}

impl<Req> Clone for ExecuteOptions<Req> {
    fn clone(&self) -> Self {
        Self {
            use_cache: self.use_cache,
            read_only: self.read_only,
            ttl: self.ttl,
            timeout: self.timeout,
            validator: self.validator.clone(),
        }
    }
}

impl<Req> fmt::Debug for ExecuteOptions<Req> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecuteOptions")
            .field("use_cache", &self.use_cache)
            .field("read_only", &self.read_only)
            .field("ttl", &self.ttl)
            .field("timeout", &self.timeout)
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

impl<Req> ExecuteOptions<Req> {
    pub fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    /// Mark the operation as mutating; the cache is neither read nor written
    pub fn mutating(mut self) -> Self {
        self.read_only = false;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Req) -> Result<(), String> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub(crate) fn caches(&self) -> bool {
        self.use_cache && self.read_only
    }
}

/// Observability data attached to every cache-aside outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseMeta {
    pub request_id: Uuid,
    pub cache_status: CacheStatus,
    pub elapsed_ms: u64,
    /// Size of the serialized result; 0 on failure
    pub payload_bytes: usize,
    /// Advisory: payload exceeds the compression threshold
    pub compress_hint: bool,
}

impl ResponseMeta {
    /// `X-Cache`, `X-Response-Time` and, when advised, `Content-Encoding: gzip`
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut out = vec![
            (headers::X_CACHE, self.cache_status.to_string()),
            (headers::X_RESPONSE_TIME, format!("{}ms", self.elapsed_ms)),
        ];
        if self.compress_hint {
            out.push((headers::CONTENT_ENCODING, "gzip".to_string()));
        }
        out
    }
}

/// Result of a cache-aside call plus its metadata
#[derive(Debug)]
pub struct Outcome<T> {
    pub result: ExecutorResult<T>,
    pub meta: ResponseMeta,
}

impl<T> Outcome<T> {
    pub fn is_hit(&self) -> bool {
        self.meta.cache_status == CacheStatus::Hit
    }

    pub fn into_result(self) -> ExecutorResult<T> {
        self.result
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Falls back to `batch_chunk_size`
    pub chunk_size: Option<usize>,
    /// Per-chunk deadline; falls back to `request_timeout_ms`
    pub chunk_timeout: Option<Duration>,
}

/// Results of a batch run
///
/// `results` holds the outputs of every chunk that completed, in input order.
/// When a chunk fails, `error` carries the cause and later chunks never ran.
#[derive(Debug)]
pub struct BatchOutcome<T> {
    pub results: Vec<T>,
    pub error: Option<ExecutorError>,
    pub chunks_processed: usize,
    pub total_chunks: usize,
    pub elapsed_ms: u64,
}

impl<T> BatchOutcome<T> {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }

    /// All-or-nothing view: the prefix is discarded if any chunk failed
    pub fn into_result(self) -> ExecutorResult<Vec<T>> {
        match self.error {
            None => Ok(self.results),
            Some(e) => Err(e),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    /// Items emitted between cooperative yields; falls back to `stream_chunk_size`
    pub chunk_size: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StreamSummary {
    pub lines: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ParallelOptions {
    /// Tolerate individual fetcher failures
    pub partial: bool,
    /// Shared deadline for all fetchers; falls back to `request_timeout_ms`
    pub timeout: Option<Duration>,
}

impl ParallelOptions {
    pub fn partial() -> Self {
        Self {
            partial: true,
            timeout: None,
        }
    }

    pub fn strict() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
