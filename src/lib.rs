#![allow(clippy::doc_markdown)] // Allow technical terms like Redis, ND-JSON in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Resilient Cache
//!
//! Resilient caching and request-execution layer for async services.
//!
//! ## Overview
//!
//! A tiered cache (Redis, falling back to a process-local TTL map), circuit
//! breakers around unreliable dependencies, and request-orchestration
//! patterns built on both: cache-aside, bounded batching, lazy ND-JSON
//! streaming and partial-failure-tolerant parallel fetch. A generic bounded
//! resource pool rounds it out.
//!
//! The layer is agnostic to the handlers it wraps. It receives a handler, its
//! input and configuration, and returns a result plus observability metadata.
//!
//! ## Module Organization
//!
//! - [`cache`] - Cache contract, memory and durable tiers, `CacheManager`
//! - [`resilience`] - Atomic circuit breaker
//! - [`executor`] - `RequestExecutor` orchestration modes
//! - [`pool`] - Bounded `ConnectionPool`
//! - [`config`] - Layered configuration loading and validation
//! - [`error`] - Boundary error taxonomy
//! - [`logging`] - Structured `tracing` setup
//!
//! ## Quick Start
//!
//! ```rust
//! use resilient_cache::{CacheManager, ExecuteOptions, RequestExecutor, ResilienceConfig};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let config = ResilienceConfig::default();
//! let cache = Arc::new(CacheManager::new(config.clone()));
//! let executor = RequestExecutor::new(cache, config);
//!
//! let outcome = executor
//!     .execute(
//!         "tenant:7",
//!         7_u64,
//!         |id, _ctx| async move { Ok::<_, std::io::Error>(format!("tenant-{id}")) },
//!         ExecuteOptions::default(),
//!     )
//!     .await;
//!
//! for (name, value) in outcome.meta.headers() {
//!     println!("{name}: {value}");
//! }
//! assert_eq!(outcome.result.unwrap(), "tenant-7");
//! # }
//! ```
//!
//! ## Process-wide instances
//!
//! Build one `CacheManager` (and, if shared, one handler `CircuitBreaker`) at
//! startup and hand `Arc`s to every executor. Nothing here is a global, and
//! no state is shared between processes.

pub mod cache;
pub mod config;
pub mod constants;
pub mod error;
pub mod executor;
pub mod logging;
pub mod pool;
pub mod resilience;

pub use cache::{CacheManager, CacheStats, MemoryCache};
pub use config::ResilienceConfig;
pub use constants::CacheStatus;
pub use error::{BoxError, ExecutorError, ExecutorResult};
pub use executor::{
    BatchOptions, BatchOutcome, ExecuteOptions, Fetcher, Outcome, ParallelOptions, RequestContext,
    RequestExecutor, ResponseMeta, StreamOptions,
};
pub use pool::{ConnectionPool, PoolConfig, PoolError};
pub use resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
