//! # Cache Layer
//!
//! Two tiers behind one facade:
//!
//! - [`MemoryCache`]: process-local TTL map, always available
//! - [`DurableCache`]: Redis, with per-call fallback to a `MemoryCache`
//!
//! [`CacheManager`] picks the tier from configuration, applies a per-call
//! deadline and a circuit breaker to durable calls, and never surfaces an
//! error to its caller.
//!
//! ```rust
//! use resilient_cache::cache::CacheManager;
//! use resilient_cache::config::ResilienceConfig;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let cache = CacheManager::new(ResilienceConfig::default());
//! cache.set("greeting", "\"hello\"", Duration::from_secs(60)).await;
//! assert_eq!(cache.get("greeting").await.as_deref(), Some("\"hello\""));
//! # }
//! ```

pub mod entry;
pub mod errors;
pub mod manager;
pub mod providers;
pub mod traits;

pub use entry::{CacheEntry, CacheStats, MAX_ENTRY_TTL};
pub use errors::{CacheError, CacheResult};
pub use manager::CacheManager;
pub use providers::{ConnectionStatus, DurableCache, DurableCacheOptions, MemoryCache};
pub use traits::CacheService;
