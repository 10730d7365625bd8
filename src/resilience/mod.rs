//! # Resilience Module
//!
//! Circuit breaking for calls to unreliable dependencies. One breaker guards
//! the durable cache tier (owned by `CacheManager`) and one guards the domain
//! handler backend (owned by `RequestExecutor`). Breakers are process-local:
//! replicas never share circuit state.
//!
//! ## Usage
//!
//! ```rust
//! use resilient_cache::resilience::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CircuitBreakerConfig::new(5, Duration::from_secs(30));
//! let circuit_breaker = CircuitBreaker::new("tenant_lookup", config);
//!
//! let result = circuit_breaker
//!     .call(|| async { Ok::<&str, std::io::Error>("success") })
//!     .await?;
//! assert_eq!(result, "success");
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod metrics;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitState};
pub use config::CircuitBreakerConfig;
pub use metrics::CircuitBreakerMetrics;
