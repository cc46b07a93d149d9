//! Reliability policies consulted by the fallback router.
//!
//! ```text
//! attempt → [CircuitBreaker::is_open] → [RateLimiter] → transport
//!         ← [CircuitBreaker::record_outcome]
//! ```

pub mod circuit_breaker;
pub mod rate_limiter;

pub use circuit_breaker::{
    Circuit, CircuitBreaker, CircuitBreakerConfig, CircuitRegistry, CircuitState, NeverOpen,
};
pub use rate_limiter::{RateLimiter, RateLimiterConfig};
