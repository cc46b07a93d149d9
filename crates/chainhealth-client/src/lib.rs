//! chainhealth-client: multi-provider fallback RPC access with health reporting.
//!
//! # Architecture
//!
//! ```text
//! caller → FallbackClient ──► provider 1 ─✗─► provider 2 ─✓─► result
//!               │  (circuit breaker, rate limiter, attempt timeout)
//!               ▼
//!     ProvidersHealthManager (chainhealth-core)
//! ```
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use chainhealth_client::{CircuitRegistry, FallbackClient, TransportProvider};
//! use chainhealth_core::{BlockchainHealthManager, ProvidersHealthManager};
//! use tokio_util::sync::CancellationToken;
//!
//! let health = Arc::new(ProvidersHealthManager::new(1));
//! let blockchain = BlockchainHealthManager::new();
//! blockchain.register_providers_health_manager(health.clone());
//!
//! let client = FallbackClient::new(
//!     vec![Arc::new(TransportProvider::new("infura", infura)),
//!          Arc::new(TransportProvider::new("alchemy", alchemy))],
//!     Arc::new(CircuitRegistry::default()),
//!     health,
//! );
//! let block: String = client.call(&CancellationToken::new(), "eth_blockNumber", vec![]).await?;
//! ```

pub mod connectivity;
pub mod fallback;
pub mod policy;
pub mod provider;
pub mod transport;

pub use connectivity::Connectivity;
pub use fallback::{FallbackClient, FallbackConfig};
pub use policy::{
    CircuitBreaker, CircuitBreakerConfig, CircuitRegistry, CircuitState, NeverOpen, RateLimiter,
    RateLimiterConfig,
};
pub use provider::{execute_under_rate_limit, ProviderClient};
pub use transport::{RpcTransport, TransportProvider};
