//! Transport seam and the stock provider built on it.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use chainhealth_core::TransportError;

use crate::policy::{RateLimiter, RateLimiterConfig};
use crate::provider::ProviderClient;

/// Sends one JSON-RPC call to one endpoint.
///
/// The trait is object-safe and can be stored as `Arc<dyn RpcTransport>`.
#[async_trait]
pub trait RpcTransport: Send + Sync + 'static {
    /// Issue `method` with `params` and return the raw `result` value.
    async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value, TransportError>;

    /// Endpoint identifier, usually the URL.
    fn url(&self) -> &str;
}

/// A named provider backed by an [`RpcTransport`].
pub struct TransportProvider {
    name: String,
    circuit_name: String,
    transport: Arc<dyn RpcTransport>,
    limiter: Option<RateLimiter>,
}

impl TransportProvider {
    pub fn new(name: impl Into<String>, transport: Arc<dyn RpcTransport>) -> Self {
        let name = name.into();
        Self {
            circuit_name: name.clone(),
            name,
            transport,
            limiter: None,
        }
    }

    /// Share a circuit with other providers, e.g. two endpoints of one vendor.
    pub fn with_circuit_name(mut self, circuit_name: impl Into<String>) -> Self {
        self.circuit_name = circuit_name.into();
        self
    }

    pub fn with_rate_limit(mut self, config: RateLimiterConfig) -> Self {
        self.limiter = Some(RateLimiter::new(config));
        self
    }

    pub fn transport(&self) -> &Arc<dyn RpcTransport> {
        &self.transport
    }
}

impl ProviderClient for TransportProvider {
    fn provider_name(&self) -> &str {
        &self.name
    }

    fn circuit_name(&self) -> &str {
        &self.circuit_name
    }

    fn rate_limiter(&self) -> Option<&RateLimiter> {
        self.limiter.as_ref()
    }
}

impl std::fmt::Debug for TransportProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportProvider")
            .field("name", &self.name)
            .field("circuit_name", &self.circuit_name)
            .field("url", &self.transport.url())
            .field("rate_limited", &self.limiter.is_some())
            .finish()
    }
}
