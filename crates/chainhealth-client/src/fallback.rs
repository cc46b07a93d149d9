//! Multi-provider fallback router.
//!
//! [`FallbackClient`] tries an ordered list of providers for one chain until
//! one succeeds. Every executed attempt is reported to the chain's
//! [`ProvidersHealthManager`] and fed back to the circuit breaker.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use chainhealth_core::{
    classify_error, AttemptError, ErrorKind, ProvidersHealthManager, RpcProviderCallStatus,
    TransportError,
};

use crate::connectivity::Connectivity;
use crate::policy::CircuitBreaker;
use crate::provider::{execute_under_rate_limit, saturating_millis, ProviderClient};
use crate::transport::TransportProvider;

/// Router configuration.
#[derive(Debug, Clone)]
pub struct FallbackConfig {
    /// Upper bound for a single provider attempt. `None` disables it.
    pub attempt_timeout: Option<Duration>,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            attempt_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Ordered fallback over the providers of one chain.
///
/// Cloning is cheap. The provider list, connectivity flag, circuit breaker
/// and health manager are shared with the clone; tags and config are copied.
pub struct FallbackClient<P> {
    providers: Arc<[Arc<P>]>,
    connectivity: Connectivity,
    circuit_breaker: Arc<dyn CircuitBreaker>,
    health: Arc<ProvidersHealthManager>,
    config: FallbackConfig,
    tag: String,
    group_tag: String,
}

impl<P> Clone for FallbackClient<P> {
    fn clone(&self) -> Self {
        Self {
            providers: Arc::clone(&self.providers),
            connectivity: self.connectivity.clone(),
            circuit_breaker: Arc::clone(&self.circuit_breaker),
            health: Arc::clone(&self.health),
            config: self.config.clone(),
            tag: self.tag.clone(),
            group_tag: self.group_tag.clone(),
        }
    }
}

impl<P: ProviderClient> FallbackClient<P> {
    pub fn new(
        providers: Vec<Arc<P>>,
        circuit_breaker: Arc<dyn CircuitBreaker>,
        health: Arc<ProvidersHealthManager>,
    ) -> Self {
        Self {
            providers: providers.into(),
            connectivity: Connectivity::new(),
            circuit_breaker,
            health,
            config: FallbackConfig::default(),
            tag: String::new(),
            group_tag: String::new(),
        }
    }

    pub fn with_config(mut self, config: FallbackConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a connectivity flag with other routers of the same chain.
    pub fn with_connectivity(mut self, connectivity: Connectivity) -> Self {
        self.connectivity = connectivity;
        self
    }

    pub fn chain_id(&self) -> u64 {
        self.health.chain_id()
    }

    pub fn providers(&self) -> &[Arc<P>] {
        &self.providers
    }

    pub fn health(&self) -> &Arc<ProvidersHealthManager> {
        &self.health
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub fn is_connected(&self) -> bool {
        self.connectivity.is_connected()
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn set_tag(&mut self, tag: impl Into<String>) {
        self.tag = tag.into();
    }

    pub fn group_tag(&self) -> &str {
        &self.group_tag
    }

    pub fn set_group_tag(&mut self, group_tag: impl Into<String>) {
        self.group_tag = group_tag.into();
    }

    /// Run `op` against each provider in order until one succeeds.
    ///
    /// - A provider whose circuit is open is skipped.
    /// - `cancel` is checked before each attempt and raced against the
    ///   running one; cancellation returns [`TransportError::Cancelled`] and
    ///   the cancelled attempt is not reported.
    /// - A `NotFound` failure does not stop the fallback. If no later provider
    ///   succeeds, the last `NotFound` error is returned as the answer.
    /// - Otherwise an exhausted list returns [`TransportError::Exhausted`], or
    ///   [`TransportError::AllProvidersDown`] if no attempt could run.
    pub async fn try_with_fallback<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        method: &str,
        op: F,
    ) -> Result<T, TransportError>
    where
        F: Fn(Arc<P>) -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let chain_id = self.chain_id();
        let mut attempts: Vec<AttemptError> = Vec::new();
        let mut not_found: Option<Arc<TransportError>> = None;
        let mut any_non_critical = false;

        for provider in self.providers.iter() {
            if cancel.is_cancelled() {
                tracing::debug!(chain_id, method, tag = %self.tag, "fallback cancelled");
                return Err(TransportError::Cancelled);
            }

            let name = provider.provider_name();
            let circuit = provider.circuit_name();
            if self.circuit_breaker.is_open(circuit) {
                tracing::debug!(chain_id, provider = name, circuit, method, "circuit open, skipping");
                continue;
            }

            let start = Utc::now();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(chain_id, provider = name, method, "attempt cancelled");
                    return Err(TransportError::Cancelled);
                }
                outcome = self.attempt(provider, &op) => outcome,
            };
            let completed = Utc::now();

            let err = match outcome {
                Ok(value) => {
                    self.report(provider.as_ref(), method, start, completed, None);
                    self.circuit_breaker.record_outcome(circuit, false);
                    self.mark_connected(true);
                    return Ok(value);
                }
                Err(err) => Arc::new(err),
            };

            self.report(provider.as_ref(), method, start, completed, Some(&err));
            let kind = classify_error(&err);
            self.circuit_breaker.record_outcome(circuit, kind.is_critical());

            if kind.is_critical() {
                tracing::warn!(chain_id, provider = name, method, error = %err, "provider call failed");
            } else {
                any_non_critical = true;
                tracing::debug!(chain_id, provider = name, method, %kind, error = %err, "provider call failed, provider still healthy");
            }
            if kind == ErrorKind::NotFound {
                not_found = Some(Arc::clone(&err));
            }
            attempts.push(AttemptError {
                provider: name.to_string(),
                error: err,
            });
        }

        if attempts.is_empty() {
            tracing::warn!(chain_id, method, tag = %self.tag, "no provider available");
            return Err(TransportError::AllProvidersDown);
        }
        self.mark_connected(any_non_critical);

        if let Some(err) = not_found {
            drop(attempts);
            return Err(Arc::try_unwrap(err).unwrap_or_else(|shared| TransportError::Wrapped(Some(shared))));
        }

        tracing::warn!(
            chain_id,
            method,
            tag = %self.tag,
            group_tag = %self.group_tag,
            attempts = attempts.len(),
            "all providers failed"
        );
        Err(TransportError::Exhausted { attempts })
    }

    async fn attempt<T, F, Fut>(&self, provider: &Arc<P>, op: &F) -> Result<T, TransportError>
    where
        F: Fn(Arc<P>) -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let call = execute_under_rate_limit(provider, op);
        match self.config.attempt_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout {
                    ms: saturating_millis(limit),
                }),
            },
            None => call.await,
        }
    }

    fn report(
        &self,
        provider: &P,
        method: &str,
        start: chrono::DateTime<Utc>,
        completed: chrono::DateTime<Utc>,
        error: Option<&Arc<TransportError>>,
    ) {
        let status = RpcProviderCallStatus {
            name: provider.provider_name().to_string(),
            method: Some(method.to_string()),
            timestamp: completed,
            start,
            error: error.cloned(),
        };
        self.health.update(&[status]);
    }

    fn mark_connected(&self, connected: bool) {
        if self.connectivity.set(connected) {
            let chain_id = self.chain_id();
            if connected {
                tracing::info!(chain_id, tag = %self.tag, "chain connectivity restored");
            } else {
                tracing::warn!(chain_id, tag = %self.tag, "chain connectivity lost");
            }
        }
    }
}

impl FallbackClient<TransportProvider> {
    /// Issue a JSON-RPC call across the providers and decode the result.
    ///
    /// A result that does not decode into `T` counts as that provider's
    /// failure and the next provider is tried.
    pub async fn call<T: DeserializeOwned>(
        &self,
        cancel: &CancellationToken,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, TransportError> {
        self.try_with_fallback(cancel, method, |provider| {
            let params = params.clone();
            async move {
                let value = provider.transport().request(method, params).await?;
                Ok::<T, TransportError>(serde_json::from_value(value)?)
            }
        })
        .await
    }
}

impl<P: ProviderClient> std::fmt::Debug for FallbackClient<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackClient")
            .field("chain_id", &self.chain_id())
            .field(
                "providers",
                &self
                    .providers
                    .iter()
                    .map(|p| p.provider_name())
                    .collect::<Vec<_>>(),
            )
            .field("tag", &self.tag)
            .field("group_tag", &self.group_tag)
            .finish()
    }
}
