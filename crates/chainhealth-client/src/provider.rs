//! The provider abstraction the fallback router iterates over.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chainhealth_core::TransportError;

use crate::policy::RateLimiter;

/// One upstream the router can try.
///
/// Implementations must be `Send + Sync`; the router shares them across
/// tasks behind an `Arc`.
pub trait ProviderClient: Send + Sync + 'static {
    /// Name used in health reports and attempt errors.
    fn provider_name(&self) -> &str;

    /// Key passed to the circuit breaker. Defaults to the provider name.
    fn circuit_name(&self) -> &str {
        self.provider_name()
    }

    /// Token bucket guarding this provider, if any.
    fn rate_limiter(&self) -> Option<&RateLimiter> {
        None
    }
}

/// Run `op` against `provider` if its rate limiter lets it through.
///
/// A refused token yields [`TransportError::RateLimited`] without calling
/// `op`.
pub async fn execute_under_rate_limit<P, T, F, Fut>(
    provider: &Arc<P>,
    op: &F,
) -> Result<T, TransportError>
where
    P: ProviderClient,
    F: Fn(Arc<P>) -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    if let Some(limiter) = provider.rate_limiter() {
        if !limiter.try_acquire() {
            tracing::debug!(
                provider = provider.provider_name(),
                wait_ms = saturating_millis(limiter.wait_time()),
                "rate limited locally"
            );
            return Err(TransportError::RateLimited {
                provider: provider.provider_name().to_string(),
            });
        }
    }
    op(Arc::clone(provider)).await
}

/// Whole milliseconds in `d`, clamped to `u64::MAX`.
pub(crate) fn saturating_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
