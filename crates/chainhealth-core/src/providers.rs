//! Per-chain health manager.
//!
//! [`ProvidersHealthManager`] folds call outcomes into its chain's
//! [`Aggregator`] and signals subscribers whenever the chain's coarse status
//! (up / down / unknown) changes.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::aggregator::Aggregator;
use crate::signal::{SignalHub, Subscription};
use crate::status::{compute_delta, AggregatedStatus, ProviderStatus, RpcProviderCallStatus};

struct Published {
    generation: u64,
    status: AggregatedStatus,
}

/// Health of every provider serving one chain.
pub struct ProvidersHealthManager {
    chain_id: u64,
    aggregator: Aggregator,
    last: Mutex<Published>,
    subscribers: SignalHub,
}

impl ProvidersHealthManager {
    pub fn new(chain_id: u64) -> Self {
        let aggregator = Aggregator::new(chain_label(chain_id));
        let initial = aggregator.compute_aggregated_status();
        Self {
            chain_id,
            aggregator,
            last: Mutex::new(Published {
                generation: 0,
                status: initial,
            }),
            subscribers: SignalHub::new(),
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Register a provider ahead of its first call so it shows as `Unknown`.
    pub fn register_provider(&self, name: &str) {
        self.aggregator.register_provider(name);
        // Registration can turn an empty (down) chain into an unknown one.
        let (generation, status) = self.aggregator.snapshot();
        self.publish(generation, status);
    }

    /// Fold a batch of call outcomes into the chain's status.
    ///
    /// Never blocks on I/O. Subscribers are signalled only if the coarse
    /// status changed.
    pub fn update(&self, calls: &[RpcProviderCallStatus]) {
        if calls.is_empty() {
            return;
        }
        let deltas: Vec<ProviderStatus> = calls.iter().map(compute_delta).collect();
        let (generation, status) = self.aggregator.apply(&deltas);
        self.publish(generation, status);
    }

    /// Subscribe to status changes. See [`crate::signal`] for the contract.
    pub fn subscribe(&self) -> Subscription {
        self.subscribers.subscribe()
    }

    /// Remove a subscription. Safe to call more than once.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        self.subscribers.unsubscribe(subscription);
    }

    /// The chain's aggregated status as of the latest processed update.
    pub fn status(&self) -> AggregatedStatus {
        self.lock().status.clone()
    }

    /// Per-provider snapshot.
    pub fn get_statuses(&self) -> HashMap<String, ProviderStatus> {
        self.aggregator.get_statuses()
    }

    fn publish(&self, generation: u64, status: AggregatedStatus) {
        let changed_to = {
            let mut last = self.lock();
            // A concurrent update may already have stored a newer aggregate.
            if generation <= last.generation {
                return;
            }
            let changed = last.status.status != status.status;
            let previous = last.status.status;
            last.generation = generation;
            last.status = status;
            changed.then(|| (previous, last.status.status))
        };

        if let Some((from, to)) = changed_to {
            tracing::info!(chain_id = self.chain_id, %from, %to, "chain status changed");
            self.subscribers.notify();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Published> {
        self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ProvidersHealthManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvidersHealthManager")
            .field("chain_id", &self.chain_id)
            .field("status", &self.lock().status.status)
            .finish()
    }
}

/// Name given to a chain's aggregate.
pub fn chain_label(chain_id: u64) -> String {
    format!("chain-{chain_id}")
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::error::TransportError;
    use crate::status::StatusType;

    fn ok(name: &str) -> RpcProviderCallStatus {
        let now = Utc::now();
        RpcProviderCallStatus::success(name, now - Duration::milliseconds(10), now)
    }

    fn fail(name: &str) -> RpcProviderCallStatus {
        let now = Utc::now();
        RpcProviderCallStatus::failure(name, now, now, TransportError::Http("refused".into()))
    }

    #[test]
    fn starts_down() {
        let phm = ProvidersHealthManager::new(1);
        assert_eq!(phm.status().status, StatusType::Down);
        assert_eq!(phm.status().name, "chain-1");
        assert!(phm.get_statuses().is_empty());
    }

    #[test]
    fn registration_makes_chain_unknown() {
        let phm = ProvidersHealthManager::new(1);
        let mut sub = phm.subscribe();
        phm.register_provider("infura");
        assert_eq!(phm.status().status, StatusType::Unknown);
        assert!(sub.try_changed());
    }

    #[test]
    fn status_follows_updates() {
        let phm = ProvidersHealthManager::new(1);
        phm.update(&[ok("a"), fail("b")]);
        assert_eq!(phm.status().status, StatusType::Up);
        assert_eq!(phm.status().total_requests, 2);

        phm.update(&[fail("a")]);
        assert_eq!(phm.status().status, StatusType::Down);
        let statuses = phm.get_statuses();
        assert_eq!(statuses["a"].total_requests, 2);
        assert_eq!(statuses["b"].total_error_count, 1);
    }

    #[test]
    fn signals_only_on_transition() {
        let phm = ProvidersHealthManager::new(1);
        let mut sub = phm.subscribe();

        phm.update(&[ok("a")]);
        assert!(sub.try_changed(), "down -> up must signal");

        phm.update(&[ok("a")]);
        phm.update(&[ok("a"), ok("b")]);
        assert!(!sub.try_changed(), "no transition, no signal");

        phm.update(&[fail("a"), fail("b")]);
        assert!(sub.try_changed(), "up -> down must signal");
        assert!(!sub.try_changed());
    }

    #[test]
    fn repeated_transitions_coalesce_for_a_slow_subscriber() {
        let phm = ProvidersHealthManager::new(1);
        let mut sub = phm.subscribe();
        phm.update(&[ok("a")]);
        phm.update(&[fail("a")]);
        phm.update(&[ok("a")]);
        assert!(sub.try_changed());
        assert!(!sub.try_changed());
        assert_eq!(phm.status().status, StatusType::Up);
    }

    #[test]
    fn unsubscribed_receives_nothing() {
        let phm = ProvidersHealthManager::new(1);
        let mut sub = phm.subscribe();
        phm.unsubscribe(&sub);
        phm.unsubscribe(&sub);
        phm.update(&[ok("a")]);
        assert!(!sub.try_changed());
    }

    #[test]
    fn empty_batch_is_ignored() {
        let phm = ProvidersHealthManager::new(1);
        phm.update(&[]);
        assert_eq!(phm.status().status, StatusType::Down);
    }

    #[tokio::test]
    async fn concurrent_updates_accumulate() {
        let phm = std::sync::Arc::new(ProvidersHealthManager::new(10));
        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let phm = phm.clone();
                tokio::spawn(async move {
                    for _ in 0..50 {
                        phm.update(&[ok("a")]);
                    }
                })
            })
            .collect();
        futures::future::join_all(tasks).await;

        let status = phm.status();
        assert_eq!(status.status, StatusType::Up);
        assert_eq!(status.total_requests, 800);
        assert_eq!(phm.get_statuses()["a"].total_requests, 800);
    }
}
