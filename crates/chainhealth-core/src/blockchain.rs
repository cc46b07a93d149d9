//! Cross-chain health manager.
//!
//! [`BlockchainHealthManager`] is the explicit registry of per-chain
//! [`ProvidersHealthManager`]s. Each registered manager gets a watcher task
//! that wakes on the manager's change signal and recomputes the overall
//! status with the same rules used one level down (see [`combine`]).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::providers::ProvidersHealthManager;
use crate::signal::{SignalHub, Subscription};
use crate::status::{combine, AggregatedStatus, ProviderStatus};

/// Name of the overall aggregate.
pub const BLOCKCHAIN_STATUS_NAME: &str = "blockchain";

/// Overall status plus one aggregate per chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockchainStatus {
    pub status: AggregatedStatus,
    pub status_per_chain: BTreeMap<u64, AggregatedStatus>,
}

/// Overall status, per-chain aggregates and per-provider detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockchainFullStatus {
    pub status: AggregatedStatus,
    pub status_per_chain: BTreeMap<u64, AggregatedStatus>,
    pub status_per_chain_per_provider: BTreeMap<u64, BTreeMap<String, ProviderStatus>>,
}

struct Watcher {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct ChainEntry {
    manager: Arc<ProvidersHealthManager>,
    watcher: Option<Watcher>,
}

struct State {
    chains: BTreeMap<u64, ChainEntry>,
    epoch: u64,
    status: AggregatedStatus,
}

struct Inner {
    state: Mutex<State>,
    subscribers: SignalHub,
    next_epoch: AtomicU64,
    shutdown: CancellationToken,
}

/// Health across every registered chain.
pub struct BlockchainHealthManager {
    inner: Arc<Inner>,
}

impl BlockchainHealthManager {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    chains: BTreeMap::new(),
                    epoch: 0,
                    status: combine(BLOCKCHAIN_STATUS_NAME, std::iter::empty::<&ProviderStatus>()),
                }),
                subscribers: SignalHub::new(),
                next_epoch: AtomicU64::new(1),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Register a chain's manager and start watching it.
    ///
    /// Registering a chain ID again replaces the previous manager and stops
    /// its watcher. After [`stop`](Self::stop) the manager is still recorded
    /// for snapshots but no watcher is started.
    ///
    /// # Panics
    /// Must be called from within a Tokio runtime.
    pub fn register_providers_health_manager(&self, manager: Arc<ProvidersHealthManager>) {
        let chain_id = manager.chain_id();
        let watcher = if self.inner.shutdown.is_cancelled() {
            tracing::warn!(chain_id, "health manager stopped, chain registered without watcher");
            None
        } else {
            let cancel = self.inner.shutdown.child_token();
            let subscription = manager.subscribe();
            let handle = tokio::spawn(watch_chain(
                Arc::downgrade(&self.inner),
                Arc::clone(&manager),
                subscription,
                cancel.clone(),
            ));
            Some(Watcher { cancel, handle })
        };

        let replaced = self
            .inner
            .lock()
            .chains
            .insert(chain_id, ChainEntry { manager, watcher });
        if let Some(Watcher { cancel, .. }) = replaced.and_then(|old| old.watcher) {
            tracing::debug!(chain_id, "replacing chain health manager");
            cancel.cancel();
        }

        self.inner.aggregate_and_publish();
    }

    /// The registered manager for `chain_id`.
    pub fn providers_health_manager(&self, chain_id: u64) -> Option<Arc<ProvidersHealthManager>> {
        self.inner
            .lock()
            .chains
            .get(&chain_id)
            .map(|entry| Arc::clone(&entry.manager))
    }

    /// Registered chain IDs in ascending order.
    pub fn chain_ids(&self) -> Vec<u64> {
        self.inner.lock().chains.keys().copied().collect()
    }

    /// Subscribe to overall status changes. See [`crate::signal`].
    pub fn subscribe(&self) -> Subscription {
        self.inner.subscribers.subscribe()
    }

    /// Remove a subscription. Safe to call more than once.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        self.inner.subscribers.unsubscribe(subscription);
    }

    /// The cached overall status.
    pub fn status(&self) -> AggregatedStatus {
        self.inner.lock().status.clone()
    }

    /// Overall status with per-chain and per-provider detail, read from every
    /// chain manager at call time.
    pub fn get_full_status(&self) -> BlockchainFullStatus {
        let status = self.status();
        let mut status_per_chain = BTreeMap::new();
        let mut status_per_chain_per_provider = BTreeMap::new();
        for (chain_id, manager) in self.inner.managers() {
            status_per_chain.insert(chain_id, manager.status());
            status_per_chain_per_provider
                .insert(chain_id, manager.get_statuses().into_iter().collect());
        }
        BlockchainFullStatus {
            status,
            status_per_chain,
            status_per_chain_per_provider,
        }
    }

    /// Overall status and one aggregate per chain.
    pub fn get_status_per_chain(&self) -> BlockchainStatus {
        let status = self.status();
        let status_per_chain = self
            .inner
            .managers()
            .into_iter()
            .map(|(chain_id, manager)| (chain_id, manager.status()))
            .collect();
        BlockchainStatus {
            status,
            status_per_chain,
        }
    }

    /// Stop every chain watcher and release its subscription.
    ///
    /// Waits for the watchers to exit. Calling it again is a no-op.
    pub async fn stop(&self) {
        self.inner.shutdown.cancel();
        let watchers: Vec<(u64, Watcher)> = self
            .inner
            .lock()
            .chains
            .iter_mut()
            .filter_map(|(chain_id, entry)| entry.watcher.take().map(|w| (*chain_id, w)))
            .collect();

        for (chain_id, watcher) in watchers {
            watcher.cancel.cancel();
            if let Err(e) = watcher.handle.await {
                tracing::warn!(chain_id, error = %e, "chain watcher ended abnormally");
            }
        }
    }
}

impl Default for BlockchainHealthManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BlockchainHealthManager {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

impl std::fmt::Debug for BlockchainHealthManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("BlockchainHealthManager")
            .field("chains", &state.chains.keys().collect::<Vec<_>>())
            .field("status", &state.status.status)
            .finish()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn managers(&self) -> Vec<(u64, Arc<ProvidersHealthManager>)> {
        self.lock()
            .chains
            .iter()
            .map(|(chain_id, entry)| (*chain_id, Arc::clone(&entry.manager)))
            .collect()
    }

    /// Recompute the overall status and signal subscribers if it changed.
    ///
    /// Chain managers are read without holding our own lock. The epoch taken
    /// before reading keeps a slow computation from overwriting a newer one.
    fn aggregate_and_publish(&self) {
        let epoch = self.next_epoch.fetch_add(1, Ordering::SeqCst);
        let chain_statuses: Vec<AggregatedStatus> = self
            .managers()
            .into_iter()
            .map(|(_, manager)| manager.status())
            .collect();
        let status = combine(BLOCKCHAIN_STATUS_NAME, &chain_statuses);

        let transition = {
            let mut state = self.lock();
            if epoch <= state.epoch {
                return;
            }
            let previous = state.status.status;
            state.epoch = epoch;
            state.status = status;
            (previous != state.status.status).then(|| (previous, state.status.status))
        };

        if let Some((from, to)) = transition {
            tracing::info!(%from, %to, "blockchain status changed");
            self.subscribers.notify();
        }
    }
}

async fn watch_chain(
    inner: Weak<Inner>,
    manager: Arc<ProvidersHealthManager>,
    mut subscription: Subscription,
    cancel: CancellationToken,
) {
    let chain_id = manager.chain_id();
    tracing::debug!(chain_id, "chain watcher started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            signal = subscription.changed() => {
                if signal.is_none() {
                    break;
                }
                match inner.upgrade() {
                    Some(inner) => inner.aggregate_and_publish(),
                    None => break,
                }
            }
        }
    }
    manager.unsubscribe(&subscription);
    tracing::debug!(chain_id, "chain watcher stopped");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;

    use super::*;
    use crate::error::TransportError;
    use crate::status::{RpcProviderCallStatus, StatusType};

    fn ok(name: &str) -> RpcProviderCallStatus {
        let now = Utc::now();
        RpcProviderCallStatus::success(name, now, now)
    }

    fn fail(name: &str) -> RpcProviderCallStatus {
        let now = Utc::now();
        RpcProviderCallStatus::failure(name, now, now, TransportError::Http("refused".into()))
    }

    async fn wait_for(bhm: &BlockchainHealthManager, expected: StatusType) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while bhm.status().status != expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("overall status never became {expected}"));
    }

    #[tokio::test]
    async fn empty_registry_is_down() {
        let bhm = BlockchainHealthManager::new();
        assert_eq!(bhm.status().status, StatusType::Down);
        assert_eq!(bhm.status().name, BLOCKCHAIN_STATUS_NAME);
        assert!(bhm.get_full_status().status_per_chain.is_empty());
    }

    #[tokio::test]
    async fn one_chain_up_is_enough() {
        let bhm = BlockchainHealthManager::new();
        let mainnet = Arc::new(ProvidersHealthManager::new(1));
        let optimism = Arc::new(ProvidersHealthManager::new(10));
        bhm.register_providers_health_manager(mainnet.clone());
        bhm.register_providers_health_manager(optimism.clone());

        mainnet.update(&[ok("infura")]);
        optimism.update(&[fail("alchemy")]);
        wait_for(&bhm, StatusType::Up).await;

        mainnet.update(&[fail("infura")]);
        wait_for(&bhm, StatusType::Down).await;
        bhm.stop().await;
    }

    #[tokio::test]
    async fn unknown_chains_make_unknown_overall() {
        let bhm = BlockchainHealthManager::new();
        let mainnet = Arc::new(ProvidersHealthManager::new(1));
        mainnet.register_provider("infura");
        bhm.register_providers_health_manager(mainnet);
        assert_eq!(bhm.status().status, StatusType::Unknown);
        bhm.stop().await;
    }

    #[tokio::test]
    async fn subscribers_hear_overall_transitions() {
        let bhm = BlockchainHealthManager::new();
        let mut sub = bhm.subscribe();
        let mainnet = Arc::new(ProvidersHealthManager::new(1));
        bhm.register_providers_health_manager(mainnet.clone());
        assert!(!sub.try_changed(), "still down after registering");

        mainnet.update(&[ok("infura")]);
        tokio::time::timeout(Duration::from_secs(2), sub.changed())
            .await
            .expect("no wake-up for down -> up")
            .expect("subscription closed");
        assert_eq!(bhm.status().status, StatusType::Up);
        bhm.stop().await;
    }

    #[tokio::test]
    async fn metrics_are_summed_across_chains() {
        let bhm = BlockchainHealthManager::new();
        let a = Arc::new(ProvidersHealthManager::new(1));
        let b = Arc::new(ProvidersHealthManager::new(2));
        bhm.register_providers_health_manager(a.clone());
        bhm.register_providers_health_manager(b.clone());
        a.update(&[ok("p"), ok("p")]);
        b.update(&[ok("q"), fail("r")]);
        wait_for(&bhm, StatusType::Up).await;

        let per_chain = bhm.get_status_per_chain();
        assert_eq!(per_chain.status_per_chain[&1].total_requests, 2);
        assert_eq!(per_chain.status_per_chain[&2].total_requests, 2);

        // The cached overall value refreshes on wake-ups only.
        tokio::time::timeout(Duration::from_secs(2), async {
            while bhm.status().total_requests != 4 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("overall metrics never summed");
        assert_eq!(bhm.status().total_error_count, 1);
        bhm.stop().await;
    }

    #[tokio::test]
    async fn full_status_reads_fresh_provider_detail() {
        let bhm = BlockchainHealthManager::new();
        let mainnet = Arc::new(ProvidersHealthManager::new(1));
        bhm.register_providers_health_manager(mainnet.clone());
        mainnet.update(&[ok("infura")]);
        mainnet.update(&[ok("infura"), ok("alchemy")]);

        let full = bhm.get_full_status();
        let providers = &full.status_per_chain_per_provider[&1];
        assert_eq!(providers["infura"].total_requests, 2);
        assert_eq!(providers["alchemy"].total_requests, 1);
        assert_eq!(full.status_per_chain[&1].total_requests, 3);

        let json = serde_json::to_value(&full).unwrap();
        assert_eq!(json["status_per_chain_per_provider"]["1"]["infura"]["status"], "up");
        bhm.stop().await;
    }

    #[tokio::test]
    async fn stop_releases_subscriptions_and_is_idempotent() {
        let bhm = BlockchainHealthManager::new();
        let mainnet = Arc::new(ProvidersHealthManager::new(1));
        bhm.register_providers_health_manager(mainnet.clone());

        bhm.stop().await;
        bhm.stop().await;

        mainnet.update(&[ok("infura")]);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(bhm.status().status, StatusType::Down, "no watcher after stop");
        assert_eq!(bhm.chain_ids(), vec![1]);
    }

    #[tokio::test]
    async fn reregistering_replaces_the_manager() {
        let bhm = BlockchainHealthManager::new();
        let first = Arc::new(ProvidersHealthManager::new(1));
        let second = Arc::new(ProvidersHealthManager::new(1));
        first.update(&[ok("infura")]);
        bhm.register_providers_health_manager(first.clone());
        assert_eq!(bhm.status().status, StatusType::Up);

        bhm.register_providers_health_manager(second.clone());
        assert_eq!(bhm.status().status, StatusType::Down);
        assert!(Arc::ptr_eq(&bhm.providers_health_manager(1).unwrap(), &second));
        bhm.stop().await;
    }
}
