//! Per-chain provider status aggregation.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::status::{combine, AggregatedStatus, ProviderStatus};

struct AggregatorInner {
    providers: HashMap<String, ProviderStatus>,
    /// Bumped on every mutation so readers can order snapshots.
    generation: u64,
}

/// Owns the provider name → status map of one chain.
pub struct Aggregator {
    name: String,
    inner: Mutex<AggregatorInner>,
}

impl Aggregator {
    /// Create an empty aggregator. `name` labels the aggregate it produces.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(AggregatorInner {
                providers: HashMap::new(),
                generation: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a provider in the `Unknown` state. No-op if it is already known.
    pub fn register_provider(&self, name: &str) {
        let mut inner = self.lock();
        if !inner.providers.contains_key(name) {
            inner
                .providers
                .insert(name.to_string(), ProviderStatus::new(name));
            inner.generation += 1;
        }
    }

    /// Merge one delta, creating the provider on first sight.
    pub fn update(&self, delta: &ProviderStatus) {
        let mut inner = self.lock();
        merge_into(&mut inner, delta);
        inner.generation += 1;
    }

    /// Merge a batch of deltas and return the resulting aggregate together
    /// with the generation it was computed at, all under one lock.
    pub fn apply(&self, deltas: &[ProviderStatus]) -> (u64, AggregatedStatus) {
        let mut inner = self.lock();
        for delta in deltas {
            merge_into(&mut inner, delta);
        }
        inner.generation += 1;
        (inner.generation, combine(&self.name, inner.providers.values()))
    }

    /// Combine every provider's status into one aggregate.
    pub fn compute_aggregated_status(&self) -> AggregatedStatus {
        let inner = self.lock();
        combine(&self.name, inner.providers.values())
    }

    /// Same as [`compute_aggregated_status`](Self::compute_aggregated_status).
    pub fn get_aggregated_status(&self) -> AggregatedStatus {
        self.compute_aggregated_status()
    }

    /// The aggregate together with the generation it reflects.
    pub fn snapshot(&self) -> (u64, AggregatedStatus) {
        let inner = self.lock();
        (inner.generation, combine(&self.name, inner.providers.values()))
    }

    /// Point-in-time copy of every provider's status.
    pub fn get_statuses(&self) -> HashMap<String, ProviderStatus> {
        self.lock().providers.clone()
    }

    /// Status of a single provider.
    pub fn get_status(&self, name: &str) -> Option<ProviderStatus> {
        self.lock().providers.get(name).cloned()
    }

    /// Number of known providers.
    pub fn len(&self) -> usize {
        self.lock().providers.len()
    }

    /// Returns `true` if no provider has been seen yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, AggregatorInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn merge_into(inner: &mut AggregatorInner, delta: &ProviderStatus) {
    inner
        .providers
        .entry(delta.name.clone())
        .or_insert_with(|| ProviderStatus::new(delta.name.clone()))
        .merge(delta);
}

impl std::fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregator")
            .field("name", &self.name)
            .field("providers", &self.len())
            .finish()
    }
}
