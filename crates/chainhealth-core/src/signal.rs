//! Coalescing change signals.
//!
//! Every [`Subscription`] owns a single-slot channel. [`SignalHub::notify`]
//! tries to fill each slot without waiting: an empty slot takes the signal,
//! a full one drops it. The contract for subscribers is therefore:
//!
//! - at least one wake-up arrives after any burst of changes settles;
//! - intermediate states may be skipped, and signals carry no payload, so a
//!   woken subscriber re-reads the current status from its source;
//! - once [`SignalHub::unsubscribe`] returns, no further signal is sent to
//!   that subscription.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::{self, error::TrySendError};

/// Identifier of one subscription within its hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Receiving end of a coalescing signal.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    rx: mpsc::Receiver<()>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next signal. Returns `None` once the subscription has
    /// been removed and any pending signal was consumed.
    pub async fn changed(&mut self) -> Option<()> {
        self.rx.recv().await
    }

    /// Consume a pending signal without waiting.
    pub fn try_changed(&mut self) -> bool {
        self.rx.try_recv().is_ok()
    }
}

/// Registry of subscriptions for one publisher.
#[derive(Default)]
pub struct SignalHub {
    senders: Mutex<HashMap<SubscriptionId, mpsc::Sender<()>>>,
    next_id: AtomicU64,
}

impl SignalHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscription. It starts with no pending signal.
    pub fn subscribe(&self) -> Subscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(1);
        self.lock().insert(id, tx);
        Subscription { id, rx }
    }

    /// Remove a subscription. Calling it again is a no-op.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        self.remove(subscription.id);
    }

    /// Remove a subscription by id. Returns `true` if it was registered.
    pub fn remove(&self, id: SubscriptionId) -> bool {
        self.lock().remove(&id).is_some()
    }

    /// Signal every subscriber without blocking. Returns how many slots were
    /// filled by this call.
    pub fn notify(&self) -> usize {
        let senders = self.lock();
        let mut delivered = 0;
        for (id, tx) in senders.iter() {
            match tx.try_send(()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(())) => {}
                Err(TrySendError::Closed(())) => {
                    tracing::trace!(subscription = %id, "subscriber dropped its receiver");
                }
            }
        }
        delivered
    }

    /// Number of registered subscriptions.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if nobody is subscribed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SubscriptionId, mpsc::Sender<()>>> {
        self.senders.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for SignalHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalHub")
            .field("subscribers", &self.len())
            .finish()
    }
}
