//! Shared "is the chain reachable" flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Connectivity of one chain as last observed by any router sharing it.
///
/// Clones share the same flag.
#[derive(Debug, Clone)]
pub struct Connectivity {
    connected: Arc<AtomicBool>,
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new()
    }
}

impl Connectivity {
    /// Starts connected.
    pub fn new() -> Self {
        Self {
            connected: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Store `connected`, returning `true` if the value flipped.
    pub fn set(&self, connected: bool) -> bool {
        self.connected.swap(connected, Ordering::AcqRel) != connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let a = Connectivity::new();
        let b = a.clone();
        assert!(b.is_connected());
        assert!(a.set(false));
        assert!(!b.is_connected());
        assert!(!b.set(false), "no flip");
        assert!(b.set(true));
        assert!(a.is_connected());
    }
}
