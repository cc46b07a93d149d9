//! chainhealth-core: provider health tracking for multi-provider RPC access.
//!
//! # Overview
//!
//! Call outcomes flow upward through three levels:
//!
//! ```text
//! RpcProviderCallStatus → ProvidersHealthManager (per chain, owns an Aggregator)
//!                       → BlockchainHealthManager (all chains)
//!                       → subscribers / snapshots
//! ```
//!
//! - [`classify`]: sorts call errors into [`ErrorKind`]s; only `Other` is critical
//! - [`status`]: [`ProviderStatus`], deltas and the up/down/unknown combination rule
//! - [`aggregator`]: the per-chain provider map
//! - [`signal`]: coalescing single-slot change signals
//! - [`providers`] / [`blockchain`]: the per-chain and cross-chain managers

pub mod aggregator;
pub mod blockchain;
pub mod classify;
pub mod error;
pub mod providers;
pub mod signal;
pub mod status;

pub use aggregator::Aggregator;
pub use blockchain::{BlockchainFullStatus, BlockchainHealthManager, BlockchainStatus};
pub use classify::{classify, classify_error, is_non_critical, is_timeout, ErrorKind};
pub use error::{AttemptError, CodeExtraction, JsonRpcError, TransportError};
pub use providers::ProvidersHealthManager;
pub use signal::{SignalHub, Subscription, SubscriptionId};
pub use status::{
    combine, compute_delta, AggregatedStatus, ProviderStatus, RpcProviderCallStatus, StatusType,
};
