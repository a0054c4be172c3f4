//! # kad-dht
//!
//! A Kademlia-style distributed hash table peer engine: XOR-metric
//! routing, iterative parallel lookups, replicated key/value storage, and
//! a periodic refresh/republish scheduler.
//!
//! This crate implements the core peer state machine only. It has no
//! opinion on wire formats, bootstrap discovery, or on-disk persistence —
//! callers supply a concrete [`Transport`] and get back a [`Peer`]
//! exposing `locate_nodes`, `locate_value`, `store_value`, and `join`.
//!
//! ## Key parameters
//!
//! | Parameter | Default |
//! |---|---|
//! | `k` (bucket size / replication factor) | 20 |
//! | `alpha` (initial lookup parallelism) | 3 |
//! | `keysize_bits` | 128 |
//! | refresh interval | 15s |
//! | per-RPC query timeout | 5s |
//!
//! See [`PeerConfig`] for the full tunable set.

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod bucket;
pub mod config;
pub mod contact;
pub mod dispatch;
pub mod error;
pub mod helper;
pub mod key;
pub mod lookup;
pub mod peer;
pub mod routing_table;
pub mod scheduler;
pub mod stats;
pub mod storage;
pub mod transport;
pub mod transport_budget;

pub use config::PeerConfig;
pub use contact::{Contact, ContactDescriptor};
pub use error::{DhtError, Result};
pub use helper::Helper;
pub use key::{Key, KeyOrName};
pub use peer::Peer;
pub use transport::{RpcMethod, RpcResponse, Transport};

/// Installs a `tracing` subscriber suitable for test output. Idempotent;
/// safe to call from any test that wants log visibility on failure.
#[cfg(test)]
pub(crate) fn init_test_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}
