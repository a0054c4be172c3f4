//! Public peer operations (C8, §4.6).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::thread_rng;
use tracing::error;

use crate::config::PeerConfig;
use crate::contact::Contact;
use crate::dispatch::{self, DispatchOutcome};
use crate::error::{DhtError, Result};
use crate::helper::Helper;
use crate::key::{Key, KeyOrName};
use crate::lookup::{self, Finder, LookupResult};
use crate::routing_table::{AddToTableOutcome, RoutingTable};
use crate::scheduler::{RefreshAction, Scheduler};
use crate::stats::{NoopStatisticsSink, StatisticsSink};
use crate::storage::Storage;
use crate::transport::{RpcMethod, RpcResponse, Transport};
use crate::transport_budget::TransportBudget;

/// A running DHT peer: routing table, local storage, refresh scheduler,
/// and the transport used to reach the rest of the network, bound
/// together behind the handful of operations §4.6 exposes.
///
/// Lives behind an `Arc` because the refresh scheduler holds its own
/// back-references (as [`RefreshAction`] closures) to drive bucket and
/// storage republication without the caller having to pump anything.
pub struct Peer<T: Transport> {
    self_key: Key,
    self_name: String,
    handle: Vec<u8>,
    config: PeerConfig,
    routing_table: RoutingTable,
    storage: Storage,
    scheduler: Scheduler,
    transport_budget: TransportBudget,
    transport: Arc<T>,
    stats: Arc<dyn StatisticsSink>,
}

impl<T: Transport + 'static> Peer<T> {
    /// Build a peer identified by `name` (hashed to a [`Key`] per §4.1),
    /// reachable at `handle` through `transport`.
    pub fn new(name: impl Into<String>, handle: Vec<u8>, transport: Arc<T>, config: PeerConfig) -> Result<Arc<Self>> {
        Self::with_stats(name, handle, transport, config, Arc::new(NoopStatisticsSink))
    }

    pub fn with_stats(
        name: impl Into<String>,
        handle: Vec<u8>,
        transport: Arc<T>,
        config: PeerConfig,
        stats: Arc<dyn StatisticsSink>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let name = name.into();
        let self_key = Key::from_name(&name, config.keysize_bits);
        let ping_timeout = Duration::from_millis(config.query_timeout_ms);

        Ok(Arc::new(Peer {
            self_key: self_key.clone(),
            self_name: name,
            handle,
            routing_table: RoutingTable::new(self_key, config.k, ping_timeout),
            storage: Storage::new(),
            scheduler: Scheduler::new(config.refresh_interval_ms, stats.clone()),
            transport_budget: TransportBudget::new(config.max_transports),
            transport,
            stats,
            config,
        }))
    }

    pub fn self_key(&self) -> &Key {
        &self.self_key
    }

    /// This peer as a [`Contact`] others can dial.
    pub fn contact(&self) -> Contact {
        Contact::with_handle(self.self_key.clone(), self.self_name.clone(), self.handle.clone())
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.routing_table
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// `locateNodes(target, count=k)` (§4.6): up to `count` Helpers closest
    /// to `target`, defaulting to `k`.
    pub async fn locate_nodes(self: &Arc<Self>, target: impl Into<KeyOrName>) -> Result<Vec<Helper>> {
        self.locate_nodes_count(target, self.config.k).await
    }

    /// `locateNodes(target, count)` with an explicit result width,
    /// e.g. for callers that want a wider candidate pool than `k`.
    ///
    /// Includes self in the returned Helpers (§8: a solo peer's
    /// `locate_nodes` returns exactly `[self]`; two joined peers each
    /// return both peers, head-first).
    pub async fn locate_nodes_count(self: &Arc<Self>, target: impl Into<KeyOrName>, count: usize) -> Result<Vec<Helper>> {
        let target = Key::coerce(target.into(), self.config.keysize_bits);
        self.locate_nodes_key(target, count, true).await
    }

    async fn locate_nodes_key(self: &Arc<Self>, target: Key, result_width: usize, include_self: bool) -> Result<Vec<Helper>> {
        self.arm_target_bucket_refresh(&target).await;
        let result = lookup::iterate(
            target,
            Finder::FindNodes,
            result_width,
            include_self,
            self.contact(),
            &self.routing_table,
            self.transport.clone(),
            &self.config,
            &self.stats,
        )
        .await?;
        match result {
            LookupResult::Nodes(nodes) => Ok(nodes),
            LookupResult::Value(..) => unreachable!("find_nodes lookups never resolve to a value"),
        }
    }

    /// `locateValue(target)` (§4.6). Checks local storage first; a miss
    /// issues exactly one iterative lookup and returns its result without
    /// retrying (open question 1).
    pub async fn locate_value(self: &Arc<Self>, target: impl Into<KeyOrName>) -> Result<Option<Vec<u8>>> {
        let target = Key::coerce(target.into(), self.config.keysize_bits);
        if let Some(value) = self.storage.retrieve_locally(&target).await {
            return Ok(Some(value));
        }

        self.arm_target_bucket_refresh(&target).await;
        let result = lookup::iterate(
            target,
            Finder::FindValue,
            self.config.k,
            false,
            self.contact(),
            &self.routing_table,
            self.transport.clone(),
            &self.config,
            &self.stats,
        )
        .await?;

        Ok(match result {
            LookupResult::Value(value, _responder) => Some(value),
            LookupResult::Nodes(_) => None,
        })
    }

    /// `store(target, value)` (§4.6): a best-first walk over
    /// `locateNodes(target, 2k)` (self included), issuing one store at a
    /// time. A store that fails does not consume a slot — the walk simply
    /// moves to the next candidate. Returns as soon as `k` candidates have
    /// accepted the value, or when the 2k-wide candidate list is
    /// exhausted, whichever comes first.
    pub async fn store_value(self: &Arc<Self>, target: impl Into<KeyOrName>, value: Vec<u8>) -> Result<usize> {
        let target = Key::coerce(target.into(), self.config.keysize_bits);
        self.store_value_key(target, value).await
    }

    async fn store_value_key(self: &Arc<Self>, target: Key, value: Vec<u8>) -> Result<usize> {
        let candidates = self
            .locate_nodes_key(target.clone(), 2 * self.config.k, true)
            .await?;

        let mut stored = 0usize;
        for helper in candidates {
            if stored >= self.config.k {
                break;
            }

            if helper.contact.key() == &self.self_key {
                self.storage.store_locally(target.clone(), value.clone()).await;
                stored += 1;
                continue;
            }

            let timeout = Duration::from_millis(self.config.query_timeout_ms);
            let method = RpcMethod::Store {
                key: target.clone(),
                value: value.clone(),
            };
            let accepted = matches!(
                tokio::time::timeout(timeout, self.transport.send_rpc(&helper.contact, method)).await,
                Ok(Some(RpcResponse::Pong))
            );
            if accepted {
                stored += 1;
            }
        }

        self.arm_storage_refresh(target).await;
        Ok(stored)
    }

    /// `join(bootstrap)` (§4.6): admit `bootstrap`, self-lookup to
    /// populate the routing table, then arm refresh for only the farthest
    /// non-empty bucket (open question 2) rather than every bucket.
    pub async fn join(self: &Arc<Self>, bootstrap: Contact) -> Result<()> {
        self.learn_contact(bootstrap).await?;
        let self_key = self.self_key.clone();
        self.locate_nodes_key(self_key, self.config.k, false).await?;

        if let Some(idx) = self.routing_table.farthest_non_empty_bucket().await {
            self.arm_bucket_refresh(idx).await;
        }
        Ok(())
    }

    /// Handle one inbound RPC (§4.7). `claimed_sender_key` is whatever
    /// transport-level identity accompanied the request.
    pub async fn handle_rpc(
        self: &Arc<Self>,
        method: RpcMethod,
        sender: Contact,
        claimed_sender_key: Key,
    ) -> Result<RpcResponse> {
        let outcome = match dispatch::handle_rpc(
            method,
            &sender,
            &claimed_sender_key,
            &self.routing_table,
            &self.storage,
            self.config.k,
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(err @ (DhtError::SelfInsertion | DhtError::SenderMismatch | DhtError::DuplicateKeyInBucket)) => {
                error!(error = %err, "invariant violation handling inbound rpc, aborting process");
                std::process::abort();
            }
            Err(err) => return Err(err),
        };

        self.clone().learn_contact_in_background(outcome.learned_sender);
        if let Some(key) = outcome.value_stored {
            self.arm_storage_refresh(key).await;
        }

        Ok(outcome.response)
    }

    /// `addToRoutingTable(contact)` (§4.3) plus the opportunistic-cache
    /// replication (§4.5) a brand new admission triggers, run inline so
    /// callers that need the outcome (e.g. `join`) can observe it.
    async fn learn_contact(self: &Arc<Self>, contact: Contact) -> Result<()> {
        if contact.key() == &self.self_key {
            return Ok(());
        }
        let outcome = self.routing_table.add_contact(contact.clone(), self.transport.as_ref()).await?;
        if matches!(outcome, AddToTableOutcome::Added) {
            self.transport_budget.touch(&contact, self.transport.as_ref()).await;
            self.storage
                .replicate_closer_storage(&self.self_key, contact, self.transport.clone())
                .await?;
        }
        Ok(())
    }

    /// Fire-and-forget variant of [`Peer::learn_contact`] for dispatch's
    /// "enqueue asynchronously" requirement (§4.7), so handling an inbound
    /// RPC never blocks on a liveness probe of some unrelated bucket.
    fn learn_contact_in_background(self: Arc<Self>, contact: Contact) {
        if contact.key() == &self.self_key {
            return;
        }
        tokio::spawn(async move {
            if let Err(err) = self.learn_contact(contact).await {
                error!(error = %err, "background contact learning failed");
            }
        });
    }

    /// Seed-step refresh arming (§4.4 "If target ≠ self.key, arm refresh
    /// for the bucket containing target"; §4.2 "touched by a lookup
    /// against a target falling in this bucket"). A no-op when `target`
    /// is self (no bucket contains self).
    async fn arm_target_bucket_refresh(self: &Arc<Self>, target: &Key) {
        if target == &self.self_key {
            return;
        }
        if let Ok(bucket_index) = self.self_key.bucket_index(target) {
            self.arm_bucket_refresh(bucket_index).await;
        }
    }

    async fn arm_bucket_refresh(self: &Arc<Self>, bucket_index: usize) {
        let action = BucketRefreshAction {
            peer: self.clone(),
            bucket_index,
        };
        self.scheduler.arm_bucket_refresh(bucket_index, action).await;
    }

    async fn arm_storage_refresh(self: &Arc<Self>, key: Key) {
        let action = StorageRefreshAction {
            peer: self.clone(),
            key: key.clone(),
        };
        self.scheduler.arm_storage_refresh(key, action).await;
    }

    /// Stop the refresh scheduler. Already-running thunks complete; no
    /// further timers fire (§4.9).
    pub async fn shutdown(&self) {
        self.scheduler.stop().await;
    }
}

struct BucketRefreshAction<T: Transport> {
    peer: Arc<Peer<T>>,
    bucket_index: usize,
}

impl<T: Transport + 'static> RefreshAction for BucketRefreshAction<T> {
    fn fire(&self) -> impl Future<Output = ()> + Send {
        let peer = self.peer.clone();
        let bucket_index = self.bucket_index;
        async move {
            let mut rng = thread_rng();
            let target = peer.self_key.random_for_bucket(bucket_index, &mut rng);
            if let Err(err) = peer.locate_nodes_key(target, peer.config.k, false).await {
                error!(error = %err, bucket_index, "bucket refresh lookup failed");
            }
        }
    }
}

struct StorageRefreshAction<T: Transport> {
    peer: Arc<Peer<T>>,
    key: Key,
}

impl<T: Transport + 'static> RefreshAction for StorageRefreshAction<T> {
    fn fire(&self) -> impl Future<Output = ()> + Send {
        let peer = self.peer.clone();
        let key = self.key.clone();
        async move {
            // Republication is unconditional (§4.5, open question 3): a
            // peer republishes any key it still holds locally regardless
            // of whether it learned it via `store` or via this very timer.
            if let Some(value) = peer.storage.retrieve_locally(&key).await {
                if let Err(err) = peer.store_value_key(key.clone(), value).await {
                    error!(error = %err, key = %key, "storage refresh republication failed");
                }
            }
        }
    }
}
