//! Iterative parallel lookup state machine (C6, §4.4).
//!
//! This is the heart of the engine: a continuous-flow (not round-based)
//! best-first search with bounded concurrency, per-RPC timeouts, and
//! escalation from `alpha` to `k` in-flight queries after a streak of
//! unproductive responses.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, trace};

use crate::config::PeerConfig;
use crate::contact::Contact;
use crate::helper::Helper;
use crate::key::Key;
use crate::routing_table::RoutingTable;
use crate::stats::{LookupTermination, RpcOutcome, StatisticsSink};
use crate::transport::{RpcMethod, RpcResponse, Transport};

/// Which RPC an iterative lookup issues at each step (§4.4).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Finder {
    FindNodes,
    FindValue,
}

/// The result of a completed lookup (§4.4).
#[derive(Clone, Debug)]
pub enum LookupResult {
    /// Up to `k` Helpers, closest first.
    Nodes(Vec<Helper>),
    /// A located value and the Helper that returned it.
    Value(Vec<u8>, Helper),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum QueryState {
    Responded,
    TimedOut,
    Disconnected,
}

enum StepOutcome {
    Disconnected,
    TimedOut,
    Value(Vec<u8>),
    Nodes(Vec<Helper>),
}

/// Run one iterative lookup to completion (§4.4).
///
/// `self_contact` is only used to build the synthetic self-Helper when
/// `include_self` is set (used by `store_value`'s internal
/// `locate_nodes`) — the lookup never issues an RPC against itself.
#[allow(clippy::too_many_arguments)]
pub async fn iterate<T: Transport + 'static>(
    target: Key,
    finder: Finder,
    result_width: usize,
    include_self: bool,
    self_contact: Contact,
    routing_table: &RoutingTable,
    transport: Arc<T>,
    config: &PeerConfig,
    stats: &Arc<dyn StatisticsSink>,
) -> crate::error::Result<LookupResult> {
    stats.record_lookup_started();

    let self_key = routing_table.self_key().clone();

    // Seed: findClosest(target, 2k) minus self.
    let seed = routing_table.find_closest(&target, 2 * config.k).await?;
    let mut all_seen: Vec<Helper> = seed
        .into_iter()
        .filter(|h| h.contact.key() != &self_key)
        .collect();
    all_seen.sort();

    let mut keys_seen: HashSet<Key> = all_seen.iter().map(|h| h.contact.key().clone()).collect();
    keys_seen.insert(self_key.clone());

    let mut query_state: HashMap<Key, QueryState> = HashMap::new();
    let mut pending_keys: HashSet<Key> = HashSet::new();
    let mut responders: Vec<Helper> = Vec::new();
    let mut empty_streak = 0usize;
    let mut max_in_flight = config.alpha;

    let query_timeout = Duration::from_millis(config.query_timeout_ms);
    let mut in_flight: JoinSet<(Helper, StepOutcome)> = JoinSet::new();

    let termination = loop {
        // Scheduling: launch until max_in_flight in-flight or no
        // unqueried candidate remains.
        loop {
            if pending_keys.len() >= max_in_flight {
                break;
            }
            let next = all_seen
                .iter()
                .find(|h| {
                    let k = h.contact.key();
                    !query_state.contains_key(k) && !pending_keys.contains(k)
                })
                .cloned();
            let Some(helper) = next else { break };

            let key = helper.contact.key().clone();
            pending_keys.insert(key.clone());

            let method = match finder {
                Finder::FindNodes => RpcMethod::FindNodes { key: target.clone() },
                Finder::FindValue => RpcMethod::FindValue { key: target.clone() },
            };
            stats.record_rpc_issued(method.name());

            let transport = transport.clone();
            let helper_for_task = helper.clone();
            in_flight.spawn(async move {
                let outcome = match tokio::time::timeout(
                    query_timeout,
                    transport.send_rpc(&helper_for_task.contact, method),
                )
                .await
                {
                    Err(_) => StepOutcome::TimedOut,
                    Ok(None) => StepOutcome::Disconnected,
                    Ok(Some(RpcResponse::Value(v))) => StepOutcome::Value(v),
                    Ok(Some(RpcResponse::Nodes(list))) => {
                        let helpers = list
                            .into_iter()
                            .map(|(descriptor, distance)| Helper {
                                contact: descriptor.into(),
                                distance,
                            })
                            .collect();
                        StepOutcome::Nodes(helpers)
                    }
                    Ok(Some(RpcResponse::Pong)) => StepOutcome::Nodes(Vec::new()),
                };
                (helper_for_task, outcome)
            });
        }

        if pending_keys.is_empty() {
            // (c) network exhausted: nothing pending, nothing left unqueried.
            break LookupTermination::NetworkExhausted;
        }

        if converged(&all_seen, &query_state, result_width) {
            break LookupTermination::Converged;
        }

        let Some(joined) = in_flight.join_next().await else {
            break LookupTermination::NetworkExhausted;
        };
        let (helper, outcome) = match joined {
            Ok(pair) => pair,
            Err(_join_error) => continue, // a step task panicked; treat as not-yet-resolved and keep going
        };
        let key = helper.contact.key().clone();
        pending_keys.remove(&key);

        match outcome {
            StepOutcome::Disconnected => {
                query_state.insert(key.clone(), QueryState::Disconnected);
                stats.record_rpc_outcome("rpc", RpcOutcome::Disconnected);
                let _ = routing_table.remove_contact(&key).await;
                trace!(key = %key, "lookup step disconnected, contact evicted");
            }
            StepOutcome::TimedOut => {
                query_state.insert(key.clone(), QueryState::TimedOut);
                stats.record_rpc_outcome("rpc", RpcOutcome::TimedOut);
            }
            StepOutcome::Value(value) => {
                query_state.insert(key.clone(), QueryState::Responded);
                stats.record_rpc_outcome("rpc", RpcOutcome::Succeeded);

                // Opportunistic caching: the closest responder so far that
                // did not already carry the value (§4.5, §9).
                if let Some(cache_target) = responders.iter().min().cloned() {
                    let transport = transport.clone();
                    let store_key = target.clone();
                    let store_value = value.clone();
                    tokio::spawn(async move {
                        let _ = transport
                            .send_rpc(
                                &cache_target.contact,
                                RpcMethod::Store {
                                    key: store_key,
                                    value: store_value,
                                },
                            )
                            .await;
                    });
                }

                stats.record_lookup_terminated(LookupTermination::ValueFound);
                return Ok(LookupResult::Value(value, helper));
            }
            StepOutcome::Nodes(new_helpers) => {
                query_state.insert(key.clone(), QueryState::Responded);
                stats.record_rpc_outcome("rpc", RpcOutcome::Succeeded);
                responders.push(helper.clone());

                let mut added_new = false;
                for nh in new_helpers {
                    let nk = nh.contact.key();
                    if keys_seen.contains(nk) {
                        continue;
                    }
                    keys_seen.insert(nk.clone());
                    let mut cloned = nh.contact.clone_for_new_owner();
                    cloned.set_sponsor(key.clone());
                    all_seen.push(Helper {
                        contact: cloned,
                        distance: nh.distance,
                    });
                    added_new = true;
                }
                all_seen.sort();

                if added_new {
                    empty_streak = 0;
                    max_in_flight = config.alpha;
                } else {
                    empty_streak += 1;
                    if empty_streak >= config.alpha {
                        max_in_flight = config.k;
                    }
                }
            }
        }
    };

    debug!(?termination, seen = all_seen.len(), "lookup terminated");
    stats.record_lookup_terminated(termination);

    let mut result = responders;
    if include_self {
        result.push(Helper::new(self_contact, &target)?);
    }
    result.sort();
    result.dedup_by(|a, b| a.contact.key() == b.contact.key());
    result.truncate(result_width);

    Ok(LookupResult::Nodes(result))
}

/// Termination rule (b): among the `k` closest entries of `all_seen`, all
/// have a terminal `query_state` (none unqueried or pending — a key is
/// pending only while absent from `query_state`, so this single check
/// covers both).
fn converged(all_seen: &[Helper], query_state: &HashMap<Key, QueryState>, k: usize) -> bool {
    if all_seen.is_empty() {
        return true;
    }
    let closest = &all_seen[..all_seen.len().min(k)];
    closest.iter().all(|h| query_state.contains_key(h.contact.key()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::Contact;
    use crate::stats::{CountingStatisticsSink, StatisticsSink};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct ScriptedTransport {
        responses: StdMutex<HashMap<Key, RpcResponse>>,
    }

    impl ScriptedTransport {
        fn with(mut pairs: Vec<(Key, RpcResponse)>) -> Self {
            let mut map = HashMap::new();
            for (k, v) in pairs.drain(..) {
                map.insert(k, v);
            }
            ScriptedTransport {
                responses: StdMutex::new(map),
            }
        }
    }

    impl Transport for ScriptedTransport {
        async fn send_rpc(&self, contact: &Contact, _method: RpcMethod) -> Option<RpcResponse> {
            self.responses.lock().unwrap().get(contact.key()).cloned()
        }
        async fn connect(&self, _contact: &Contact) -> Option<()> {
            Some(())
        }
        fn disconnect(&self, _contact: &Contact) {}
    }

    fn config() -> PeerConfig {
        PeerConfig {
            k: 20,
            alpha: 3,
            keysize_bits: 128,
            refresh_interval_ms: 0,
            query_timeout_ms: 200,
            max_transports: None,
        }
    }

    #[tokio::test]
    async fn solo_peer_locate_nodes_returns_only_self() {
        let self_key = Key::from_name("self", 128);
        let table = RoutingTable::new(self_key.clone(), 20, Duration::from_millis(50));
        let transport = Arc::new(ScriptedTransport::default());
        let stats: Arc<dyn StatisticsSink> = Arc::new(CountingStatisticsSink::new());
        let cfg = config();

        let result = iterate(
            self_key.clone(),
            Finder::FindNodes,
            cfg.k,
            true,
            Contact::new(self_key.clone(), "self".into()),
            &table,
            transport,
            &cfg,
            &stats,
        )
        .await
        .unwrap();

        match result {
            LookupResult::Nodes(nodes) => {
                assert_eq!(nodes.len(), 1);
                assert_eq!(nodes[0].contact.key(), &self_key);
            }
            _ => unreachable!("expected Nodes result"),
        }
    }

    #[tokio::test]
    async fn finds_value_when_a_seeded_peer_holds_it() {
        let self_key = Key::from_name("self", 128);
        let table = RoutingTable::new(self_key.clone(), 20, Duration::from_millis(50));

        let holder_key = Key::from_name("holder", 128);
        let holder = Contact::new(holder_key.clone(), "holder".into());

        struct AlwaysAlive;
        impl Transport for AlwaysAlive {
            async fn send_rpc(&self, _c: &Contact, _m: RpcMethod) -> Option<RpcResponse> {
                Some(RpcResponse::Pong)
            }
            async fn connect(&self, _c: &Contact) -> Option<()> {
                Some(())
            }
            fn disconnect(&self, _c: &Contact) {}
        }
        table.add_contact(holder.clone(), &AlwaysAlive).await.unwrap();

        let target = Key::from_name("foo", 128);
        let transport = Arc::new(ScriptedTransport::with(vec![(
            holder_key,
            RpcResponse::Value(b"17".to_vec()),
        )]));
        let stats: Arc<dyn StatisticsSink> = Arc::new(CountingStatisticsSink::new());
        let cfg = config();

        let result = iterate(
            target,
            Finder::FindValue,
            cfg.k,
            false,
            Contact::new(self_key, "self".into()),
            &table,
            transport,
            &cfg,
            &stats,
        )
        .await
        .unwrap();

        match result {
            LookupResult::Value(value, responder) => {
                assert_eq!(value, b"17");
                assert_eq!(responder.contact.key(), holder.key());
            }
            _ => unreachable!("expected Value result"),
        }
    }

    #[tokio::test]
    async fn disconnected_contact_is_removed_from_routing_table() {
        let self_key = Key::from_name("self", 128);
        let table = RoutingTable::new(self_key.clone(), 20, Duration::from_millis(50));

        struct AlwaysAlive;
        impl Transport for AlwaysAlive {
            async fn send_rpc(&self, _c: &Contact, _m: RpcMethod) -> Option<RpcResponse> {
                Some(RpcResponse::Pong)
            }
            async fn connect(&self, _c: &Contact) -> Option<()> {
                Some(())
            }
            fn disconnect(&self, _c: &Contact) {}
        }

        let dead_key = Key::from_name("dead", 128);
        let dead = Contact::new(dead_key.clone(), "dead".into());
        table.add_contact(dead.clone(), &AlwaysAlive).await.unwrap();
        assert_eq!(table.len().await, 1);

        // ScriptedTransport with no entries -> every send_rpc returns None.
        let transport = Arc::new(ScriptedTransport::default());
        let stats: Arc<dyn StatisticsSink> = Arc::new(CountingStatisticsSink::new());
        let cfg = config();

        let _ = iterate(
            Key::from_name("target", 128),
            Finder::FindNodes,
            cfg.k,
            false,
            Contact::new(self_key, "self".into()),
            &table,
            transport,
            &cfg,
            &stats,
        )
        .await
        .unwrap();

        assert_eq!(table.len().await, 0);
    }

    #[tokio::test]
    async fn nodes_result_is_strictly_ascending_by_distance() {
        let self_key = Key::from_name("self", 128);
        let table = RoutingTable::new(self_key.clone(), 20, Duration::from_millis(50));

        struct AlwaysAlive;
        impl Transport for AlwaysAlive {
            async fn send_rpc(&self, _c: &Contact, _m: RpcMethod) -> Option<RpcResponse> {
                Some(RpcResponse::Pong)
            }
            async fn connect(&self, _c: &Contact) -> Option<()> {
                Some(())
            }
            fn disconnect(&self, _c: &Contact) {}
        }

        let mut scripted = Vec::new();
        for i in 0..6u8 {
            let key = Key::from_name(&format!("peer-{i}"), 128);
            let c = Contact::new(key.clone(), format!("peer-{i}"));
            table.add_contact(c, &AlwaysAlive).await.unwrap();
            scripted.push((key, RpcResponse::Pong));
        }

        let transport = Arc::new(ScriptedTransport::with(scripted));
        let stats: Arc<dyn StatisticsSink> = Arc::new(CountingStatisticsSink::new());
        let cfg = config();
        let target = Key::from_name("target", 128);

        let result = iterate(
            target.clone(),
            Finder::FindNodes,
            cfg.k,
            false,
            Contact::new(self_key, "self".into()),
            &table,
            transport,
            &cfg,
            &stats,
        )
        .await
        .unwrap();

        if let LookupResult::Nodes(nodes) = result {
            for pair in nodes.windows(2) {
                assert!(pair[0].distance <= pair[1].distance);
            }
        } else {
            unreachable!("expected Nodes result");
        }
    }
}
