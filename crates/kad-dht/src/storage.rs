//! In-memory key/value storage with opportunistic replication (C5, §4.5).

use std::collections::HashMap;

use tokio::sync::Mutex;
use tracing::trace;

use crate::contact::Contact;
use crate::key::Key;
use crate::transport::{RpcMethod, Transport};

/// Mapping from key to value (§3). Values are opaque to the core.
/// Republication timers live in [`crate::scheduler::Scheduler`], not
/// here — `Storage` only holds the data.
#[derive(Default)]
pub struct Storage {
    entries: Mutex<HashMap<Key, Vec<u8>>>,
}

impl Storage {
    pub fn new() -> Self {
        Storage {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// `storeLocally(key, value)` (§4.5): no-op if the value is
    /// unchanged. Returns whether the value actually changed, so the
    /// caller knows whether to (re)arm the republish timer.
    pub async fn store_locally(&self, key: Key, value: Vec<u8>) -> bool {
        let mut entries = self.entries.lock().await;
        match entries.get(&key) {
            Some(existing) if existing == &value => false,
            _ => {
                entries.insert(key, value);
                true
            }
        }
    }

    /// `retrieveLocally(key)` (§4.5).
    pub async fn retrieve_locally(&self, key: &Key) -> Option<Vec<u8>> {
        self.entries.lock().await.get(key).cloned()
    }

    /// All keys currently held, for the storage-refresh scheduler to
    /// iterate over when arming per-key republish timers.
    pub async fn keys(&self) -> Vec<Key> {
        self.entries.lock().await.keys().cloned().collect()
    }

    /// `replicateCloserStorage(contact)` (§4.5): for every stored
    /// `(key, value)` where `distance(contact.key, key) <=
    /// distance(self.key, key)`, fire-and-forget a store RPC to
    /// `contact`. Invoked when `contact` is newly added to the routing
    /// table.
    pub async fn replicate_closer_storage<T: Transport + 'static>(
        &self,
        self_key: &Key,
        contact: Contact,
        transport: std::sync::Arc<T>,
    ) -> crate::error::Result<()> {
        let entries: Vec<(Key, Vec<u8>)> = {
            let guard = self.entries.lock().await;
            guard.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };

        for (key, value) in entries {
            let contact_distance = contact.key().distance(&key)?;
            let self_distance = self_key.distance(&key)?;
            if contact_distance <= self_distance {
                let contact = contact.clone();
                let transport = transport.clone();
                let key_for_log = key.clone();
                tokio::spawn(async move {
                    trace!(key = %key_for_log, "replicating to newly discovered closer peer");
                    let _ = transport
                        .send_rpc(&contact, RpcMethod::Store { key, value })
                        .await;
                });
            }
        }
        Ok(())
    }
}
