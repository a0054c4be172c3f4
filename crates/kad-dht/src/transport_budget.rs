//! Transport-connection budget (§5 "Transport budget").
//!
//! Bounds how many live transport connections one peer keeps open,
//! independent of how many contacts its routing table tracks. The
//! least-recently-touched connection is evicted first; a contact that
//! currently sponsors another live connection is pinned and skipped
//! during the eviction scan (§9 sponsor-chain design note).

use std::collections::HashSet;
use std::num::NonZeroUsize;

use lru::LruCache;
use tokio::sync::Mutex;
use tracing::trace;

use crate::contact::Contact;
use crate::key::Key;
use crate::transport::Transport;

pub struct TransportBudget {
    capacity: Option<NonZeroUsize>,
    cache: Mutex<LruCache<Key, Contact>>,
}

impl TransportBudget {
    pub fn new(max_transports: Option<usize>) -> Self {
        TransportBudget {
            capacity: max_transports.and_then(NonZeroUsize::new),
            cache: Mutex::new(LruCache::unbounded()),
        }
    }

    /// Record use of `contact`'s connection, opening it via
    /// `Transport::connect` on first use, then evict least-recently-used,
    /// non-sponsoring connections until back under budget. A `None`
    /// capacity (the default) disables the budget entirely.
    pub async fn touch<T: Transport>(&self, contact: &Contact, transport: &T) {
        let Some(capacity) = self.capacity else { return };
        let key = contact.key().clone();

        let mut cache = self.cache.lock().await;
        let is_new = cache.get(&key).is_none();
        cache.put(key.clone(), contact.clone());

        if is_new {
            transport.connect(contact).await;
        }

        while cache.len() > capacity.get() {
            let pinned: HashSet<Key> = cache.iter().filter_map(|(_, c)| c.sponsor().cloned()).collect();
            let victim = cache
                .iter()
                .rev()
                .map(|(k, _)| k.clone())
                .find(|k| !pinned.contains(k) && k != &key);
            let Some(victim) = victim else {
                // Every remaining connection is pinned by some sponsor
                // chain; give up rather than evict something still in use.
                break;
            };
            if let Some(evicted) = cache.pop(&victim) {
                trace!(evicted = %victim, "transport budget evicted connection");
                transport.disconnect(&evicted);
            }
        }
    }

    /// Drop `key`'s connection outright, e.g. after the contact has been
    /// removed from the routing table.
    pub async fn release<T: Transport>(&self, key: &Key, transport: &T) {
        let mut cache = self.cache.lock().await;
        if let Some(contact) = cache.pop(key) {
            transport.disconnect(&contact);
        }
    }

    pub async fn len(&self) -> usize {
        self.cache.lock().await.len()
    }
}
