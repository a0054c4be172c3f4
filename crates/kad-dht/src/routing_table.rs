//! Routing table: keysize-indexed collection of k-buckets with a
//! serialized mutation discipline (C4, §4.3).

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::bucket::{AddOutcome, KBucket};
use crate::contact::Contact;
use crate::helper::Helper;
use crate::key::Key;
use crate::transport::Transport;

/// Outcome of [`RoutingTable::add_contact`], mirroring [`AddOutcome`] but
/// additionally reporting whether the routing table should schedule
/// `replicateCloserStorage` (§4.3, §4.5): only a brand-new admission does.
#[derive(Debug)]
pub enum AddToTableOutcome {
    /// Newly admitted; the caller should run `replicateCloserStorage`.
    Added,
    AlreadyPresent,
    Rejected,
}

struct Inner {
    buckets: HashMap<usize, KBucket>,
}

/// Mapping from bucket-index to k-bucket (buckets may be absent; an empty
/// bucket is indistinguishable from an absent one and is dropped
/// eagerly). Self never appears. All mutations are serialized through a
/// single [`tokio::sync::Mutex`] (§5 invariant 1).
pub struct RoutingTable {
    self_key: Key,
    k: usize,
    ping_timeout: Duration,
    inner: Mutex<Inner>,
}

impl RoutingTable {
    pub fn new(self_key: Key, k: usize, ping_timeout: Duration) -> Self {
        RoutingTable {
            self_key,
            k,
            ping_timeout,
            inner: Mutex::new(Inner {
                buckets: HashMap::new(),
            }),
        }
    }

    pub fn self_key(&self) -> &Key {
        &self.self_key
    }

    /// `addToRoutingTable(contact)` (§4.3). Rejects self. Creates the
    /// bucket lazily, delegates to [`KBucket::add`].
    pub async fn add_contact<T: Transport>(
        &self,
        contact: Contact,
        transport: &T,
    ) -> crate::error::Result<AddToTableOutcome> {
        if contact.key() == &self.self_key {
            return Err(crate::error::DhtError::SelfInsertion);
        }

        let idx = self.self_key.bucket_index(contact.key())?;
        let mut inner = self.inner.lock().await;
        let bucket = inner.buckets.entry(idx).or_insert_with(|| KBucket::new(self.k));

        let outcome = bucket.add(contact, transport, self.ping_timeout).await;
        let result = match outcome {
            AddOutcome::Added => {
                debug!(bucket = idx, "contact admitted to routing table");
                AddToTableOutcome::Added
            }
            AddOutcome::AlreadyPresent => AddToTableOutcome::AlreadyPresent,
            AddOutcome::Rejected { .. } => AddToTableOutcome::Rejected,
        };

        if bucket.is_empty() {
            inner.buckets.remove(&idx);
        }

        Ok(result)
    }

    /// `removeContact(contact)` (§4.3). Deletes the owning bucket entirely
    /// if this empties it (a later insertion recreates it).
    pub async fn remove_contact(&self, key: &Key) -> crate::error::Result<bool> {
        if key == &self.self_key {
            return Ok(false);
        }
        let idx = self.self_key.bucket_index(key)?;
        let mut inner = self.inner.lock().await;
        let removed = match inner.buckets.get_mut(&idx) {
            Some(bucket) => {
                let removed = bucket.remove(key);
                if bucket.is_empty() {
                    inner.buckets.remove(&idx);
                }
                removed
            }
            None => false,
        };
        if removed {
            trace!(bucket = idx, "contact removed from routing table");
        }
        Ok(removed)
    }

    /// `findClosest(target, count)` (§4.3): every contact from every
    /// bucket plus self, sorted ascending by distance to `target`,
    /// truncated to `count`.
    pub async fn find_closest(&self, target: &Key, count: usize) -> crate::error::Result<Vec<Helper>> {
        let inner = self.inner.lock().await;
        let mut helpers = Vec::new();

        let self_contact = Contact::new(self.self_key.clone(), String::new());
        helpers.push(Helper::new(self_contact, target)?);

        for bucket in inner.buckets.values() {
            for contact in bucket.contacts() {
                helpers.push(Helper::new(contact.clone(), target)?);
            }
        }

        helpers.sort();
        helpers.truncate(count);
        Ok(helpers)
    }

    /// Total number of contacts across all buckets (excludes self).
    pub async fn len(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.buckets.values().map(|b| b.len()).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Bucket indices that currently hold at least one contact, for the
    /// refresh scheduler (C9, §4.9) to iterate over.
    pub async fn non_empty_bucket_indices(&self) -> Vec<usize> {
        let inner = self.inner.lock().await;
        let mut indices: Vec<usize> = inner
            .buckets
            .iter()
            .filter(|(_, b)| !b.is_empty())
            .map(|(i, _)| *i)
            .collect();
        indices.sort_unstable();
        indices
    }

    /// The farthest (highest-index) non-empty bucket, used by `join`'s
    /// minimum refresh requirement (§4.6, open question 2).
    pub async fn farthest_non_empty_bucket(&self) -> Option<usize> {
        self.non_empty_bucket_indices().await.into_iter().max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Key;

    struct AlwaysAlive;
    impl Transport for AlwaysAlive {
        async fn send_rpc(
            &self,
            _contact: &Contact,
            _method: crate::transport::RpcMethod,
        ) -> Option<crate::transport::RpcResponse> {
            Some(crate::transport::RpcResponse::Pong)
        }
        async fn connect(&self, _contact: &Contact) -> Option<()> {
            Some(())
        }
        fn disconnect(&self, _contact: &Contact) {}
    }

    fn contact(name: &str) -> Contact {
        Contact::new(Key::from_name(name, 128), name.to_string())
    }

    #[tokio::test]
    async fn rejects_self_insertion() {
        let self_key = Key::from_name("self", 128);
        let table = RoutingTable::new(self_key.clone(), 20, Duration::from_millis(50));
        let result = table
            .add_contact(Contact::new(self_key, "self".into()), &AlwaysAlive)
            .await;
        assert!(matches!(result, Err(crate::error::DhtError::SelfInsertion)));
    }

    #[tokio::test]
    async fn find_closest_always_includes_self() {
        let self_key = Key::from_name("self", 128);
        let table = RoutingTable::new(self_key.clone(), 20, Duration::from_millis(50));
        let helpers = table.find_closest(&self_key, 20).await.unwrap();
        assert_eq!(helpers.len(), 1);
        assert_eq!(helpers[0].contact.key(), &self_key);
    }

    #[tokio::test]
    async fn add_and_find_closest_roundtrip() {
        let self_key = Key::from_name("self", 128);
        let table = RoutingTable::new(self_key.clone(), 20, Duration::from_millis(50));
        let c = contact("peer");
        let outcome = table.add_contact(c.clone(), &AlwaysAlive).await.unwrap();
        assert!(matches!(outcome, AddToTableOutcome::Added));
        assert_eq!(table.len().await, 1);

        let helpers = table.find_closest(c.key(), 20).await.unwrap();
        assert!(helpers.iter().any(|h| h.contact.key() == c.key()));
    }

    #[tokio::test]
    async fn removing_last_contact_drops_bucket() {
        let self_key = Key::from_name("self", 128);
        let table = RoutingTable::new(self_key, 20, Duration::from_millis(50));
        let c = contact("peer");
        table.add_contact(c.clone(), &AlwaysAlive).await.unwrap();
        assert!(table.remove_contact(c.key()).await.unwrap());
        assert_eq!(table.len().await, 0);
        assert!(table.non_empty_bucket_indices().await.is_empty());
    }

    #[tokio::test]
    async fn every_contact_satisfies_bucket_index_invariant() {
        let self_key = Key::from_name("self", 128);
        let table = RoutingTable::new(self_key.clone(), 20, Duration::from_millis(50));
        for i in 0..30 {
            table
                .add_contact(contact(&format!("peer-{i}")), &AlwaysAlive)
                .await
                .unwrap();
        }
        let inner = table.inner.lock().await;
        for (idx, bucket) in inner.buckets.iter() {
            for c in bucket.contacts() {
                assert_eq!(self_key.bucket_index(c.key()).unwrap(), *idx);
            }
        }
    }
}
