//! K-bucket: bounded-capacity, LRU-with-liveness contact list for one
//! distance band (C3, §4.2).

use std::collections::VecDeque;
use std::time::Duration;

use crate::contact::Contact;
use crate::key::Key;
use crate::transport::{RpcMethod, Transport};

/// Outcome of [`KBucket::add`].
#[derive(Debug)]
pub enum AddOutcome {
    /// Newly inserted at the tail.
    Added,
    /// Already present; moved to the tail.
    AlreadyPresent,
    /// Bucket was full and the head responded to the liveness probe; the
    /// new contact was dropped and the head moved to the tail.
    Rejected {
        /// The contact that was dropped (returned so the caller can log
        /// or inspect it; the bucket itself does not retain it).
        dropped: Contact,
    },
}

/// A single k-bucket: up to `k` contacts ordered least-recently-confirmed
/// (front) to most-recently-confirmed (back).
pub struct KBucket {
    capacity: usize,
    entries: VecDeque<Contact>,
}

impl KBucket {
    pub fn new(capacity: usize) -> Self {
        KBucket {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn contacts(&self) -> impl Iterator<Item = &Contact> {
        self.entries.iter()
    }

    fn position(&self, key: &Key) -> Option<usize> {
        self.entries.iter().position(|c| c.key() == key)
    }

    /// `remove(key) -> bool`: O(n) scan (§4.2). The caller (routing
    /// table) is responsible for deleting the bucket entirely once this
    /// empties it.
    pub fn remove(&mut self, key: &Key) -> bool {
        match self.position(key) {
            Some(idx) => {
                self.entries.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Insert or refresh `contact` per the algorithm in §4.2.
    ///
    /// If the contact is already present it is removed and re-appended at
    /// the tail (`AlreadyPresent`). If the bucket has room, it is simply
    /// appended (`Added`). If the bucket is full, the head is probed via
    /// a ping *before* being removed, so a concurrent lookup inserting
    /// into an apparent gap can never race with this eviction: if the
    /// head answers, it moves to the tail and the new contact is dropped
    /// (`Rejected`); if it does not, it is evicted and the new contact is
    /// appended (`Added`). No replacement cache is maintained.
    pub async fn add<T: Transport>(
        &mut self,
        contact: Contact,
        transport: &T,
        ping_timeout: Duration,
    ) -> AddOutcome {
        if let Some(idx) = self.position(contact.key()) {
            self.entries.remove(idx);
            self.entries.push_back(contact);
            return AddOutcome::AlreadyPresent;
        }

        if !self.is_full() {
            self.entries.push_back(contact);
            return AddOutcome::Added;
        }

        // Bucket full: probe the head before touching it.
        let head = self.entries.front().expect("full bucket is nonempty").clone();
        let head_alive = tokio::time::timeout(ping_timeout, transport.send_rpc(&head, RpcMethod::Ping))
            .await
            .ok()
            .flatten()
            .is_some();

        if head_alive {
            // Head is alive: move it to the tail, drop the new contact.
            let idx = self.position(head.key()).expect("head still present");
            let head_entry = self.entries.remove(idx).expect("index just found");
            self.entries.push_back(head_entry);
            AddOutcome::Rejected { dropped: contact }
        } else {
            // Head is dead: evict it, admit the new contact.
            self.entries.pop_front();
            self.entries.push_back(contact);
            AddOutcome::Added
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysAlive;
    struct AlwaysDead;

    impl Transport for AlwaysAlive {
        async fn send_rpc(&self, _contact: &Contact, _method: RpcMethod) -> Option<crate::transport::RpcResponse> {
            Some(crate::transport::RpcResponse::Pong)
        }
        async fn connect(&self, _contact: &Contact) -> Option<()> {
            Some(())
        }
        fn disconnect(&self, _contact: &Contact) {}
    }

    impl Transport for AlwaysDead {
        async fn send_rpc(&self, _contact: &Contact, _method: RpcMethod) -> Option<crate::transport::RpcResponse> {
            None
        }
        async fn connect(&self, _contact: &Contact) -> Option<()> {
            None
        }
        fn disconnect(&self, _contact: &Contact) {}
    }

    fn contact(byte: u8) -> Contact {
        Contact::new(Key::from_name(&byte.to_string(), 128), byte.to_string())
    }

    #[tokio::test]
    async fn add_to_empty_bucket_succeeds() {
        let mut bucket = KBucket::new(2);
        let outcome = bucket
            .add(contact(1), &AlwaysAlive, Duration::from_millis(50))
            .await;
        assert!(matches!(outcome, AddOutcome::Added));
        assert_eq!(bucket.len(), 1);
    }

    #[tokio::test]
    async fn re_adding_existing_contact_moves_to_tail() {
        let mut bucket = KBucket::new(2);
        bucket
            .add(contact(1), &AlwaysAlive, Duration::from_millis(50))
            .await;
        bucket
            .add(contact(2), &AlwaysAlive, Duration::from_millis(50))
            .await;
        let outcome = bucket
            .add(contact(1), &AlwaysAlive, Duration::from_millis(50))
            .await;
        assert!(matches!(outcome, AddOutcome::AlreadyPresent));
        assert_eq!(bucket.len(), 2);
        let tail = bucket.entries.back().unwrap();
        assert_eq!(tail.key(), contact(1).key());
    }

    #[tokio::test]
    async fn full_bucket_alive_head_rejects_new_contact() {
        let mut bucket = KBucket::new(1);
        bucket
            .add(contact(1), &AlwaysAlive, Duration::from_millis(50))
            .await;
        let outcome = bucket
            .add(contact(2), &AlwaysAlive, Duration::from_millis(50))
            .await;
        assert!(matches!(outcome, AddOutcome::Rejected { .. }));
        assert_eq!(bucket.len(), 1);
        assert_eq!(bucket.entries.front().unwrap().key(), contact(1).key());
    }

    #[tokio::test]
    async fn full_bucket_dead_head_evicts_and_admits() {
        let mut bucket = KBucket::new(1);
        bucket
            .add(contact(1), &AlwaysAlive, Duration::from_millis(50))
            .await;
        let outcome = bucket
            .add(contact(2), &AlwaysDead, Duration::from_millis(50))
            .await;
        assert!(matches!(outcome, AddOutcome::Added));
        assert_eq!(bucket.len(), 1);
        assert_eq!(bucket.entries.front().unwrap().key(), contact(2).key());
    }

    #[test]
    fn remove_reports_presence() {
        let mut bucket = KBucket::new(2);
        bucket.entries.push_back(contact(1));
        assert!(bucket.remove(contact(1).key()));
        assert!(!bucket.remove(contact(1).key()));
    }
}
