//! Ephemeral ranked-contact pairing (C10, §4.8).

use std::cmp::Ordering;

use crate::contact::Contact;
use crate::key::Key;

/// A `{contact, distance}` pair used inside lookups and as RPC results.
///
/// Ordered strictly by distance; distances are `keysize`-bit unsigned
/// values compared without narrowing to fixed-width signed arithmetic
/// (`Key`'s `Ord` impl already does this correctly).
#[derive(Clone, Debug)]
pub struct Helper {
    pub contact: Contact,
    pub distance: Key,
}

impl Helper {
    pub fn new(contact: Contact, target: &Key) -> crate::error::Result<Self> {
        let distance = contact.key().distance(target)?;
        Ok(Helper { contact, distance })
    }
}

impl PartialEq for Helper {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance
    }
}
impl Eq for Helper {}

impl PartialOrd for Helper {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Helper {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance.cmp(&other.distance)
    }
}
