//! Contact: an opaque handle to a remote peer (C2, §3).

use serde::{Deserialize, Serialize};

use crate::key::Key;

/// Liveness state of a contact's transport connection.
///
/// Tracked locally by the owner of a [`Contact`]; never serialized onto
/// the wire (a [`ContactDescriptor`] carries only what a remote peer
/// needs to address us back).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// A handle to a remote peer.
///
/// `handle` is opaque addressing data interpreted only by whatever
/// [`crate::transport::Transport`] implementation is in use (a socket
/// address, a WebRTC data-channel id, ...); the core never looks inside
/// it.
///
/// Cloning a `Contact` for a different owner is allowed and yields a
/// distinct object sharing only the far-peer identity (`key`/`name`);
/// `connection_state` always starts `Disconnected` on the clone's side
/// since connections are not shared across owners.
#[derive(Clone, Debug)]
pub struct Contact {
    key: Key,
    name: String,
    handle: Vec<u8>,
    /// The peer through which this contact was first learned, if any.
    /// Stored as a key reference (§9 "represent cross-references as weak
    /// handles into the routing table; never as owning back-pointers"),
    /// resolved against the routing table at use time; if the sponsor has
    /// since left, resolution silently yields `None`.
    sponsor: Option<Key>,
    connection_state: ConnectionState,
}

impl Contact {
    pub fn new(key: Key, name: String) -> Self {
        Contact {
            key,
            name,
            handle: Vec::new(),
            sponsor: None,
            connection_state: ConnectionState::Disconnected,
        }
    }

    pub fn with_handle(key: Key, name: String, handle: Vec<u8>) -> Self {
        Contact {
            key,
            name,
            handle,
            sponsor: None,
            connection_state: ConnectionState::Disconnected,
        }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> &[u8] {
        &self.handle
    }

    pub fn sponsor(&self) -> Option<&Key> {
        self.sponsor.as_ref()
    }

    pub fn set_sponsor(&mut self, sponsor: Key) {
        self.sponsor = Some(sponsor);
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection_state
    }

    pub fn set_connection_state(&mut self, state: ConnectionState) {
        self.connection_state = state;
    }

    /// Clone this contact for a different owner: shares only the far-peer
    /// identity, resets local-only connection state.
    pub fn clone_for_new_owner(&self) -> Self {
        Contact {
            key: self.key.clone(),
            name: self.name.clone(),
            handle: self.handle.clone(),
            sponsor: self.sponsor.clone(),
            connection_state: ConnectionState::Disconnected,
        }
    }
}

impl PartialEq for Contact {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}
impl Eq for Contact {}

/// Wire-level description of a contact: at minimum `(name, key)`; richer
/// transports append addressing via `handle` (§6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContactDescriptor {
    pub key: Key,
    pub name: String,
    pub handle: Vec<u8>,
}

impl From<&Contact> for ContactDescriptor {
    fn from(c: &Contact) -> Self {
        ContactDescriptor {
            key: c.key.clone(),
            name: c.name.clone(),
            handle: c.handle.clone(),
        }
    }
}

impl From<ContactDescriptor> for Contact {
    fn from(d: ContactDescriptor) -> Self {
        Contact {
            key: d.key,
            name: d.name,
            handle: d.handle,
            sponsor: None,
            connection_state: ConnectionState::Disconnected,
        }
    }
}
