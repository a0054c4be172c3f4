//! Error types for the DHT peer engine (§7).

/// Errors surfaced by the peer engine.
///
/// Network conditions (`TransportFailure`, `TargetDisconnect`,
/// `QueryTimeout`, `LookupExhausted`) are handled internally by
/// [`crate::lookup::Lookup`] and never escape a public operation — see
/// `DhtError`'s doc on each variant for where it is actually surfaced.
#[derive(Debug, thiserror::Error)]
pub enum DhtError {
    /// A contact insertion attempted to add the node to its own routing
    /// table. Invariant violation (§3): "a node never stores a contact
    /// for itself".
    #[error("cannot insert self as a contact")]
    SelfInsertion,

    /// An inbound RPC's reconstructed sender did not match the peer it
    /// claims to be addressing. Invariant violation (§4.7).
    #[error("rpc sender does not match expected host key")]
    SenderMismatch,

    /// Two contacts with the same key ended up in one bucket. Invariant
    /// violation (§3): "no two contacts in the same routing table share
    /// a key".
    #[error("duplicate key in bucket")]
    DuplicateKeyInBucket,

    /// `getBucketIndex(self, other)` was called with `other == self`.
    #[error("cannot compute bucket index against self")]
    SameKey,

    /// Two keys of different byte length were compared or XORed. All
    /// keys handled by one peer must share `keysize_bits` (§3 `[ADDED]`).
    #[error("key size mismatch: expected {expected} bytes, got {got}")]
    KeysizeMismatch { expected: usize, got: usize },

    /// `PeerConfig::validate` rejected a configuration (§6).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Convenience result type for DHT operations.
pub type Result<T> = std::result::Result<T, DhtError>;
