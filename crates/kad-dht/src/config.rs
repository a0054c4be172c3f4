//! Peer configuration (§6).

use serde::{Deserialize, Serialize};

use crate::error::{DhtError, Result};

/// Canonical bucket width / replication factor.
pub const DEFAULT_K: usize = 20;
/// Canonical initial lookup concurrency.
pub const DEFAULT_ALPHA: usize = 3;
/// Canonical key space width in bits.
pub const DEFAULT_KEYSIZE_BITS: usize = 128;
/// Canonical nominal bucket/republish refresh period.
pub const DEFAULT_REFRESH_INTERVAL_MS: u64 = 15_000;
/// Canonical per-RPC lookup timeout.
pub const DEFAULT_QUERY_TIMEOUT_MS: u64 = 5_000;

/// Tunables recognized by the peer engine (§6).
///
/// `Default` yields the canonical values used throughout the spec's
/// worked examples. Serde-derived so a harness can load it from a config
/// file or environment without this crate knowing the format.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Bucket width and replication factor. Must be >= 10.
    pub k: usize,
    /// Initial lookup concurrency. Must be >= 3.
    pub alpha: usize,
    /// Bits per key. Must be a multiple of 8 and <= 256.
    pub keysize_bits: usize,
    /// Nominal bucket/republish period, in milliseconds. 0 disables
    /// refresh entirely.
    pub refresh_interval_ms: u64,
    /// Per-RPC timeout used by lookups, in milliseconds.
    pub query_timeout_ms: u64,
    /// Connection ceiling per peer. `None` disables the cap.
    pub max_transports: Option<usize>,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            alpha: DEFAULT_ALPHA,
            keysize_bits: DEFAULT_KEYSIZE_BITS,
            refresh_interval_ms: DEFAULT_REFRESH_INTERVAL_MS,
            query_timeout_ms: DEFAULT_QUERY_TIMEOUT_MS,
            max_transports: None,
        }
    }
}

impl PeerConfig {
    /// Number of bytes occupied by one key under this configuration.
    pub fn keysize_bytes(&self) -> usize {
        self.keysize_bits / 8
    }

    /// Validate the hard constraints from §6.
    pub fn validate(&self) -> Result<()> {
        if self.k < 10 {
            return Err(DhtError::InvalidConfig(format!(
                "k must be >= 10, got {}",
                self.k
            )));
        }
        if self.alpha < 3 {
            return Err(DhtError::InvalidConfig(format!(
                "alpha must be >= 3, got {}",
                self.alpha
            )));
        }
        if self.keysize_bits == 0 || self.keysize_bits % 8 != 0 {
            return Err(DhtError::InvalidConfig(format!(
                "keysize_bits must be a nonzero multiple of 8, got {}",
                self.keysize_bits
            )));
        }
        if self.keysize_bits > 256 {
            return Err(DhtError::InvalidConfig(format!(
                "keysize_bits must be <= 256, got {}",
                self.keysize_bits
            )));
        }
        Ok(())
    }
}
