//! Key and distance algebra (C1, §4.1).
//!
//! Keys are opaque fixed-length byte strings compared and XORed as
//! unsigned big-endian integers. All keys handled together (within one
//! [`crate::routing_table::RoutingTable`]) must share the same length,
//! fixed by [`crate::config::PeerConfig::keysize_bits`].

use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{DhtError, Result};

/// An unsigned, big-endian, fixed-length key in the DHT address space.
///
/// Ordering is numeric on the byte string, which is equivalent to
/// lexicographic byte comparison for fixed-length unsigned integers.
#[derive(Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Key(Vec<u8>);

impl Key {
    /// Wrap raw bytes as a `Key` directly (already-hashed, already the
    /// right length). Used internally once a name has been hashed.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Key(bytes)
    }

    /// Derive a key from a human-readable name: `SHA-256(UTF-8(name))`
    /// truncated to the leading `keysize_bits` bits, big-endian (§4.1).
    pub fn from_name(name: &str, keysize_bits: usize) -> Self {
        let digest = Sha256::digest(name.as_bytes());
        let keysize_bytes = keysize_bits / 8;
        let mut bytes = vec![0u8; keysize_bytes];
        let copy_len = keysize_bytes.min(digest.len());
        bytes[..copy_len].copy_from_slice(&digest[..copy_len]);
        Key(bytes)
    }

    /// `key(key(x)) = key(x)`: hashing an already-derived key is a no-op
    /// because there is nothing upstream of a `Key` to re-hash — callers
    /// that already hold a `Key` simply keep using it. This constructor
    /// exists so call sites that accept "a name or an already-derived
    /// key" can normalize through one function, matching §4.1's "If
    /// input is already a Key, returned unchanged."
    pub fn coerce(key_or_name: KeyOrName, keysize_bits: usize) -> Self {
        match key_or_name {
            KeyOrName::Key(k) => k,
            KeyOrName::Name(name) => Key::from_name(&name, keysize_bits),
        }
    }

    /// Length of this key in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether this key holds zero bytes (never true for a real key, but
    /// required for the `len`/`is_empty` clippy pairing).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Raw bytes, big-endian.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    fn check_len(&self, other: &Key) -> Result<()> {
        if self.0.len() != other.0.len() {
            return Err(DhtError::KeysizeMismatch {
                expected: self.0.len(),
                got: other.0.len(),
            });
        }
        Ok(())
    }

    /// XOR distance between two keys (§4.1 `distance(a,b)`).
    ///
    /// Distance is symmetric, zero iff the keys are equal, and the result
    /// is itself ordered like a `Key` (numeric on the XOR bytes).
    pub fn distance(&self, other: &Key) -> Result<Key> {
        self.check_len(other)?;
        let bytes = self
            .0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| a ^ b)
            .collect();
        Ok(Key(bytes))
    }

    /// Count of leading zero bits in this key, treated as a distance
    /// value (§4.1 `commonPrefixLength(d)`). Returns `keysize_bits` when
    /// the value is entirely zero.
    pub fn common_prefix_length(&self) -> usize {
        let mut count = 0usize;
        for byte in &self.0 {
            if *byte == 0 {
                count += 8;
            } else {
                count += byte.leading_zeros() as usize;
                break;
            }
        }
        count
    }

    /// `getBucketIndex(self, other)` (§4.1): the distance band `other`
    /// falls into relative to `self`. Fails if `other == self`.
    pub fn bucket_index(&self, other: &Key) -> Result<usize> {
        if self == other {
            return Err(DhtError::SameKey);
        }
        let d = self.distance(other)?;
        let keysize_bits = self.0.len() * 8;
        Ok(keysize_bits - 1 - d.common_prefix_length())
    }

    /// `randomKeyForBucket(self, i)` (§4.1): a uniformly sampled key
    /// whose `bucket_index(self, _)` equals `i`.
    ///
    /// Algorithm: build a distance value with the leading
    /// `keysize_bits - 1 - i` bits zero, the next bit set, and the
    /// remainder uniformly random; XOR it onto `self`.
    pub fn random_for_bucket(&self, i: usize, rng: &mut impl Rng) -> Key {
        let keysize_bits = self.0.len() * 8;
        debug_assert!(i < keysize_bits);

        let mut distance = vec![0u8; self.0.len()];
        // The bit at position `i` counting from the most-significant bit
        // (i.e. bit index keysize_bits - 1 - i from the LSB) must be 1;
        // everything more significant than it must be 0; everything less
        // significant is random.
        let set_bit_pos = keysize_bits - 1 - i;
        set_bit(&mut distance, set_bit_pos);

        for bit_pos in (set_bit_pos + 1)..keysize_bits {
            if rng.gen::<bool>() {
                set_bit(&mut distance, bit_pos);
            }
        }

        let distance_key = Key(distance);
        // self XOR distance; check_len always succeeds (same length by
        // construction).
        self.distance(&distance_key).expect("same length by construction")
    }
}

/// Sets the bit at `pos`, where `pos` counts from the most-significant
/// bit of `bytes` (bit 0 = MSB of `bytes[0]`).
fn set_bit(bytes: &mut [u8], pos: usize) {
    let byte_idx = pos / 8;
    let bit_in_byte = 7 - (pos % 8);
    bytes[byte_idx] |= 1 << bit_in_byte;
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Key({})", hex::encode(&self.0))
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

/// Input to [`Key::coerce`]: either an already-derived key or a raw name
/// still needing to be hashed.
pub enum KeyOrName {
    Key(Key),
    Name(String),
}

impl From<Key> for KeyOrName {
    fn from(k: Key) -> Self {
        KeyOrName::Key(k)
    }
}

impl From<&str> for KeyOrName {
    fn from(s: &str) -> Self {
        KeyOrName::Name(s.to_string())
    }
}

impl From<String> for KeyOrName {
    fn from(s: String) -> Self {
        KeyOrName::Name(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn k(byte: u8, len: usize) -> Key {
        Key(vec![byte; len])
    }

    #[test]
    fn distance_is_symmetric_and_zero_iff_equal() {
        let a = Key::from_name("a", 128);
        let b = Key::from_name("b", 128);
        assert_eq!(a.distance(&b).unwrap(), b.distance(&a).unwrap());
        assert_eq!(
            a.distance(&a).unwrap(),
            Key(vec![0u8; 16])
        );
        assert_ne!(a.distance(&b).unwrap(), Key(vec![0u8; 16]));
    }

    #[test]
    fn xor_complement_is_all_ones() {
        let a = k(0x00, 16);
        let b = k(0xFF, 16);
        assert_eq!(a.distance(&b).unwrap(), k(0xFF, 16));
    }

    #[test]
    fn common_prefix_length_all_zero_is_keysize() {
        let zero = k(0x00, 16);
        assert_eq!(zero.common_prefix_length(), 128);
    }

    #[test]
    fn common_prefix_length_counts_leading_zero_bits() {
        let mut bytes = vec![0u8; 16];
        bytes[0] = 0b0000_0001; // 7 leading zero bits in byte 0
        let key = Key(bytes);
        assert_eq!(key.common_prefix_length(), 7);
    }

    #[test]
    fn bucket_index_rejects_self() {
        let a = Key::from_name("a", 128);
        assert!(a.bucket_index(&a).is_err());
    }

    #[test]
    fn bucket_index_matches_common_prefix_identity() {
        // commonPrefixLength(d) + getBucketIndex(self, self XOR d) = keysize - 1, d != 0
        let self_key = k(0x00, 16);
        let mut d_bytes = vec![0u8; 16];
        d_bytes[0] = 0b0001_0000; // nonzero distance, cpl = 3
        let d = Key(d_bytes.clone());
        let other = self_key.distance(&d).unwrap(); // other = self XOR d = d here
        let idx = self_key.bucket_index(&other).unwrap();
        assert_eq!(d.common_prefix_length() + idx, 128 - 1);
    }

    #[test]
    fn random_for_bucket_lands_in_requested_bucket() {
        let mut rng = rand::thread_rng();
        let self_key = Key::from_name("self", 128);
        for i in [0usize, 1, 42, 64, 100, 127] {
            let candidate = self_key.random_for_bucket(i, &mut rng);
            assert_eq!(self_key.bucket_index(&candidate).unwrap(), i);
        }
    }

    #[test]
    fn key_from_name_is_idempotent_through_coerce() {
        let derived = Key::from_name("foo", 128);
        let coerced = Key::coerce(KeyOrName::Key(derived.clone()), 128);
        assert_eq!(derived, coerced);
    }

    #[test]
    fn ordering_is_numeric_not_lexicographic_on_strings() {
        let small = k(0x01, 4);
        let big = k(0xF0, 4);
        assert!(small < big);
    }
}
