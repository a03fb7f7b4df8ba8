//! 32-byte content hash.

use sbor::prelude::BasicSbor;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A 32-byte blake3 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, BasicSbor)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// The all-zero hash, used as a sentinel (genesis parent, empty roots).
    pub const ZERO: Hash = Hash([0u8; 32]);

    /// Hash arbitrary bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Hash(*blake3::hash(bytes).as_bytes())
    }

    /// Wrap a raw 32-byte digest.
    pub fn new(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Check whether this is the zero sentinel.
    pub fn is_zero(&self) -> bool {
        *self == Hash::ZERO
    }

    /// Number of leading zero bits in the digest.
    pub fn leading_zero_bits(&self) -> u32 {
        let mut count = 0;
        for byte in self.0 {
            if byte == 0 {
                count += 8;
            } else {
                count += byte.leading_zeros();
                break;
            }
        }
        count
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}..", hex::encode(&self.0[..4]))
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(self.0)))
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let raw = s.strip_prefix("0x").unwrap_or(&s);
        let bytes = hex::decode(raw).map_err(serde::de::Error::custom)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes"))?;
        Ok(Hash(arr))
    }
}

/// Compute the merkle root of a list of hashes.
///
/// Leaves are paired left-to-right; an odd node is promoted unchanged.
/// An empty list yields `Hash::ZERO`.
pub fn derive_root(hashes: &[Hash]) -> Hash {
    if hashes.is_empty() {
        return Hash::ZERO;
    }
    let mut layer: Vec<Hash> = hashes.to_vec();
    while layer.len() > 1 {
        let mut next = Vec::with_capacity(layer.len().div_ceil(2));
        for pair in layer.chunks(2) {
            if pair.len() == 2 {
                let mut buf = [0u8; 64];
                buf[..32].copy_from_slice(pair[0].as_bytes());
                buf[32..].copy_from_slice(pair[1].as_bytes());
                next.push(Hash::from_bytes(&buf));
            } else {
                next.push(pair[0]);
            }
        }
        layer = next;
    }
    layer[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_bytes_is_deterministic() {
        assert_eq!(Hash::from_bytes(b"abc"), Hash::from_bytes(b"abc"));
        assert_ne!(Hash::from_bytes(b"abc"), Hash::from_bytes(b"abd"));
    }

    #[test]
    fn zero_sentinel() {
        assert!(Hash::ZERO.is_zero());
        assert!(!Hash::from_bytes(b"x").is_zero());
    }

    #[test]
    fn leading_zero_bits() {
        let mut raw = [0xffu8; 32];
        assert_eq!(Hash::new(raw).leading_zero_bits(), 0);
        raw[0] = 0x00;
        raw[1] = 0x0f;
        assert_eq!(Hash::new(raw).leading_zero_bits(), 12);
        assert_eq!(Hash::ZERO.leading_zero_bits(), 256);
    }

    #[test]
    fn derive_root_handles_odd_and_empty() {
        assert_eq!(derive_root(&[]), Hash::ZERO);

        let one = [Hash::from_bytes(b"a")];
        assert_eq!(derive_root(&one), one[0]);

        let three = [
            Hash::from_bytes(b"a"),
            Hash::from_bytes(b"b"),
            Hash::from_bytes(b"c"),
        ];
        let root = derive_root(&three);
        assert_ne!(root, derive_root(&three[..2]));
        // Same input, same root.
        assert_eq!(root, derive_root(&three));
    }

    #[test]
    fn hex_serde_round_trip() {
        let h = Hash::from_bytes(b"serde");
        let json = serde_json::to_string(&h).unwrap();
        assert!(json.starts_with("\"0x"));
        let back: Hash = serde_json::from_str(&json).unwrap();
        assert_eq!(h, back);
    }
}
