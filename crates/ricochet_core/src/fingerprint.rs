//! State fingerprints (bins) for deduplication.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::hash::Hasher;

/// Fixed-width byte signature of interesting simulation state
///
/// Two states with equal fingerprints are treated as behaviorally equal
/// under the simulation's determinism assumption.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(Vec<u8>);

impl Fingerprint {
    /// Create a fingerprint from raw bytes
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Raw bytes of the fingerprint
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Width in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the fingerprint is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Hex representation (for logs)
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    /// FNV hash over the bytes the mask includes
    #[must_use]
    pub fn masked_hash(&self, mask: &ByteMask) -> u64 {
        let mut hasher = fnv::FnvHasher::default();
        for (i, b) in self.0.iter().enumerate() {
            if mask.is_included(i) {
                hasher.write_u8(*b);
            }
        }
        hasher.finish()
    }

    /// Equality restricted to the bytes the mask includes
    #[must_use]
    pub fn masked_eq(&self, other: &Fingerprint, mask: &ByteMask) -> bool {
        if self.0.len() != other.0.len() {
            return false;
        }
        self.0
            .iter()
            .zip(other.0.iter())
            .enumerate()
            .all(|(i, (a, b))| !mask.is_included(i) || a == b)
    }
}

/// Rehash a hash value to produce the next probe position
///
/// Open-addressed lookups probe by rehashing the hash value itself rather
/// than the fingerprint.
#[must_use]
pub fn rehash(h: u64) -> u64 {
    let mut hasher = fnv::FnvHasher::default();
    hasher.write_u64(h);
    hasher.finish()
}

/// Byte inclusion mask for fingerprint hashing
///
/// Bytes that provably never affect state equality (structure padding in the
/// simulation's memory image) are excluded so collision behavior stays stable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteMask {
    include: Vec<bool>,
}

impl ByteMask {
    /// Mask including every byte
    #[must_use]
    pub fn all(len: usize) -> Self {
        Self {
            include: vec![true; len],
        }
    }

    /// Whether byte `index` participates in hashing
    #[must_use]
    pub fn is_included(&self, index: usize) -> bool {
        self.include.get(index).copied().unwrap_or(true)
    }

    /// Number of bytes the mask covers
    #[must_use]
    pub fn len(&self) -> usize {
        self.include.len()
    }

    /// Whether the mask covers no bytes
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.include.is_empty()
    }

    /// Number of bytes included in hashing
    #[must_use]
    pub fn included_len(&self) -> usize {
        self.include.iter().filter(|b| **b).count()
    }

    /// Detect padding bytes by filler probing
    ///
    /// `sample(filler)` must flood the simulation's candidate state memory
    /// with `filler` bytes, advance once, and extract the resulting
    /// fingerprint. A fingerprint byte that tracks the filler value is
    /// copied raw from padding and is excluded from hashing; bytes the
    /// simulation recomputes are unaffected by the flood and stay included.
    ///
    /// # Errors
    ///
    /// Propagates any sampling error.
    pub fn probe<F>(mut sample: F) -> CoreResult<Self>
    where
        F: FnMut(u8) -> CoreResult<Fingerprint>,
    {
        let high = sample(0x3f)?;
        let low = sample(0x00)?;
        if high.len() != low.len() {
            return Err(CoreError::Validation {
                field: "byte_mask".to_string(),
                reason: format!(
                    "probe fingerprints disagree on width: {} vs {}",
                    high.len(),
                    low.len()
                ),
            });
        }
        let include = high
            .as_bytes()
            .iter()
            .zip(low.as_bytes().iter())
            .map(|(a, b)| a == b)
            .collect();
        Ok(Self { include })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masked_hash_ignores_excluded_bytes() {
        let mask = ByteMask {
            include: vec![true, false, true],
        };
        let a = Fingerprint::from_bytes(vec![1, 99, 3]);
        let b = Fingerprint::from_bytes(vec![1, 42, 3]);
        assert_eq!(a.masked_hash(&mask), b.masked_hash(&mask));
        assert!(a.masked_eq(&b, &mask));

        let c = Fingerprint::from_bytes(vec![2, 99, 3]);
        assert_ne!(a.masked_hash(&mask), c.masked_hash(&mask));
        assert!(!a.masked_eq(&c, &mask));
    }

    #[test]
    fn test_rehash_changes_value() {
        let h = 0xdead_beef_u64;
        let r = rehash(h);
        assert_ne!(h, r);
        // Deterministic
        assert_eq!(r, rehash(h));
    }

    #[test]
    fn test_probe_detects_filler() {
        // Byte 1 copies the filler value straight through; bytes 0 and 2 are
        // recomputed and stable.
        let mask = ByteMask::probe(|filler| {
            Ok(Fingerprint::from_bytes(vec![7, filler, 9]))
        })
        .unwrap();
        assert!(mask.is_included(0));
        assert!(!mask.is_included(1));
        assert!(mask.is_included(2));
        assert_eq!(mask.included_len(), 2);
    }

    #[test]
    fn test_probe_width_mismatch() {
        let mut flip = false;
        let result = ByteMask::probe(|_| {
            flip = !flip;
            Ok(Fingerprint::from_bytes(if flip { vec![0; 4] } else { vec![0; 5] }))
        });
        assert!(result.is_err());
    }

    proptest::proptest! {
        #[test]
        fn prop_masked_eq_implies_equal_masked_hash(
            bytes in proptest::collection::vec(0u8..=255, 1..32),
            flips in proptest::collection::vec(proptest::bool::ANY, 1..32),
        ) {
            let len = bytes.len().min(flips.len());
            let mask = ByteMask {
                include: flips[..len].to_vec(),
            };
            let a = Fingerprint::from_bytes(bytes[..len].to_vec());
            // Perturb only excluded bytes
            let mut other = bytes[..len].to_vec();
            for (i, b) in other.iter_mut().enumerate() {
                if !mask.is_included(i) {
                    *b = b.wrapping_add(1);
                }
            }
            let b = Fingerprint::from_bytes(other);
            proptest::prop_assert!(a.masked_eq(&b, &mask));
            proptest::prop_assert_eq!(a.masked_hash(&mask), b.masked_hash(&mask));
        }
    }

    #[test]
    fn test_to_hex() {
        let fp = Fingerprint::from_bytes(vec![0xab, 0xcd]);
        assert_eq!(fp.to_hex(), "abcd");
    }
}
