//! Content hashing for XorbHub
//!
//! Every block, xorb and shard is addressed by the Blake3 digest of its bytes.
//! On the wire and in storage keys digests are 64 lowercase hex characters.

use crate::error::{Result, XorbError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Digest length in bytes
pub const HASH_LEN: usize = 32;

/// Blake3 hash wrapper for content addressing
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; HASH_LEN]);

impl ContentHash {
    /// Compute Blake3 hash of data
    pub fn compute(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Compute Blake3 hash of data using multiple threads (for large data)
    pub fn compute_parallel(data: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update_rayon(data);
        Self(*hasher.finalize().as_bytes())
    }

    /// Wrap raw digest bytes
    pub fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }

    /// Build from a slice that must be exactly 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; HASH_LEN] = bytes.try_into().map_err(|_| {
            XorbError::InvalidHash(format!(
                "expected {} bytes, got {}",
                HASH_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    /// Get the raw hash bytes
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Convert to lowercase hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string. Only the canonical lowercase form is accepted so
    /// that a digest has exactly one storage key.
    pub fn from_hex(s: &str) -> Result<Self> {
        if s.len() != HASH_LEN * 2 {
            return Err(XorbError::InvalidHash(format!(
                "expected {} hex characters, got {}",
                HASH_LEN * 2,
                s.len()
            )));
        }
        if s.bytes().any(|b| b.is_ascii_uppercase()) {
            return Err(XorbError::InvalidHash(format!("not lowercase hex: {}", s)));
        }
        let bytes = hex::decode(s).map_err(|e| XorbError::InvalidHash(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// Verify that data matches this hash
    pub fn verify(&self, data: &[u8]) -> bool {
        Self::compute(data) == *self
    }

    /// Verify data against this hash, returning an integrity error on mismatch
    pub fn ensure(&self, data: &[u8]) -> Result<()> {
        let actual = Self::compute(data);
        if actual == *self {
            Ok(())
        } else {
            Err(XorbError::Integrity {
                expected: self.to_hex(),
                actual: actual.to_hex(),
            })
        }
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for ContentHash {
    type Err = XorbError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl Serialize for ContentHash {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
