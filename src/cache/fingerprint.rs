//! Content fingerprints.
//!
//! A fingerprint is the SHA-256 digest of the content being cached. It is
//! the sole correctness key of the cache, and its leading byte selects the
//! on-disk shard.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// Length of a fingerprint in bytes.
pub const FINGERPRINT_LEN: usize = 32;

/// Fixed-length content identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl Fingerprint {
    pub fn from_bytes(bytes: [u8; FINGERPRINT_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }

    /// Lowercase hex form, used as the on-disk file stem.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Shard directory name for this fingerprint.
    ///
    /// `shard_count` must be in `1..=256`.
    pub fn shard(&self, shard_count: usize) -> String {
        format!("{:02x}", self.shard_index(shard_count))
    }

    /// Numeric form of [`Fingerprint::shard`].
    pub fn shard_index(&self, shard_count: usize) -> usize {
        self.0[0] as usize % shard_count.clamp(1, 256)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..12])
    }
}

/// Error parsing a hex fingerprint.
#[derive(Debug, thiserror::Error)]
#[error("invalid fingerprint {0:?}: expected 64 hex characters")]
pub struct ParseFingerprintError(String);

impl FromStr for Fingerprint {
    type Err = ParseFingerprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; FINGERPRINT_LEN];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| ParseFingerprintError(s.to_string()))?;
        Ok(Self(bytes))
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Maps content bytes to a fingerprint.
///
/// Implementations must be deterministic and collision resistant.
pub trait Fingerprinter: Send + Sync {
    fn fingerprint(&self, content: &[u8]) -> Fingerprint;
}

/// Default fingerprinter: plain SHA-256 of the content.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Fingerprinter;

impl Fingerprinter for Sha256Fingerprinter {
    fn fingerprint(&self, content: &[u8]) -> Fingerprint {
        Fingerprint(Sha256::digest(content).into())
    }
}

/// Fingerprint content with the default fingerprinter.
pub fn fingerprint(content: &[u8]) -> Fingerprint {
    Sha256Fingerprinter.fingerprint(content)
}

/// Build cache content from several components (e.g. diff, agent, model).
///
/// Each part is length-prefixed so that `["ab", "c"]` and `["a", "bc"]`
/// yield different content and therefore different fingerprints.
pub fn compose_parts(parts: &[&str]) -> Vec<u8> {
    let mut out = Vec::with_capacity(parts.iter().map(|p| p.len() + 8).sum());
    for part in parts {
        out.extend_from_slice(&(part.len() as u64).to_le_bytes());
        out.extend_from_slice(part.as_bytes());
    }
    out
}
