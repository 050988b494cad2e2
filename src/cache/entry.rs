//! The unit of caching.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{CacheError, Result};
use super::fingerprint::Fingerprint;

/// A cached review result with its bookkeeping timestamps.
///
/// Values are immutable once written: identical content always yields the
/// same fingerprint and the same value. Only `last_accessed_at` moves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub fingerprint: Fingerprint,
    pub value: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub last_accessed_at: DateTime<Utc>,
}

impl Entry {
    /// Create a fresh entry. A `ttl` of zero is rejected, since the expiry
    /// must fall strictly after creation.
    pub fn new(
        fingerprint: Fingerprint,
        value: impl Into<String>,
        now: DateTime<Utc>,
        ttl: Option<Duration>,
    ) -> Result<Self> {
        let expires_at = match ttl {
            None => None,
            Some(ttl) if ttl.is_zero() => return Err(CacheError::InvalidExpiry),
            Some(ttl) => Some(
                chrono::Duration::from_std(ttl)
                    .ok()
                    .and_then(|ttl| now.checked_add_signed(ttl))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC),
            ),
        };

        Ok(Self {
            fingerprint,
            value: value.into(),
            created_at: now,
            expires_at,
            last_accessed_at: now,
        })
    }

    /// An entry is expired once `now` is strictly past its expiry.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now > at)
    }

    /// How long the entry has gone without a read.
    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_accessed_at).to_std().unwrap_or_default()
    }

    /// Record a read.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_accessed_at {
            self.last_accessed_at = now;
        }
    }

    /// Serialized on-disk form.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Parse the on-disk form. Failures are treated by callers as corruption.
    pub fn from_json(bytes: &[u8]) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
