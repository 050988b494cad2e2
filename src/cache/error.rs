//! Cache error taxonomy.
//!
//! Misses are not errors: lookups return `Option`. Corrupt entries never
//! leave the store; they are removed and reported as misses.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;

use super::fingerprint::Fingerprint;

/// Errors surfaced by cache operations.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache size budget exceeded: need {needed} bytes, budget is {budget} bytes")]
    CapacityExceeded { needed: u64, budget: u64 },

    #[error("entry of {size} bytes exceeds the per-entry limit of {limit} bytes")]
    EntryTooLarge { size: u64, limit: u64 },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid cache configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to encode cache entry: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("expiry must be longer than zero")]
    InvalidExpiry,

    #[error("cache operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("cache operation cancelled")]
    Cancelled,

    #[error("cache has been stopped")]
    Stopped,

    #[error("batch worker failed: {0}")]
    Worker(String),
}

impl CacheError {
    /// Attach a path to a raw I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the error is a size-budget rejection the caller may
    /// ignore by proceeding without caching.
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::CapacityExceeded { .. } | Self::EntryTooLarge { .. })
    }
}

/// A per-item failure collected by [`super::ReviewCache::batch_set`].
#[derive(Error, Debug)]
#[error("failed to cache {fingerprint}: {source}")]
pub struct BatchSetError {
    pub fingerprint: Fingerprint,
    #[source]
    pub source: CacheError,
}

/// Convenience alias used throughout the cache modules.
pub type Result<T, E = CacheError> = std::result::Result<T, E>;
