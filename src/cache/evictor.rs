//! Expiry, idle and size-budget enforcement for the persistent tier.
//!
//! A sweep scans the store without holding the memory-tier lock, consults
//! the memory tier only briefly per entry for fresher access times, and
//! removes entries in this order:
//!
//! 1. expired (`now > expires_at`),
//! 2. idle longer than the configured maximum,
//! 3. oldest-accessed first, until the store fits its byte budget.
//!
//! The same sweep runs periodically in the background and synchronously
//! from `set` when a write would exceed the budget. Each deletion is bounded
//! by the policy's I/O timeout; the sweep as a whole is not.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::error::{CacheError, Result};
use super::fingerprint::Fingerprint;
use super::memory::MemoryTier;
use super::store::EntryStore;

/// Limits enforced by a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
    pub max_idle: Duration,
    pub max_total_bytes: u64,
    /// Upper bound for a single deletion.
    pub io_timeout: Duration,
}

/// What a sweep removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub idle: usize,
    pub evicted_for_size: usize,
    pub bytes_freed: u64,
    /// Store size once the sweep finished.
    pub remaining_bytes: u64,
}

impl SweepReport {
    pub fn removed(&self) -> usize {
        self.expired + self.idle + self.evicted_for_size
    }
}

/// Runs sweeps against a store and its memory tier.
pub struct Evictor {
    store: Arc<dyn EntryStore>,
    memory: Arc<MemoryTier>,
    policy: EvictionPolicy,
    /// Serializes sweeps so a background pass and a `set`-triggered pass
    /// do not both evict for the same shortfall.
    sweeping: tokio::sync::Mutex<()>,
}

impl Evictor {
    pub fn new(store: Arc<dyn EntryStore>, memory: Arc<MemoryTier>, policy: EvictionPolicy) -> Self {
        Self {
            store,
            memory,
            policy,
            sweeping: tokio::sync::Mutex::new(()),
        }
    }

    pub fn policy(&self) -> &EvictionPolicy {
        &self.policy
    }

    /// Run one sweep as of `now`, leaving room for `reserve` more bytes.
    pub async fn sweep(&self, now: DateTime<Utc>, reserve: u64) -> Result<SweepReport> {
        let _guard = self.sweeping.lock().await;
        let metas = self.store.scan().await?;
        let mut report = SweepReport::default();
        let mut survivors = Vec::with_capacity(metas.len());

        for mut meta in metas {
            if let Some(seen) = self.memory.peek_last_accessed(&meta.fingerprint) {
                if seen > meta.last_accessed_at {
                    meta.last_accessed_at = seen;
                }
            }

            if meta.expires_at.is_some_and(|at| now > at) {
                report.bytes_freed += self.remove(&meta.fingerprint).await?;
                report.expired += 1;
            } else if idle_for(meta.last_accessed_at, now) > self.policy.max_idle {
                report.bytes_freed += self.remove(&meta.fingerprint).await?;
                report.idle += 1;
            } else {
                survivors.push(meta);
            }
        }

        survivors.sort_by_key(|m| m.last_accessed_at);
        for meta in survivors {
            if self.store.total_bytes().saturating_add(reserve) <= self.policy.max_total_bytes {
                break;
            }
            report.bytes_freed += self.remove(&meta.fingerprint).await?;
            report.evicted_for_size += 1;
        }

        report.remaining_bytes = self.store.total_bytes();
        Ok(report)
    }

    async fn remove(&self, fingerprint: &Fingerprint) -> Result<u64> {
        self.memory.remove(fingerprint);
        let limit = self.policy.io_timeout;
        let freed = tokio::time::timeout(limit, self.store.delete(fingerprint))
            .await
            .map_err(|_| CacheError::Timeout(limit))??;
        tracing::trace!(fingerprint = %fingerprint, freed, "evicted entry");
        Ok(freed)
    }

    /// Sweep every `every` until `shutdown` fires.
    ///
    /// The first sweep happens one interval after spawning. A sweep in
    /// progress is abandoned on shutdown; each deletion is atomic, so the
    /// store is left consistent.
    pub fn spawn(self: Arc<Self>, every: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    () = shutdown.cancelled() => break,
                }

                tokio::select! {
                    result = self.sweep(Utc::now(), 0) => match result {
                        Ok(report) if report.removed() > 0 => tracing::info!(
                            expired = report.expired,
                            idle = report.idle,
                            evicted = report.evicted_for_size,
                            bytes_freed = report.bytes_freed,
                            remaining = report.remaining_bytes,
                            "cache sweep finished"
                        ),
                        Ok(_) => tracing::debug!("cache sweep found nothing to evict"),
                        Err(e) => tracing::warn!(error = %e, "cache sweep failed"),
                    },
                    () = shutdown.cancelled() => break,
                }
            }
            tracing::debug!("cache evictor stopped");
        })
    }
}

fn idle_for(last_accessed: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - last_accessed).to_std().unwrap_or_default()
}
