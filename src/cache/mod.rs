//! Content-addressed review result cache.
//!
//! Memoizes review results keyed by a fingerprint of the reviewed content,
//! so the same diff is never sent to the model twice. Two tiers:
//!
//! - a bounded in-memory LRU ([`memory::MemoryTier`]), and
//! - a sharded on-disk store ([`store::ShardedFileStore`]), authoritative
//!   across restarts.
//!
//! Lookups read through memory to disk; writes go through both. A
//! background [`evictor::Evictor`] enforces expiry, idle time and the size
//! budget. The size budget is also enforced synchronously by `set`: every
//! write first claims its bytes against the store total plus all writes
//! still in flight. Expiry and idle limits are left to sweeps, except that
//! `get` never returns an expired entry.

pub mod batch;
pub mod entry;
pub mod error;
pub mod evictor;
pub mod fingerprint;
pub mod memory;
pub mod store;

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::CacheConfig;

pub use batch::BatchRunner;
pub use entry::Entry;
pub use error::{BatchSetError, CacheError, Result};
pub use evictor::{EvictionPolicy, Evictor, SweepReport};
pub use fingerprint::{Fingerprint, Fingerprinter, Sha256Fingerprinter};
pub use memory::{LruIndex, MemoryTier};
pub use store::{CacheStats, EntryStore, ShardedFileStore};

/// Cache content for a review: the diff plus the agent and model that
/// produced the result, so a change of either invalidates the entry.
pub fn review_content(diff: &str, agent_name: &str, model: &str) -> Vec<u8> {
    fingerprint::compose_parts(&[diff, agent_name, model])
}

/// State shared with batch workers and the background evictor.
struct CacheCore {
    config: CacheConfig,
    fingerprinter: Arc<dyn Fingerprinter>,
    memory: Arc<MemoryTier>,
    store: Arc<dyn EntryStore>,
    evictor: Arc<Evictor>,
    shutdown: CancellationToken,
    /// Budget bytes claimed by writes that have not finished publishing.
    in_flight: parking_lot::Mutex<u64>,
    /// Bumped by every clear; lookups that straddle one do not promote.
    epoch: AtomicU64,
}

/// Budget held by one write until it is published or abandoned.
struct Claim<'a> {
    core: &'a CacheCore,
    bytes: u64,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        let mut held = self.core.in_flight.lock();
        *held = held.saturating_sub(self.bytes);
    }
}

impl CacheCore {
    fn ensure_running(&self) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(CacheError::Stopped);
        }
        Ok(())
    }

    /// Bound a single disk operation by the configured I/O timeout.
    async fn io<T>(&self, op: impl Future<Output = Result<T>>) -> Result<T> {
        let limit = self.config.io_timeout();
        match tokio::time::timeout(limit, op).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout(limit)),
        }
    }

    async fn get(&self, fp: &Fingerprint) -> Result<Option<Entry>> {
        self.ensure_running()?;
        let now = Utc::now();

        if let Some(entry) = self.memory.get(fp, now) {
            if entry.is_expired(now) {
                self.drop_expired(fp).await;
                return Ok(None);
            }
            tracing::debug!(fingerprint = %fp, "memory hit");
            return Ok(Some(entry));
        }

        let epoch = self.epoch.load(Ordering::SeqCst);
        let Some(mut entry) = self.io(self.store.read(fp)).await? else {
            tracing::debug!(fingerprint = %fp, "cache miss");
            return Ok(None);
        };
        if entry.is_expired(now) {
            self.drop_expired(fp).await;
            return Ok(None);
        }

        entry.touch(now);
        self.persist_recency(&entry).await;
        self.promote(entry.clone(), epoch);
        tracing::debug!(fingerprint = %fp, "disk hit");
        Ok(Some(entry))
    }

    /// Record a disk hit's access time so idle sweeps stay accurate across
    /// restarts. Skipped when the entry is gone or the budget has no room.
    async fn persist_recency(&self, entry: &Entry) {
        let size = match entry.to_json() {
            Ok(data) => data.len() as u64,
            Err(_) => return,
        };
        let Some(_claim) = self.try_claim(size) else {
            tracing::debug!(fingerprint = %entry.fingerprint, "no budget to record cache access");
            return;
        };
        match self.io(self.store.refresh(entry)).await {
            Ok(true) => {}
            Ok(false) => tracing::debug!(fingerprint = %entry.fingerprint, "entry removed before access was recorded"),
            Err(e) => tracing::warn!(fingerprint = %entry.fingerprint, error = %e, "failed to record cache access"),
        }
    }

    /// Put an entry in memory unless a clear ran since `epoch` was read.
    fn promote(&self, entry: Entry, epoch: u64) {
        let fp = entry.fingerprint;
        self.memory.put(entry);
        if self.epoch.load(Ordering::SeqCst) != epoch {
            self.memory.remove(&fp);
        }
    }

    async fn drop_expired(&self, fp: &Fingerprint) {
        self.memory.remove(fp);
        if let Err(e) = self.io(self.store.delete(fp)).await {
            tracing::warn!(fingerprint = %fp, error = %e, "failed to delete expired entry");
        }
        tracing::debug!(fingerprint = %fp, "expired entry treated as miss");
    }

    async fn set(&self, fp: Fingerprint, value: String, expiry: Option<Duration>) -> Result<()> {
        self.ensure_running()?;
        let ttl = expiry.or_else(|| self.config.default_ttl());
        let entry = Entry::new(fp, value, Utc::now(), ttl)?;

        let size = entry.to_json()?.len() as u64;
        if size > self.config.max_entry_bytes {
            tracing::warn!(fingerprint = %fp, size, "entry too large to cache");
            return Err(CacheError::EntryTooLarge {
                size,
                limit: self.config.max_entry_bytes,
            });
        }

        let epoch = self.epoch.load(Ordering::SeqCst);
        let _claim = self.claim(size).await?;
        let written = self.io(self.store.write(&entry)).await?;
        self.promote(entry, epoch);
        tracing::debug!(fingerprint = %fp, bytes = written, "cached entry");
        Ok(())
    }

    /// Claim `size` bytes if the store plus every in-flight write leaves
    /// room for them under the budget.
    fn try_claim(&self, size: u64) -> Option<Claim<'_>> {
        let mut held = self.in_flight.lock();
        let needed = self.store.total_bytes().saturating_add(*held).saturating_add(size);
        if needed > self.config.max_total_bytes {
            return None;
        }
        *held += size;
        Some(Claim { core: self, bytes: size })
    }

    /// Claim room for `size` more bytes, sweeping synchronously if needed.
    async fn claim(&self, size: u64) -> Result<Claim<'_>> {
        if let Some(claim) = self.try_claim(size) {
            return Ok(claim);
        }

        let reserve = size.saturating_add(*self.in_flight.lock());
        let report = self.evictor.sweep(Utc::now(), reserve).await?;
        tracing::info!(
            removed = report.removed(),
            bytes_freed = report.bytes_freed,
            "cleanup before write"
        );

        self.try_claim(size).ok_or_else(|| {
            let budget = self.config.max_total_bytes;
            let needed = self
                .store
                .total_bytes()
                .saturating_add(*self.in_flight.lock())
                .saturating_add(size);
            tracing::warn!(needed, budget, "cache size budget exceeded");
            CacheError::CapacityExceeded { needed, budget }
        })
    }
}

/// The two-tier review result cache.
///
/// Construct with [`ReviewCache::open`]; tear down with
/// [`ReviewCache::stop`]. `stop` is idempotent: calls after the first are
/// no-ops, and every other operation afterwards fails with
/// [`CacheError::Stopped`].
pub struct ReviewCache {
    core: Arc<CacheCore>,
    batch: BatchRunner,
    evictor_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl ReviewCache {
    /// Open a cache with the default fingerprinter and a sharded file store
    /// at the configured root. Must be called within a Tokio runtime.
    pub async fn open(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let root = config.resolved_root()?;
        let store = ShardedFileStore::open(root, config.shard_count)
            .await?
            .with_io_timeout(config.io_timeout());
        Self::open_with(config, Arc::new(Sha256Fingerprinter), Arc::new(store))
    }

    /// Open a cache over an injected fingerprinter and store.
    pub fn open_with(
        config: CacheConfig,
        fingerprinter: Arc<dyn Fingerprinter>,
        store: Arc<dyn EntryStore>,
    ) -> Result<Self> {
        config.validate()?;

        let memory = Arc::new(MemoryTier::new(config.memory_capacity));
        let evictor = Arc::new(Evictor::new(
            Arc::clone(&store),
            Arc::clone(&memory),
            EvictionPolicy {
                max_idle: config.max_idle(),
                max_total_bytes: config.max_total_bytes,
                io_timeout: config.io_timeout(),
            },
        ));
        let shutdown = CancellationToken::new();
        let task = Arc::clone(&evictor).spawn(config.sweep_interval(), shutdown.child_token());

        tracing::debug!(
            root = ?store.path(),
            memory_capacity = config.memory_capacity,
            max_total_bytes = config.max_total_bytes,
            "review cache ready"
        );

        Ok(Self {
            batch: BatchRunner::new(config.batch_concurrency),
            core: Arc::new(CacheCore {
                config,
                fingerprinter,
                memory,
                store,
                evictor,
                shutdown,
                in_flight: parking_lot::Mutex::new(0),
                epoch: AtomicU64::new(0),
            }),
            evictor_task: parking_lot::Mutex::new(Some(task)),
        })
    }

    /// Fingerprint content with this cache's fingerprinter.
    pub fn fingerprint(&self, content: impl AsRef<[u8]>) -> Fingerprint {
        self.core.fingerprinter.fingerprint(content.as_ref())
    }

    /// Look up the entry cached for `content`.
    pub async fn get(&self, content: impl AsRef<[u8]>) -> Result<Option<Entry>> {
        let fp = self.fingerprint(content);
        self.core.get(&fp).await
    }

    /// Look up only the cached value for `content`.
    pub async fn get_value(&self, content: impl AsRef<[u8]>) -> Result<Option<String>> {
        Ok(self.get(content).await?.map(|e| e.value))
    }

    /// Cache `value` for `content`. `expiry` overrides the configured
    /// default TTL; with neither, the entry lives until idle or evicted.
    pub async fn set(
        &self,
        content: impl AsRef<[u8]>,
        value: impl Into<String>,
        expiry: Option<Duration>,
    ) -> Result<()> {
        let fp = self.fingerprint(content);
        self.core.set(fp, value.into(), expiry).await
    }

    /// Whether a live entry exists, without recording an access.
    pub async fn contains(&self, content: impl AsRef<[u8]>) -> Result<bool> {
        self.core.ensure_running()?;
        let fp = self.fingerprint(content);
        let entry = self.core.io(self.core.store.read(&fp)).await?;
        Ok(entry.is_some_and(|e| !e.is_expired(Utc::now())))
    }

    /// Drop the entry for `content` from both tiers.
    pub async fn remove(&self, content: impl AsRef<[u8]>) -> Result<bool> {
        self.core.ensure_running()?;
        let fp = self.fingerprint(content);
        let in_memory = self.core.memory.remove(&fp).is_some();
        let freed = self.core.io(self.core.store.delete(&fp)).await?;
        Ok(in_memory || freed > 0)
    }

    /// Look up many contents at once. Only hits appear in the result.
    pub async fn batch_get<S>(&self, contents: impl IntoIterator<Item = S>) -> Result<HashMap<S, Entry>>
    where
        S: AsRef<[u8]> + Eq + Hash,
    {
        self.batch_get_with_cancel(contents, &CancellationToken::new()).await
    }

    /// [`ReviewCache::batch_get`] that gives up when `cancel` fires.
    pub async fn batch_get_with_cancel<S>(
        &self,
        contents: impl IntoIterator<Item = S>,
        cancel: &CancellationToken,
    ) -> Result<HashMap<S, Entry>>
    where
        S: AsRef<[u8]> + Eq + Hash,
    {
        self.core.ensure_running()?;
        let contents: Vec<S> = contents.into_iter().collect();
        let fps: Vec<Fingerprint> = contents.iter().map(|c| self.fingerprint(c)).collect();

        let core = Arc::clone(&self.core);
        let outcomes = self
            .batch
            .run(fps, cancel, &self.core.shutdown, move |fp| {
                let core = Arc::clone(&core);
                async move { core.get(&fp).await }
            })
            .await;

        let mut slots: Vec<Option<Entry>> = vec![None; contents.len()];
        for (index, outcome) in outcomes {
            match outcome {
                Ok(hit) => slots[index] = hit,
                Err(CacheError::Cancelled) => return Err(CacheError::Cancelled),
                Err(CacheError::Stopped) => return Err(CacheError::Stopped),
                Err(e) => tracing::warn!(error = %e, "batch lookup failed; treating as miss"),
            }
        }

        Ok(contents
            .into_iter()
            .zip(slots)
            .filter_map(|(content, hit)| hit.map(|entry| (content, entry)))
            .collect())
    }

    /// Cache many results at once. Returns every per-item failure; an empty
    /// list means everything was cached.
    pub async fn batch_set<S, V>(
        &self,
        items: impl IntoIterator<Item = (S, V)>,
        expiry: Option<Duration>,
    ) -> Vec<BatchSetError>
    where
        S: AsRef<[u8]>,
        V: Into<String>,
    {
        self.batch_set_with_cancel(items, expiry, &CancellationToken::new()).await
    }

    /// [`ReviewCache::batch_set`] that abandons unfinished items when
    /// `cancel` fires. Abandoned items are reported as cancelled.
    pub async fn batch_set_with_cancel<S, V>(
        &self,
        items: impl IntoIterator<Item = (S, V)>,
        expiry: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Vec<BatchSetError>
    where
        S: AsRef<[u8]>,
        V: Into<String>,
    {
        let work: Vec<(Fingerprint, String)> = items
            .into_iter()
            .map(|(content, value)| (self.fingerprint(content), value.into()))
            .collect();
        let fps: Vec<Fingerprint> = work.iter().map(|(fp, _)| *fp).collect();

        if self.is_stopped() {
            return fps
                .into_iter()
                .map(|fingerprint| BatchSetError {
                    fingerprint,
                    source: CacheError::Stopped,
                })
                .collect();
        }

        let core = Arc::clone(&self.core);
        let outcomes = self
            .batch
            .run(work, cancel, &self.core.shutdown, move |(fp, value)| {
                let core = Arc::clone(&core);
                async move { core.set(fp, value, expiry).await }
            })
            .await;

        let mut errors: Vec<BatchSetError> = outcomes
            .into_iter()
            .filter_map(|(index, outcome)| {
                outcome.err().map(|source| BatchSetError {
                    fingerprint: fps[index],
                    source,
                })
            })
            .collect();
        errors.sort_by_key(|e| e.fingerprint);
        errors
    }

    /// Run an eviction sweep now instead of waiting for the next interval.
    pub async fn sweep_now(&self) -> Result<SweepReport> {
        self.core.ensure_running()?;
        self.core.evictor.sweep(Utc::now(), 0).await
    }

    /// Purge both tiers.
    pub async fn clear(&self) -> Result<CacheStats> {
        self.core.ensure_running()?;
        self.core.epoch.fetch_add(1, Ordering::SeqCst);
        self.core.memory.clear();
        let stats = self.core.store.clear().await?;
        self.core.memory.clear();
        tracing::info!(entries = stats.entries, bytes = stats.total_bytes, "cache cleared");
        Ok(stats)
    }

    /// Entry count and bytes in the persistent tier.
    pub async fn stats(&self) -> Result<CacheStats> {
        self.core.ensure_running()?;
        self.core.io(self.core.store.stats()).await
    }

    /// Entries currently held in memory.
    pub fn memory_len(&self) -> usize {
        self.core.memory.len()
    }

    /// Storage root of the persistent tier.
    pub fn path(&self) -> Option<&Path> {
        self.core.store.path()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.core.config
    }

    pub fn is_stopped(&self) -> bool {
        self.core.shutdown.is_cancelled()
    }

    /// Stop the background evictor and cancel in-flight batch work.
    pub async fn stop(&self) {
        self.core.shutdown.cancel();
        let task = self.evictor_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "cache evictor did not shut down cleanly");
            }
            tracing::info!("review cache stopped");
        }
    }
}

impl Drop for ReviewCache {
    fn drop(&mut self) {
        self.core.shutdown.cancel();
    }
}

/// Review cache that may be disabled.
///
/// Wraps [`ReviewCache`] for callers that must keep working without
/// memoization: a cache that fails to open degrades to a disabled engine
/// that misses on every lookup and drops every write.
pub struct CacheEngine {
    cache: Option<ReviewCache>,
}

impl CacheEngine {
    /// Open the cache described by `config`, or a disabled engine if
    /// caching is turned off or the cache cannot be opened.
    pub async fn open(config: &CacheConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }
        match ReviewCache::open(config.clone()).await {
            Ok(cache) => Self { cache: Some(cache) },
            Err(e) => {
                tracing::warn!(error = %e, "caching disabled");
                Self::disabled()
            }
        }
    }

    /// An engine that caches nothing.
    pub fn disabled() -> Self {
        Self { cache: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.cache.is_some()
    }

    /// The underlying cache, when enabled.
    pub fn cache(&self) -> Option<&ReviewCache> {
        self.cache.as_ref()
    }

    /// Look up a cached result. Errors are logged and treated as misses.
    pub async fn get(&self, content: impl AsRef<[u8]>) -> Option<String> {
        let cache = self.cache.as_ref()?;
        match cache.get_value(content).await {
            Ok(hit) => hit,
            Err(e) => {
                tracing::warn!(error = %e, "cache lookup failed");
                None
            }
        }
    }

    /// Store a result. Returns whether it was cached; failures are logged.
    pub async fn put(&self, content: impl AsRef<[u8]>, value: impl Into<String>, expiry: Option<Duration>) -> bool {
        let Some(cache) = self.cache.as_ref() else {
            return false;
        };
        match cache.set(content, value, expiry).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "failed to cache result");
                false
            }
        }
    }

    /// Batch lookup; misses and failures are simply absent.
    pub async fn get_many<S>(&self, contents: impl IntoIterator<Item = S>) -> HashMap<S, String>
    where
        S: AsRef<[u8]> + Eq + Hash,
    {
        let Some(cache) = self.cache.as_ref() else {
            return HashMap::new();
        };
        match cache.batch_get(contents).await {
            Ok(hits) => hits.into_iter().map(|(k, e)| (k, e.value)).collect(),
            Err(e) => {
                tracing::warn!(error = %e, "batch cache lookup failed");
                HashMap::new()
            }
        }
    }

    /// Batch store; returns how many items failed to cache.
    pub async fn put_many<S, V>(&self, items: impl IntoIterator<Item = (S, V)>, expiry: Option<Duration>) -> usize
    where
        S: AsRef<[u8]>,
        V: Into<String>,
    {
        let Some(cache) = self.cache.as_ref() else {
            return 0;
        };
        let errors = cache.batch_set(items, expiry).await;
        for e in &errors {
            tracing::warn!(error = %e, "failed to cache result");
        }
        errors.len()
    }

    /// Remove all cached entries.
    pub async fn clear(&self) -> Result<CacheStats> {
        match self.cache.as_ref() {
            Some(cache) => cache.clear().await,
            None => Ok(CacheStats::default()),
        }
    }

    /// Compute statistics about the cache.
    pub async fn stats(&self) -> Result<CacheStats> {
        match self.cache.as_ref() {
            Some(cache) => cache.stats().await,
            None => Ok(CacheStats::default()),
        }
    }

    /// Return the cache directory path.
    pub fn path(&self) -> Option<&Path> {
        self.cache.as_ref().and_then(|c| c.path())
    }

    /// Stop the underlying cache, if any.
    pub async fn stop(&self) {
        if let Some(cache) = self.cache.as_ref() {
            cache.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn open(dir: &Path) -> ReviewCache {
        ReviewCache::open(CacheConfig::with_root(dir)).await.unwrap()
    }

    #[test]
    fn review_content_varies_with_agent_and_model() {
        let base = review_content("diff", "backend", "model");
        assert_ne!(base, review_content("diff", "frontend", "model"));
        assert_ne!(base, review_content("diff", "backend", "other"));
        assert_eq!(base, review_content("diff", "backend", "model"));
    }

    #[tokio::test]
    async fn set_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path()).await;
        cache.set("diff", "no issues", None).await.unwrap();

        let entry = cache.get("diff").await.unwrap().unwrap();
        assert_eq!(entry.value, "no issues");
        assert_eq!(entry.fingerprint, cache.fingerprint("diff"));
        assert!(cache.get("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn disk_hit_is_promoted_to_memory() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = open(dir.path()).await;
            cache.set("diff", "ok", None).await.unwrap();
            cache.stop().await;
        }
        let cache = open(dir.path()).await;
        assert_eq!(cache.memory_len(), 0);
        assert_eq!(cache.get_value("diff").await.unwrap().as_deref(), Some("ok"));
        assert_eq!(cache.memory_len(), 1);
    }

    #[tokio::test]
    async fn expired_entry_is_absent_and_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path()).await;
        cache.set("diff", "ok", Some(Duration::from_millis(10))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(cache.get("diff").await.unwrap().is_none());
        assert_eq!(cache.stats().await.unwrap().entries, 0);
    }

    #[tokio::test]
    async fn default_ttl_applies() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig {
            default_ttl_secs: Some(60),
            ..CacheConfig::with_root(dir.path())
        };
        let cache = ReviewCache::open(config).await.unwrap();
        cache.set("diff", "ok", None).await.unwrap();
        let entry = cache.get("diff").await.unwrap().unwrap();
        assert!(entry.expires_at.is_some());

        cache.set("pinned", "ok", Some(Duration::from_secs(3600))).await.unwrap();
        let pinned = cache.get("pinned").await.unwrap().unwrap();
        assert!(pinned.expires_at.unwrap() > entry.expires_at.unwrap());
    }

    #[tokio::test]
    async fn zero_expiry_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path()).await;
        let err = cache.set("diff", "ok", Some(Duration::ZERO)).await.unwrap_err();
        assert!(matches!(err, CacheError::InvalidExpiry));
    }

    #[tokio::test]
    async fn oversized_entry_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig {
            max_entry_bytes: 256,
            ..CacheConfig::with_root(dir.path())
        };
        let cache = ReviewCache::open(config).await.unwrap();
        let err = cache.set("diff", "x".repeat(1024), None).await.unwrap_err();
        assert!(matches!(err, CacheError::EntryTooLarge { limit: 256, .. }));
        assert!(!cache.contains("diff").await.unwrap());
    }

    #[tokio::test]
    async fn contains_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path()).await;
        assert!(!cache.remove("diff").await.unwrap());
        cache.set("diff", "ok", None).await.unwrap();
        assert!(cache.contains("diff").await.unwrap());
        assert!(cache.remove("diff").await.unwrap());
        assert!(!cache.contains("diff").await.unwrap());
    }

    #[tokio::test]
    async fn operations_fail_after_stop() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path()).await;
        cache.stop().await;
        cache.stop().await;
        assert!(cache.is_stopped());

        assert!(matches!(cache.get("diff").await, Err(CacheError::Stopped)));
        assert!(matches!(cache.set("diff", "ok", None).await, Err(CacheError::Stopped)));
        assert!(matches!(cache.batch_get(["diff"]).await, Err(CacheError::Stopped)));
        let errors = cache.batch_set([("diff", "ok")], None).await;
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0].source, CacheError::Stopped));
        assert!(matches!(cache.clear().await, Err(CacheError::Stopped)));
    }

    #[tokio::test]
    async fn open_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig {
            batch_concurrency: 0,
            ..CacheConfig::with_root(dir.path())
        };
        assert!(matches!(ReviewCache::open(config).await, Err(CacheError::Config(_))));
    }

    struct FixedFingerprinter;

    impl Fingerprinter for FixedFingerprinter {
        fn fingerprint(&self, _content: &[u8]) -> Fingerprint {
            Fingerprint::from_bytes([7; fingerprint::FINGERPRINT_LEN])
        }
    }

    #[tokio::test]
    async fn injected_fingerprinter_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let store = ShardedFileStore::open(dir.path(), 16).await.unwrap();
        let cache = ReviewCache::open_with(
            CacheConfig::with_root(dir.path()),
            Arc::new(FixedFingerprinter),
            Arc::new(store),
        )
        .unwrap();

        cache.set("one", "first", None).await.unwrap();
        assert_eq!(cache.get_value("two").await.unwrap().as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn engine_degrades_when_root_unusable() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, "x").unwrap();

        let engine = CacheEngine::open(&CacheConfig::with_root(&file)).await;
        assert!(!engine.is_enabled());
        assert!(!engine.put("diff", "ok", None).await);
        assert_eq!(engine.get("diff").await, None);
        assert!(engine.get_many(["diff"]).await.is_empty());
        assert_eq!(engine.put_many([("diff", "ok")], None).await, 0);
        assert_eq!(engine.stats().await.unwrap(), CacheStats::default());
        assert!(engine.path().is_none());
    }

    #[tokio::test]
    async fn engine_respects_enabled_flag() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig {
            enabled: false,
            ..CacheConfig::with_root(dir.path())
        };
        let engine = CacheEngine::open(&config).await;
        assert!(!engine.is_enabled());
    }

    #[tokio::test]
    async fn engine_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let engine = CacheEngine::open(&CacheConfig::with_root(dir.path())).await;
        assert!(engine.is_enabled());
        assert!(engine.put("diff", "ok", None).await);
        assert_eq!(engine.get("diff").await.as_deref(), Some("ok"));
        assert_eq!(engine.path(), Some(dir.path()));
        engine.stop().await;
    }
}
