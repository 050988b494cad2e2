//! Persistent tier: a sharded, filesystem-backed entry store.
//!
//! Layout under the storage root:
//!
//! ```text
//! <root>/<shard>/<fingerprint>.json
//! ```
//!
//! where `<shard>` is two hex digits derived from the fingerprint's leading
//! byte. Writes go to a hidden temp file in the same shard and are renamed
//! into place, so readers never observe a half-written entry.
//!
//! Per-entry mutations (publish, delete, corrupt-file cleanup) hold the
//! store gate shared and their shard's lock. Whole-store passes (scan and
//! clear) hold the gate exclusively, so they never race a publish and the
//! running byte total stays exact.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use super::entry::Entry;
use super::error::{CacheError, Result};
use super::fingerprint::Fingerprint;
use crate::constants::{DEFAULT_IO_TIMEOUT_SECS, ENTRY_EXTENSION};

/// Metadata about one persisted entry, as seen by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMeta {
    pub fingerprint: Fingerprint,
    pub size: u64,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_accessed_at: DateTime<Utc>,
}

/// Persistence interface for the authoritative tier.
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Read an entry. Missing or corrupt entries are reported as `None`.
    async fn read(&self, fingerprint: &Fingerprint) -> Result<Option<Entry>>;

    /// Atomically publish an entry. Returns the number of bytes written.
    async fn write(&self, entry: &Entry) -> Result<u64>;

    /// Republish an entry only if it is still stored, e.g. to record a
    /// newer access time. Returns `false` without writing when it is gone.
    async fn refresh(&self, entry: &Entry) -> Result<bool>;

    /// Remove an entry. Returns the bytes freed (zero if it was absent).
    async fn delete(&self, fingerprint: &Fingerprint) -> Result<u64>;

    /// List metadata for every readable entry, discarding corrupt ones.
    async fn scan(&self) -> Result<Vec<StoredMeta>>;

    /// Remove every entry.
    async fn clear(&self) -> Result<CacheStats>;

    /// Current total size in bytes of all entries.
    fn total_bytes(&self) -> u64;

    /// Count entries and bytes on disk.
    async fn stats(&self) -> Result<CacheStats>;

    /// Storage root, if the store lives on a filesystem.
    fn path(&self) -> Option<&Path> {
        None
    }
}

/// Filesystem-based sharded store.
pub struct ShardedFileStore {
    root: PathBuf,
    shard_count: usize,
    total_bytes: AtomicU64,
    io_timeout: Duration,
    gate: RwLock<()>,
    shard_locks: Vec<Mutex<()>>,
}

impl ShardedFileStore {
    /// Open (creating if needed) a store rooted at `root`.
    ///
    /// Fails if the root cannot be created or is not writable. The running
    /// byte total is initialised from a scan of the existing shards.
    pub async fn open(root: impl Into<PathBuf>, shard_count: usize) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|source| crate::config::ConfigError::Root {
                path: root.clone(),
                source,
            })?;

        // Check that the root accepts writes before declaring it usable.
        let marker = root.join(format!(".marker-{}", uuid::Uuid::new_v4()));
        tokio::fs::write(&marker, b"")
            .await
            .map_err(|source| crate::config::ConfigError::Root {
                path: root.clone(),
                source,
            })?;
        let _ = tokio::fs::remove_file(&marker).await;

        let shard_count = shard_count.clamp(1, 256);
        let store = Self {
            root,
            shard_count,
            total_bytes: AtomicU64::new(0),
            io_timeout: Duration::from_secs(DEFAULT_IO_TIMEOUT_SECS),
            gate: RwLock::new(()),
            shard_locks: (0..shard_count).map(|_| Mutex::new(())).collect(),
        };
        let stats = store.stats().await?;
        store.total_bytes.store(stats.total_bytes, Ordering::SeqCst);
        tracing::debug!(
            root = %store.root.display(),
            entries = stats.entries,
            bytes = stats.total_bytes,
            "opened cache store"
        );
        Ok(store)
    }

    /// Bound each file operation of scans, deletes and clears.
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    fn shard_dir(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.root.join(fingerprint.shard(self.shard_count))
    }

    fn shard_lock(&self, fingerprint: &Fingerprint) -> &Mutex<()> {
        &self.shard_locks[fingerprint.shard_index(self.shard_count)]
    }

    /// File path for a fingerprint.
    pub fn entry_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.shard_dir(fingerprint)
            .join(format!("{}.{ENTRY_EXTENSION}", fingerprint.to_hex()))
    }

    async fn timed<T>(&self, op: impl Future<Output = std::io::Result<T>>) -> std::io::Result<T> {
        tokio::time::timeout(self.io_timeout, op)
            .await
            .unwrap_or_else(|_| Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "cache I/O timed out")))
    }

    /// Every shard directory that currently exists.
    async fn shard_dirs(&self) -> Result<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        let mut rd = match tokio::fs::read_dir(&self.root).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(dirs),
            Err(e) => return Err(CacheError::io(&self.root, e)),
        };
        while let Some(item) = rd.next_entry().await.map_err(|e| CacheError::io(&self.root, e))? {
            let is_dir = item.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if is_dir && is_shard_name(&item.file_name().to_string_lossy()) {
                dirs.push(item.path());
            }
        }
        Ok(dirs)
    }

    /// Entry files in a shard, with their sizes. Stray temp files are removed.
    async fn shard_files(&self, dir: &Path) -> Result<Vec<(PathBuf, u64)>> {
        let mut files = Vec::new();
        let mut rd = match tokio::fs::read_dir(dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(CacheError::io(dir, e)),
        };
        while let Some(item) = rd.next_entry().await.map_err(|e| CacheError::io(dir, e))? {
            let path = item.path();
            let name = item.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') && name.ends_with(".tmp") {
                if is_stale_temp(&item).await {
                    let _ = tokio::fs::remove_file(&path).await;
                }
                continue;
            }
            if path.extension().is_some_and(|e| e == ENTRY_EXTENSION) {
                let size = item.metadata().await.map(|m| m.len()).unwrap_or(0);
                files.push((path, size));
            }
        }
        Ok(files)
    }

    /// Write `entry` to a temp file and rename it over its final path.
    ///
    /// With `only_if_present`, nothing is written unless the entry file
    /// already exists. Returns the bytes written, or `None` if skipped.
    async fn publish(&self, entry: &Entry, only_if_present: bool) -> Result<Option<u64>> {
        let _gate = self.gate.read().await;
        let _shard = self.shard_lock(&entry.fingerprint).lock().await;

        let final_path = self.entry_path(&entry.fingerprint);
        let previous = match tokio::fs::metadata(&final_path).await {
            Ok(m) => Some(m.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(CacheError::io(&final_path, e)),
        };
        if only_if_present && previous.is_none() {
            return Ok(None);
        }

        let dir = self.shard_dir(&entry.fingerprint);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| CacheError::io(&dir, e))?;

        let data = entry.to_json()?;
        let tmp_path = dir.join(format!(
            ".{}.{}.tmp",
            entry.fingerprint.to_hex(),
            uuid::Uuid::new_v4().simple()
        ));

        if let Err(e) = write_synced(&tmp_path, &data).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(CacheError::io(&tmp_path, e));
        }
        if let Err(e) = tokio::fs::rename(&tmp_path, &final_path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(CacheError::io(&final_path, e));
        }

        let written = data.len() as u64;
        self.total_bytes.fetch_add(written, Ordering::SeqCst);
        if let Some(prev) = previous {
            self.sub_bytes(prev);
        }
        Ok(Some(written))
    }

    /// Remove one entry file and account for its bytes. Returns `None` if
    /// it was already gone. Callers hold the gate.
    async fn remove_counted(&self, path: &Path) -> Result<Option<u64>> {
        let size = match self.timed(tokio::fs::metadata(path)).await {
            Ok(m) => m.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::io(path, e)),
        };
        match self.timed(tokio::fs::remove_file(path)).await {
            Ok(()) => {
                self.sub_bytes(size);
                Ok(Some(size))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::io(path, e)),
        }
    }

    /// Remove a corrupt file. Callers hold the gate.
    async fn discard_corrupt(&self, path: &Path, reason: &str) {
        tracing::warn!(path = %path.display(), reason, "discarding corrupt cache entry");
        if let Err(e) = self.remove_counted(path).await {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove corrupt cache entry");
        }
    }

    fn sub_bytes(&self, bytes: u64) {
        let _ = self
            .total_bytes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |cur| Some(cur.saturating_sub(bytes)));
    }
}

#[async_trait]
impl EntryStore for ShardedFileStore {
    async fn read(&self, fingerprint: &Fingerprint) -> Result<Option<Entry>> {
        let path = self.entry_path(fingerprint);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::io(&path, e)),
        };

        let reason = match Entry::from_json(&bytes) {
            Ok(entry) if entry.fingerprint == *fingerprint => return Ok(Some(entry)),
            Ok(_) => "fingerprint mismatch".to_string(),
            Err(e) => e.to_string(),
        };
        let _gate = self.gate.read().await;
        let _shard = self.shard_lock(fingerprint).lock().await;
        self.discard_corrupt(&path, &reason).await;
        Ok(None)
    }

    async fn write(&self, entry: &Entry) -> Result<u64> {
        Ok(self.publish(entry, false).await?.unwrap_or_default())
    }

    async fn refresh(&self, entry: &Entry) -> Result<bool> {
        Ok(self.publish(entry, true).await?.is_some())
    }

    async fn delete(&self, fingerprint: &Fingerprint) -> Result<u64> {
        let _gate = self.gate.read().await;
        let _shard = self.shard_lock(fingerprint).lock().await;
        Ok(self.remove_counted(&self.entry_path(fingerprint)).await?.unwrap_or_default())
    }

    async fn scan(&self) -> Result<Vec<StoredMeta>> {
        let _gate = self.gate.write().await;
        let mut metas: Vec<StoredMeta> = Vec::new();
        for dir in self.shard_dirs().await? {
            for (path, size) in self.shard_files(&dir).await? {
                let bytes = match self.timed(tokio::fs::read(&path)).await {
                    Ok(b) => b,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(e) => return Err(CacheError::io(&path, e)),
                };
                let entry = match Entry::from_json(&bytes) {
                    Ok(entry) => entry,
                    Err(e) => {
                        self.discard_corrupt(&path, &e.to_string()).await;
                        continue;
                    }
                };
                if path.file_stem().and_then(|s| s.to_str()) != Some(entry.fingerprint.to_hex().as_str()) {
                    self.discard_corrupt(&path, "fingerprint mismatch").await;
                    continue;
                }
                metas.push(StoredMeta {
                    fingerprint: entry.fingerprint,
                    size,
                    expires_at: entry.expires_at,
                    last_accessed_at: entry.last_accessed_at,
                });
            }
        }
        // Nothing publishes while the gate is held, so the scan is exact.
        let scanned: u64 = metas.iter().map(|m| m.size).sum();
        self.total_bytes.store(scanned, Ordering::SeqCst);
        Ok(metas)
    }

    async fn clear(&self) -> Result<CacheStats> {
        let _gate = self.gate.write().await;
        let mut cleared = CacheStats::default();
        for dir in self.shard_dirs().await? {
            for (path, _) in self.shard_files(&dir).await? {
                if let Some(freed) = self.remove_counted(&path).await? {
                    cleared.entries += 1;
                    cleared.total_bytes += freed;
                }
            }
            // Only abandoned temp files can remain here.
            let _ = tokio::fs::remove_dir_all(&dir).await;
        }
        self.total_bytes.store(0, Ordering::SeqCst);
        Ok(cleared)
    }

    fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::SeqCst)
    }

    async fn stats(&self) -> Result<CacheStats> {
        let mut stats = CacheStats::default();
        for dir in self.shard_dirs().await? {
            for (_, size) in self.shard_files(&dir).await? {
                stats.entries += 1;
                stats.total_bytes += size;
            }
        }
        Ok(stats)
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.root)
    }
}

async fn write_synced(path: &Path, data: &[u8]) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    Ok(())
}

fn is_shard_name(name: &str) -> bool {
    name.len() == 2 && name.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
}

/// Temp files are only reclaimed once clearly abandoned by their writer.
async fn is_stale_temp(item: &tokio::fs::DirEntry) -> bool {
    const STALE_AFTER: std::time::Duration = std::time::Duration::from_secs(10 * 60);
    item.metadata()
        .await
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.elapsed().ok())
        .is_some_and(|age| age > STALE_AFTER)
}

/// Statistics about the cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cached entries.
    pub entries: usize,
    /// Total size in bytes.
    pub total_bytes: u64,
}

impl CacheStats {
    /// Format total_bytes as a human-readable string.
    pub fn human_size(&self) -> String {
        const KB: u64 = 1024;
        const MB: u64 = 1024 * KB;

        if self.total_bytes >= MB {
            format!("{:.1} MiB", self.total_bytes as f64 / MB as f64)
        } else if self.total_bytes >= KB {
            format!("{:.1} KiB", self.total_bytes as f64 / KB as f64)
        } else {
            format!("{} B", self.total_bytes)
        }
    }
}
