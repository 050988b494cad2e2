//! Integration tests for the stats, clear, path and sweep CLI commands.
//!
//! These tests exercise the library functions that back each command,
//! using the public API from the revcache crate.

use std::time::Duration;

use revcache::cache::CacheEngine;
use revcache::config::{CacheConfig, Config};
use revcache::constants;
use revcache::env::Env;

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

#[test]
fn local_config_file_sets_cache_root() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("store");
    std::fs::write(
        dir.path().join(constants::CONFIG_FILENAME),
        format!("[cache]\nroot = {:?}\nmax_total_bytes = 65536\n", root.display().to_string()),
    )
    .unwrap();

    let env = Env::mock(Vec::<(&str, &str)>::new());
    let config = Config::load_from(None, Some(dir.path()), &env).unwrap();
    assert_eq!(config.cache.root, Some(root));
    assert_eq!(config.cache.max_total_bytes, 65536);
}

// ---------------------------------------------------------------------------
// stats / path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stats_empty_cache() {
    let dir = tempfile::tempdir().unwrap();
    let engine = CacheEngine::open(&CacheConfig::with_root(dir.path())).await;
    let stats = engine.stats().await.unwrap();
    assert_eq!(stats.entries, 0);
    assert_eq!(stats.total_bytes, 0);
}

#[tokio::test]
async fn stats_with_entries() {
    let dir = tempfile::tempdir().unwrap();
    let engine = CacheEngine::open(&CacheConfig::with_root(dir.path())).await;
    assert!(engine.put("diff one", "review one", None).await);
    assert!(engine.put("diff two", "review two", None).await);

    let stats = engine.stats().await.unwrap();
    assert_eq!(stats.entries, 2);
    assert!(stats.total_bytes > 0);
    assert!(stats.human_size().ends_with(" B") || stats.human_size().ends_with("KiB"));
}

#[tokio::test]
async fn path_returns_root() {
    let dir = tempfile::tempdir().unwrap();
    let engine = CacheEngine::open(&CacheConfig::with_root(dir.path())).await;
    assert_eq!(engine.path(), Some(dir.path()));
}

// ---------------------------------------------------------------------------
// clear / sweep
// ---------------------------------------------------------------------------

#[tokio::test]
async fn clear_removes_entries() {
    let dir = tempfile::tempdir().unwrap();
    let engine = CacheEngine::open(&CacheConfig::with_root(dir.path())).await;
    engine.put("diff", "review", None).await;
    assert!(engine.get("diff").await.is_some());

    let stats = engine.clear().await.unwrap();
    assert_eq!(stats.entries, 1);
    assert!(engine.get("diff").await.is_none());
    assert!(dir.path().exists());
}

#[tokio::test]
async fn clear_empty_is_ok() {
    let dir = tempfile::tempdir().unwrap();
    let engine = CacheEngine::open(&CacheConfig::with_root(dir.path().join("fresh"))).await;
    let stats = engine.clear().await.unwrap();
    assert_eq!(stats.entries, 0);
}

#[tokio::test]
async fn sweep_removes_expired_entries() {
    let dir = tempfile::tempdir().unwrap();
    let engine = CacheEngine::open(&CacheConfig::with_root(dir.path())).await;
    engine.put("old diff", "review", Some(Duration::from_millis(10))).await;
    engine.put("new diff", "review", Some(Duration::from_secs(3600))).await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    let cache = engine.cache().unwrap();
    let report = cache.sweep_now().await.unwrap();
    assert_eq!(report.expired, 1);
    assert_eq!(report.removed(), 1);
    assert_eq!(engine.stats().await.unwrap().entries, 1);
}

#[tokio::test]
async fn no_cache_flag_disables_engine() {
    let dir = tempfile::tempdir().unwrap();
    let config = CacheConfig {
        enabled: false,
        ..CacheConfig::with_root(dir.path())
    };
    let engine = CacheEngine::open(&config).await;
    assert!(engine.cache().is_none());
    assert!(!engine.put("diff", "review", None).await);
    assert_eq!(engine.clear().await.unwrap().entries, 0);
}
