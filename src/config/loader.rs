//! Config struct and loading logic.
//!
//! Priority (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables
//! 3. `.revcache.toml` in the working directory
//! 4. `~/.config/revcache/config.toml` (global defaults)
//! 5. Built-in defaults

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::constants;
use crate::env::Env;

/// Errors during config loading and validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ParseFile {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("cache root {path} is not usable: {source}")]
    Root {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("no cache directory could be determined; set {}", constants::ENV_CACHE_DIR)]
    NoRoot,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
}

/// Cache limits and storage location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether caching is enabled at all.
    pub enabled: bool,
    /// Storage root. `None` resolves to the platform cache directory.
    pub root: Option<PathBuf>,
    /// Maximum entries held in the memory tier.
    pub memory_capacity: usize,
    /// Largest value accepted by a single `set`.
    pub max_entry_bytes: u64,
    /// Size budget for the persistent tier.
    pub max_total_bytes: u64,
    /// Number of shard subdirectories (1..=256).
    pub shard_count: usize,
    pub sweep_interval_secs: u64,
    /// Entries unread for this long are swept.
    pub max_idle_secs: u64,
    /// Expiry applied when `set` is given none.
    pub default_ttl_secs: Option<u64>,
    /// Concurrent workers per batch operation.
    pub batch_concurrency: usize,
    /// Upper bound for a single disk operation.
    pub io_timeout_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            root: None,
            memory_capacity: constants::DEFAULT_MEMORY_CAPACITY,
            max_entry_bytes: constants::DEFAULT_MAX_ENTRY_BYTES,
            max_total_bytes: constants::DEFAULT_MAX_TOTAL_BYTES,
            shard_count: constants::DEFAULT_SHARD_COUNT,
            sweep_interval_secs: constants::DEFAULT_SWEEP_INTERVAL_SECS,
            max_idle_secs: constants::DEFAULT_MAX_IDLE_SECS,
            default_ttl_secs: None,
            batch_concurrency: constants::DEFAULT_BATCH_CONCURRENCY,
            io_timeout_secs: constants::DEFAULT_IO_TIMEOUT_SECS,
        }
    }
}

impl CacheConfig {
    /// Defaults with an explicit storage root.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
            ..Self::default()
        }
    }

    /// Resolve the storage root, falling back to `~/.cache/revcache`.
    pub fn resolved_root(&self) -> Result<PathBuf, ConfigError> {
        match &self.root {
            Some(root) => Ok(root.clone()),
            None => dirs::cache_dir()
                .map(|d| d.join(constants::CONFIG_DIR))
                .ok_or(ConfigError::NoRoot),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn max_idle(&self) -> Duration {
        Duration::from_secs(self.max_idle_secs)
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl_secs.map(Duration::from_secs)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }

    /// Reject limits the cache cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: impl Into<String>) -> Result<(), ConfigError> {
            Err(ConfigError::Invalid {
                field,
                reason: reason.into(),
            })
        }

        if self.memory_capacity == 0 {
            return invalid("memory_capacity", "must be at least 1");
        }
        if self.max_total_bytes == 0 {
            return invalid("max_total_bytes", "must be at least 1");
        }
        if self.max_entry_bytes == 0 {
            return invalid("max_entry_bytes", "must be at least 1");
        }
        if self.max_entry_bytes > self.max_total_bytes {
            return invalid(
                "max_entry_bytes",
                format!("{} exceeds max_total_bytes ({})", self.max_entry_bytes, self.max_total_bytes),
            );
        }
        if !(1..=256).contains(&self.shard_count) {
            return invalid("shard_count", format!("{} is outside 1..=256", self.shard_count));
        }
        if self.sweep_interval_secs == 0 {
            return invalid("sweep_interval_secs", "must be at least 1");
        }
        if self.max_idle_secs == 0 {
            return invalid("max_idle_secs", "must be at least 1");
        }
        if self.default_ttl_secs == Some(0) {
            return invalid("default_ttl_secs", "must be at least 1 when set");
        }
        if self.batch_concurrency == 0 {
            return invalid("batch_concurrency", "must be at least 1");
        }
        if self.io_timeout_secs == 0 {
            return invalid("io_timeout_secs", "must be at least 1");
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration with proper layering.
    ///
    /// Reads from global config, working-directory config, then applies
    /// environment variable overrides.
    pub fn load(work_dir: Option<&Path>, env: &Env) -> Result<Self, ConfigError> {
        let global = Self::global_config_path();
        Self::load_from(global.as_deref(), work_dir, env)
    }

    /// Same as [`Config::load`] with an explicit global config path.
    pub fn load_from(global: Option<&Path>, work_dir: Option<&Path>, env: &Env) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        // Layer 4: global config
        if let Some(global_path) = global {
            if global_path.exists() {
                let global = Self::load_file(global_path)?;
                config.merge(global);
            }
        }

        // Layer 3: local config
        if let Some(dir) = work_dir {
            let local_path = dir.join(constants::CONFIG_FILENAME);
            if local_path.exists() {
                let local = Self::load_file(&local_path)?;
                config.merge(local);
            }
        }

        // Layer 2: environment variables
        config.apply_env_vars(env);

        Ok(config)
    }

    /// Load a config from a specific file.
    fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::ParseFile {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Get the global config file path.
    fn global_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(constants::CONFIG_DIR).join("config.toml"))
    }

    /// Merge another config into this one (other takes precedence for non-default values).
    fn merge(&mut self, other: Config) {
        let default = CacheConfig::default();
        let mine = &mut self.cache;
        let theirs = other.cache;

        // Disabled overrides enabled
        if !theirs.enabled {
            mine.enabled = false;
        }
        if theirs.root.is_some() {
            mine.root = theirs.root;
        }
        if theirs.memory_capacity != default.memory_capacity {
            mine.memory_capacity = theirs.memory_capacity;
        }
        if theirs.max_entry_bytes != default.max_entry_bytes {
            mine.max_entry_bytes = theirs.max_entry_bytes;
        }
        if theirs.max_total_bytes != default.max_total_bytes {
            mine.max_total_bytes = theirs.max_total_bytes;
        }
        if theirs.shard_count != default.shard_count {
            mine.shard_count = theirs.shard_count;
        }
        if theirs.sweep_interval_secs != default.sweep_interval_secs {
            mine.sweep_interval_secs = theirs.sweep_interval_secs;
        }
        if theirs.max_idle_secs != default.max_idle_secs {
            mine.max_idle_secs = theirs.max_idle_secs;
        }
        if theirs.default_ttl_secs.is_some() {
            mine.default_ttl_secs = theirs.default_ttl_secs;
        }
        if theirs.batch_concurrency != default.batch_concurrency {
            mine.batch_concurrency = theirs.batch_concurrency;
        }
        if theirs.io_timeout_secs != default.io_timeout_secs {
            mine.io_timeout_secs = theirs.io_timeout_secs;
        }
    }

    /// Apply environment variable overrides.
    fn apply_env_vars(&mut self, env: &Env) {
        if let Ok(val) = env.var(constants::ENV_CACHE_DIR) {
            if !val.trim().is_empty() {
                self.cache.root = Some(PathBuf::from(val));
            }
        }
        if let Some(bytes) = env.parsed::<u64>(constants::ENV_MAX_BYTES) {
            self.cache.max_total_bytes = bytes;
        }
        if let Some(capacity) = env.parsed::<usize>(constants::ENV_MEMORY_CAPACITY) {
            self.cache.memory_capacity = capacity;
        }
        if env.flag(constants::ENV_DISABLED) {
            self.cache.enabled = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn no_env() -> Env {
        Env::mock(Vec::<(&str, &str)>::new())
    }

    #[test]
    fn defaults_are_valid() {
        let config = CacheConfig::default();
        config.validate().unwrap();
        assert_eq!(config.memory_capacity, 100);
        assert_eq!(config.max_total_bytes, 100 * 1024 * 1024);
        assert_eq!(config.shard_count, 16);
        assert_eq!(config.max_idle(), Duration::from_secs(86400));
    }

    #[test]
    fn validate_rejects_bad_limits() {
        let cases: Vec<(&str, CacheConfig)> = vec![
            ("memory_capacity", CacheConfig { memory_capacity: 0, ..Default::default() }),
            ("shard_count", CacheConfig { shard_count: 0, ..Default::default() }),
            ("shard_count", CacheConfig { shard_count: 300, ..Default::default() }),
            ("batch_concurrency", CacheConfig { batch_concurrency: 0, ..Default::default() }),
            ("default_ttl_secs", CacheConfig { default_ttl_secs: Some(0), ..Default::default() }),
            (
                "max_entry_bytes",
                CacheConfig { max_entry_bytes: 10, max_total_bytes: 5, ..Default::default() },
            ),
        ];
        for (field, config) in cases {
            match config.validate() {
                Err(ConfigError::Invalid { field: f, .. }) => assert_eq!(f, field),
                other => panic!("expected invalid {field}, got {other:?}"),
            }
        }
    }

    #[test]
    fn load_without_files_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(None, Some(dir.path()), &no_env()).unwrap();
        assert_eq!(config.cache, CacheConfig::default());
    }

    #[test]
    fn local_file_overrides_global() {
        let dir = tempfile::tempdir().unwrap();
        let global = dir.path().join("global.toml");
        std::fs::write(&global, "[cache]\nmemory_capacity = 5\nshard_count = 4\n").unwrap();
        std::fs::write(
            dir.path().join(constants::CONFIG_FILENAME),
            "[cache]\nmemory_capacity = 7\ndefault_ttl_secs = 60\n",
        )
        .unwrap();

        let config = Config::load_from(Some(&global), Some(dir.path()), &no_env()).unwrap();
        assert_eq!(config.cache.memory_capacity, 7);
        assert_eq!(config.cache.shard_count, 4);
        assert_eq!(config.cache.default_ttl(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn env_overrides_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(constants::CONFIG_FILENAME),
            "[cache]\nroot = \"/from/file\"\nmax_total_bytes = 1000\n",
        )
        .unwrap();
        let env = Env::mock([
            (constants::ENV_CACHE_DIR, "/from/env"),
            (constants::ENV_MAX_BYTES, "2048"),
            (constants::ENV_MEMORY_CAPACITY, "not-a-number"),
        ]);

        let config = Config::load_from(None, Some(dir.path()), &env).unwrap();
        assert_eq!(config.cache.root, Some(PathBuf::from("/from/env")));
        assert_eq!(config.cache.max_total_bytes, 2048);
        assert_eq!(config.cache.memory_capacity, 100);
    }

    #[test]
    fn disabled_flag_from_env() {
        let env = Env::mock([(constants::ENV_DISABLED, "true")]);
        let config = Config::load_from(None, None, &env).unwrap();
        assert!(!config.cache.enabled);
    }

    #[test]
    fn parse_error_names_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(constants::CONFIG_FILENAME), "[cache\n").unwrap();
        let err = Config::load_from(None, Some(dir.path()), &no_env()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseFile { .. }));
        assert!(err.to_string().contains(constants::CONFIG_FILENAME));
    }

    #[test]
    fn explicit_root_resolves() {
        let config = CacheConfig::with_root("/tmp/revcache-test");
        assert_eq!(config.resolved_root().unwrap(), PathBuf::from("/tmp/revcache-test"));
    }
}
