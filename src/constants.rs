//! App-wide constants.
//!
//! Centralises the tool name, config paths, environment variable names,
//! and default cache limits so a rename only requires changing this file.

/// Display name of the tool (lowercase).
pub const APP_NAME: &str = "revcache";

/// Crate version, as reported by `revcache version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Target triple the binary was built for.
pub const TARGET: &str = env!("TARGET");

/// Local config filename (e.g. `.revcache.toml` in the working directory).
pub const CONFIG_FILENAME: &str = ".revcache.toml";

/// Directory name under `~/.config/` and `~/.cache/`.
pub const CONFIG_DIR: &str = "revcache";

/// File extension of persisted entries.
pub const ENTRY_EXTENSION: &str = "json";

// ── Default limits ──────────────────────────────────────────────────

pub const DEFAULT_MEMORY_CAPACITY: usize = 100;
pub const DEFAULT_MAX_ENTRY_BYTES: u64 = 5 * 1024 * 1024;
pub const DEFAULT_MAX_TOTAL_BYTES: u64 = 100 * 1024 * 1024;
pub const DEFAULT_SHARD_COUNT: usize = 16;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60 * 60;
pub const DEFAULT_MAX_IDLE_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_BATCH_CONCURRENCY: usize = 10;
pub const DEFAULT_IO_TIMEOUT_SECS: u64 = 30;

/// TTL the CLI applies to `set` when none is given.
pub const DEFAULT_CLI_TTL_SECS: u64 = 24 * 60 * 60;

// ── Environment variable names ──────────────────────────────────────

pub const ENV_CACHE_DIR: &str = "REVCACHE_DIR";
pub const ENV_MAX_BYTES: &str = "REVCACHE_MAX_BYTES";
pub const ENV_MEMORY_CAPACITY: &str = "REVCACHE_MEMORY_CAPACITY";
pub const ENV_DISABLED: &str = "REVCACHE_DISABLED";
pub const ENV_LOG: &str = "REVCACHE_LOG";
