//! Clap argument types and config overrides.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use revcache::config::CacheConfig;

/// Content-addressed cache for AI code review results.
#[derive(Parser, Debug)]
#[command(
    name = "revcache",
    version = revcache::constants::VERSION,
    about = super::ABOUT_STYLED,
)]
pub struct Cli {
    /// Cache storage root (overrides config and REVCACHE_DIR).
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Size budget for the on-disk cache, in bytes.
    #[arg(long, global = true)]
    pub max_bytes: Option<u64>,

    /// Run without caching: every lookup misses and writes are dropped.
    #[arg(long, global = true, default_value_t = false)]
    pub no_cache: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Apply CLI flags on top of the loaded cache config (highest priority).
    pub fn apply_overrides(&self, config: &mut CacheConfig) {
        if let Some(ref dir) = self.cache_dir {
            config.root = Some(dir.clone());
        }
        if let Some(bytes) = self.max_bytes {
            config.max_total_bytes = bytes;
        }
        if self.no_cache {
            config.enabled = false;
        }
    }
}

/// Available commands.
#[derive(clap::Subcommand, Debug)]
pub enum Command {
    /// Print the cached review for some content.
    Get(GetArgs),

    /// Cache a review result for some content.
    Set(SetArgs),

    /// Look up several content files at once.
    BatchGet(BatchGetArgs),

    /// Show cache statistics (entry count and size).
    Stats(StatsArgs),

    /// Print the cache directory path.
    Path,

    /// Remove all cached review results.
    Clear,

    /// Evict expired, idle and over-budget entries now.
    Sweep,

    /// Print version and build information.
    Version,
}

/// Arguments for the `get` subcommand.
#[derive(Parser, Debug)]
pub struct GetArgs {
    /// File holding the content (a diff), or `-` for stdin.
    pub input: PathBuf,

    /// Print the full entry as JSON instead of just the value.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

/// Arguments for the `set` subcommand.
#[derive(Parser, Debug)]
pub struct SetArgs {
    /// File holding the content (a diff), or `-` for stdin.
    pub input: PathBuf,

    /// Review result to cache.
    #[arg(long, conflicts_with = "value_file", required_unless_present = "value_file")]
    pub value: Option<String>,

    /// Read the review result from a file.
    #[arg(long)]
    pub value_file: Option<PathBuf>,

    /// Seconds until the entry expires.
    #[arg(long, default_value_t = revcache::constants::DEFAULT_CLI_TTL_SECS)]
    pub ttl_secs: u64,

    /// Store without an expiry.
    #[arg(long, default_value_t = false, conflicts_with = "ttl_secs")]
    pub no_expiry: bool,
}

/// Arguments for the `batch-get` subcommand.
#[derive(Parser, Debug)]
pub struct BatchGetArgs {
    /// Files holding content to look up.
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,
}

/// Arguments for the `stats` subcommand.
#[derive(Parser, Debug)]
pub struct StatsArgs {
    /// Output format.
    #[arg(long, default_value = "text")]
    pub format: OutputFormat,
}

/// Output format for machine-readable commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_set_with_value() {
        let cli = Cli::parse_from(["revcache", "set", "change.diff", "--value", "LGTM"]);
        match cli.command {
            Command::Set(args) => {
                assert_eq!(args.input, PathBuf::from("change.diff"));
                assert_eq!(args.value.as_deref(), Some("LGTM"));
                assert_eq!(args.ttl_secs, revcache::constants::DEFAULT_CLI_TTL_SECS);
                assert!(!args.no_expiry);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn set_requires_a_value() {
        assert!(Cli::try_parse_from(["revcache", "set", "change.diff"]).is_err());
    }

    #[test]
    fn value_and_value_file_conflict() {
        let parsed = Cli::try_parse_from([
            "revcache", "set", "x", "--value", "a", "--value-file", "b",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn global_flags_override_config() {
        let cli = Cli::parse_from([
            "revcache", "stats", "--cache-dir", "/tmp/rc", "--max-bytes", "4096", "--no-cache",
        ]);
        let mut config = CacheConfig::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.root, Some(PathBuf::from("/tmp/rc")));
        assert_eq!(config.max_total_bytes, 4096);
        assert!(!config.enabled);
    }

    #[test]
    fn stats_format_json() {
        let cli = Cli::parse_from(["revcache", "stats", "--format", "json"]);
        match cli.command {
            Command::Stats(args) => assert_eq!(args.format, OutputFormat::Json),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn batch_get_needs_inputs() {
        assert!(Cli::try_parse_from(["revcache", "batch-get"]).is_err());
    }
}
