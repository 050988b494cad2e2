//! revcache: content-addressed cache for AI code review results.
//!
//! Entry point and error handling boundary. Uses `anyhow` for
//! ergonomic error propagation and user-facing messages.

mod cli;

use revcache::cache;
use revcache::config;
use revcache::constants;
use revcache::env;

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use cache::{CacheEngine, ReviewCache};
use cli::args::{BatchGetArgs, Cli, Command, GetArgs, OutputFormat, SetArgs, StatsArgs};
use config::{CacheConfig, Config};
use env::Env;

/// Exit code for a cache miss on `get`.
const EXIT_MISS: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    match run().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(constants::ENV_LOG).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run() -> Result<ExitCode> {
    let cli = Cli::parse();

    if let Command::Version = cli.command {
        run_version();
        return Ok(ExitCode::SUCCESS);
    }

    let cwd = std::env::current_dir().ok();
    let mut config = Config::load(cwd.as_deref(), &Env::real())
        .context("failed to load configuration")?
        .cache;
    cli.apply_overrides(&mut config);

    let engine = CacheEngine::open(&config).await;
    let code = match cli.command {
        Command::Get(args) => run_get(&engine, args).await?,
        Command::Set(args) => run_set(&engine, args).await?,
        Command::BatchGet(args) => run_batch_get(&engine, args).await?,
        Command::Stats(args) => run_stats(&engine, &config, args).await?,
        Command::Path => run_path(&engine, &config)?,
        Command::Clear => run_clear(&engine).await?,
        Command::Sweep => run_sweep(&engine).await?,
        Command::Version => unreachable!("handled above"),
    };
    engine.stop().await;
    Ok(code)
}

/// Print detailed version and build information.
fn run_version() {
    println!("{} {}", constants::APP_NAME.bold(), constants::VERSION.green().bold());
    println!("{}     {}", "target:".dimmed(), constants::TARGET);
}

/// The enabled cache, or an error explaining why there is none.
fn require_cache(engine: &CacheEngine) -> Result<&ReviewCache> {
    match engine.cache() {
        Some(cache) => Ok(cache),
        None => bail!("caching is disabled (see warnings above, --no-cache, or {})", constants::ENV_DISABLED),
    }
}

/// Print the cached review for some content.
async fn run_get(engine: &CacheEngine, args: GetArgs) -> Result<ExitCode> {
    let content = cli::read_input(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;

    let Some(cache) = engine.cache() else {
        eprintln!("Caching is disabled.");
        return Ok(ExitCode::from(EXIT_MISS));
    };

    match cache.get(&content).await.context("cache lookup failed")? {
        Some(entry) if args.json => {
            println!("{}", serde_json::to_string_pretty(&entry)?);
            Ok(ExitCode::SUCCESS)
        }
        Some(entry) => {
            println!("{}", entry.value);
            Ok(ExitCode::SUCCESS)
        }
        None => {
            eprintln!("No cached review for {}.", cache.fingerprint(&content));
            Ok(ExitCode::from(EXIT_MISS))
        }
    }
}

/// Cache a review result for some content.
async fn run_set(engine: &CacheEngine, args: SetArgs) -> Result<ExitCode> {
    let cache = require_cache(engine)?;
    let content = cli::read_input(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;

    let value = match (args.value, args.value_file) {
        (Some(value), _) => value,
        (None, Some(path)) => tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?,
        (None, None) => bail!("one of --value or --value-file is required"),
    };

    let expiry = (!args.no_expiry).then(|| Duration::from_secs(args.ttl_secs));
    cache
        .set(&content, value, expiry)
        .await
        .context("failed to cache review")?;

    println!(
        "  {} cached {}",
        "✔".green().bold(),
        cache.fingerprint(&content).to_string().dimmed(),
    );
    Ok(ExitCode::SUCCESS)
}

/// Look up several content files at once.
async fn run_batch_get(engine: &CacheEngine, args: BatchGetArgs) -> Result<ExitCode> {
    let mut contents = Vec::with_capacity(args.inputs.len());
    for path in &args.inputs {
        let content = cli::read_input(path).with_context(|| format!("failed to read {}", path.display()))?;
        contents.push(content);
    }

    let hits = engine.get_many(contents.iter().map(Vec::as_slice)).await;
    for (path, content) in args.inputs.iter().zip(&contents) {
        match hits.get(content.as_slice()) {
            Some(_) => println!("  {} {}", "hit ".green().bold(), path.display()),
            None => println!("  {} {}", "miss".yellow().bold(), path.display()),
        }
    }
    println!("{} of {} cached.", hits.len(), args.inputs.len());
    Ok(ExitCode::SUCCESS)
}

/// Show cache statistics.
async fn run_stats(engine: &CacheEngine, config: &CacheConfig, args: StatsArgs) -> Result<ExitCode> {
    let stats = engine.stats().await.context("failed to read cache stats")?;
    let memory = engine.cache().map(ReviewCache::memory_len).unwrap_or(0);

    match args.format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "enabled": engine.is_enabled(),
                "entries": stats.entries,
                "total_bytes": stats.total_bytes,
                "max_total_bytes": config.max_total_bytes,
                "memory_entries": memory,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            println!("Cache entries: {}", stats.entries);
            println!("Cache size:    {}", stats.human_size());
            println!(
                "Budget:        {}",
                cache::CacheStats { entries: 0, total_bytes: config.max_total_bytes }.human_size()
            );
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Print the cache directory path.
fn run_path(engine: &CacheEngine, config: &CacheConfig) -> Result<ExitCode> {
    match engine.path() {
        Some(p) => println!("{}", p.display()),
        None => {
            let root = config
                .resolved_root()
                .context("cache directory could not be determined")?;
            println!("{}", root.display());
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Remove all cached entries.
async fn run_clear(engine: &CacheEngine) -> Result<ExitCode> {
    let stats = engine.clear().await.context("failed to clear cache")?;
    println!(
        "Cleared {} cached entry/entries ({}).",
        stats.entries,
        stats.human_size(),
    );
    Ok(ExitCode::SUCCESS)
}

/// Run an eviction sweep now.
async fn run_sweep(engine: &CacheEngine) -> Result<ExitCode> {
    let cache = require_cache(engine)?;
    let report = cache.sweep_now().await.context("cache sweep failed")?;
    println!(
        "Removed {} entry/entries: {} expired, {} idle, {} over budget ({} freed).",
        report.removed(),
        report.expired,
        report.idle,
        report.evicted_for_size,
        cache::CacheStats { entries: 0, total_bytes: report.bytes_freed }.human_size(),
    );
    Ok(ExitCode::SUCCESS)
}
