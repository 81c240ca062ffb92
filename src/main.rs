//! Parsonic main entry point
//!
//! This is the command-line interface for the Parsonic business record crawler.

use anyhow::Context;
use clap::Parser;
use parsonic::config::{load_config_with_hash, Config};
use parsonic::crawler::{crawl, CancelSignal, StartMode};
use parsonic::output::{export_json_lines, load_statistics, print_run_summary, print_statistics};
use parsonic::storage::{RecordFilter, SqliteStorage};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Parsonic: a selector-driven business record crawler
///
/// Parsonic crawls listing and detail pages, extracts business records with
/// CSS selectors, optionally asks a local model for new selectors, and keeps
/// a deduplicated record store that survives interruption.
#[derive(Parser, Debug)]
#[command(name = "parsonic")]
#[command(version = "1.0.0")]
#[command(about = "A selector-driven business record crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Resume an interrupted crawl (default behavior)
    #[arg(long, conflicts_with = "fresh")]
    resume: bool,

    /// Start a fresh crawl, discarding the checkpointed frontier
    #[arg(long, conflicts_with = "resume")]
    fresh: bool,

    /// Validate config and show what would be crawled without crawling
    #[arg(long, conflicts_with_all = ["stats", "export"])]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with_all = ["dry_run", "export"])]
    stats: bool,

    /// Write persisted records as JSON Lines to PATH and exit
    #[arg(long, value_name = "PATH", conflicts_with_all = ["dry_run", "stats"])]
    export: Option<PathBuf>,

    /// Only export records of this page type
    #[arg(long, requires = "export")]
    page_type: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config)?;
    } else if let Some(path) = &cli.export {
        handle_export(&config, path, cli.page_type.clone())?;
    } else {
        let mode = if cli.fresh {
            StartMode::Fresh
        } else {
            StartMode::Resume
        };
        handle_crawl(&config, &config_hash, mode).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("parsonic=info,warn"),
            1 => EnvFilter::new("parsonic=debug,info"),
            2 => EnvFilter::new("parsonic=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: shows what would be crawled
fn handle_dry_run(config: &Config) {
    println!("=== Parsonic Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  Max depth: {}", config.crawler.max_depth);
    println!("  Concurrency: {}", config.crawler.concurrency);
    println!("  Max attempts: {}", config.crawler.max_attempts);
    println!(
        "  Retry backoff: {}ms..{}ms",
        config.crawler.base_retry_delay_ms, config.crawler.max_retry_delay_ms
    );
    println!("  Same domain only: {}", config.crawler.same_domain_only);
    println!("  Respect robots.txt: {}", config.crawler.respect_robots_txt);

    println!("\nRate Limit:");
    println!(
        "  {} req/s, burst {}",
        config.rate_limit.requests_per_second, config.rate_limit.burst
    );
    println!("  Adaptive: {}", config.rate_limit.adaptive);
    println!("  Stealth: {}", config.rate_limit.stealth);

    println!("\nFetcher:");
    println!("  Timeout: {}s", config.fetcher.timeout_secs);
    println!(
        "  Proxies: {} (rotate: {})",
        config.fetcher.proxies.len(),
        config.fetcher.rotate_proxies
    );

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);

    println!("\nSeeds ({}):", config.seeds.len());
    for seed in &config.seeds {
        println!("  - {} ({})", seed, config.crawler.seed_page_type);
    }

    println!("\nPage Types ({}):", config.page_types.len());
    for page_type in &config.page_types {
        println!(
            "  - {}: {} fields, {} link selectors",
            page_type.name,
            page_type.fields.len(),
            page_type.links.len()
        );
        for (field, candidates) in &page_type.fields {
            println!("    * {} ({} candidates)", field, candidates.len());
        }
        for link in &page_type.links {
            println!("    > {} [{}]", link.css, link.kind.as_str());
        }
    }

    println!("\nAI Proposer:");
    if config.ai.enabled {
        println!("  Model: {} at {}", config.ai.model, config.ai.host);
        println!("  Min confidence: {}", config.ai.min_confidence);
        println!("  Thermal gate: {}", config.thermal.enabled);
    } else {
        println!("  Disabled");
    }

    println!("\n✓ Configuration is valid");
    println!(
        "✓ Would start crawling with {} seed URLs",
        config.seeds.len()
    );
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);

    let storage = SqliteStorage::new(Path::new(&config.output.database_path))?;
    let stats = load_statistics(&storage)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the --export mode: writes records as JSON Lines
fn handle_export(config: &Config, path: &Path, page_type: Option<String>) -> anyhow::Result<()> {
    let storage = SqliteStorage::new(Path::new(&config.output.database_path))?;
    let file = File::create(path).with_context(|| format!("cannot create {}", path.display()))?;

    let filter = RecordFilter {
        page_type,
        ..RecordFilter::default()
    };
    let written = export_json_lines(&storage, filter, BufWriter::new(file))?;

    println!("✓ Exported {} records to: {}", written, path.display());
    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: &Config, config_hash: &str, mode: StartMode) -> anyhow::Result<()> {
    match mode {
        StartMode::Fresh => tracing::info!("Starting fresh crawl (discarding previous frontier)"),
        StartMode::Resume => {
            tracing::info!("Starting crawl (will resume if an interrupted run exists)")
        }
    }
    tracing::info!(
        "Seeds: {}, page types: {}, workers: {}",
        config.seeds.len(),
        config.page_types.len(),
        config.crawler.concurrency
    );

    let cancel = CancelSignal::new();
    let on_interrupt = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, checkpointing and stopping");
            on_interrupt.cancel();
        }
    });

    let result = crawl(config, config_hash, mode, cancel).await;
    interrupt.abort();

    match result {
        Ok(summary) => {
            tracing::info!("Crawl finished");
            print_run_summary(&summary);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            Err(e.into())
        }
    }
}
