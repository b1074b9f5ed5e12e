//! Driftnet main entry point
//!
//! This is the command-line interface for the driftnet crawler.

use clap::Parser;
use driftnet::config::load_config_with_hash;
use driftnet::crawl;
use driftnet::sink::Sink;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Driftnet: a queue-driven crawler for rate-limited content APIs
///
/// Driftnet continuously discovers content by diffing container listings,
/// fetches and persists records through a durable job queue, and scores a
/// random sample through an external classification service.
#[derive(Parser, Debug)]
#[command(name = "driftnet")]
#[command(version = "1.0.0")]
#[command(about = "A queue-driven crawler for rate-limited content APIs", long_about = None)]
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

    /// Enqueue cold-start discovery jobs for every configured unit and exit
    #[arg(long, conflicts_with_all = ["dry_run", "stats"])]
    seed: bool,

    /// Validate config and show what would be crawled without crawling
    #[arg(long, conflicts_with_all = ["seed", "stats"])]
    dry_run: bool,

    /// Show record and ledger statistics and exit
    #[arg(long, conflicts_with_all = ["seed", "dry_run"])]
    stats: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, _config_hash) = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    // Handle different modes
    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.seed {
        handle_seed(&config)?;
    } else if cli.stats {
        handle_stats(&config)?;
    } else {
        handle_run(config).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("driftnet=info,warn"),
            1 => EnvFilter::new("driftnet=debug,info"),
            2 => EnvFilter::new("driftnet=trace,debug"),
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

/// Handles the --dry-run mode: validates config and shows the crawl plan
fn handle_dry_run(config: &driftnet::config::Config) {
    println!("=== Driftnet Dry Run ===\n");

    println!("Crawl settings:");
    println!("  Post limit per sweep: {}", config.crawl.post_limit);
    println!("  Max retry attempts: {}", config.crawl.max_retry_attempts);
    println!(
        "  Discovery interval: {} minutes",
        config.crawl.discovery_interval_minutes
    );
    println!(
        "  Retry interval: {} minutes",
        config.crawl.retry_interval_minutes
    );
    println!("  Worker slots: {}", config.crawl.concurrency);

    println!("\nSource API:");
    println!("  Base URL: {}", config.source.api_base_url);
    println!("  User agent: {}", config.source.user_agent);

    println!("\nEnrichment:");
    println!("  Endpoint: {}", config.enrichment.api_url);
    println!("  Sample rate: {}", config.enrichment.sample_rate);

    println!("\nDatabases:");
    println!("  Queue: {}", config.queue.database_path);
    println!("  Store: {}", config.store.database_path);

    println!("\nSource units ({}):", config.units.len());
    for unit in &config.units {
        println!("  - {}", unit);
    }

    println!("\n✓ Configuration is valid");
    println!("✓ Would crawl {} source units", config.units.len());
}

/// Handles the --seed mode: pushes cold-start jobs onto the queue
fn handle_seed(config: &driftnet::config::Config) -> Result<(), Box<dyn std::error::Error>> {
    let (queue, _sink) = crawl::open_stores(config)?;

    {
        let mut queue = queue.lock().map_err(|_| "queue lock poisoned")?;
        crawl::seed_jobs(&mut queue, config)?;
    }

    println!(
        "✓ Seeded discovery jobs for {} units (plus the first retry sweep)",
        config.units.len()
    );
    Ok(())
}

/// Handles the --stats mode: shows record and ledger counts
fn handle_stats(config: &driftnet::config::Config) -> Result<(), Box<dyn std::error::Error>> {
    let (queue, sink) = crawl::open_stores(config)?;
    let queue = queue.lock().map_err(|_| "queue lock poisoned")?;
    let sink = sink.lock().map_err(|_| "store lock poisoned")?;

    println!("Store: {}\n", config.store.database_path);

    println!("Records: {}", sink.count_records()?);
    for unit in &config.units {
        println!("  {}: {}", unit, sink.count_records_for_unit(unit)?);
    }

    println!("\nFailed-fetch ledger: {}", sink.count_fetch_failures()?);
    println!(
        "  frozen for triage (>= {} attempts): {}",
        config.crawl.max_retry_attempts,
        sink.count_frozen_failures(config.crawl.max_retry_attempts)?
    );
    println!(
        "Failed-enrichment ledger: {}",
        sink.count_enrichment_failures()?
    );

    println!("\nQueue: {}", config.queue.database_path);
    for name in [crawl::QUEUE_DISCOVER, crawl::QUEUE_FETCH, crawl::QUEUE_RETRY] {
        println!("  {}: {} pending", name, queue.pending_count(name)?);
    }

    Ok(())
}

/// Handles the main crawl operation
async fn handle_run(config: driftnet::config::Config) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(
        "Starting crawler: {} units, {} worker slots",
        config.units.len(),
        config.crawl.concurrency
    );

    match crawl::run(config).await {
        Ok(()) => {
            tracing::info!("Crawler exited");
            Ok(())
        }
        Err(e) => {
            tracing::error!("Crawler failed: {}", e);
            Err(e.into())
        }
    }
}
