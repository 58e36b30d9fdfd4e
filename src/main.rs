//! Sumi-Trawl main entry point
//!
//! This is the command-line interface for the Sumi-Trawl search aggregator.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use sumi_trawl::config::{load_config_with_hash, Config};
use sumi_trawl::crawler::crawl;
use sumi_trawl::indexer::{DefinitionSource, DirectorySource, Indexer, IndexerScope};
use sumi_trawl::watch::watch;
use sumi_trawl::{Query, ResultItem};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Sumi-Trawl: a declarative multi-site search aggregator
///
/// Sumi-Trawl logs into the sites described by its definition files, searches
/// them concurrently and reports which results are new since the last run.
#[derive(Parser, Debug)]
#[command(name = "sumi-trawl")]
#[command(version = "1.0.0")]
#[command(about = "A declarative multi-site search aggregator", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Search keywords
    #[arg(value_name = "KEYWORDS")]
    keywords: Vec<String>,

    /// Sites to search: "all" or a comma-separated list of definition names
    #[arg(short, long, default_value = "all")]
    sites: String,

    /// Only return results in these global categories
    #[arg(short, long)]
    category: Vec<String>,

    /// Stop after this many results
    #[arg(short, long)]
    limit: Option<usize>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// List the available site definitions and exit
    #[arg(long, conflicts_with_all = ["check", "watch"])]
    list: bool,

    /// Log into the selected sites and load their base pages, then exit
    #[arg(long, conflicts_with_all = ["list", "watch"])]
    check: bool,

    /// Poll the selected sites every SECS seconds and print new results
    #[arg(long, value_name = "SECS", conflicts_with_all = ["list", "check"])]
    watch: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", hash);

    let mut query = Query::new(cli.keywords.join(" ")).with_categories(cli.category.clone());
    if let Some(limit) = cli.limit {
        query = query.with_limit(limit);
    }

    if cli.list {
        handle_list(&config)
    } else if cli.check {
        handle_check(config, &cli.sites).await
    } else if let Some(seconds) = cli.watch {
        handle_watch(config, &cli.sites, query, Duration::from_secs(seconds)).await
    } else {
        handle_search(config, &cli.sites, query).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_trawl=info,warn"),
            1 => EnvFilter::new("sumi_trawl=debug,info"),
            2 => EnvFilter::new("sumi_trawl=trace,debug"),
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

/// Cancels the returned token on Ctrl-C
fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, stopping");
            token.cancel();
        }
    });
    cancel
}

fn print_item(item: &ResultItem) {
    let marker = if item.is_new {
        "new"
    } else if item.is_update {
        "upd"
    } else {
        "   "
    };
    println!(
        "{} [{}] {}  {}",
        marker,
        item.site,
        item.title,
        item.link.as_deref().unwrap_or("-")
    );
}

/// Handles the --list mode: prints every site definition
fn handle_list(config: &Config) -> anyhow::Result<()> {
    let source = DirectorySource::new(&config.definitions.directory);
    let names = source.list(None)?;

    println!("=== Site definitions ({}) ===\n", names.len());
    for name in names {
        match source.load(&name) {
            Ok(definition) => println!(
                "  {:<20} {}{}",
                name,
                definition.display_name(),
                if definition.has_login() { " (login)" } else { "" }
            ),
            Err(e) => println!("  {:<20} ✗ {}", name, e),
        }
    }
    Ok(())
}

/// Handles the --check mode: health-checks the selected sites
async fn handle_check(config: Config, sites: &str) -> anyhow::Result<()> {
    let scope = IndexerScope::from_config(config)?;
    let mut failed = 0;

    for indexer in scope.lookup(Some(sites))? {
        match indexer.check().await {
            Ok(()) => println!("✓ {}", indexer.id()),
            Err(e) => {
                failed += 1;
                println!("✗ {}: {}", indexer.id(), e);
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} site(s) failed the health check", failed);
    }
    Ok(())
}

/// Handles the main search operation
async fn handle_search(config: Config, sites: &str, query: Query) -> anyhow::Result<()> {
    tracing::info!("Searching {} for '{}'", sites, query.keywords);

    let summary = crawl(config, Some(sites), query, cancel_on_interrupt()).await?;
    for item in &summary.items {
        print_item(item);
    }

    let new = summary.items.iter().filter(|i| i.is_new).count();
    tracing::info!(
        "Search completed: {} results ({} new) from {} pages",
        summary.items.len(),
        new,
        summary.pages
    );
    for (site, e) in &summary.failures {
        tracing::warn!("{}: {}", site, e);
    }

    if summary.items.is_empty() && summary.failures.iter().any(|(_, e)| e.is_login_error()) {
        anyhow::bail!("login failed");
    }
    Ok(())
}

/// Handles the --watch mode: polls the selected sites until interrupted
async fn handle_watch(
    config: Config,
    sites: &str,
    query: Query,
    interval: Duration,
) -> anyhow::Result<()> {
    let scope = IndexerScope::from_config(config)?;
    let aggregate = scope.aggregate(Some(sites))?;

    let summary = watch(&aggregate, &query, interval, cancel_on_interrupt(), |item| {
        print_item(&item)
    })
    .await?;

    if let Some(storage) = scope.storage() {
        storage.close()?;
    }
    tracing::info!(
        "Watch finished: {} polls, {} results forwarded",
        summary.polls,
        summary.forwarded
    );
    Ok(())
}
