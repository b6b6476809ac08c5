//! Catalog-Harvest main entry point
//!
//! This is the command-line interface for the Catalog-Harvest scraper.

use catalog_harvest::config::{load_config_with_hash, validate, Config};
use catalog_harvest::harvest::run_harvest;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Catalog-Harvest: a pooled-session catalog scraper
///
/// Catalog-Harvest walks every listing page of a paginated catalog, then
/// scrapes each item detail page into one record, keeping a bounded number
/// of page sessions open at any time.
#[derive(Parser, Debug)]
#[command(name = "catalog-harvest")]
#[command(version)]
#[command(about = "A pooled-session catalog scraper", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Maximum number of page sessions open at once
    #[arg(short, long)]
    concurrency: Option<usize>,

    /// Number of times a scraping should be retried if it failed
    #[arg(long, value_name = "N")]
    scraping_retry: Option<u32>,

    /// Number of times a page loading should be retried if it failed
    #[arg(long, value_name = "N")]
    loading_retry: Option<u32>,

    /// Output directory of the JSON records
    #[arg(short, long, value_name = "PATH")]
    output_dir: Option<PathBuf>,

    /// Stop at the first unsuccessful scraping
    #[arg(short, long)]
    success_only: bool,

    /// Re-scrape existing records; with a date, only those scraped before it
    #[arg(short, long, value_name = "DATE", num_args = 0..=1, default_missing_value = "always")]
    update: Option<String>,

    /// Stop after collecting the item addresses
    #[arg(long)]
    discovery_only: bool,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show the effective settings without harvesting
    #[arg(long)]
    dry_run: bool,
}

impl Cli {
    /// Applies command-line overrides on top of the file configuration
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(concurrency) = self.concurrency {
            config.harvest.concurrency = concurrency;
        }
        if let Some(retry) = self.scraping_retry {
            config.harvest.scraping_retry = retry;
        }
        if let Some(retry) = self.loading_retry {
            config.harvest.navigation_retry = retry;
        }
        if let Some(dir) = &self.output_dir {
            config.output.directory = dir.clone();
        }
        if let Some(update) = &self.update {
            config.output.update = update.clone();
        }
        config.harvest.fail_fast |= self.success_only;
        config.harvest.discovery_only |= self.discovery_only;
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let mut config = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            cfg
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    cli.apply_overrides(&mut config);
    if let Err(e) = validate(&config) {
        tracing::error!("Invalid command-line override: {}", e);
        return ExitCode::FAILURE;
    }

    if cli.dry_run {
        handle_dry_run(&config);
        return ExitCode::SUCCESS;
    }

    handle_harvest(&config).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("catalog_harvest=info,warn"),
            1 => EnvFilter::new("catalog_harvest=debug,info"),
            2 => EnvFilter::new("catalog_harvest=trace,debug"),
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

/// Handles the --dry-run mode: shows the effective settings
fn handle_dry_run(config: &Config) {
    println!("=== Catalog-Harvest Dry Run ===\n");

    println!("Harvest:");
    println!("  Catalog: {}", config.harvest.catalog_url);
    println!("  Concurrency: {}", config.harvest.concurrency);
    println!("  Loading retry: {}", config.harvest.navigation_retry);
    println!("  Scraping retry: {}", config.harvest.scraping_retry);
    println!("  Stop at first failure: {}", config.harvest.fail_fast);
    println!("  Discovery only: {}", config.harvest.discovery_only);

    println!("\nSessions:");
    println!("  User agent: {}", config.session.user_agent);
    println!(
        "  Navigation timeout: {}s",
        config.session.navigation_timeout_secs
    );
    let blocked: Vec<String> = config
        .session
        .blocked_resources
        .iter()
        .map(ToString::to_string)
        .collect();
    println!("  Blocked resources: {}", blocked.join(", "));
    match &config.session.blacklist_path {
        Some(path) => println!("  Blacklist: {}", path.display()),
        None => println!("  Blacklist: none"),
    }

    println!("\nExtractor:");
    println!("  Pager: {}", config.extractor.pager_last_link);
    println!("  Listing links: {}", config.extractor.listing_links);
    println!("  Detail title: {}", config.extractor.detail_title);
    for (field, selector) in &config.extractor.detail_fields {
        println!("  - {}: {}", field, selector);
    }

    println!("\nOutput:");
    println!("  Backend: {:?}", config.output.backend);
    println!("  Directory: {}", config.output.directory.display());
    println!("  Database: {}", config.output.database_path.display());
    match config.output.update_policy() {
        Ok(policy) => println!("  Update: {}", policy),
        Err(e) => println!("  Update: invalid ({})", e),
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the main harvest operation
async fn handle_harvest(config: &Config) -> ExitCode {
    match run_harvest(config).await {
        Ok(report) => {
            if config.harvest.discovery_only {
                println!(
                    "{} items found on {} listing pages",
                    report.details_found, report.listing_pages
                );
            }
            if report.had_failures {
                tracing::warn!(
                    "Harvest finished with failures ({} items, {} listing pages)",
                    report.failed,
                    report.failed_listings
                );
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            tracing::error!("Harvest failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
