//! Harvester CLI
//!
//! Local execution entry point for crawling and status updates.

use std::path::PathBuf;

use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use harvester::{
    error::Result,
    models::Config,
    pipeline::{self, CrawlRequest, StopReason},
    services::HttpFetcher,
    storage::ShardStore,
    utils::{log::summary, read_url_list},
};

/// Harvester - incremental civic report crawler
#[derive(Parser, Debug)]
#[command(
    name = "harvester",
    version,
    about = "Incrementally harvests civic issue reports into monthly JSONL shards"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "harvester.toml")]
    config: PathBuf,

    /// Shard directory (overrides storage.data_dir)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct CutoffArgs {
    /// Cutoff in months of 30 days before today
    #[arg(long, conflicts_with = "cutoff_date")]
    cutoff_months: Option<u32>,

    /// Explicit cutoff date (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    cutoff_date: Option<NaiveDate>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch new reports from the listing
    Crawl {
        /// Listing page to start from
        #[arg(long)]
        start_page: Option<usize>,

        /// Stop after storing a report dated on or before this day (YYYY-MM-DD)
        #[arg(long, value_parser = parse_date)]
        until_date: Option<NaiveDate>,

        /// Resume from the estimated page and skip already stored reports
        #[arg(long = "continue")]
        continue_from_resume: bool,

        /// Maximum number of reports to fetch
        #[arg(long)]
        max_records: Option<usize>,

        /// Records buffered before a flush (overrides storage.buffer_size)
        #[arg(long)]
        buffer_size: Option<usize>,
    },

    /// List recent reports whose listing status changed
    DetectChanges {
        #[command(flatten)]
        cutoff: CutoffArgs,

        /// Write the URLs to this file
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// List old reports that are still pending
    OldPending {
        #[command(flatten)]
        cutoff: CutoffArgs,

        /// Write the URLs to this file
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Re-fetch the reports listed in a file and update them in place
    Rescan {
        /// File with one report URL per line
        #[arg(long)]
        file: PathBuf,
    },

    /// Detect changes, collect old pending reports and rescan both
    Update {
        #[command(flatten)]
        cutoff: CutoffArgs,
    },

    /// Show where a resumed crawl would start
    ResumePoint,

    /// Validate the configuration and every shard
    Validate,
}

fn parse_date(s: &str) -> std::result::Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("expected YYYY-MM-DD: {e}"))
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

impl CutoffArgs {
    fn resolve(&self, config: &Config) -> NaiveDate {
        pipeline::resolve_cutoff(
            &config.update,
            self.cutoff_months,
            self.cutoff_date,
            Local::now().date_naive(),
        )
    }
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = if cli.config.exists() {
        Config::load(&cli.config)?
    } else {
        Config::load_or_default(&cli.config)
    };
    if let Some(dir) = cli.data_dir {
        config.storage.data_dir = dir;
    }
    log::info!("Data directory: {}", config.storage.data_dir.display());

    match cli.command {
        Command::Crawl {
            start_page,
            until_date,
            continue_from_resume,
            max_records,
            buffer_size,
        } => {
            if let Some(size) = buffer_size {
                config.storage.buffer_size = size;
            }
            config.validate()?;
            let fetcher = HttpFetcher::new(&config)?;
            let request = CrawlRequest {
                start_page,
                until_date,
                continue_from_resume,
                max_records,
            };

            // Dropping the crawl on ctrl-c drops its writer, which flushes.
            tokio::select! {
                report = pipeline::run_crawler(&config, &fetcher, request) => {
                    report?;
                }
                _ = tokio::signal::ctrl_c() => {
                    log::warn!("Crawl stopped: {}", StopReason::Interrupted);
                }
            }
        }

        Command::DetectChanges { cutoff, output } => {
            let cutoff = cutoff.resolve(&config);
            let fetcher = HttpFetcher::new(&config)?;
            let changed =
                pipeline::run_detect_changes(&config, &fetcher, cutoff, output.as_deref()).await?;
            log::info!("{} recently changed reports (cutoff {})", changed.len(), cutoff);
        }

        Command::OldPending { cutoff, output } => {
            let cutoff = cutoff.resolve(&config);
            let pending = pipeline::run_old_pending(&config, cutoff, output.as_deref())?;
            log::info!("{} old pending reports (cutoff {})", pending.len(), cutoff);
        }

        Command::Rescan { file } => {
            let identities = read_url_list(&file)?;
            if identities.is_empty() {
                log::warn!("No URLs in {}", file.display());
                return Ok(());
            }
            let fetcher = HttpFetcher::new(&config)?;
            pipeline::run_rescan(&config, &fetcher, &identities).await?;
        }

        Command::Update { cutoff } => {
            let cutoff = cutoff.resolve(&config);
            let fetcher = HttpFetcher::new(&config)?;
            pipeline::run_update(&config, &fetcher, cutoff).await?;
        }

        Command::ResumePoint => {
            let store = ShardStore::open(&config.storage.data_dir)?;
            let point = store.compute_resume_point()?;
            summary(
                "Resume point",
                &[
                    ("Stored reports", point.total_count.to_string()),
                    (
                        "Oldest report",
                        point
                            .oldest_date
                            .map_or_else(|| "-".to_string(), |d| d.to_string()),
                    ),
                    (
                        "Start page",
                        point.estimate_start_page(config.crawler.page_size).to_string(),
                    ),
                ],
            );
        }

        Command::Validate => {
            log::info!("Validating configuration...");
            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            HttpFetcher::new(&config)?;
            log::info!("✓ Config OK (selectors and patterns compile)");

            let store = ShardStore::open(&config.storage.data_dir)?;
            let shards = store.shard_keys()?;
            let index = store.load_identity_index()?;
            log::info!("✓ {} shards, {} reports readable", shards.len(), index.len());

            log::info!("All validations passed!");
        }
    }

    log::info!("Done!");

    Ok(())
}
