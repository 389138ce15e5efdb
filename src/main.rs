use anyhow::Context;
use chrono::{Local, NaiveDate};
use cinema_listings::apis::UnitContext;
use cinema_listings::config::Config;
use cinema_listings::error::ScraperError;
use cinema_listings::orchestrator::{Orchestrator, RunRequest};
use cinema_listings::output::write_output;
use cinema_listings::registry::build_default_registry;
use cinema_listings::types::DateRange;
use cinema_listings::{logging, metrics};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Exit code for configuration errors and cancelled runs
const EXIT_FATAL: u8 = 2;

#[derive(Parser)]
#[command(name = "cinema_listings")]
#[command(about = "London cinema listings aggregator")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to config.toml (defaults to $CINEMA_LISTINGS_CONFIG, then ./config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline for every cinema, or a subset
    Run {
        /// Cinema ids to run (comma-separated). Defaults to all registered cinemas
        #[arg(long, value_delimiter = ',')]
        cinemas: Vec<String>,
        /// First day of the listing window (YYYY-MM-DD). Defaults to today
        #[arg(long)]
        start_date: Option<NaiveDate>,
        /// Number of days to cover
        #[arg(long)]
        days: Option<u32>,
        /// Where to write the listings JSON
        #[arg(long, default_value = "output/listings.json")]
        output: PathBuf,
        /// Maximum number of cinemas fetched concurrently
        #[arg(long)]
        parallelism: Option<usize>,
        /// Ignore cached responses for this run
        #[arg(long)]
        no_cache: bool,
    },
    /// List the configured cinemas
    Cinemas,
}

struct RunArgs {
    cinemas: Vec<String>,
    start_date: Option<NaiveDate>,
    days: Option<u32>,
    output: PathBuf,
    parallelism: Option<usize>,
    no_cache: bool,
}

async fn run(config: Config, args: RunArgs) -> anyhow::Result<u8> {
    let catalog = Arc::new(config.catalog()?);
    let fetcher = Arc::new(config.build_fetcher()?);
    let ctx = UnitContext {
        fetcher,
        cache_ttl: if args.no_cache {
            Duration::ZERO
        } else {
            config.cache_ttl()
        },
    };
    let registry = build_default_registry(&ctx, &catalog);

    let mut settings = config.orchestrator_settings();
    if let Some(parallelism) = args.parallelism {
        settings.parallelism = parallelism.max(1);
    }

    let start = args.start_date.unwrap_or_else(|| Local::now().date_naive());
    let days = args.days.unwrap_or(config.orchestrator.default_days);
    let range = DateRange::new(start, days)?;
    let request = RunRequest::only(args.cinemas, range);

    let orchestrator = Orchestrator::new(catalog.clone(), registry, settings);
    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_err() {
            // No signal handler available; never cancel
            std::future::pending::<()>().await;
        }
    };

    let output = orchestrator.run_until(&request, shutdown).await?;
    write_output(&args.output, &output, &catalog)
        .with_context(|| format!("writing {}", args.output.display()))?;

    let summary = &output.summary;
    println!("\n📊 Run {:?}: {} screenings", summary.status, summary.total_screenings);
    for unit in &summary.units {
        match &unit.error {
            None => println!(
                "   ✅ {}: {} emitted, {} dropped, {} out of range ({} ms)",
                unit.cinema_id, unit.emitted, unit.dropped, unit.out_of_range, unit.duration_ms
            ),
            Some(e) => println!("   ❌ {}: {}", unit.cinema_id, e),
        }
    }
    println!("   Output file: {}", args.output.display());

    for failed in summary.failed_units() {
        warn!("{} failed: {}", failed.cinema_id, failed.error.as_deref().unwrap_or("unknown"));
    }
    Ok(summary.status.exit_code() as u8)
}

fn list_cinemas(config: &Config) -> anyhow::Result<()> {
    let catalog = config.catalog()?;
    for cinema in catalog.iter() {
        println!("{:<24} {} ({}, {})", cinema.id, cinema.name, cinema.address, cinema.timezone);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    logging::init_logging();
    metrics::init_metrics();

    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {}", e);
            eprintln!("❌ {e}");
            return ExitCode::from(EXIT_FATAL);
        }
    };

    match cli.command {
        Commands::Run {
            cinemas,
            start_date,
            days,
            output,
            parallelism,
            no_cache,
        } => {
            info!("Starting listings run");
            let args = RunArgs {
                cinemas,
                start_date,
                days,
                output,
                parallelism,
                no_cache,
            };
            match run(config, args).await {
                Ok(code) => ExitCode::from(code),
                Err(e) => {
                    match e.downcast_ref::<ScraperError>() {
                        Some(ScraperError::Cancelled) => warn!("Run cancelled, no output written"),
                        _ => error!("Run aborted: {:#}", e),
                    }
                    eprintln!("❌ {e:#}");
                    ExitCode::from(EXIT_FATAL)
                }
            }
        }
        Commands::Cinemas => match list_cinemas(&config) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("❌ {e:#}");
                ExitCode::from(EXIT_FATAL)
            }
        },
    }
}
