//! Cohortwise - privacy-preserving trend aggregation
//!
//! A scheduled batch tool that turns each consenting user's raw health
//! records into a pseudonymized, generalized contribution, then publishes
//! population trends that clear per-category cohort floors.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Fatal error (salt, configuration, unreachable store, lock held)
//!   2 - Partial success (per-user or per-subgroup failures were logged)

mod aggregate;
mod builder;
mod cli;
mod config;
mod error;
mod generalize;
mod lock;
mod models;
mod pseudonym;
mod records;
mod report;
mod store;

use aggregate::{AggregationOutcome, AggregatorOptions, TrendAggregator};
use anyhow::{Context, Result};
use builder::{BuilderOptions, ContributionBuilder};
use cli::{Args, OutputFormat};
use config::{Config, CONFIG_FILE};
use error::PipelineError;
use lock::RunLock;
use pseudonym::Pseudonymizer;
use report::{RunSummary, EXIT_FATAL};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(EXIT_FATAL);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args);

    info!("Cohortwise v{}", env!("CARGO_PKG_VERSION"));
    debug!("Phase: {:?}, as of: {:?}", args.phase, args.as_of);

    match run(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Run failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(EXIT_FATAL);
        }
    }
}

/// Handle --init-config: generate a default .cohortwise.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(CONFIG_FILE);

    if path.exists() {
        eprintln!("⚠️  {} already exists. Remove it first or edit it manually.", CONFIG_FILE);
        std::process::exit(EXIT_FATAL);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    println!("   The salt is never read from this file; set COHORTWISE_SALT instead.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level())
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Load configuration, run the selected phases, and report. Returns the
/// exit code (0 or 2).
async fn run(args: Args) -> Result<i32> {
    let start_time = Instant::now();

    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    let mut summary = execute(&args, &config).await?;
    summary.duration_seconds = start_time.elapsed().as_secs_f64();

    if let Some(ref path) = args.summary {
        report::write_summary(&summary, path, args.format)?;
        info!("Summary written to {}", path.display());
    }

    if !args.quiet {
        let rendered = match args.format {
            OutputFormat::Json => report::generate_json_summary(&summary)?,
            OutputFormat::Markdown => report::generate_markdown_summary(&summary),
        };
        println!("\n{}", rendered);
    }

    let exit_code = summary.exit_code();
    if exit_code != report::EXIT_SUCCESS {
        eprintln!("\n⚠️  Run completed with logged failures (exit code {}).", exit_code);
    } else if !args.quiet {
        println!("✅ Run complete in {:.1}s", summary.duration_seconds);
    }

    Ok(exit_code)
}

/// Build contributions, then recompute trends, per `args.phase`.
///
/// Nothing under the data directory is opened until the configuration and
/// salt have been accepted.
async fn execute(args: &Args, config: &Config) -> Result<RunSummary> {
    config.validate().map_err(PipelineError::Config)?;

    let pseudonymizer = Arc::new(Pseudonymizer::from_salt(args.salt_secret())?);

    let as_of = args.as_of();
    let period = aggregate::period_of(as_of);
    let data_dir = config.general.data_dir.clone();

    if !args.quiet {
        println!("📂 Data directory: {}", data_dir.display());
        println!("🗓️  Run as of {} ({})", as_of.format("%Y-%m-%d %H:%M:%S UTC"), period);
    }

    let stores = store::json::open_stores(&data_dir)
        .await
        .context("Failed to open stores")?;

    let mut summary = RunSummary::new(as_of, period);

    if args.phase.runs_build() {
        if !args.quiet {
            println!("\n🧱 Building contributions...");
        }

        let mut options = BuilderOptions::from_config(config, as_of);
        options.show_progress = !args.quiet;

        let build = ContributionBuilder::new(stores.clone(), pseudonymizer.clone(), options)
            .build_contributions()
            .await?;

        if !args.quiet {
            println!(
                "   {} written, {} skipped (recent), {} skipped (empty), {} failed",
                build.written, build.skipped_recent, build.skipped_empty, build.failed_users
            );
        }
        summary.build = Some(build);
    }

    if args.phase.runs_aggregate() {
        if !args.quiet {
            println!("\n📊 Recomputing trends...");
        }

        let lock = RunLock::acquire(&data_dir)?;
        debug!("Holding {}", lock.path().display());
        let options = AggregatorOptions::from_config(config, as_of);
        let aggregation = TrendAggregator::new(stores, options)
            .recompute_trends()
            .await?;

        if !args.quiet {
            match aggregation.outcome {
                AggregationOutcome::Published => println!(
                    "   {} trends written, {} suppressed below cohort floors",
                    aggregation.trends_written(),
                    aggregation.trends_suppressed()
                ),
                AggregationOutcome::InsufficientPopulation => println!(
                    "   Only {} contributors in window; nothing published",
                    aggregation.distinct_contributors
                ),
            }
        }
        summary.aggregation = Some(aggregation);
        drop(lock);
    }

    Ok(summary)
}

/// Load configuration from file or use defaults.
///
/// A config file that exists but does not parse is an error.
fn load_config(args: &Args) -> Result<Config> {
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    match Config::load_default()? {
        Some(config) => {
            info!("Loaded default config from {}", CONFIG_FILE);
            Ok(config)
        }
        None => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
    }
}
