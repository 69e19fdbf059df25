//! natrbot CLI: sync, stats, enrich and natr commands.
//!
//! Commands:
//! - `sync` brings the quote store current through today
//! - `stats` reports the stored date range, size and content hash
//! - `enrich` joins an uploaded code list with the latest NATR snapshot
//! - `natr` prints the most recent NATR rows of one code

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use natrbot_core::data::{
    CircuitBreaker, Credentials, HttpQuoteProvider, QuoteProvider, ReplayQuoteProvider,
    SyncReport,
};
use natrbot_core::{AppConfig, Pipeline};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(
    name = "natrbot",
    about = "natrbot: daily quote sync and NATR enrichment"
)]
struct Cli {
    /// Path to a TOML config file. Defaults are used when absent.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override "today" (YYYY-MM-DD). Defaults to the local date.
    #[arg(long, global = true)]
    today: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring the quote store current through today.
    Sync,
    /// Report stored date range, row and code counts, and content hash.
    Stats,
    /// Enrich an uploaded CSV code list with the latest NATR snapshot.
    Enrich {
        /// CSV file whose first column holds security codes.
        #[arg(long)]
        input: PathBuf,

        /// Output CSV. Defaults to out_{input file name} next to the input.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Skip the sync and use the store as-is.
        #[arg(long, default_value_t = false)]
        offline: bool,
    },
    /// Print the most recent NATR rows of one code.
    Natr {
        #[arg(long)]
        code: String,

        /// Number of trailing rows to print.
        #[arg(long, default_value_t = 10)]
        last: usize,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing()?;

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let today = match cli.today.as_deref() {
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .with_context(|| format!("invalid --today '{s}'"))?,
        None => chrono::Local::now().date_naive(),
    };

    let pipeline = Pipeline::from_config(&config, build_provider(&config)?);

    match cli.command {
        Commands::Sync => run_sync(&pipeline, today),
        Commands::Stats => run_stats(&pipeline, &config),
        Commands::Enrich {
            input,
            output,
            offline,
        } => {
            let input = resolve_input(&config.request.downloads_dir, &input);
            run_enrich(&pipeline, &input, output.as_deref(), today, offline)
        }
        Commands::Natr { code, last } => run_natr(&pipeline, &code, last),
    }
}

fn init_tracing() -> Result<()> {
    let env_filter = EnvFilter::from_default_env().add_directive("natrbot=info".parse()?);
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(env_filter)
        .init();
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(path) => AppConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(AppConfig::default()),
    }
}

fn build_provider(config: &AppConfig) -> Result<Box<dyn QuoteProvider>> {
    if let Some(dir) = &config.provider.replay_dir {
        info!(dir = %dir.display(), "using replay provider");
        return Ok(Box::new(ReplayQuoteProvider::new(dir)));
    }

    let credentials = Credentials::from_env();
    if credentials.is_empty() {
        warn!("API_KEY / SECRET_KEY not set; provider login will fail");
    }
    let provider = HttpQuoteProvider::new(
        &config.provider.base_url,
        credentials,
        config.provider.timeout(),
        config.provider.max_retries,
        Arc::new(CircuitBreaker::default_provider()),
    )?;
    Ok(Box::new(provider))
}

fn run_sync(pipeline: &Pipeline, today: NaiveDate) -> Result<()> {
    match pipeline.sync_now(today) {
        Some(report) => {
            print_sync_report(&report);
            if !report.all_succeeded() {
                std::process::exit(1);
            }
        }
        None => println!("Quote store already current through {today}."),
    }
    Ok(())
}

fn run_stats(pipeline: &Pipeline, config: &AppConfig) -> Result<()> {
    println!("Store: {}", config.store.path.display());
    match pipeline.stats()? {
        Some(stats) => {
            println!("Date range: {} to {}", stats.earliest_date, stats.latest_date);
            println!("Rows:       {}", stats.row_count);
            println!("Codes:      {}", stats.code_count);
            println!("Hash:       {}", stats.data_hash);
        }
        None => println!("Store is empty."),
    }
    Ok(())
}

/// Bare file names that do not exist locally are looked up in the downloads dir.
fn resolve_input(downloads_dir: &Path, input: &Path) -> PathBuf {
    if input.exists() || input.is_absolute() {
        input.to_path_buf()
    } else {
        downloads_dir.join(input)
    }
}

fn run_enrich(
    pipeline: &Pipeline,
    input: &Path,
    output: Option<&Path>,
    today: NaiveDate,
    offline: bool,
) -> Result<()> {
    let report = pipeline
        .process(input, output, today, offline)
        .with_context(|| format!("enriching {}", input.display()))?;

    if let Some(sync) = &report.sync {
        print_sync_report(sync);
    }
    println!(
        "Wrote {} rows ({} matched) to {}",
        report.rows,
        report.matched,
        report.output.display()
    );
    println!("{}", report.caption);
    Ok(())
}

fn run_natr(pipeline: &Pipeline, code: &str, last: usize) -> Result<()> {
    let rows = pipeline.natr_for(code, last)?;
    if rows.is_empty() {
        println!("No stored quotes for {code}.");
        return Ok(());
    }

    println!("NATR({}) for {code}", pipeline.period());
    println!(
        "{:<12} {:>10} {:>10} {:>10} {:>10} {:>8}",
        "Date", "Open", "High", "Low", "Close", "NATR"
    );
    println!("{}", "-".repeat(65));
    for row in &rows {
        let natr = row
            .natr
            .map(|v| format!("{v:.2}"))
            .unwrap_or_else(|| "-".into());
        let q = &row.quote;
        println!(
            "{:<12} {:>10.2} {:>10.2} {:>10.2} {:>10.2} {:>8}",
            q.date.to_string(),
            q.open,
            q.high,
            q.low,
            q.close,
            natr
        );
    }
    Ok(())
}

fn print_sync_report(report: &SyncReport) {
    println!("Sync {} to {}", report.start, report.end);
    println!(
        "  {} days considered, {} weekdays fetched, {} records",
        report.days_considered, report.weekdays_fetched, report.records_downloaded
    );
    if !report.all_succeeded() {
        for day in &report.failed_days {
            eprintln!("  failed: {day}");
        }
    }
}
