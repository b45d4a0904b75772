//! Pricetrail CLI entry point.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use chrono::NaiveDate;
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use pricetrail::config::resolve_db_path;
use pricetrail::{
    CatalogStore, ChromiumBrowsing, Dataset, ExtractionSession, IntervalKind, RunJournal,
    RunSummary, ScrapeConfig, ScrapeCoordinator, SeriesQuery,
};

#[derive(Parser)]
#[command(
    name = "pricetrail",
    about = "Scrape historical price tables into SQLite and read them back",
    version
)]
struct Cli {
    /// Path to a JSON config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Path to the SQLite database.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape every configured instrument and interval, then persist.
    Scrape(ScrapeArgs),

    /// Print a stored series as JSON.
    Series {
        /// Instrument symbol, e.g. eur-usd.
        instrument: String,

        /// daily, weekly or monthly.
        #[arg(long, default_value = "daily")]
        interval: IntervalKind,

        /// First date to include (YYYY-MM-DD).
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Last date to include (YYYY-MM-DD).
        #[arg(long)]
        to: Option<NaiveDate>,
    },

    /// Print the resolved instrument catalog and page URLs.
    Catalog {
        /// Emit JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Write the default configuration to a file.
    InitConfig {
        path: PathBuf,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   pricetrail completions bash > ~/.local/share/bash-completion/completions/pricetrail
    ///   pricetrail completions zsh > ~/.zfunc/_pricetrail
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[derive(Args)]
struct ScrapeArgs {
    /// Override the configured first year.
    #[arg(long)]
    start_year: Option<i32>,

    /// Override the configured end year.
    #[arg(long)]
    end_year: Option<i32>,

    /// Replace stored price rows with this run's rows.
    #[arg(long, conflicts_with = "no_persist")]
    truncate: bool,

    /// Show the browser window.
    #[arg(long)]
    headful: bool,

    /// Append a JSONL record of every attempt to this file.
    #[arg(long)]
    journal: Option<PathBuf>,

    /// Scrape and report without writing to the database.
    #[arg(long)]
    no_persist: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Scrape(args) => {
            scrape(cli.config.as_deref(), cli.db.as_deref(), args).await?;
        }

        Commands::Series {
            instrument,
            interval,
            from,
            to,
        } => {
            let db_path = resolve_db_path(cli.db.as_deref());
            if !db_path.exists() {
                bail!("no database at {}", db_path.display());
            }
            let store = CatalogStore::open(&db_path)?;
            let rows = store.series(&SeriesQuery {
                instrument,
                interval,
                from,
                to,
            })?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }

        Commands::Catalog { json } => {
            let config = ScrapeConfig::load_or_default(cli.config.as_deref())?;
            let instruments = config.instruments();
            if json {
                println!("{}", serde_json::to_string_pretty(&instruments)?);
            } else {
                for instrument in &instruments {
                    println!(
                        "{:<10} {:<16} {}",
                        instrument.category.to_string(),
                        instrument.symbol,
                        instrument.url(&config.base_url)
                    );
                }
            }
        }

        Commands::InitConfig { path, force } => {
            init_config(&path, force)?;
            println!("Wrote default config to {}", path.display());
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "pricetrail", &mut std::io::stdout());
        }
    }

    Ok(())
}

async fn scrape(config_path: Option<&Path>, db: Option<&Path>, args: ScrapeArgs) -> anyhow::Result<()> {
    let mut config =
        ScrapeConfig::load_or_default(config_path).context("failed to load configuration")?;
    if let Some(year) = args.start_year {
        config.start_year = year;
    }
    if let Some(year) = args.end_year {
        config.end_year = year;
    }
    if args.headful {
        config.browser.headless = false;
    }
    config.validate()?;

    // Open the store first so a bad path fails before the browser starts
    let mut store = if args.no_persist {
        None
    } else {
        Some(CatalogStore::open(&resolve_db_path(db))?)
    };

    let session = ExtractionSession::new(config.base_url.clone(), config.timings.clone())
        .with_date_format(config.date_format);
    let mut coordinator = ScrapeCoordinator::new(session);
    if let Some(path) = &args.journal {
        coordinator = coordinator.with_journal(RunJournal::open(path)?);
    }

    let browsing = ChromiumBrowsing::launch(&config.browser)
        .await
        .context("failed to start the browser")?;

    let outcome = coordinator
        .run(
            browsing,
            &config.instruments(),
            &config.intervals,
            config.start_year,
            config.end_year,
        )
        .await;

    let report = match &outcome {
        Ok(report) => report,
        Err(e) => e.partial_report(),
    };
    print_summary(&report.summary);

    if let Some(store) = store.as_mut() {
        store_rows(store, &report.dataset, args.truncate)?;
    }

    outcome.context("scrape run stopped early")?;
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("{summary}");
    for failure in &summary.failures {
        println!(
            "  failed: {} ({}) at {}: {}",
            failure.symbol, failure.interval, failure.stage, failure.cause
        );
    }
}

/// Write scraped rows. With `truncate`, earlier price rows are replaced in
/// the same transaction; an empty dataset never clears the store.
fn store_rows(store: &mut CatalogStore, dataset: &Dataset, truncate: bool) -> anyhow::Result<()> {
    let persisted = if truncate && !dataset.is_empty() {
        store.replace(dataset)?
    } else {
        if truncate {
            tracing::warn!("Nothing was collected, keeping stored price rows");
        }
        store.persist(dataset)?
    };
    if persisted.rows_deleted > 0 {
        tracing::info!("Removed {} earlier price rows", persisted.rows_deleted);
    }
    println!(
        "Stored {} rows ({} new instruments, {} new currencies)",
        persisted.rows_written, persisted.new_instruments, persisted.new_currencies
    );
    Ok(())
}

fn init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = ScrapeConfig::default().to_json_pretty()?;
    std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
