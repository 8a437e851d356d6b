//! quotesync CLI: incremental OHLCV synchronization.
//!
//! Commands:
//! - `sync`: bring every catalog symbol up to date for each interval
//! - `reprocess`: retry the symbols queued in the failure log
//! - `status`: stored coverage per symbol and the pending failure queue
//!
//! Per-symbol failures never change the exit code; only setup errors do.

mod logging;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use quotesync_core::data::{Catalog, CircuitBreaker, YahooProvider};
use quotesync_core::domain::Interval;
use quotesync_core::Warehouse;
use quotesync_runner::failure_queue::pending_symbols;
use quotesync_runner::{
    FailureLog, FailureQueue, PendingSymbol, Reprocessor, SyncConfig, SyncReport, Synchronizer,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "quotesync",
    about = "quotesync: incremental daily and weekly OHLCV synchronization"
)]
struct Cli {
    /// TOML configuration file. Built-in defaults are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter (e.g. info, debug, quotesync_runner=trace). RUST_LOG takes precedence.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch and store every missing bar for the catalog.
    Sync {
        /// Instrument listing CSV.
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// SQLite warehouse file.
        #[arg(long)]
        database: Option<PathBuf>,

        /// Restrict the run to these symbols (comma-separated).
        #[arg(long, value_delimiter = ',')]
        symbols: Vec<String>,

        /// Only synchronize one interval (daily or weekly).
        #[arg(long, value_parser = parse_interval)]
        interval: Option<Interval>,

        /// Treat this date as today (YYYY-MM-DD).
        #[arg(long)]
        today: Option<NaiveDate>,

        /// Concurrent provider fetches.
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Retry the symbols recorded in the failure log.
    Reprocess {
        /// SQLite warehouse file.
        #[arg(long)]
        database: Option<PathBuf>,

        /// Failure log to drain.
        #[arg(long)]
        failure_log: Option<PathBuf>,

        /// Treat this date as today (YYYY-MM-DD).
        #[arg(long)]
        today: Option<NaiveDate>,
    },
    /// Show stored coverage and pending failures.
    Status {
        /// SQLite warehouse file.
        #[arg(long)]
        database: Option<PathBuf>,

        /// Only report one interval.
        #[arg(long, value_parser = parse_interval)]
        interval: Option<Interval>,
    },
}

fn parse_interval(s: &str) -> Result<Interval, String> {
    s.parse::<Interval>().map_err(|e| e.to_string())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => SyncConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => SyncConfig::default(),
    };
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    match cli.command {
        Commands::Sync {
            catalog,
            database,
            symbols,
            interval,
            today,
            workers,
        } => {
            let config = sync_config(config, catalog, database, interval, workers)?;
            logging::init(&config.logging)?;
            run_sync(&config, &symbols, today.unwrap_or_else(local_today))
        }
        Commands::Reprocess {
            database,
            failure_log,
            today,
        } => {
            let config = reprocess_config(config, database, failure_log)?;
            logging::init(&config.logging)?;
            run_reprocess(&config, today.unwrap_or_else(local_today))
        }
        Commands::Status { database, interval } => {
            if let Some(path) = database {
                config.storage.database_path = path;
            }
            run_status(&config, interval)
        }
    }
}

/// Apply `sync` flag overrides, then validate the result.
fn sync_config(
    mut config: SyncConfig,
    catalog: Option<PathBuf>,
    database: Option<PathBuf>,
    interval: Option<Interval>,
    workers: Option<usize>,
) -> Result<SyncConfig> {
    if let Some(path) = catalog {
        config.catalog.path = path;
    }
    if let Some(path) = database {
        config.storage.database_path = path;
    }
    if let Some(interval) = interval {
        config.sync.intervals = vec![interval];
    }
    if let Some(workers) = workers {
        config.sync.fetch_workers = workers;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Apply `reprocess` flag overrides, then validate the result.
fn reprocess_config(
    mut config: SyncConfig,
    database: Option<PathBuf>,
    failure_log: Option<PathBuf>,
) -> Result<SyncConfig> {
    if let Some(path) = database {
        config.storage.database_path = path;
    }
    if let Some(path) = failure_log {
        config.storage.failure_log_path = path;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn local_today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

fn build_provider(config: &SyncConfig) -> Result<YahooProvider> {
    let breaker = Arc::new(CircuitBreaker::new(
        config.provider.breaker_cooldown(),
        config.provider.breaker_failure_threshold,
    ));
    YahooProvider::new(breaker, config.provider.yahoo()).context("building HTTP client")
}

fn open_warehouse(path: &Path) -> Result<Warehouse> {
    Warehouse::open(path).with_context(|| format!("opening warehouse {}", path.display()))
}

fn load_catalog(config: &SyncConfig, symbols: &[String]) -> Result<Catalog> {
    let path = &config.catalog.path;
    if symbols.is_empty() {
        return Catalog::from_csv_path(path)
            .with_context(|| format!("loading catalog {}", path.display()));
    }
    // Explicit symbols run even without a listing file; metadata is attached when available.
    if path.exists() {
        let catalog = Catalog::from_csv_path(path)
            .with_context(|| format!("loading catalog {}", path.display()))?;
        Ok(catalog.filter(symbols))
    } else {
        Ok(Catalog::from_symbols(symbols))
    }
}

fn run_sync(config: &SyncConfig, symbols: &[String], today: NaiveDate) -> Result<()> {
    let catalog = load_catalog(config, symbols)?;
    if catalog.is_empty() {
        println!("No symbols to synchronize.");
        return Ok(());
    }
    println!("Synchronizing {} symbol(s) as of {today}", catalog.len());

    let mut warehouse = open_warehouse(&config.storage.database_path)?;
    warehouse
        .upsert_instruments(catalog.instruments())
        .context("storing instrument metadata")?;

    let provider = build_provider(config)?;
    let mut queue = FailureLog::new(&config.storage.failure_log_path);

    let report = {
        let mut sync = Synchronizer::new(&provider, &mut warehouse, &mut queue, config.sync.clone())
            .with_request_delay(config.provider.request_delay());
        sync.run(&catalog.symbols(), today)?
    };
    report.log_summary("sync");
    print_report("Sync", &report);
    if report.queued > 0 {
        println!(
            "{} pair(s) queued in {}; run `quotesync reprocess` to retry.",
            report.queued,
            config.storage.failure_log_path.display()
        );
    }
    Ok(())
}

fn run_reprocess(config: &SyncConfig, today: NaiveDate) -> Result<()> {
    let mut queue = FailureLog::new(&config.storage.failure_log_path);
    if queue.list_pending()?.is_empty() {
        println!("Failure queue is empty: {}", config.storage.failure_log_path.display());
        return Ok(());
    }

    let mut warehouse = open_warehouse(&config.storage.database_path)?;
    let provider = build_provider(config)?;

    let report = {
        let sync = Synchronizer::new(&provider, &mut warehouse, &mut queue, config.sync.clone())
            .with_request_delay(config.provider.request_delay());
        Reprocessor::new(sync).run(today)?
    };
    report.log_summary();

    println!();
    println!("=== Reprocess Result ===");
    println!("Symbols:             {}", report.symbols);
    println!("Recovered:           {}", report.recovered);
    println!("Partially recovered: {}", report.partially_recovered);
    println!("Still failing:       {}", report.still_failing);
    print_report("Pairs", &report.pairs);
    Ok(())
}

fn print_report(title: &str, report: &SyncReport) {
    println!();
    println!("--- {title} ---");
    println!("Pairs:          {}", report.pairs);
    println!("Done:           {} ({} empty)", report.done, report.empty);
    println!("Up to date:     {}", report.skipped);
    println!("Queued:         {}", report.queued);
    println!("Rows inserted:  {}", report.rows_inserted);
    println!("Success rate:   {:.1}%", report.success_rate());
    println!("Elapsed:        {:.1}s", report.elapsed.as_secs_f64());
}

fn run_status(config: &SyncConfig, only: Option<Interval>) -> Result<()> {
    let db_path = &config.storage.database_path;
    if !db_path.exists() {
        println!("Warehouse does not exist: {}", db_path.display());
        return Ok(());
    }
    let warehouse = open_warehouse(db_path)?;

    let queue = FailureLog::new(&config.storage.failure_log_path);
    let pending: Vec<PendingSymbol> = pending_symbols(
        &queue
            .records()
            .with_context(|| format!("reading {}", queue.path().display()))?,
    );
    let pending_pairs: HashSet<(&str, Interval)> = pending
        .iter()
        .flat_map(|p| p.intervals.iter().map(move |i| (p.symbol.as_str(), *i)))
        .collect();

    let intervals: Vec<Interval> = match only {
        Some(interval) => vec![interval],
        None => Interval::ALL.to_vec(),
    };

    println!("Warehouse: {}", db_path.display());
    for interval in intervals {
        let report = warehouse
            .coverage_report(interval)
            .with_context(|| format!("reading {interval} coverage"))?;
        let total: u64 = report.iter().map(|(_, c)| c.rows).sum();

        println!();
        println!("[{interval}] {} symbol(s), {total} row(s)", report.len());
        if report.is_empty() {
            continue;
        }
        println!("{:<14} {:<12} {:<12} {:>8}", "Symbol", "First", "Last", "Rows");
        println!("{}", "-".repeat(58));
        for (symbol, coverage) in &report {
            let marker = if pending_pairs.contains(&(symbol.as_str(), interval)) {
                "  PENDING"
            } else {
                ""
            };
            println!(
                "{:<14} {:<12} {:<12} {:>8}{marker}",
                symbol,
                coverage.first.to_string(),
                coverage.last.to_string(),
                coverage.rows
            );
        }
    }

    println!();
    if pending.is_empty() {
        println!("Failure queue: empty");
        return Ok(());
    }
    println!("Failure queue: {} symbol(s) pending", pending.len());
    for entry in &pending {
        let intervals: Vec<&str> = entry.intervals.iter().map(|i| i.code()).collect();
        let since = entry
            .first_failed_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "  {:<14} [{}] attempts={} since={} {}: {}",
            entry.symbol,
            intervals.join(","),
            entry.attempts,
            since,
            entry.last_kind,
            entry.last_reason
        );
    }
    Ok(())
}
