//! RotoLab CLI — run, inspect, and audit rotation engine runs.
//!
//! Commands:
//! - `run` — execute the epoch scheduler from a TOML run file or a synthetic quick run
//! - `status` — print the committed portfolio state from a store
//! - `scores` — dump one session's committed score snapshot as CSV
//! - `audit` — list the committed event log, optionally filtered by config hash

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use rotolab_core::domain::SignalAction;
use rotolab_runner::{
    describe_event, export_scores_csv, generate_status, load_universe, save_artifacts,
    synthetic_universe, DataConfig, MarketData, RunConfig, RunReport, Scheduler, SnapshotReader,
    StateStore, REPORT_SCHEMA_VERSION,
};

#[derive(Parser)]
#[command(
    name = "rotolab",
    about = "RotoLab CLI — sector rotation scoring and rebalancing engine"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute the epoch scheduler over a market data window.
    Run {
        /// Path to a TOML run file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Synthetic quick run with this many instruments (no run file needed).
        #[arg(long)]
        synthetic: Option<usize>,

        /// First session to process (YYYY-MM-DD). Defaults to the calendar start.
        #[arg(long)]
        start: Option<String>,

        /// Last session to process (YYYY-MM-DD). Defaults to the calendar end.
        #[arg(long)]
        end: Option<String>,

        /// Store directory override.
        #[arg(long)]
        store_dir: Option<PathBuf>,

        /// Exclude an instrument from pool rebuilds (repeat per instrument).
        #[arg(long)]
        exclude: Vec<String>,

        /// Output directory for the artifact set.
        #[arg(long, default_value = "reports")]
        output_dir: PathBuf,
    },
    /// Print the committed portfolio state from a store.
    Status {
        /// Store directory.
        #[arg(long, default_value = "rotolab-store")]
        store_dir: PathBuf,
    },
    /// Dump one session's committed score snapshot as CSV.
    Scores {
        /// Session date (YYYY-MM-DD).
        date: String,

        /// Store directory.
        #[arg(long, default_value = "rotolab-store")]
        store_dir: PathBuf,

        /// Print the classified action set instead of the score table.
        #[arg(long)]
        signals: bool,
    },
    /// List the committed event log.
    Audit {
        /// Store directory.
        #[arg(long, default_value = "rotolab-store")]
        store_dir: PathBuf,

        /// Only events whose config hash starts with this prefix.
        #[arg(long)]
        config_hash: Option<String>,

        /// Show only the last N events.
        #[arg(long)]
        tail: Option<usize>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            synthetic,
            start,
            end,
            store_dir,
            exclude,
            output_dir,
        } => run_cmd(config, synthetic, start, end, store_dir, exclude, output_dir),
        Commands::Status { store_dir } => status_cmd(&store_dir),
        Commands::Scores {
            date,
            store_dir,
            signals,
        } => scores_cmd(&date, &store_dir, signals),
        Commands::Audit {
            store_dir,
            config_hash,
            tail,
        } => audit_cmd(&store_dir, config_hash, tail),
    }
}

fn run_cmd(
    config_path: Option<PathBuf>,
    synthetic: Option<usize>,
    start: Option<String>,
    end: Option<String>,
    store_dir: Option<PathBuf>,
    exclude: Vec<String>,
    output_dir: PathBuf,
) -> Result<()> {
    if config_path.is_some() && synthetic.is_some() {
        bail!("--config and --synthetic are mutually exclusive");
    }
    if config_path.is_none() && synthetic.is_none() {
        bail!("one of --config or --synthetic is required");
    }

    let mut config = if let Some(path) = config_path {
        RunConfig::load(&path)?
    } else {
        build_synthetic_config(synthetic.unwrap_or(16), start.as_deref(), end.as_deref())?
    };

    if let Some(dir) = store_dir {
        config.store_dir = dir;
    }
    if let Some(s) = start.as_deref() {
        config.start = Some(parse_date(s)?);
    }
    if let Some(e) = end.as_deref() {
        config.end = Some(parse_date(e)?);
    }
    config.screen.exclude.extend(exclude);

    let data = load_market_data(&config)?;
    let store = StateStore::open(&config.store_dir)?;
    let mut scheduler =
        Scheduler::new(config.engine.clone(), &data, &store, config.venue.build())?;
    let screen = config.screen.build();
    if !screen.is_empty() {
        scheduler.set_screen(screen);
    }

    let summary = scheduler.run(config.start, config.end)?;

    let window_start = config
        .start
        .or_else(|| scheduler.calendar().first())
        .context("trading calendar is empty")?;
    let window_end = config
        .end
        .or_else(|| scheduler.calendar().last())
        .context("trading calendar is empty")?;

    let report = RunReport {
        schema_version: REPORT_SCHEMA_VERSION,
        config_hash: scheduler.config_hash().clone(),
        dataset_hash: data.dataset_hash().to_string(),
        universe_size: data.instruments().len(),
        window_start,
        window_end,
        pool_epoch: scheduler.pool_epoch(),
        pool_size: scheduler.pool().map(|p| p.len()),
        summary,
        positions: scheduler.positions().to_vec(),
        trades: scheduler.ledger().trades().to_vec(),
        nav: scheduler.ledger().nav().to_vec(),
    };

    print_summary(&report);

    let run_dir = save_artifacts(&report, &output_dir)?;
    println!("Artifacts saved to: {}", run_dir.display());

    Ok(())
}

/// Build a synthetic run through the TOML path so the same validation runs
/// as for run files.
fn build_synthetic_config(
    instruments: usize,
    start: Option<&str>,
    end: Option<&str>,
) -> Result<RunConfig> {
    let start = start.unwrap_or("2023-01-02");
    let end = end.unwrap_or("2024-06-28");

    let toml_str = format!(
        r#"[data]
kind = "synthetic"
instruments = {instruments}
start = "{start}"
end = "{end}"
seed = 7
"#
    );
    Ok(RunConfig::from_toml(&toml_str)?)
}

fn load_market_data(config: &RunConfig) -> Result<MarketData> {
    let data = match &config.data {
        DataConfig::Csv { universe, bars_dir } => {
            let instruments = load_universe(universe)?;
            MarketData::load(bars_dir, &instruments)?
        }
        DataConfig::Synthetic {
            instruments,
            start,
            end,
            seed,
        } => MarketData::synthetic(&synthetic_universe(*instruments), *start, *end, *seed),
    };
    Ok(data)
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("invalid date '{s}' (expected YYYY-MM-DD)"))
}

fn status_cmd(store_dir: &Path) -> Result<()> {
    if !store_dir.exists() {
        println!("Store directory does not exist: {}", store_dir.display());
        return Ok(());
    }

    let reader = SnapshotReader::new(store_dir);
    let state = match reader.current()? {
        Some(state) => state,
        None => {
            println!("No committed state under {}", store_dir.display());
            return Ok(());
        }
    };
    let events = reader.events()?;

    print!("{}", generate_status(&state, events.last()));
    Ok(())
}

fn scores_cmd(date: &str, store_dir: &Path, signals: bool) -> Result<()> {
    if !store_dir.exists() {
        println!("Store directory does not exist: {}", store_dir.display());
        return Ok(());
    }

    let date = parse_date(date)?;
    let reader = SnapshotReader::new(store_dir);

    if signals {
        let set = match reader.signals(date)? {
            Some(set) => set,
            None => bail!("no committed signal snapshot for {date}"),
        };
        for sig in &set {
            let action = match sig.action {
                SignalAction::Buy => "buy",
                SignalAction::Hold => "hold",
                SignalAction::Sell => "sell",
                SignalAction::StrongSell => "strong_sell",
            };
            let mut note = String::new();
            if sig.forced {
                note.push_str("  forced exit, left the pool");
            }
            if let Some(o) = &sig.overridden {
                let holders: Vec<&str> = o.occupied_by.iter().map(|id| id.as_str()).collect();
                note.push_str(&format!(
                    "  cluster {} held by {}",
                    o.cluster.0,
                    holders.join(", ")
                ));
            }
            println!(
                "{:<10} {:<12} {:>6.1}{note}",
                sig.instrument, action, sig.composite
            );
        }
        return Ok(());
    }

    let records = match reader.scores(date)? {
        Some(records) => records,
        None => bail!("no committed score snapshot for {date}"),
    };

    print!("{}", export_scores_csv(&records)?);
    Ok(())
}

fn audit_cmd(store_dir: &Path, config_hash: Option<String>, tail: Option<usize>) -> Result<()> {
    if !store_dir.exists() {
        println!("Store directory does not exist: {}", store_dir.display());
        return Ok(());
    }

    let reader = SnapshotReader::new(store_dir);
    let mut events = reader.events()?;

    if let Some(prefix) = &config_hash {
        events.retain(|e| e.config_hash.0.starts_with(prefix));
    }
    if let Some(n) = tail {
        if events.len() > n {
            events.drain(..events.len() - n);
        }
    }

    if events.is_empty() {
        println!("No committed events under {}", store_dir.display());
        return Ok(());
    }

    for event in &events {
        println!("[{}] {}", event.config_hash.short(), describe_event(event));
    }

    Ok(())
}

fn print_summary(report: &RunReport) {
    let summary = &report.summary;
    let m = &summary.metrics;
    println!();
    println!("=== Rotation Run ===");
    println!(
        "Window:         {} to {}",
        report.window_start, report.window_end
    );
    println!("Universe:       {} instruments", report.universe_size);
    match (report.pool_epoch, report.pool_size) {
        (Some(epoch), Some(size)) => println!("Pool:           {size} members (epoch {epoch})"),
        _ => println!("Pool:           none"),
    }
    println!(
        "Sessions:       {} ({} replayed, {} idle)",
        summary.sessions, summary.replayed, summary.idle
    );
    println!(
        "Monthly:        {} committed, {} aborted",
        summary.monthly_committed, summary.monthly_aborted
    );
    println!("Daily:          {} committed", summary.daily_committed);
    println!("Positions:      {}", report.positions.len());
    println!();
    println!("--- Performance ---");
    println!("Total Return:   {:.2}%", m.total_return * 100.0);
    println!("CAGR:           {:.2}%", m.cagr * 100.0);
    println!("Sharpe:         {:.3}", m.sharpe);
    println!("Sortino:        {:.3}", m.sortino);
    println!("Calmar:         {:.3}", m.calmar);
    println!("Max Drawdown:   {:.2}%", m.max_drawdown * 100.0);
    println!("Win Rate:       {:.1}%", m.win_rate * 100.0);
    println!("Trades:         {}", m.trade_count);
    println!("Avg Hold:       {:.1} sessions", m.avg_hold_sessions);
    println!("Turnover:       {:.1}x", m.turnover);
    println!();
}
