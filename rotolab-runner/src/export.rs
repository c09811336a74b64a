//! Reporting and export — JSON, CSV, and Markdown artifact generation.
//!
//! Three export formats for run results:
//! - **JSON**: full round-trip serialization of a [`RunReport`] with schema
//!   versioning
//! - **CSV**: score cross-sections, trade tape, and NAV series for external
//!   analysis tools
//! - **Markdown**: human-readable run reports and store status summaries
//!
//! Artifact directories are named after the window end and the config hash
//! rather than the wall clock, so re-exporting the same run overwrites the
//! same directory instead of accumulating copies.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use rotolab_core::domain::{
    gross_weight, ConfigHash, EventPayload, Position, RebalanceEvent, ScoreRecord,
};

use crate::performance::TradeRecord;
use crate::scheduler::RunSummary;
use crate::store::PortfolioState;

pub const REPORT_SCHEMA_VERSION: u32 = 1;

fn default_report_schema_version() -> u32 {
    REPORT_SCHEMA_VERSION
}

/// Everything a finished run exports: provenance, the scheduler's summary,
/// and the derived performance state. Assembled by the caller from the
/// scheduler after `run` returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    #[serde(default = "default_report_schema_version")]
    pub schema_version: u32,
    pub config_hash: ConfigHash,
    pub dataset_hash: String,
    pub universe_size: usize,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub pool_epoch: Option<NaiveDate>,
    pub pool_size: Option<usize>,
    pub summary: RunSummary,
    pub positions: Vec<Position>,
    pub trades: Vec<TradeRecord>,
    pub nav: Vec<(NaiveDate, f64)>,
}

// ─── JSON export ────────────────────────────────────────────────────

/// Serialize a `RunReport` to pretty JSON.
pub fn export_json(report: &RunReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("failed to serialize RunReport to JSON")
}

/// Deserialize a `RunReport` from JSON, rejecting unknown schema versions.
pub fn import_json(json: &str) -> Result<RunReport> {
    let report: RunReport =
        serde_json::from_str(json).context("failed to deserialize RunReport from JSON")?;
    if report.schema_version > REPORT_SCHEMA_VERSION {
        bail!(
            "unsupported report schema version {} (max supported: {})",
            report.schema_version,
            REPORT_SCHEMA_VERSION
        );
    }
    Ok(report)
}

// ─── CSV export ─────────────────────────────────────────────────────

/// Export one day's score cross-section as CSV, one row per pool member.
///
/// Columns: date, rank, instrument, cluster, composite, trend, capital_flow,
/// risk_adjusted, breadth, degraded
pub fn export_scores_csv(records: &[ScoreRecord]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);

    wtr.write_record([
        "date",
        "rank",
        "instrument",
        "cluster",
        "composite",
        "trend",
        "capital_flow",
        "risk_adjusted",
        "breadth",
        "degraded",
    ])?;

    for r in records {
        wtr.write_record([
            &r.date.to_string(),
            &r.rank.to_string(),
            &r.instrument.to_string(),
            &r.cluster.to_string(),
            &format!("{:.2}", r.composite),
            &format!("{:.2}", r.scores.trend),
            &format!("{:.2}", r.scores.capital_flow),
            &format!("{:.2}", r.scores.risk_adjusted),
            &format!("{:.2}", r.scores.breadth),
            &r.degraded.to_string(),
        ])?;
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Export the trade tape as CSV, one row per completed round trip.
///
/// Columns: instrument, entry_date, entry_weight, entry_score, exit_date,
/// exit_score, return_pct, sessions_held, forced
pub fn export_trades_csv(trades: &[TradeRecord]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);

    wtr.write_record([
        "instrument",
        "entry_date",
        "entry_weight",
        "entry_score",
        "exit_date",
        "exit_score",
        "return_pct",
        "sessions_held",
        "forced",
    ])?;

    for t in trades {
        wtr.write_record([
            &t.instrument.to_string(),
            &t.entry_date.to_string(),
            &format!("{:.4}", t.entry_weight),
            &format!("{:.2}", t.entry_score),
            &t.exit_date.to_string(),
            &format!("{:.2}", t.exit_score),
            &format!("{:.6}", t.return_pct),
            &t.sessions_held.to_string(),
            &t.forced.to_string(),
        ])?;
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Export the NAV series as CSV with date and nav columns (NAV starts at 1.0).
pub fn export_nav_csv(nav: &[(NaiveDate, f64)]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["date", "nav"])?;
    for (date, value) in nav {
        wtr.write_record([&date.to_string(), &format!("{:.6}", value)])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

// ─── Artifact bundle ────────────────────────────────────────────────

/// Save the full artifact set for one run.
///
/// Creates a directory named `{window_end}_{hash8}/` under `output_dir`
/// containing:
/// - `manifest.json` — the full `RunReport`
/// - `report.md` — human-readable run report
/// - `trades.csv` — completed round trips
/// - `nav.csv` — session-by-session NAV
///
/// Returns the path to the created directory.
pub fn save_artifacts(report: &RunReport, output_dir: &Path) -> Result<PathBuf> {
    let dirname = format!("{}_{}", report.window_end, short_hash(&report.config_hash));
    let run_dir = output_dir.join(dirname);
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create artifact dir: {}", run_dir.display()))?;

    let json = export_json(report)?;
    std::fs::write(run_dir.join("manifest.json"), &json)?;

    let md = generate_report(report);
    std::fs::write(run_dir.join("report.md"), &md)?;

    let trades_csv = export_trades_csv(&report.trades)?;
    std::fs::write(run_dir.join("trades.csv"), &trades_csv)?;

    let nav_csv = export_nav_csv(&report.nav)?;
    std::fs::write(run_dir.join("nav.csv"), &nav_csv)?;

    Ok(run_dir)
}

/// Load a `RunReport` from an artifact directory's manifest.json.
///
/// Rejects unknown schema versions.
pub fn load_artifacts(dir: &Path) -> Result<RunReport> {
    let manifest_path = dir.join("manifest.json");
    let json = std::fs::read_to_string(&manifest_path)
        .with_context(|| format!("failed to read {}", manifest_path.display()))?;
    import_json(&json)
}

// ─── Markdown reports ───────────────────────────────────────────────

/// Generate a Markdown report for a single run.
pub fn generate_report(report: &RunReport) -> String {
    let mut md = String::with_capacity(2048);

    md.push_str("# Rotation Run Report\n\n");

    // Run metadata
    md.push_str("## Run\n\n");
    md.push_str("| Field | Value |\n");
    md.push_str("| --- | --- |\n");
    md.push_str(&format!(
        "| Window | {} to {} |\n",
        report.window_start, report.window_end
    ));
    md.push_str(&format!("| Universe | {} instruments |\n", report.universe_size));
    md.push_str(&format!("| Config Hash | {} |\n", short_hash(&report.config_hash)));
    md.push_str(&format!("| Dataset Hash | {} |\n", report.dataset_hash));
    match (report.pool_epoch, report.pool_size) {
        (Some(epoch), Some(size)) => {
            md.push_str(&format!("| Pool | {size} members (epoch {epoch}) |\n"));
        }
        _ => md.push_str("| Pool | none |\n"),
    }
    md.push('\n');

    // Epoch counts
    let s = &report.summary;
    md.push_str("## Epochs\n\n");
    md.push_str("| Field | Value |\n");
    md.push_str("| --- | --- |\n");
    md.push_str(&format!("| Sessions | {} |\n", s.sessions));
    md.push_str(&format!("| Monthly Committed | {} |\n", s.monthly_committed));
    md.push_str(&format!("| Monthly Aborted | {} |\n", s.monthly_aborted));
    md.push_str(&format!("| Daily Committed | {} |\n", s.daily_committed));
    md.push_str(&format!("| Replayed | {} |\n", s.replayed));
    md.push_str(&format!("| Idle | {} |\n", s.idle));
    md.push('\n');

    // Performance summary
    let m = &s.metrics;
    md.push_str("## Performance\n\n");
    md.push_str("| Metric | Value |\n");
    md.push_str("| --- | --- |\n");
    md.push_str(&format!(
        "| Total Return | {:.2}% |\n",
        m.total_return * 100.0
    ));
    md.push_str(&format!("| CAGR | {:.2}% |\n", m.cagr * 100.0));
    md.push_str(&format!("| Sharpe | {:.3} |\n", m.sharpe));
    md.push_str(&format!("| Sortino | {:.3} |\n", m.sortino));
    md.push_str(&format!("| Calmar | {:.3} |\n", m.calmar));
    md.push_str(&format!(
        "| Max Drawdown | {:.2}% |\n",
        m.max_drawdown * 100.0
    ));
    md.push_str(&format!("| Win Rate | {:.1}% |\n", m.win_rate * 100.0));
    md.push_str(&format!("| Trades | {} |\n", m.trade_count));
    md.push_str(&format!(
        "| Avg Hold | {:.1} sessions |\n",
        m.avg_hold_sessions
    ));
    md.push_str(&format!("| Turnover | {:.1}x |\n", m.turnover));
    md.push('\n');

    md.push_str(&positions_section(&report.positions));

    md
}

/// Generate a Markdown status summary from the persisted portfolio state.
pub fn generate_status(state: &PortfolioState, last_event: Option<&RebalanceEvent>) -> String {
    let mut md = String::with_capacity(1024);

    md.push_str("# Portfolio Status\n\n");
    md.push_str("| Field | Value |\n");
    md.push_str("| --- | --- |\n");
    md.push_str(&format!("| As Of | {} |\n", state.as_of));
    md.push_str(&format!("| Last Seq | {} |\n", state.last_seq));
    match state.pool_epoch {
        Some(epoch) => md.push_str(&format!("| Pool Epoch | {epoch} |\n")),
        None => md.push_str("| Pool Epoch | none |\n"),
    }
    md.push('\n');

    md.push_str(&positions_section(&state.positions));

    if let Some(event) = last_event {
        md.push_str("## Last Event\n\n");
        md.push_str(&format!("{}\n", describe_event(event)));
    }

    md
}

/// One-line audit description of an event, used by status output and the
/// audit listing.
pub fn describe_event(event: &RebalanceEvent) -> String {
    let head = format!("seq {} {} {}", event.seq, event.date, event.kind);
    match &event.payload {
        EventPayload::MonthlyRebuild {
            pool_size,
            converged,
            iterations,
            skipped,
            ..
        } => {
            let convergence = if *converged {
                format!("converged in {iterations} iterations")
            } else {
                format!("degraded after {iterations} iterations")
            };
            format!(
                "{head}: pool {pool_size}, {convergence}, {} skipped",
                skipped.len()
            )
        }
        EventPayload::MonthlyAborted { survivors, minimum } => {
            format!("{head}: aborted, {survivors} survivors (minimum {minimum})")
        }
        EventPayload::DailyRebalance {
            scored,
            entered,
            exited,
            near_misses,
            mismatches,
            dropped,
            gross_weight,
            ..
        } => {
            let mut line = format!(
                "{head}: scored {scored}, {} in, {} out, gross {:.4}",
                entered.len(),
                exited.len(),
                gross_weight
            );
            if !near_misses.is_empty() {
                line.push_str(&format!(", {} near-miss", near_misses.len()));
            }
            if !dropped.is_empty() {
                line.push_str(&format!(", {} dropped", dropped.len()));
            }
            if !mismatches.is_empty() {
                line.push_str(&format!(", {} mismatch", mismatches.len()));
            }
            line
        }
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

fn positions_section(positions: &[Position]) -> String {
    let mut md = String::new();
    md.push_str("## Open Positions\n\n");
    if positions.is_empty() {
        md.push_str("None.\n");
        return md;
    }
    md.push_str("| Instrument | Weight | Entry Date | Entry Score | Cluster |\n");
    md.push_str("| --- | ---: | --- | ---: | --- |\n");
    for p in positions {
        md.push_str(&format!(
            "| {} | {:.4} | {} | {:.1} | {} |\n",
            p.instrument, p.weight, p.entry_date, p.entry_score, p.cluster_at_entry
        ));
    }
    md.push_str(&format!("\nGross weight: {:.4}\n", gross_weight(positions)));
    md
}

fn short_hash(hash: &ConfigHash) -> &str {
    let full = hash.0.as_str();
    &full[..full.len().min(8)]
}
