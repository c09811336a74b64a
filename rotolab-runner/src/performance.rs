//! Performance accounting — NAV ledger, trade round trips, and metrics.
//!
//! Metrics are pure functions: NAV series and/or trade list in, scalar out.
//! The ledger itself is derived state, rebuilt per run from committed epochs;
//! it is never part of the scheduler's commit protocol.
//!
//! Positions are weight-based and never rescaled after entry, so a round
//! trip's traded weight is simply twice its entry weight.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use rotolab_core::domain::InstrumentId;

/// Sessions per year for annualization.
const SESSIONS_PER_YEAR: f64 = 252.0;

/// One completed round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub instrument: InstrumentId,
    pub entry_date: NaiveDate,
    /// Composite score at entry.
    pub entry_score: f64,
    pub entry_weight: f64,
    pub exit_date: NaiveDate,
    /// Composite score at exit (0.0 for forced exits).
    pub exit_score: f64,
    /// Compounded close-to-close return over the holding period.
    pub return_pct: f64,
    pub sessions_held: usize,
    /// True when the exit was forced by the instrument leaving the pool.
    pub forced: bool,
}

impl TradeRecord {
    pub fn is_winner(&self) -> bool {
        self.return_pct > 0.0
    }
}

#[derive(Debug, Clone)]
struct OpenLot {
    entry_date: NaiveDate,
    entry_score: f64,
    weight: f64,
    cum_return: f64,
    sessions_held: usize,
}

/// NAV ledger over one processing window.
///
/// Each session is marked with that day's close-to-close instrument returns
/// BEFORE the session's fills are applied: the book that earned the day's
/// return is yesterday's book. NAV starts at 1.0 on the first mark.
#[derive(Debug, Default)]
pub struct Ledger {
    nav: Vec<(NaiveDate, f64)>,
    open: BTreeMap<InstrumentId, OpenLot>,
    trades: Vec<TradeRecord>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark one session. `returns` maps instrument to its close-to-close
    /// return into `date`; instruments without an entry are treated as flat.
    pub fn mark_session(&mut self, date: NaiveDate, returns: &BTreeMap<InstrumentId, f64>) {
        let day_return: f64 = self
            .open
            .iter()
            .map(|(id, lot)| lot.weight * returns.get(id).copied().unwrap_or(0.0))
            .sum();
        let prev = self.nav.last().map(|(_, v)| *v).unwrap_or(1.0);
        self.nav.push((date, prev * (1.0 + day_return)));

        for (id, lot) in self.open.iter_mut() {
            let r = returns.get(id).copied().unwrap_or(0.0);
            lot.cum_return = (1.0 + lot.cum_return) * (1.0 + r) - 1.0;
            lot.sessions_held += 1;
        }
    }

    /// Record an entry at its filled weight.
    pub fn open_position(
        &mut self,
        date: NaiveDate,
        instrument: InstrumentId,
        weight: f64,
        entry_score: f64,
    ) {
        self.open.insert(
            instrument,
            OpenLot {
                entry_date: date,
                entry_score,
                weight,
                cum_return: 0.0,
                sessions_held: 0,
            },
        );
    }

    /// Close a lot and record the round trip. Closing an instrument that is
    /// not open is a no-op (resume can replay an exit the ledger never saw
    /// enter).
    pub fn close_position(
        &mut self,
        date: NaiveDate,
        instrument: &InstrumentId,
        exit_score: f64,
        forced: bool,
    ) {
        if let Some(lot) = self.open.remove(instrument) {
            self.trades.push(TradeRecord {
                instrument: instrument.clone(),
                entry_date: lot.entry_date,
                entry_score: lot.entry_score,
                entry_weight: lot.weight,
                exit_date: date,
                exit_score,
                return_pct: lot.cum_return,
                sessions_held: lot.sessions_held,
                forced,
            });
        }
    }

    pub fn nav(&self) -> &[(NaiveDate, f64)] {
        &self.nav
    }

    pub fn nav_values(&self) -> Vec<f64> {
        self.nav.iter().map(|(_, v)| *v).collect()
    }

    pub fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Aggregate metrics over the window.
    pub fn metrics(&self) -> PortfolioMetrics {
        PortfolioMetrics::compute(&self.nav_values(), &self.trades, self.nav.len())
    }
}

/// Aggregate performance metrics for one processing window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioMetrics {
    pub total_return: f64,
    pub cagr: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub calmar: f64,
    pub max_drawdown: f64,
    pub win_rate: f64,
    pub trade_count: usize,
    pub avg_hold_sessions: f64,
    /// Traded weight per year (entries plus exits).
    pub turnover: f64,
}

impl PortfolioMetrics {
    pub fn compute(nav: &[f64], trades: &[TradeRecord], sessions: usize) -> Self {
        Self {
            total_return: total_return(nav),
            cagr: cagr(nav, sessions),
            sharpe: sharpe_ratio(nav),
            sortino: sortino_ratio(nav),
            calmar: calmar_ratio(nav, sessions),
            max_drawdown: max_drawdown(nav),
            win_rate: win_rate(trades),
            trade_count: trades.len(),
            avg_hold_sessions: avg_hold_sessions(trades),
            turnover: turnover(trades, sessions),
        }
    }
}

// ─── Individual metric functions ────────────────────────────────────

/// Total return as a fraction: (final - initial) / initial.
pub fn total_return(nav: &[f64]) -> f64 {
    if nav.len() < 2 {
        return 0.0;
    }
    let initial = nav[0];
    let final_nav = *nav.last().unwrap();
    if initial <= 0.0 {
        return 0.0;
    }
    (final_nav - initial) / initial
}

/// Compound annual growth rate, assuming 252 sessions per year.
pub fn cagr(nav: &[f64], sessions: usize) -> f64 {
    if nav.len() < 2 || sessions < 2 {
        return 0.0;
    }
    let initial = nav[0];
    let final_nav = *nav.last().unwrap();
    if initial <= 0.0 || final_nav <= 0.0 {
        return 0.0;
    }
    let years = sessions as f64 / SESSIONS_PER_YEAR;
    (final_nav / initial).powf(1.0 / years) - 1.0
}

/// Annualized Sharpe ratio of daily NAV returns (zero risk-free rate).
///
/// Returns 0.0 if variance is zero or fewer than 2 sessions.
pub fn sharpe_ratio(nav: &[f64]) -> f64 {
    let returns = session_returns(nav);
    if returns.len() < 2 {
        return 0.0;
    }
    let mean = mean_f64(&returns);
    let std = std_dev(&returns);
    if std < 1e-15 {
        return 0.0;
    }
    (mean / std) * SESSIONS_PER_YEAR.sqrt()
}

/// Annualized Sortino ratio (downside deviation only).
pub fn sortino_ratio(nav: &[f64]) -> f64 {
    let returns = session_returns(nav);
    if returns.len() < 2 {
        return 0.0;
    }
    let mean = mean_f64(&returns);
    let downside_sq: Vec<f64> = returns.iter().filter(|&&r| r < 0.0).map(|r| r * r).collect();
    if downside_sq.is_empty() {
        return 0.0; // no downside, ratio undefined
    }
    let downside_std = (downside_sq.iter().sum::<f64>() / returns.len() as f64).sqrt();
    if downside_std < 1e-15 {
        return 0.0;
    }
    (mean / downside_std) * SESSIONS_PER_YEAR.sqrt()
}

/// Calmar ratio: CAGR / |max drawdown|. Zero when either leg is degenerate.
pub fn calmar_ratio(nav: &[f64], sessions: usize) -> f64 {
    let c = cagr(nav, sessions);
    let dd = max_drawdown(nav);
    if dd >= 0.0 || c <= 0.0 {
        return 0.0;
    }
    c / dd.abs()
}

/// Maximum drawdown as a negative fraction (e.g. -0.15 = 15% drawdown).
pub fn max_drawdown(nav: &[f64]) -> f64 {
    if nav.len() < 2 {
        return 0.0;
    }
    let mut peak = nav[0];
    let mut max_dd = 0.0_f64;
    for &value in nav {
        if value > peak {
            peak = value;
        }
        if peak > 0.0 {
            let dd = (value - peak) / peak;
            if dd < max_dd {
                max_dd = dd;
            }
        }
    }
    max_dd
}

/// Fraction of round trips with a positive return.
pub fn win_rate(trades: &[TradeRecord]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    let winners = trades.iter().filter(|t| t.is_winner()).count();
    winners as f64 / trades.len() as f64
}

/// Mean holding period in sessions.
pub fn avg_hold_sessions(trades: &[TradeRecord]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    trades.iter().map(|t| t.sessions_held as f64).sum::<f64>() / trades.len() as f64
}

/// Annual turnover in weight terms. Each round trip trades its entry weight
/// twice (in and out).
pub fn turnover(trades: &[TradeRecord], sessions: usize) -> f64 {
    if trades.is_empty() || sessions < 2 {
        return 0.0;
    }
    let traded: f64 = trades.iter().map(|t| 2.0 * t.entry_weight).sum();
    let years = sessions as f64 / SESSIONS_PER_YEAR;
    traded / years
}

// ─── Helpers ────────────────────────────────────────────────────────

/// Session-over-session returns of a NAV series.
pub fn session_returns(nav: &[f64]) -> Vec<f64> {
    if nav.len() < 2 {
        return Vec::new();
    }
    nav.windows(2)
        .map(|w| if w[0] > 0.0 { (w[1] - w[0]) / w[0] } else { 0.0 })
        .collect()
}

fn mean_f64(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = mean_f64(values);
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn returns_of(pairs: &[(&str, f64)]) -> BTreeMap<InstrumentId, f64> {
        pairs
            .iter()
            .map(|(id, r)| (InstrumentId::from(*id), *r))
            .collect()
    }

    fn make_trade(return_pct: f64, entry_weight: f64, sessions_held: usize) -> TradeRecord {
        TradeRecord {
            instrument: InstrumentId::from("XLK"),
            entry_date: d(2024, 1, 2),
            entry_score: 92.0,
            entry_weight,
            exit_date: d(2024, 2, 2),
            exit_score: 35.0,
            return_pct,
            sessions_held,
            forced: false,
        }
    }

    // ── Ledger ──

    #[test]
    fn empty_ledger_marks_flat_nav() {
        let mut ledger = Ledger::new();
        ledger.mark_session(d(2024, 1, 2), &returns_of(&[("XLK", 0.05)]));
        ledger.mark_session(d(2024, 1, 3), &returns_of(&[("XLK", -0.05)]));
        let nav = ledger.nav_values();
        assert_eq!(nav, vec![1.0, 1.0]);
    }

    #[test]
    fn mark_session_compounds_weighted_returns() {
        let mut ledger = Ledger::new();
        ledger.open_position(d(2024, 1, 2), InstrumentId::from("XLK"), 0.5, 95.0);
        // Day return = 0.5 * 2% = 1%.
        ledger.mark_session(d(2024, 1, 3), &returns_of(&[("XLK", 0.02)]));
        ledger.mark_session(d(2024, 1, 4), &returns_of(&[("XLK", 0.02)]));
        let nav = ledger.nav_values();
        assert!((nav[0] - 1.01).abs() < 1e-12);
        assert!((nav[1] - 1.01 * 1.01).abs() < 1e-12);
    }

    #[test]
    fn missing_return_is_flat() {
        let mut ledger = Ledger::new();
        ledger.open_position(d(2024, 1, 2), InstrumentId::from("XLK"), 0.5, 95.0);
        ledger.mark_session(d(2024, 1, 3), &returns_of(&[("XLE", 0.10)]));
        assert!((ledger.nav_values()[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn round_trip_records_compounded_return() {
        let mut ledger = Ledger::new();
        let id = InstrumentId::from("XLK");
        ledger.open_position(d(2024, 1, 2), id.clone(), 0.25, 92.0);
        ledger.mark_session(d(2024, 1, 3), &returns_of(&[("XLK", 0.01)]));
        ledger.mark_session(d(2024, 1, 4), &returns_of(&[("XLK", 0.01)]));
        ledger.close_position(d(2024, 1, 4), &id, 38.0, false);

        assert_eq!(ledger.open_count(), 0);
        let trades = ledger.trades();
        assert_eq!(trades.len(), 1);
        let t = &trades[0];
        assert!((t.return_pct - (1.01 * 1.01 - 1.0)).abs() < 1e-12);
        assert_eq!(t.sessions_held, 2);
        assert!((t.entry_weight - 0.25).abs() < 1e-12);
        assert!(t.is_winner());
    }

    #[test]
    fn close_unknown_instrument_is_noop() {
        let mut ledger = Ledger::new();
        ledger.close_position(d(2024, 1, 4), &InstrumentId::from("ZZZ"), 0.0, true);
        assert!(ledger.trades().is_empty());
    }

    #[test]
    fn forced_flag_carried_on_trade() {
        let mut ledger = Ledger::new();
        let id = InstrumentId::from("XLE");
        ledger.open_position(d(2024, 1, 2), id.clone(), 0.2, 91.0);
        ledger.close_position(d(2024, 1, 5), &id, 0.0, true);
        assert!(ledger.trades()[0].forced);
    }

    // ── Metric functions ──

    #[test]
    fn total_return_positive() {
        let nav = vec![1.0, 1.005, 1.01, 1.1];
        assert!((total_return(&nav) - 0.1).abs() < 1e-10);
    }

    #[test]
    fn total_return_degenerate_inputs() {
        assert_eq!(total_return(&[]), 0.0);
        assert_eq!(total_return(&[1.0]), 0.0);
    }

    #[test]
    fn cagr_one_year() {
        let mut nav = vec![1.0];
        for i in 1..252 {
            nav.push(nav[i - 1] * (1.1_f64).powf(1.0 / 251.0));
        }
        let c = cagr(&nav, 252);
        assert!((c - 0.1).abs() < 0.005, "CAGR should be ~10%, got {c}");
    }

    #[test]
    fn sharpe_constant_return_is_zero() {
        let mut nav = vec![1.0];
        for i in 1..253 {
            nav.push(nav[i - 1] * 1.001);
        }
        assert_eq!(sharpe_ratio(&nav), 0.0);
    }

    #[test]
    fn sharpe_positive_for_positive_drift() {
        let mut nav = vec![1.0];
        for i in 1..253 {
            let r = if i % 2 == 0 { 1.002 } else { 1.0005 };
            nav.push(nav[i - 1] * r);
        }
        assert!(sharpe_ratio(&nav) > 5.0);
    }

    #[test]
    fn sortino_no_downside_is_zero() {
        let nav: Vec<f64> = (0..100).map(|i| 1.0 + i as f64 * 0.001).collect();
        assert_eq!(sortino_ratio(&nav), 0.0);
    }

    #[test]
    fn max_drawdown_known() {
        let nav = vec![1.0, 1.1, 0.9, 0.95];
        let expected = (0.9 - 1.1) / 1.1;
        assert!((max_drawdown(&nav) - expected).abs() < 1e-10);
    }

    #[test]
    fn max_drawdown_monotonic_is_zero() {
        let nav: Vec<f64> = (0..100).map(|i| 1.0 + i as f64 * 0.01).collect();
        assert_eq!(max_drawdown(&nav), 0.0);
    }

    #[test]
    fn win_rate_mixed() {
        let trades = vec![
            make_trade(0.05, 0.2, 10),
            make_trade(-0.02, 0.2, 5),
            make_trade(0.03, 0.2, 8),
            make_trade(-0.01, 0.2, 4),
        ];
        assert!((win_rate(&trades) - 0.5).abs() < 1e-10);
    }

    #[test]
    fn avg_hold_and_turnover() {
        let trades = vec![make_trade(0.05, 0.25, 10), make_trade(-0.02, 0.15, 20)];
        assert!((avg_hold_sessions(&trades) - 15.0).abs() < 1e-10);
        // Traded weight = 2*(0.25+0.15) = 0.8 over one year.
        let t = turnover(&trades, 252);
        assert!((t - 0.8).abs() < 1e-10);
    }

    #[test]
    fn compute_all_metrics_finite() {
        let mut nav = vec![1.0];
        for i in 1..120 {
            let r = if i % 3 == 0 { 0.997 } else { 1.002 };
            nav.push(nav[i - 1] * r);
        }
        let trades = vec![make_trade(0.05, 0.2, 10), make_trade(-0.02, 0.2, 5)];
        let m = PortfolioMetrics::compute(&nav, &trades, nav.len());
        assert!(m.total_return.is_finite());
        assert!(m.cagr.is_finite());
        assert!(m.sharpe.is_finite());
        assert!(m.sortino.is_finite());
        assert!(m.calmar.is_finite());
        assert!(m.max_drawdown.is_finite());
        assert!(m.turnover.is_finite());
        assert_eq!(m.trade_count, 2);
    }

    #[test]
    fn compute_no_trades() {
        let nav = vec![1.0; 50];
        let m = PortfolioMetrics::compute(&nav, &[], 50);
        assert_eq!(m.total_return, 0.0);
        assert_eq!(m.trade_count, 0);
        assert_eq!(m.win_rate, 0.0);
        assert_eq!(m.turnover, 0.0);
    }

    #[test]
    fn session_returns_basic() {
        let nav = vec![1.0, 1.1, 1.05];
        let r = session_returns(&nav);
        assert_eq!(r.len(), 2);
        assert!((r[0] - 0.1).abs() < 1e-10);
        assert!((r[1] - (1.05 - 1.1) / 1.1).abs() < 1e-10);
    }
}
