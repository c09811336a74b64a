//! Feature pipeline — raw series in, per-instrument feature vectors out.
//!
//! All computations are pure slice functions over the trailing window of an
//! instrument's bars. An instrument with fewer clean trailing sessions than
//! the longest lookback is rejected with `InsufficientHistory`; nothing is
//! ever zero-filled, because a fabricated feature would silently poison the
//! cross-sectional percentiles downstream.

use serde::{Deserialize, Serialize};

use crate::config::LookbackConfig;
use crate::domain::{Bar, InstrumentId};
use crate::error::EngineError;

/// Trading sessions per year, for annualizing volatility and Sharpe.
pub const SESSIONS_PER_YEAR: f64 = 252.0;

/// One instrument's features on one evaluation date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub instrument: InstrumentId,
    /// Return over the short window.
    pub short_return: f64,
    /// Return over the medium window.
    pub medium_return: f64,
    /// Annualized standard deviation of daily returns over the medium window.
    pub volatility: f64,
    /// Mean traded value short window / mean traded value medium window.
    pub value_ratio: f64,
    /// Close position inside the range-window high-low band, in [0,1].
    pub range_position: f64,
    /// Annualized trailing Sharpe over the sharpe window.
    pub sharpe: f64,
    /// Exogenous breadth if the feed supplies it, else the close-above-MA proxy.
    pub breadth: f64,
}

impl FeatureVector {
    /// Compute features from an instrument's bar history. Bars must be in
    /// ascending date order; only the clean trailing run (no void bars) is
    /// used, and it must cover the longest lookback.
    pub fn compute(
        instrument: InstrumentId,
        bars: &[Bar],
        lookbacks: &LookbackConfig,
    ) -> Result<Self, EngineError> {
        let need = lookbacks.required_history();
        let sane_tail = bars.iter().rev().take_while(|b| b.is_sane()).count();
        if sane_tail < need {
            return Err(EngineError::InsufficientHistory {
                instrument,
                have: sane_tail,
                need,
            });
        }
        let tail = &bars[bars.len() - sane_tail..];
        let closes: Vec<f64> = tail.iter().map(|b| b.close).collect();
        let values: Vec<f64> = tail.iter().map(|b| b.value).collect();

        let breadth = match tail.last().and_then(|b| b.breadth) {
            Some(x) => x.clamp(0.0, 1.0),
            None => breadth_proxy(&closes, lookbacks.breadth_window, lookbacks.breadth_ma),
        };

        Ok(Self {
            instrument,
            short_return: trailing_return(&closes, lookbacks.short),
            medium_return: trailing_return(&closes, lookbacks.medium),
            volatility: realized_volatility(&closes, lookbacks.medium),
            value_ratio: value_ratio(&values, lookbacks.short, lookbacks.medium),
            range_position: range_position(tail, lookbacks.range),
            sharpe: trailing_sharpe(&closes, lookbacks.sharpe),
            breadth,
        })
    }

    /// The columns fed to the monthly clustering, in fixed order:
    /// short return, medium return, volatility, value ratio.
    pub fn clustering_row(&self) -> [f64; 4] {
        [
            self.short_return,
            self.medium_return,
            self.volatility,
            self.value_ratio,
        ]
    }
}

/// Return over the last `window` sessions: close[t] / close[t-window] - 1.
pub fn trailing_return(closes: &[f64], window: usize) -> f64 {
    let n = closes.len();
    if n < window + 1 {
        return f64::NAN;
    }
    let past = closes[n - 1 - window];
    if past <= 0.0 {
        return f64::NAN;
    }
    closes[n - 1] / past - 1.0
}

/// Annualized standard deviation of the last `window` daily returns.
pub fn realized_volatility(closes: &[f64], window: usize) -> f64 {
    let n = closes.len();
    if n < window + 1 {
        return f64::NAN;
    }
    let returns: Vec<f64> = closes[n - 1 - window..]
        .windows(2)
        .map(|w| w[1] / w[0] - 1.0)
        .collect();
    std_dev(&returns) * SESSIONS_PER_YEAR.sqrt()
}

/// Mean traded value over the short window divided by the mean over the long
/// window. A dead long baseline (zero traded value) maps to the neutral 1.0.
pub fn value_ratio(values: &[f64], short: usize, long: usize) -> f64 {
    let n = values.len();
    if n < long || short == 0 || short > long {
        return f64::NAN;
    }
    let short_mean = mean(&values[n - short..]);
    let long_mean = mean(&values[n - long..]);
    if long_mean <= 0.0 {
        return 1.0;
    }
    short_mean / long_mean
}

/// Where the latest close sits inside the high-low band of the last `window`
/// bars: 0 at the low, 1 at the high. A flat band maps to 0.5.
pub fn range_position(bars: &[Bar], window: usize) -> f64 {
    let n = bars.len();
    if n < window || window == 0 {
        return f64::NAN;
    }
    let tail = &bars[n - window..];
    let high = tail.iter().map(|b| b.high).fold(f64::MIN, f64::max);
    let low = tail.iter().map(|b| b.low).fold(f64::MAX, f64::min);
    if high <= low {
        return 0.5;
    }
    let close = tail[window - 1].close;
    ((close - low) / (high - low)).clamp(0.0, 1.0)
}

/// Annualized Sharpe of the daily returns inside the last `window` sessions
/// (window - 1 returns). Zero-variance history maps to 0.
pub fn trailing_sharpe(closes: &[f64], window: usize) -> f64 {
    let n = closes.len();
    if n < window || window < 2 {
        return f64::NAN;
    }
    let returns: Vec<f64> = closes[n - window..]
        .windows(2)
        .map(|w| w[1] / w[0] - 1.0)
        .collect();
    let sd = std_dev(&returns);
    if sd == 0.0 {
        return 0.0;
    }
    mean(&returns) / sd * SESSIONS_PER_YEAR.sqrt()
}

/// Fraction of the last `window` sessions whose close sat above its own
/// `ma`-session moving average.
pub fn breadth_proxy(closes: &[f64], window: usize, ma: usize) -> f64 {
    let n = closes.len();
    if window == 0 || ma == 0 || n < window + ma - 1 {
        return f64::NAN;
    }
    let mut above = 0usize;
    for i in (n - window)..n {
        let avg = mean(&closes[i + 1 - ma..=i]);
        if closes[i] > avg {
            above += 1;
        }
    }
    above as f64 / window as f64
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return f64::NAN;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

fn std_dev(xs: &[f64]) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let m = mean(xs);
    let var = xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (xs.len() - 1) as f64;
    var.sqrt()
}

/// Create bars from close prices for testing.
///
/// Open = previous close, high/low bracket open and close by 1.0, volume is
/// constant, traded value = close × volume.
#[cfg(test)]
pub fn make_bars(closes: &[f64]) -> Vec<Bar> {
    let base_date = chrono::NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            Bar {
                date: base_date + chrono::Duration::days(i as i64),
                open,
                high: open.max(close) + 1.0,
                low: (open.min(close) - 1.0).max(0.01),
                close,
                volume: 1000,
                value: close * 1000.0,
                breadth: None,
            }
        })
        .collect()
}

/// Assert two f64 values are approximately equal (within epsilon).
#[cfg(test)]
pub fn assert_approx(actual: f64, expected: f64, epsilon: f64) {
    assert!(
        (actual - expected).abs() < epsilon,
        "assert_approx failed: actual={actual}, expected={expected}, diff={}, epsilon={epsilon}",
        (actual - expected).abs()
    );
}

/// Default epsilon for feature tests.
#[cfg(test)]
pub const DEFAULT_EPSILON: f64 = 1e-10;
