//! Scoring engine — continuous quantile mapping of factors to sub-scores.
//!
//! Each factor's raw column is ranked within the day's pool cross-section and
//! the percentile is multiplied by the factor's ceiling. Scores are therefore
//! always relative to the live opportunity set: the same absolute momentum
//! scores 38 in a weak pool and 12 in a hot one, which is exactly the
//! rotation question ("best available now?"), not an absolute one.

pub mod factors;

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::domain::{InstrumentId, Pool, ScoreRecord, SubScores};
use crate::features::FeatureVector;
pub use factors::{Breadth, CapitalFlow, Factor, FactorSet, RiskAdjusted, TrendResistance};

/// Percentile rank of each value within its own column.
///
/// Convention: strict-count-below / (n-1). The best raw value always maps to
/// 1.0 (so every ceiling is reachable), the worst to 0.0, equal values share
/// a percentile, and a single-member cross-section maps to the midpoint 0.5.
pub fn percentile_ranks(raw: &[f64]) -> Vec<f64> {
    let n = raw.len();
    if n == 0 {
        return Vec::new();
    }
    if n == 1 {
        return vec![0.5];
    }
    let mut sorted = raw.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    raw.iter()
        .map(|&x| {
            let below = sorted.partition_point(|&v| v < x);
            below as f64 / (n - 1) as f64
        })
        .collect()
}

/// Score every pool member with features available on `date`.
///
/// Members absent from `features` (insufficient history today) are skipped
/// entirely — no zero-filled record. Output is sorted by rank: composite
/// descending, ties by lower cluster id, then higher risk-adjusted sub-score,
/// then ascending instrument id. Ranks are 1-based.
pub fn score_pool(
    pool: &Pool,
    features: &BTreeMap<InstrumentId, FeatureVector>,
    factor_set: &FactorSet,
    ceilings: &SubScores,
    date: NaiveDate,
    degraded: bool,
) -> Vec<ScoreRecord> {
    // Cross-section in ascending id order so the percentile columns are
    // deterministic regardless of pool rank order.
    let scorable: Vec<_> = {
        let mut v: Vec<_> = pool
            .members
            .iter()
            .filter_map(|m| features.get(&m.instrument).map(|fv| (m, fv)))
            .collect();
        v.sort_by(|a, b| a.0.instrument.cmp(&b.0.instrument));
        v
    };
    if scorable.is_empty() {
        return Vec::new();
    }

    let column = |factor: &dyn Factor| -> Vec<f64> {
        percentile_ranks(&scorable.iter().map(|(_, fv)| factor.raw(fv)).collect::<Vec<_>>())
    };
    let trend = column(factor_set.trend.as_ref());
    let flow = column(factor_set.capital_flow.as_ref());
    let risk = column(factor_set.risk_adjusted.as_ref());
    let breadth = column(factor_set.breadth.as_ref());

    let mut records: Vec<ScoreRecord> = scorable
        .iter()
        .enumerate()
        .map(|(i, (member, _))| {
            let scores = SubScores {
                trend: trend[i] * ceilings.trend,
                capital_flow: flow[i] * ceilings.capital_flow,
                risk_adjusted: risk[i] * ceilings.risk_adjusted,
                breadth: breadth[i] * ceilings.breadth,
            };
            ScoreRecord::new(
                member.instrument.clone(),
                date,
                member.cluster,
                scores,
                degraded,
            )
        })
        .collect();

    rank_records(&mut records);
    records
}

/// Sort records into rank order and assign 1-based ranks in place.
///
/// The ordering is total: composite descending, then lower cluster id, then
/// higher risk-adjusted sub-score, then ascending instrument id.
pub fn rank_records(records: &mut [ScoreRecord]) {
    records.sort_by(|a, b| {
        b.composite
            .partial_cmp(&a.composite)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.cluster.cmp(&b.cluster))
            .then_with(|| {
                b.scores
                    .risk_adjusted
                    .partial_cmp(&a.scores.risk_adjusted)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.instrument.cmp(&b.instrument))
    });
    for (i, record) in records.iter_mut().enumerate() {
        record.rank = i + 1;
    }
}

/// BLAKE3 digest over a score batch, for the daily audit payload.
pub fn score_digest(records: &[ScoreRecord]) -> String {
    let json = serde_json::to_string(records).unwrap_or_default();
    blake3::hash(json.as_bytes()).to_hex().to_string()
}
