//! Score records — the daily explainable output of the scoring engine.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::ids::{ClusterId, InstrumentId};

/// The four factor sub-scores, each already scaled to its ceiling.
///
/// The composite is always the plain sum; keeping the addends visible is what
/// makes a score explainable ("92 because trend 38 + flow 27 + risk 18 +
/// breadth 9"), so the record never stores a composite that the sub-scores
/// cannot reproduce.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubScores {
    pub trend: f64,
    pub capital_flow: f64,
    pub risk_adjusted: f64,
    pub breadth: f64,
}

impl SubScores {
    pub fn composite(&self) -> f64 {
        self.trend + self.capital_flow + self.risk_adjusted + self.breadth
    }

    /// Check each sub-score against its ceiling (and non-negativity).
    pub fn within_ceilings(&self, ceilings: &SubScores) -> bool {
        let eps = 1e-9;
        self.trend >= -eps
            && self.trend <= ceilings.trend + eps
            && self.capital_flow >= -eps
            && self.capital_flow <= ceilings.capital_flow + eps
            && self.risk_adjusted >= -eps
            && self.risk_adjusted <= ceilings.risk_adjusted + eps
            && self.breadth >= -eps
            && self.breadth <= ceilings.breadth + eps
    }
}

/// One instrument's score on one trading day. Append-only, keyed by
/// (instrument, date); never mutated after the epoch commits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub instrument: InstrumentId,
    pub date: NaiveDate,
    pub cluster: ClusterId,
    pub scores: SubScores,
    pub composite: f64,
    /// 1-based rank within the day's pool cross-section (1 = best).
    pub rank: usize,
    /// Carried from the epoch's ClusterSet: true when the partition that
    /// produced `cluster` did not converge.
    pub degraded: bool,
}

impl ScoreRecord {
    /// Build an unranked record. The scoring engine assigns ranks after the
    /// whole cross-section is computed.
    pub fn new(
        instrument: InstrumentId,
        date: NaiveDate,
        cluster: ClusterId,
        scores: SubScores,
        degraded: bool,
    ) -> Self {
        let composite = scores.composite();
        debug_assert!(
            (0.0..=100.0 + 1e-9).contains(&composite),
            "composite {composite} out of [0,100] for {instrument}"
        );
        Self {
            instrument,
            date,
            cluster,
            scores,
            composite,
            rank: 0,
            degraded,
        }
    }
}
