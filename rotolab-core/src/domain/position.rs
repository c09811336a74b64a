//! Positions and weight deltas.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::ids::{ClusterId, InstrumentId};

/// An open holding, expressed as a portfolio weight in [0, 1].
///
/// Mutated only at rebalance execution; between epochs positions are
/// read-only snapshots. `cluster_at_entry` is pinned at entry time; the live
/// partition changes monthly, and the diversification cap is judged against
/// current assignments with entry-time ones as the fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub instrument: InstrumentId,
    pub weight: f64,
    pub entry_date: NaiveDate,
    pub entry_score: f64,
    pub cluster_at_entry: ClusterId,
}

/// Requested portfolio change for one instrument, handed to the execution
/// venue. Weights are targets, not increments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightDelta {
    pub instrument: InstrumentId,
    pub side: DeltaSide,
    /// Target weight after execution (0.0 for exits).
    pub target_weight: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaSide {
    Enter,
    Exit,
}

/// Sum of weights across a position set.
pub fn gross_weight(positions: &[Position]) -> f64 {
    positions.iter().map(|p| p.weight).sum()
}
