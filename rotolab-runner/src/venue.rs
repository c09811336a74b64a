//! Execution venues: turn requested weight deltas into fills.
//!
//! The engine proposes target weights; a venue reports what actually filled.
//! Position state always carries the filled weight, and any gap between the
//! two is preserved as an `ExecutionMismatch` in the epoch's audit event.
//! The scheduler never retries or reconciles a mismatch on its own.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use rotolab_core::domain::{DeltaSide, ExecutionMismatch, InstrumentId, WeightDelta};

const MISMATCH_EPSILON: f64 = 1e-12;

/// One executed delta.
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub instrument: InstrumentId,
    pub side: DeltaSide,
    pub requested_weight: f64,
    pub filled_weight: f64,
}

impl Fill {
    /// The audit record for this fill, if it deviated from the request.
    pub fn mismatch(&self) -> Option<ExecutionMismatch> {
        if (self.requested_weight - self.filled_weight).abs() > MISMATCH_EPSILON {
            Some(ExecutionMismatch {
                instrument: self.instrument.clone(),
                requested_weight: self.requested_weight,
                filled_weight: self.filled_weight,
            })
        } else {
            None
        }
    }
}

/// An execution venue. Implementations must be deterministic for a given
/// (date, deltas) input so that crash-resume replays reach identical state.
pub trait Venue: Send {
    /// Execute the session's deltas and report one fill per delta, in input
    /// order.
    fn execute(&mut self, date: NaiveDate, deltas: &[WeightDelta]) -> Vec<Fill>;

    /// Name of this venue
    fn name(&self) -> &str;
}

/// Paper venue: every request fills exactly. The default.
#[derive(Debug, Clone, Copy, Default)]
pub struct PaperVenue;

impl Venue for PaperVenue {
    fn execute(&mut self, _date: NaiveDate, deltas: &[WeightDelta]) -> Vec<Fill> {
        deltas
            .iter()
            .map(|d| Fill {
                instrument: d.instrument.clone(),
                side: d.side,
                requested_weight: d.target_weight,
                filled_weight: d.target_weight,
            })
            .collect()
    }

    fn name(&self) -> &str {
        "paper"
    }
}

/// Haircut venue: entries fill short of the request by a fixed number of
/// basis points, modelling spread cost and partial fills. Exits always close
/// in full so no dust position survives an exit signal.
#[derive(Debug, Clone, Copy)]
pub struct HaircutVenue {
    /// Entry shortfall in basis points (e.g. 5 = 0.05%).
    pub bps: f64,
}

impl HaircutVenue {
    pub fn new(bps: f64) -> Self {
        Self { bps }
    }
}

impl Venue for HaircutVenue {
    fn execute(&mut self, _date: NaiveDate, deltas: &[WeightDelta]) -> Vec<Fill> {
        deltas
            .iter()
            .map(|d| {
                let filled = match d.side {
                    DeltaSide::Enter => d.target_weight * (1.0 - self.bps / 10_000.0),
                    DeltaSide::Exit => d.target_weight,
                };
                Fill {
                    instrument: d.instrument.clone(),
                    side: d.side,
                    requested_weight: d.target_weight,
                    filled_weight: filled,
                }
            })
            .collect()
    }

    fn name(&self) -> &str {
        "haircut"
    }
}

/// Venue selection for the run configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VenueConfig {
    #[default]
    Paper,
    Haircut {
        bps: f64,
    },
}

impl VenueConfig {
    pub fn build(&self) -> Box<dyn Venue> {
        match self {
            VenueConfig::Paper => Box::new(PaperVenue),
            VenueConfig::Haircut { bps } => Box::new(HaircutVenue::new(*bps)),
        }
    }
}
