//! Engine error taxonomy.
//!
//! Only conditions that stop work are errors. Conditions the engine survives
//! are modeled as data instead: clustering non-convergence is a flag on the
//! `ClusterSet`, a cluster-cap downgrade is a `DiversificationOverride`
//! record, and a fill deviation is an `ExecutionMismatch` record.

use thiserror::Error;

use crate::domain::InstrumentId;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The instrument has fewer sessions than the longest factor lookback.
    /// The caller excludes it from the epoch; nothing is zero-filled.
    #[error("insufficient history for '{instrument}': have {have} sessions, need {need}")]
    InsufficientHistory {
        instrument: InstrumentId,
        have: usize,
        need: usize,
    },

    /// The fundamentals screen left too few candidates to build a usable
    /// pool. The epoch aborts and the prior pool stays live.
    #[error("candidate pool too small: {survivors} screen survivors, minimum {minimum}")]
    EmptyPool { survivors: usize, minimum: usize },

    #[error("unknown instrument '{0}'")]
    UnknownInstrument(InstrumentId),

    #[error("universe is empty")]
    EmptyUniverse,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_history_message() {
        let err = EngineError::InsufficientHistory {
            instrument: InstrumentId::from("NEWIPO"),
            have: 40,
            need: 60,
        };
        assert_eq!(
            err.to_string(),
            "insufficient history for 'NEWIPO': have 40 sessions, need 60"
        );
    }

    #[test]
    fn empty_pool_message() {
        let err = EngineError::EmptyPool {
            survivors: 4,
            minimum: 10,
        };
        assert!(err.to_string().contains("4 screen survivors"));
    }
}
