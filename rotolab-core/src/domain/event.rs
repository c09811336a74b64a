//! Rebalance events — the append-only audit log of everything that changed.
//!
//! One event per committed epoch. The event append is the commit point of the
//! scheduler's write protocol: snapshots written before it are provisional,
//! and replay treats any (kind, date, config) triple present here as done.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::ids::{ConfigHash, InstrumentId};
use super::position::WeightDelta;
use super::signal::DiversificationOverride;

/// Schema version for persisted events. Bump on breaking layout changes.
pub const EVENT_SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    EVENT_SCHEMA_VERSION
}

/// Which cadence produced an epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EpochKind {
    Monthly,
    Daily,
}

impl std::fmt::Display for EpochKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EpochKind::Monthly => write!(f, "monthly"),
            EpochKind::Daily => write!(f, "daily"),
        }
    }
}

/// A requested delta the venue did not fill as asked. The filled weight is
/// what position state carries forward; the record preserves the gap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMismatch {
    pub instrument: InstrumentId,
    pub requested_weight: f64,
    pub filled_weight: f64,
}

/// What a committed epoch did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPayload {
    /// Month-end re-clustering and pool rebuild completed.
    MonthlyRebuild {
        cluster_digest: String,
        pool_digest: String,
        pool_size: usize,
        converged: bool,
        iterations: usize,
        /// Instruments excluded for insufficient history this epoch.
        skipped: Vec<InstrumentId>,
    },

    /// Month-end rebuild aborted: the screen left too few candidates. The
    /// prior pool stays live. Recording the abort distinguishes "epoch ran
    /// and failed" from "no epoch ran".
    MonthlyAborted { survivors: usize, minimum: usize },

    /// Daily scoring, classification, allocation, and execution completed.
    DailyRebalance {
        score_digest: String,
        scored: usize,
        entered: Vec<WeightDelta>,
        exited: Vec<WeightDelta>,
        near_misses: Vec<DiversificationOverride>,
        mismatches: Vec<ExecutionMismatch>,
        /// Buy signals dropped by the gross-weight cap (lowest composite first).
        dropped: Vec<InstrumentId>,
        gross_weight: f64,
        skipped: Vec<InstrumentId>,
    },
}

/// One line of the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceEvent {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    /// Monotonic sequence number across the whole log.
    pub seq: u64,
    pub kind: EpochKind,
    pub date: NaiveDate,
    pub config_hash: ConfigHash,
    pub payload: EventPayload,
}

impl RebalanceEvent {
    pub fn new(
        seq: u64,
        kind: EpochKind,
        date: NaiveDate,
        config_hash: ConfigHash,
        payload: EventPayload,
    ) -> Self {
        Self {
            schema_version: EVENT_SCHEMA_VERSION,
            seq,
            kind,
            date,
            config_hash,
            payload,
        }
    }

    /// Identity for idempotence checks: same kind, date, and config means
    /// the epoch already committed.
    pub fn matches(&self, kind: EpochKind, date: NaiveDate, config_hash: &ConfigHash) -> bool {
        self.kind == kind && self.date == date && &self.config_hash == config_hash
    }
}
