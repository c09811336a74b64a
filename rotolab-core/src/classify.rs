//! Signal classifier — score bands, hysteresis, and the diversification cap.
//!
//! Pure decision logic: scores and held positions in, actions out. Two rules
//! do the heavy lifting:
//!
//! - Hysteresis: a held instrument exits only on a sell-band score. Decaying
//!   from the buy band into the hold band changes nothing, which is what
//!   keeps the portfolio from churning around the entry threshold.
//! - Cluster cap: a buy-band score in a cluster whose slots are taken is
//!   downgraded to hold and recorded as a near-miss. Entrants accepted
//!   earlier in the same epoch occupy slots immediately, so two same-cluster
//!   buy candidates on one day admit only the better-ranked one.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::config::SignalConfig;
use crate::domain::{
    ClusterId, ClusterSet, DiversificationOverride, InstrumentId, Pool, Position, ScoreRecord,
    Signal, SignalAction,
};

/// Classifier output for one daily epoch.
#[derive(Debug, Clone, Default)]
pub struct ClassifyOutcome {
    /// One signal per scored pool member, in rank order, followed by forced
    /// exits for held instruments that dropped out of the pool.
    pub signals: Vec<Signal>,
    /// Buy-band scores downgraded by the cluster cap.
    pub near_misses: Vec<DiversificationOverride>,
}

/// Band a composite score into an action, before any held/cap adjustment.
fn band(composite: f64, config: &SignalConfig) -> SignalAction {
    if composite >= config.buy_threshold {
        SignalAction::Buy
    } else if composite >= config.hold_threshold {
        SignalAction::Hold
    } else if composite >= config.sell_threshold {
        SignalAction::Sell
    } else {
        SignalAction::StrongSell
    }
}

/// Classify one day's ranked records against the held book.
///
/// `records` must be in rank order (as produced by the scoring engine);
/// rank order is what arbitrates same-day competition for cluster slots.
pub fn classify(
    records: &[ScoreRecord],
    held: &[Position],
    pool: &Pool,
    clusters: &ClusterSet,
    config: &SignalConfig,
    date: NaiveDate,
) -> ClassifyOutcome {
    // Occupancy by current cluster assignment; a holding that lost its
    // assignment (left the universe) counts under its entry cluster until the
    // forced exit executes.
    let mut occupancy: BTreeMap<ClusterId, Vec<InstrumentId>> = BTreeMap::new();
    for p in held {
        let cluster = clusters
            .cluster_of(&p.instrument)
            .unwrap_or(p.cluster_at_entry);
        occupancy.entry(cluster).or_default().push(p.instrument.clone());
    }

    let is_held =
        |id: &InstrumentId| -> bool { held.iter().any(|p| &p.instrument == id) };

    let mut outcome = ClassifyOutcome::default();

    for record in records {
        let banded = band(record.composite, config);
        let held_now = is_held(&record.instrument);

        let (action, overridden) = match banded {
            SignalAction::Buy if held_now => (SignalAction::Hold, None),
            SignalAction::Buy => {
                let occupants = occupancy.entry(record.cluster).or_default();
                if occupants.len() >= config.per_cluster_cap {
                    let near_miss = DiversificationOverride {
                        instrument: record.instrument.clone(),
                        cluster: record.cluster,
                        composite: record.composite,
                        occupied_by: occupants.clone(),
                    };
                    outcome.near_misses.push(near_miss.clone());
                    (SignalAction::Hold, Some(near_miss))
                } else {
                    occupants.push(record.instrument.clone());
                    (SignalAction::Buy, None)
                }
            }
            other => (other, None),
        };

        outcome.signals.push(Signal {
            instrument: record.instrument.clone(),
            date,
            cluster: record.cluster,
            action,
            composite: record.composite,
            overridden,
            forced: false,
        });
    }

    // Held instruments that fell out of the pool have no score to band; they
    // exit unconditionally.
    let mut evicted: Vec<&Position> = held
        .iter()
        .filter(|p| !pool.contains(&p.instrument))
        .collect();
    evicted.sort_by(|a, b| a.instrument.cmp(&b.instrument));
    for p in evicted {
        let cluster = clusters
            .cluster_of(&p.instrument)
            .unwrap_or(p.cluster_at_entry);
        outcome.signals.push(Signal {
            instrument: p.instrument.clone(),
            date,
            cluster,
            action: SignalAction::StrongSell,
            composite: 0.0,
            overridden: None,
            forced: true,
        });
    }

    outcome
}
