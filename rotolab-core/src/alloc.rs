//! Allocator — risk-parity weights under position and gross caps.
//!
//! Each entrant gets weight `vol_target / realized_vol`, clamped to the
//! per-position cap, so a calm sector takes a larger slice than a violent
//! one and every position carries roughly the same volatility budget. When
//! the book cannot fit every entrant under the gross cap, whole entrants are
//! dropped lowest-composite-first; weights are never rescaled, because a
//! squeezed-down position would no longer carry its intended risk budget.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::config::AllocationConfig;
use crate::domain::{
    gross_weight, DeltaSide, InstrumentId, Position, Signal, SignalAction, WeightDelta,
};
use crate::features::FeatureVector;

/// Allocation result for one daily epoch.
#[derive(Debug, Clone, Default)]
pub struct AllocationOutcome {
    /// Exits first (ascending id), then entries in signal order.
    pub deltas: Vec<WeightDelta>,
    /// Target position set after the deltas execute, ascending id.
    pub positions: Vec<Position>,
    /// Entrants dropped by the gross cap, lowest composite first.
    pub dropped: Vec<InstrumentId>,
}

/// Convert classified signals into weight deltas against the held book.
pub fn allocate(
    signals: &[Signal],
    features: &BTreeMap<InstrumentId, FeatureVector>,
    held: &[Position],
    config: &AllocationConfig,
    date: NaiveDate,
) -> AllocationOutcome {
    let mut outcome = AllocationOutcome::default();

    let exit_ids: Vec<InstrumentId> = {
        let mut ids: Vec<InstrumentId> = signals
            .iter()
            .filter(|s| s.action.is_exit())
            .filter(|s| held.iter().any(|p| p.instrument == s.instrument))
            .map(|s| s.instrument.clone())
            .collect();
        ids.sort();
        ids
    };

    let retained: Vec<Position> = held
        .iter()
        .filter(|p| !exit_ids.contains(&p.instrument))
        .cloned()
        .collect();

    // Candidate entries in signal (rank) order, sized by inverse volatility.
    struct Entry {
        position: Position,
        composite: f64,
    }
    let mut entries: Vec<Entry> = Vec::new();
    for signal in signals {
        if signal.action != SignalAction::Buy {
            continue;
        }
        if let Some(fv) = features.get(&signal.instrument) {
            let weight = if fv.volatility > 0.0 {
                (config.vol_target / fv.volatility).min(config.max_position_weight)
            } else {
                // No measurable risk to budget against; take the cap.
                config.max_position_weight
            };
            entries.push(Entry {
                position: Position {
                    instrument: signal.instrument.clone(),
                    weight,
                    entry_date: date,
                    entry_score: signal.composite,
                    cluster_at_entry: signal.cluster,
                },
                composite: signal.composite,
            });
        }
    }

    // Gross cap: drop whole entrants, weakest composite first.
    let retained_gross = gross_weight(&retained);
    loop {
        let entering: f64 = entries.iter().map(|e| e.position.weight).sum();
        if retained_gross + entering <= config.max_gross + 1e-9 || entries.is_empty() {
            break;
        }
        let weakest = entries
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                a.composite
                    .partial_cmp(&b.composite)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.position.instrument.cmp(&a.position.instrument))
            })
            .map(|(i, _)| i);
        if let Some(i) = weakest {
            let removed = entries.remove(i);
            outcome.dropped.push(removed.position.instrument);
        }
    }

    for id in &exit_ids {
        outcome.deltas.push(WeightDelta {
            instrument: id.clone(),
            side: DeltaSide::Exit,
            target_weight: 0.0,
        });
    }
    for entry in &entries {
        outcome.deltas.push(WeightDelta {
            instrument: entry.position.instrument.clone(),
            side: DeltaSide::Enter,
            target_weight: entry.position.weight,
        });
    }

    let mut positions = retained;
    positions.extend(entries.into_iter().map(|e| e.position));
    positions.sort_by(|a, b| a.instrument.cmp(&b.instrument));
    outcome.positions = positions;

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ClusterId;
    use crate::features::{assert_approx, DEFAULT_EPSILON};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 2, 1).unwrap()
    }

    fn fv(id: &str, volatility: f64) -> (InstrumentId, FeatureVector) {
        (
            InstrumentId::from(id),
            FeatureVector {
                instrument: InstrumentId::from(id),
                short_return: 0.0,
                medium_return: 0.0,
                volatility,
                value_ratio: 1.0,
                range_position: 0.5,
                sharpe: 1.0,
                breadth: 0.5,
            },
        )
    }

    fn buy(id: &str, cluster: usize, composite: f64) -> Signal {
        Signal {
            instrument: InstrumentId::from(id),
            date: date(),
            cluster: ClusterId(cluster),
            action: SignalAction::Buy,
            composite,
            overridden: None,
            forced: false,
        }
    }

    fn sell(id: &str, forced: bool) -> Signal {
        Signal {
            instrument: InstrumentId::from(id),
            date: date(),
            cluster: ClusterId(0),
            action: SignalAction::StrongSell,
            composite: 0.0,
            overridden: None,
            forced,
        }
    }

    fn position(id: &str, weight: f64) -> Position {
        Position {
            instrument: InstrumentId::from(id),
            weight,
            entry_date: NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
            entry_score: 91.0,
            cluster_at_entry: ClusterId(0),
        }
    }

    #[test]
    fn inverse_vol_sizing_with_cap() {
        let features: BTreeMap<_, _> = [fv("CALM", 0.75), fv("WILD", 0.30)].into_iter().collect();
        let signals = vec![buy("CALM", 0, 95.0), buy("WILD", 1, 93.0)];
        let outcome = allocate(&signals, &features, &[], &AllocationConfig::default(), date());

        // 0.15 / 0.75 = 0.20 uncapped; 0.15 / 0.30 = 0.50 capped to 0.25.
        let w = |id: &str| {
            outcome
                .positions
                .iter()
                .find(|p| p.instrument.as_str() == id)
                .unwrap()
                .weight
        };
        assert_approx(w("CALM"), 0.20, DEFAULT_EPSILON);
        assert_approx(w("WILD"), 0.25, DEFAULT_EPSILON);
    }

    #[test]
    fn zero_volatility_takes_position_cap() {
        let features: BTreeMap<_, _> = [fv("FLAT", 0.0)].into_iter().collect();
        let signals = vec![buy("FLAT", 0, 95.0)];
        let outcome = allocate(&signals, &features, &[], &AllocationConfig::default(), date());
        assert_approx(outcome.positions[0].weight, 0.25, DEFAULT_EPSILON);
    }

    #[test]
    fn exits_release_weight_before_entries() {
        let features: BTreeMap<_, _> = [fv("NEW", 0.75)].into_iter().collect();
        let held = vec![position("OLD", 0.25)];
        let signals = vec![sell("OLD", false), buy("NEW", 1, 95.0)];
        let outcome = allocate(&signals, &features, &held, &AllocationConfig::default(), date());

        assert_eq!(outcome.deltas[0].side, DeltaSide::Exit);
        assert_eq!(outcome.deltas[0].instrument.as_str(), "OLD");
        assert_eq!(outcome.deltas[1].side, DeltaSide::Enter);
        assert_eq!(outcome.positions.len(), 1);
        assert_eq!(outcome.positions[0].instrument.as_str(), "NEW");
    }

    #[test]
    fn gross_cap_drops_lowest_composite_whole() {
        // Three entrants at 0.25 each against 0.60 free room: the weakest is
        // dropped entirely, the others keep their full weights.
        let features: BTreeMap<_, _> = [fv("AAA", 0.30), fv("BBB", 0.30), fv("CCC", 0.30)]
            .into_iter()
            .collect();
        let held = vec![position("OLD", 0.40)];
        let signals = vec![buy("AAA", 0, 97.0), buy("BBB", 1, 95.0), buy("CCC", 2, 91.0)];
        let outcome = allocate(&signals, &features, &held, &AllocationConfig::default(), date());

        assert_eq!(outcome.dropped, vec![InstrumentId::from("CCC")]);
        let ids: Vec<&str> = outcome
            .positions
            .iter()
            .map(|p| p.instrument.as_str())
            .collect();
        assert_eq!(ids, vec!["AAA", "BBB", "OLD"]);
        for p in &outcome.positions {
            if p.instrument.as_str() != "OLD" {
                assert_approx(p.weight, 0.25, DEFAULT_EPSILON);
            }
        }
        assert!(gross_weight(&outcome.positions) <= 1.0 + 1e-9);
    }

    #[test]
    fn gross_cap_can_drop_repeatedly() {
        let features: BTreeMap<_, _> = [fv("AAA", 0.30), fv("BBB", 0.30), fv("CCC", 0.30)]
            .into_iter()
            .collect();
        let held = vec![position("OLD", 0.90)];
        let signals = vec![buy("AAA", 0, 97.0), buy("BBB", 1, 95.0), buy("CCC", 2, 91.0)];
        let outcome = allocate(&signals, &features, &held, &AllocationConfig::default(), date());

        // Only 0.10 free: no 0.25 entrant fits; all three drop.
        assert_eq!(outcome.dropped.len(), 3);
        assert_eq!(outcome.dropped[0].as_str(), "CCC");
        assert_eq!(outcome.positions.len(), 1);
    }

    #[test]
    fn forced_exit_closes_position() {
        let held = vec![position("GONE", 0.25)];
        let signals = vec![sell("GONE", true)];
        let outcome = allocate(&signals, &BTreeMap::new(), &held, &AllocationConfig::default(), date());
        assert_eq!(outcome.deltas.len(), 1);
        assert_eq!(outcome.deltas[0].target_weight, 0.0);
        assert!(outcome.positions.is_empty());
    }

    #[test]
    fn hold_signals_change_nothing() {
        let held = vec![position("KEEP", 0.25)];
        let signals = vec![Signal {
            instrument: InstrumentId::from("KEEP"),
            date: date(),
            cluster: ClusterId(0),
            action: SignalAction::Hold,
            composite: 75.0,
            overridden: None,
            forced: false,
        }];
        let outcome = allocate(&signals, &BTreeMap::new(), &held, &AllocationConfig::default(), date());
        assert!(outcome.deltas.is_empty());
        assert_eq!(outcome.positions, held);
    }

    #[test]
    fn sell_signal_for_unheld_instrument_is_informational() {
        let signals = vec![sell("NOTHELD", false)];
        let outcome = allocate(&signals, &BTreeMap::new(), &[], &AllocationConfig::default(), date());
        assert!(outcome.deltas.is_empty());
        assert!(outcome.positions.is_empty());
    }
}
