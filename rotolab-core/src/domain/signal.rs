//! Signals — threshold-classified actions derived from score records.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::ids::{ClusterId, InstrumentId};

/// Action bands over the composite score.
///
/// `Hold` covers two situations with identical downstream behavior: a score
/// in the hold band, and a buy-band score downgraded because its cluster was
/// already occupied (the downgrade itself is recorded separately as a
/// `DiversificationOverride`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalAction {
    Buy,
    Hold,
    Sell,
    StrongSell,
}

impl SignalAction {
    /// Exit actions close an existing position. Hold never does — a held
    /// instrument decaying from the buy band to the hold band stays held.
    pub fn is_exit(&self) -> bool {
        matches!(self, SignalAction::Sell | SignalAction::StrongSell)
    }
}

/// A buy that was downgraded to hold because the per-cluster cap was already
/// reached. Informational, not an error: these near-misses are appended to
/// the daily audit payload so the diversification constraint's cost is
/// visible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiversificationOverride {
    pub instrument: InstrumentId,
    pub cluster: ClusterId,
    pub composite: f64,
    /// Instruments already holding this cluster's slots.
    pub occupied_by: Vec<InstrumentId>,
}

/// One instrument's classified action for one trading day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub instrument: InstrumentId,
    pub date: NaiveDate,
    pub cluster: ClusterId,
    pub action: SignalAction,
    pub composite: f64,
    /// Set when a buy-band score was downgraded by the cluster cap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overridden: Option<DiversificationOverride>,
    /// True for exits forced by pool exit rather than by score band.
    #[serde(default)]
    pub forced: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_actions() {
        assert!(!SignalAction::Buy.is_exit());
        assert!(!SignalAction::Hold.is_exit());
        assert!(SignalAction::Sell.is_exit());
        assert!(SignalAction::StrongSell.is_exit());
    }

    #[test]
    fn action_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&SignalAction::StrongSell).unwrap(),
            "\"strong_sell\""
        );
        assert_eq!(
            serde_json::from_str::<SignalAction>("\"buy\"").unwrap(),
            SignalAction::Buy
        );
    }

    #[test]
    fn signal_roundtrip_with_override() {
        let sig = Signal {
            instrument: InstrumentId::from("XLK"),
            date: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            cluster: ClusterId(1),
            action: SignalAction::Hold,
            composite: 92.0,
            overridden: Some(DiversificationOverride {
                instrument: InstrumentId::from("XLK"),
                cluster: ClusterId(1),
                composite: 92.0,
                occupied_by: vec![InstrumentId::from("SMH")],
            }),
            forced: false,
        };
        let json = serde_json::to_string(&sig).unwrap();
        let deser: Signal = serde_json::from_str(&json).unwrap();
        assert_eq!(deser.action, SignalAction::Hold);
        assert!(deser.overridden.is_some());
    }

    #[test]
    fn override_field_absent_when_none() {
        let sig = Signal {
            instrument: InstrumentId::from("XLE"),
            date: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            cluster: ClusterId(0),
            action: SignalAction::Buy,
            composite: 95.0,
            overridden: None,
            forced: false,
        };
        let json = serde_json::to_string(&sig).unwrap();
        assert!(!json.contains("overridden"));
    }
}
