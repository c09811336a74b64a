//! Instrument — a tradable sector, industry ETF, or basket.

use serde::{Deserialize, Serialize};

use super::ids::InstrumentId;

/// A member of the rotation universe.
///
/// Cluster membership is deliberately NOT stored here: assignments belong to
/// a monthly `ClusterSet` and are replaced wholesale each epoch. Looking up
/// an instrument's cluster always goes through the epoch's set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    pub id: InstrumentId,
    pub name: String,
    /// Whether the feed supplies a constituent-breadth series for this
    /// instrument. When false the breadth factor falls back to a close-based
    /// proxy.
    #[serde(default)]
    pub has_breadth_feed: bool,
}

impl Instrument {
    pub fn new(id: impl Into<InstrumentId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            has_breadth_feed: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instrument_roundtrip() {
        let inst = Instrument::new("XLK", "Technology Select Sector");
        let json = serde_json::to_string(&inst).unwrap();
        let deser: Instrument = serde_json::from_str(&json).unwrap();
        assert_eq!(inst.id, deser.id);
        assert!(!deser.has_breadth_feed);
    }
}
