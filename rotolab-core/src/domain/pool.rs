//! Candidate pool — the monthly tradable subset of the universe.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::ids::{ClusterId, InstrumentId};

/// Why an instrument made the pool, kept for the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolMember {
    pub instrument: InstrumentId,
    pub cluster: ClusterId,
    /// Trailing risk-adjusted return used for ranking.
    pub sharpe: f64,
    /// 1-based rank across all screen survivors (1 = best).
    pub rank: usize,
}

/// The candidate pool for one monthly epoch.
///
/// Exactly one pool is live at a time; the monthly rebuild supersedes it
/// atomically. Members are stored in rank order. Selection is performed
/// across the whole universe, never per cluster, so clusters may be unevenly
/// represented here; diversification is enforced later, at the signal stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pool {
    pub epoch: NaiveDate,
    pub members: Vec<PoolMember>,
    /// Universe size and screen-survivor count at build time.
    pub universe_size: usize,
    pub screened: usize,
}

impl Pool {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, id: &InstrumentId) -> bool {
        self.members.iter().any(|m| &m.instrument == id)
    }

    pub fn member(&self, id: &InstrumentId) -> Option<&PoolMember> {
        self.members.iter().find(|m| &m.instrument == id)
    }

    /// Member ids in rank order.
    pub fn ids(&self) -> Vec<InstrumentId> {
        self.members.iter().map(|m| m.instrument.clone()).collect()
    }

    /// BLAKE3 digest of the canonical serialization, for audit payloads.
    pub fn digest(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        blake3::hash(json.as_bytes()).to_hex().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_pool() -> Pool {
        Pool {
            epoch: NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            members: vec![
                PoolMember {
                    instrument: InstrumentId::from("XLK"),
                    cluster: ClusterId(0),
                    sharpe: 1.8,
                    rank: 1,
                },
                PoolMember {
                    instrument: InstrumentId::from("XLE"),
                    cluster: ClusterId(1),
                    sharpe: 1.2,
                    rank: 2,
                },
            ],
            universe_size: 30,
            screened: 24,
        }
    }

    #[test]
    fn pool_membership() {
        let pool = sample_pool();
        assert!(pool.contains(&InstrumentId::from("XLK")));
        assert!(!pool.contains(&InstrumentId::from("XLV")));
        assert_eq!(pool.member(&InstrumentId::from("XLE")).unwrap().rank, 2);
    }

    #[test]
    fn pool_ids_in_rank_order() {
        let pool = sample_pool();
        let ids = pool.ids();
        assert_eq!(ids[0].as_str(), "XLK");
        assert_eq!(ids[1].as_str(), "XLE");
    }

    #[test]
    fn pool_roundtrip() {
        let pool = sample_pool();
        let json = serde_json::to_string(&pool).unwrap();
        let deser: Pool = serde_json::from_str(&json).unwrap();
        assert_eq!(deser.len(), 2);
        assert_eq!(deser.digest(), pool.digest());
    }
}
