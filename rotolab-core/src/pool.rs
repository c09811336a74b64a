//! Pool constructor — the monthly screen-then-rank cut of the universe.
//!
//! Selection order matters: hard exclusions first, then a single Sharpe
//! ranking across all survivors. Ranking is never per-cluster; a cluster with
//! ten strong instruments contributes ten pool members, and diversification
//! is the signal stage's job, not the pool's.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;

use crate::config::PoolConfig;
use crate::domain::{ClusterSet, InstrumentId, Pool, PoolMember};
use crate::error::EngineError;
use crate::features::FeatureVector;

/// Hard membership gate applied before any ranking.
pub trait FundamentalScreen {
    fn passes(&self, id: &InstrumentId) -> bool;
}

/// Screen backed by an explicit exclusion list (delistings, compliance
/// blocks, instruments under review).
#[derive(Debug, Clone, Default)]
pub struct ScreenList {
    excluded: BTreeSet<InstrumentId>,
}

impl ScreenList {
    pub fn new(excluded: impl IntoIterator<Item = InstrumentId>) -> Self {
        Self {
            excluded: excluded.into_iter().collect(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.excluded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.excluded.is_empty()
    }
}

impl FundamentalScreen for ScreenList {
    fn passes(&self, id: &InstrumentId) -> bool {
        !self.excluded.contains(id)
    }
}

/// Build the pool for one monthly epoch.
///
/// `features` holds every instrument with usable history this epoch (shorter
/// histories were already excluded upstream). Fewer screen survivors than
/// `min_viable` aborts with `EmptyPool`; the caller keeps the previous pool.
pub fn build_pool(
    features: &BTreeMap<InstrumentId, FeatureVector>,
    clusters: &ClusterSet,
    screen: &dyn FundamentalScreen,
    config: &PoolConfig,
    epoch: NaiveDate,
) -> Result<Pool, EngineError> {
    if features.is_empty() {
        return Err(EngineError::EmptyUniverse);
    }

    let mut survivors: Vec<&FeatureVector> = features
        .values()
        .filter(|fv| screen.passes(&fv.instrument))
        .collect();

    if survivors.len() < config.min_viable {
        return Err(EngineError::EmptyPool {
            survivors: survivors.len(),
            minimum: config.min_viable,
        });
    }

    // Sharpe descending, ties by medium return descending, then ascending id.
    survivors.sort_by(|a, b| {
        b.sharpe
            .partial_cmp(&a.sharpe)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.medium_return
                    .partial_cmp(&a.medium_return)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.instrument.cmp(&b.instrument))
    });

    let screened = survivors.len();
    let mut members = Vec::with_capacity(config.max_size.min(screened));
    for (i, fv) in survivors.into_iter().take(config.max_size).enumerate() {
        let cluster = clusters
            .cluster_of(&fv.instrument)
            .ok_or_else(|| EngineError::UnknownInstrument(fv.instrument.clone()))?;
        members.push(PoolMember {
            instrument: fv.instrument.clone(),
            cluster,
            sharpe: fv.sharpe,
            rank: i + 1,
        });
    }

    Ok(Pool {
        epoch,
        members,
        universe_size: features.len(),
        screened,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ClusterAssignment, ClusterId};

    fn epoch() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 31).unwrap()
    }

    fn fv(id: &str, sharpe: f64, medium: f64) -> FeatureVector {
        FeatureVector {
            instrument: InstrumentId::from(id),
            short_return: 0.0,
            medium_return: medium,
            volatility: 0.2,
            value_ratio: 1.0,
            range_position: 0.5,
            sharpe,
            breadth: 0.5,
        }
    }

    fn features_of(list: &[(&str, f64, f64)]) -> BTreeMap<InstrumentId, FeatureVector> {
        list.iter()
            .map(|(id, s, m)| (InstrumentId::from(*id), fv(id, *s, *m)))
            .collect()
    }

    fn clusters_for(features: &BTreeMap<InstrumentId, FeatureVector>, k: usize) -> ClusterSet {
        let assignments = features
            .keys()
            .enumerate()
            .map(|(i, id)| {
                let cluster = ClusterId(i % k);
                (
                    id.clone(),
                    ClusterAssignment {
                        instrument: id.clone(),
                        cluster,
                        label: cluster.to_string(),
                        distance: 0.0,
                    },
                )
            })
            .collect();
        ClusterSet {
            epoch: epoch(),
            k,
            assignments,
            converged: true,
            iterations: 3,
        }
    }

    #[test]
    fn ranks_by_sharpe_descending() {
        let features = features_of(&[
            ("AAA", 0.5, 0.0),
            ("BBB", 2.0, 0.0),
            ("CCC", 1.0, 0.0),
        ]);
        let clusters = clusters_for(&features, 2);
        let pool = build_pool(
            &features,
            &clusters,
            &ScreenList::empty(),
            &PoolConfig { max_size: 10, min_viable: 1 },
            epoch(),
        )
        .unwrap();
        let ids: Vec<&str> = pool.members.iter().map(|m| m.instrument.as_str()).collect();
        assert_eq!(ids, vec!["BBB", "CCC", "AAA"]);
        assert_eq!(pool.members[0].rank, 1);
        assert_eq!(pool.members[2].rank, 3);
    }

    #[test]
    fn sharpe_tie_breaks_by_medium_return_then_id() {
        let features = features_of(&[
            ("DDD", 1.0, 0.05),
            ("CCC", 1.0, 0.05),
            ("BBB", 1.0, 0.10),
        ]);
        let clusters = clusters_for(&features, 1);
        let pool = build_pool(
            &features,
            &clusters,
            &ScreenList::empty(),
            &PoolConfig { max_size: 10, min_viable: 1 },
            epoch(),
        )
        .unwrap();
        let ids: Vec<&str> = pool.members.iter().map(|m| m.instrument.as_str()).collect();
        assert_eq!(ids, vec!["BBB", "CCC", "DDD"]);
    }

    #[test]
    fn screen_excludes_before_ranking() {
        let features = features_of(&[("AAA", 3.0, 0.0), ("BBB", 1.0, 0.0)]);
        let clusters = clusters_for(&features, 1);
        let screen = ScreenList::new([InstrumentId::from("AAA")]);
        let pool = build_pool(
            &features,
            &clusters,
            &screen,
            &PoolConfig { max_size: 10, min_viable: 1 },
            epoch(),
        )
        .unwrap();
        assert_eq!(pool.len(), 1);
        assert!(!pool.contains(&InstrumentId::from("AAA")));
        assert_eq!(pool.screened, 1);
        assert_eq!(pool.universe_size, 2);
    }

    #[test]
    fn too_few_survivors_aborts() {
        let features = features_of(&[("AAA", 1.0, 0.0), ("BBB", 2.0, 0.0)]);
        let clusters = clusters_for(&features, 1);
        let err = build_pool(
            &features,
            &clusters,
            &ScreenList::new([InstrumentId::from("AAA")]),
            &PoolConfig { max_size: 10, min_viable: 2 },
            epoch(),
        )
        .unwrap_err();
        match err {
            EngineError::EmptyPool { survivors, minimum } => {
                assert_eq!(survivors, 1);
                assert_eq!(minimum, 2);
            }
            other => panic!("expected EmptyPool, got {other:?}"),
        }
    }

    #[test]
    fn top_m_cut_spans_whole_universe_not_per_cluster() {
        // 20 instruments over 6 clusters with max_size 15: the cut keeps the
        // 15 best Sharpes regardless of how clusters are represented.
        let list: Vec<(String, f64)> = (0..20)
            .map(|i| (format!("S{i:02}"), i as f64 * 0.1))
            .collect();
        let features: BTreeMap<InstrumentId, FeatureVector> = list
            .iter()
            .map(|(id, s)| (InstrumentId::from(id.as_str()), fv(id, *s, 0.0)))
            .collect();
        let clusters = clusters_for(&features, 6);
        let pool = build_pool(
            &features,
            &clusters,
            &ScreenList::empty(),
            &PoolConfig { max_size: 15, min_viable: 10 },
            epoch(),
        )
        .unwrap();
        assert_eq!(pool.len(), 15);
        // The five weakest Sharpes (S00..S04) are out.
        for i in 0..5 {
            assert!(!pool.contains(&InstrumentId::from(format!("S{i:02}").as_str())));
        }
        // Best Sharpe ranks first.
        assert_eq!(pool.members[0].instrument.as_str(), "S19");
        // Multiple members may share a cluster.
        let c = pool.members[0].cluster;
        assert!(pool.members.iter().filter(|m| m.cluster == c).count() >= 2);
    }

    #[test]
    fn empty_features_is_empty_universe() {
        let features = BTreeMap::new();
        let clusters = clusters_for(&features, 1);
        let err = build_pool(
            &features,
            &clusters,
            &ScreenList::empty(),
            &PoolConfig::default(),
            epoch(),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::EmptyUniverse));
    }
}
