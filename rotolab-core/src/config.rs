//! Engine configuration.
//!
//! Every knob that changes engine output lives here, so the BLAKE3 hash of
//! this struct identifies a run's semantics: two epochs with equal config
//! hashes and equal inputs must produce identical outputs.

use serde::{Deserialize, Serialize};

use crate::domain::{ClusterId, ConfigHash, SubScores};
use crate::error::EngineError;

/// Top-level engine configuration. All sections have working defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub clustering: ClusteringConfig,
    pub pool: PoolConfig,
    pub scoring: ScoringConfig,
    pub signals: SignalConfig,
    pub allocation: AllocationConfig,
    /// Master seed for all derived RNG (k-means++ seeding).
    pub master_seed: u64,
}

/// Monthly k-means parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    /// Number of clusters.
    pub k: usize,
    /// Lloyd iteration cap. Hitting it flags the partition as non-converged.
    pub max_iterations: usize,
    /// Converged when the fraction of instruments that changed cluster in an
    /// iteration drops below this.
    pub shift_tolerance: f64,
    /// Optional display labels per cluster index; missing entries render as
    /// "C{index}".
    pub labels: Vec<String>,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            k: 6,
            max_iterations: 50,
            shift_tolerance: 0.01,
            labels: Vec::new(),
        }
    }
}

impl ClusteringConfig {
    pub fn label_for(&self, cluster: ClusterId) -> String {
        self.labels
            .get(cluster.0)
            .cloned()
            .unwrap_or_else(|| cluster.to_string())
    }
}

/// Monthly pool construction parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Top-M cut after Sharpe ranking.
    pub max_size: usize,
    /// Fewer screen survivors than this aborts the rebuild (EmptyPool).
    pub min_viable: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 150,
            min_viable: 10,
        }
    }
}

/// Factor lookbacks (sessions) and ceilings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Ceiling per factor; the four must sum to 100.
    pub ceilings: SubScores,
    pub lookbacks: LookbackConfig,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            ceilings: SubScores {
                trend: 40.0,
                capital_flow: 30.0,
                risk_adjusted: 20.0,
                breadth: 10.0,
            },
            lookbacks: LookbackConfig::default(),
        }
    }
}

/// Session windows feeding the feature pipeline. The longest of these is the
/// minimum history an instrument needs to be scored or clustered at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LookbackConfig {
    /// Short return window (also the short traded-value window).
    pub short: usize,
    /// Medium return window (also the volatility and long traded-value window).
    pub medium: usize,
    /// High-low range window for the resistance adjustment.
    pub range: usize,
    /// Session window for the trailing Sharpe (returns inside this window).
    pub sharpe: usize,
    /// Sessions counted by the breadth proxy.
    pub breadth_window: usize,
    /// Moving-average length the breadth proxy compares closes against.
    pub breadth_ma: usize,
}

impl Default for LookbackConfig {
    fn default() -> Self {
        Self {
            short: 5,
            medium: 20,
            range: 60,
            sharpe: 60,
            breadth_window: 10,
            breadth_ma: 20,
        }
    }
}

impl LookbackConfig {
    /// Minimum sessions an instrument must have to produce a feature vector.
    pub fn required_history(&self) -> usize {
        [
            self.short + 1,
            self.medium + 1,
            self.range,
            self.sharpe,
            self.breadth_window + self.breadth_ma - 1,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }
}

/// Score-band thresholds and the diversification cap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// Composite at or above this is a buy candidate.
    pub buy_threshold: f64,
    /// Composite at or above this (but below buy) holds.
    pub hold_threshold: f64,
    /// Composite at or above this (but below hold) sells; below it,
    /// strong-sell.
    pub sell_threshold: f64,
    /// Maximum concurrent positions per cluster.
    pub per_cluster_cap: usize,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            buy_threshold: 90.0,
            hold_threshold: 70.0,
            sell_threshold: 40.0,
            per_cluster_cap: 1,
        }
    }
}

/// Risk-parity sizing parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationConfig {
    /// Annualized volatility budget per position; weight = target / realized.
    pub vol_target: f64,
    /// Hard cap on any single position's weight.
    pub max_position_weight: f64,
    /// Hard cap on the sum of all weights.
    pub max_gross: f64,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            vol_target: 0.15,
            max_position_weight: 0.25,
            max_gross: 1.0,
        }
    }
}

impl EngineConfig {
    /// Content-addressed identity of this configuration.
    pub fn hash(&self) -> Result<ConfigHash, EngineError> {
        ConfigHash::of(self).map_err(|e| EngineError::InvalidConfig(e.to_string()))
    }

    pub fn from_toml(text: &str) -> Result<Self, EngineError> {
        let config: EngineConfig =
            toml::from_str(text).map_err(|e| EngineError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let invalid = |msg: String| Err(EngineError::InvalidConfig(msg));

        if self.clustering.k < 2 {
            return invalid(format!("clustering.k must be >= 2, got {}", self.clustering.k));
        }
        if self.clustering.max_iterations == 0 {
            return invalid("clustering.max_iterations must be >= 1".into());
        }
        if !(0.0..1.0).contains(&self.clustering.shift_tolerance) {
            return invalid(format!(
                "clustering.shift_tolerance must be in [0,1), got {}",
                self.clustering.shift_tolerance
            ));
        }
        if self.pool.min_viable == 0 || self.pool.max_size < self.pool.min_viable {
            return invalid(format!(
                "pool sizes invalid: max_size {} must be >= min_viable {} >= 1",
                self.pool.max_size, self.pool.min_viable
            ));
        }

        let c = &self.scoring.ceilings;
        for (name, v) in [
            ("trend", c.trend),
            ("capital_flow", c.capital_flow),
            ("risk_adjusted", c.risk_adjusted),
            ("breadth", c.breadth),
        ] {
            if v <= 0.0 {
                return invalid(format!("ceiling '{name}' must be positive, got {v}"));
            }
        }
        let total = c.composite();
        if (total - 100.0).abs() > 1e-9 {
            return invalid(format!("ceilings must sum to 100, got {total}"));
        }

        let lb = &self.scoring.lookbacks;
        if lb.short == 0 || lb.medium <= lb.short || lb.range == 0 || lb.sharpe < 2 {
            return invalid("lookbacks invalid: need short >= 1, medium > short, range >= 1, sharpe >= 2".into());
        }
        if lb.breadth_window == 0 || lb.breadth_ma == 0 {
            return invalid("breadth lookbacks must be >= 1".into());
        }

        let s = &self.signals;
        if !(s.buy_threshold <= 100.0
            && s.buy_threshold > s.hold_threshold
            && s.hold_threshold > s.sell_threshold
            && s.sell_threshold >= 0.0)
        {
            return invalid(format!(
                "thresholds must satisfy 100 >= buy > hold > sell >= 0, got {}/{}/{}",
                s.buy_threshold, s.hold_threshold, s.sell_threshold
            ));
        }
        if s.per_cluster_cap == 0 {
            return invalid("signals.per_cluster_cap must be >= 1".into());
        }

        let a = &self.allocation;
        if a.vol_target <= 0.0 {
            return invalid(format!("allocation.vol_target must be positive, got {}", a.vol_target));
        }
        if !(a.max_position_weight > 0.0 && a.max_position_weight <= 1.0) {
            return invalid(format!(
                "allocation.max_position_weight must be in (0,1], got {}",
                a.max_position_weight
            ));
        }
        if !(a.max_gross > 0.0 && a.max_gross <= 1.0) {
            return invalid(format!(
                "allocation.max_gross must be in (0,1], got {}",
                a.max_gross
            ));
        }

        Ok(())
    }
}
