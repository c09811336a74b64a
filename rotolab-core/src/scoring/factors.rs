//! Factor definitions — raw cross-sectional values, one per scoring slot.
//!
//! A factor only produces a raw number; turning it into a bounded sub-score
//! is the quantile mapper's job. Higher raw always means better, so every
//! factor is written "big is good" even when the underlying measure (e.g.
//! volatility) would naturally run the other way.

use crate::features::FeatureVector;

pub trait Factor: Send + Sync {
    fn name(&self) -> &'static str;
    /// Raw value for one instrument on the evaluation date. Higher is better.
    fn raw(&self, fv: &FeatureVector) -> f64;
}

/// Sustained directional strength, discounted near range lows and rewarded
/// near range highs (less overhead supply close to the 60-session high).
#[derive(Debug, Clone)]
pub struct TrendResistance {
    pub medium_weight: f64,
    pub short_weight: f64,
    pub range_weight: f64,
}

impl Default for TrendResistance {
    fn default() -> Self {
        Self {
            medium_weight: 0.6,
            short_weight: 0.4,
            range_weight: 0.2,
        }
    }
}

impl Factor for TrendResistance {
    fn name(&self) -> &'static str {
        "trend_resistance"
    }

    fn raw(&self, fv: &FeatureVector) -> f64 {
        self.medium_weight * fv.medium_return
            + self.short_weight * fv.short_return
            + self.range_weight * (fv.range_position - 0.5)
    }
}

/// Abnormal traded value: short-window mean over medium-window mean.
#[derive(Debug, Clone, Default)]
pub struct CapitalFlow;

impl Factor for CapitalFlow {
    fn name(&self) -> &'static str {
        "capital_flow"
    }

    fn raw(&self, fv: &FeatureVector) -> f64 {
        fv.value_ratio
    }
}

/// Trailing Sharpe.
#[derive(Debug, Clone, Default)]
pub struct RiskAdjusted;

impl Factor for RiskAdjusted {
    fn name(&self) -> &'static str {
        "risk_adjusted"
    }

    fn raw(&self, fv: &FeatureVector) -> f64 {
        fv.sharpe
    }
}

/// Constituent participation (exogenous feed or close-above-MA proxy).
#[derive(Debug, Clone, Default)]
pub struct Breadth;

impl Factor for Breadth {
    fn name(&self) -> &'static str {
        "breadth"
    }

    fn raw(&self, fv: &FeatureVector) -> f64 {
        fv.breadth
    }
}

/// The four factor slots, one per ceiling. Any slot can be swapped for a
/// custom implementation without touching the mapper or classifier.
pub struct FactorSet {
    pub trend: Box<dyn Factor>,
    pub capital_flow: Box<dyn Factor>,
    pub risk_adjusted: Box<dyn Factor>,
    pub breadth: Box<dyn Factor>,
}

impl Default for FactorSet {
    fn default() -> Self {
        Self {
            trend: Box::new(TrendResistance::default()),
            capital_flow: Box::new(CapitalFlow),
            risk_adjusted: Box::new(RiskAdjusted),
            breadth: Box::new(Breadth),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::InstrumentId;
    use crate::features::{assert_approx, DEFAULT_EPSILON};

    fn fv() -> FeatureVector {
        FeatureVector {
            instrument: InstrumentId::from("XLK"),
            short_return: 0.05,
            medium_return: 0.10,
            volatility: 0.2,
            value_ratio: 1.5,
            range_position: 0.9,
            sharpe: 1.2,
            breadth: 0.8,
        }
    }

    #[test]
    fn trend_combines_returns_and_range() {
        let raw = TrendResistance::default().raw(&fv());
        // 0.6*0.10 + 0.4*0.05 + 0.2*(0.9-0.5) = 0.06 + 0.02 + 0.08
        assert_approx(raw, 0.16, DEFAULT_EPSILON);
    }

    #[test]
    fn trend_range_midpoint_is_neutral() {
        let mut v = fv();
        v.range_position = 0.5;
        let with_range = TrendResistance::default().raw(&v);
        assert_approx(with_range, 0.6 * 0.10 + 0.4 * 0.05, DEFAULT_EPSILON);
    }

    #[test]
    fn simple_factors_pass_through() {
        let v = fv();
        assert_approx(CapitalFlow.raw(&v), 1.5, DEFAULT_EPSILON);
        assert_approx(RiskAdjusted.raw(&v), 1.2, DEFAULT_EPSILON);
        assert_approx(Breadth.raw(&v), 0.8, DEFAULT_EPSILON);
    }

    #[test]
    fn factor_names() {
        let set = FactorSet::default();
        assert_eq!(set.trend.name(), "trend_resistance");
        assert_eq!(set.capital_flow.name(), "capital_flow");
        assert_eq!(set.risk_adjusted.name(), "risk_adjusted");
        assert_eq!(set.breadth.name(), "breadth");
    }
}
