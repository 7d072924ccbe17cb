//! Qualitative effect / load / risk classification of a pattern.

use serde::Serialize;

use super::enumerate::Pattern;
use super::transition::{Operator, ShiftKind};
use crate::tables::BaselineScoreTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum EffectLevel {
    Negative,
    Small,
    Medium,
    Large,
}

impl EffectLevel {
    pub fn rank(self) -> u8 {
        self as u8
    }

    pub fn word(self) -> &'static str {
        match self {
            EffectLevel::Large => "large",
            EffectLevel::Medium => "moderate",
            EffectLevel::Small => "modest",
            EffectLevel::Negative => "negative",
        }
    }
}

/// Three-step ordinal used for load and risk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Tier {
    Low,
    Medium,
    High,
}

impl Tier {
    pub fn rank(self) -> u8 {
        self as u8
    }

    pub fn word(self) -> &'static str {
        match self {
            Tier::Low => "low",
            Tier::Medium => "moderate",
            Tier::High => "high",
        }
    }

    /// `value < medium` is Low, `value < high` is Medium, else High.
    fn from_value(value: f64, medium: f64, high: f64) -> Tier {
        if value >= high {
            Tier::High
        } else if value >= medium {
            Tier::Medium
        } else {
            Tier::Low
        }
    }
}

/// Classification cut points. Lower bounds are inclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierThresholds {
    pub effect_large: f64,
    pub effect_medium: f64,
    pub effect_small: f64,
    pub load_medium: f64,
    pub load_high: f64,
    pub risk_medium: f64,
    pub risk_high: f64,
    /// Load weight per structural-shift step.
    pub load_structural_weight: f64,
    /// Load weight per Transform step.
    pub load_transform_weight: f64,
    /// Average volatility is divided by this before joining the load score.
    pub load_volatility_divisor: f64,
}

impl Default for ClassifierThresholds {
    fn default() -> Self {
        Self {
            effect_large: 20.0,
            effect_medium: 8.0,
            effect_small: 0.0,
            load_medium: 1.5,
            load_high: 3.0,
            risk_medium: 35.0,
            risk_high: 55.0,
            load_structural_weight: 2.0,
            load_transform_weight: 1.0,
            load_volatility_divisor: 50.0,
        }
    }
}

impl ClassifierThresholds {
    pub fn effect_level(&self, delta: f64) -> EffectLevel {
        if delta >= self.effect_large {
            EffectLevel::Large
        } else if delta >= self.effect_medium {
            EffectLevel::Medium
        } else if delta >= self.effect_small {
            EffectLevel::Small
        } else {
            EffectLevel::Negative
        }
    }

    pub fn load_level(&self, load: f64) -> Tier {
        Tier::from_value(load, self.load_medium, self.load_high)
    }

    pub fn risk_level(&self, risk: f64) -> Tier {
        Tier::from_value(risk, self.risk_medium, self.risk_high)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metrics {
    pub effect_delta: f64,
    pub effect_level: EffectLevel,
    pub load_score: f64,
    pub load_level: Tier,
    pub risk_peak: f64,
    pub risk_level: Tier,
}

/// Classify from the score trajectory and the indicators at each post-start
/// state. Missing indicators count as zero.
pub fn classify(
    pattern: &Pattern,
    baseline: &BaselineScoreTable,
    thresholds: &ClassifierThresholds,
) -> Metrics {
    let effect_delta = pattern.effect_delta();

    let after: Vec<_> = pattern.route.iter().skip(1).map(|s| baseline.entry(s)).collect();
    let volatility: Vec<f64> = after
        .iter()
        .map(|e| e.and_then(|e| e.volatility).filter(|v| v.is_finite()).unwrap_or(0.0))
        .collect();
    let avg_volatility = if volatility.is_empty() {
        0.0
    } else {
        volatility.iter().sum::<f64>() / volatility.len() as f64
    };
    let volatility_term = if thresholds.load_volatility_divisor > 0.0 {
        avg_volatility / thresholds.load_volatility_divisor
    } else {
        0.0
    };

    let structural = pattern.shift_count(ShiftKind::StructuralShift) as f64;
    let transforms = pattern.id.count(Operator::Transform) as f64;
    let load_score = thresholds.load_structural_weight * structural
        + thresholds.load_transform_weight * transforms
        + volatility_term;

    let risk_peak = after
        .iter()
        .map(|e| e.and_then(|e| e.risk).filter(|r| r.is_finite()).map(f64::abs).unwrap_or(0.0))
        .fold(0.0, f64::max);

    Metrics {
        effect_delta,
        effect_level: thresholds.effect_level(effect_delta),
        load_score,
        load_level: thresholds.load_level(load_score),
        risk_peak,
        risk_level: thresholds.risk_level(risk_peak),
    }
}

/// Plain-language reading of a score delta.
pub fn delta_word(delta: f64) -> &'static str {
    if delta >= 15.0 {
        "much higher"
    } else if delta >= 6.0 {
        "higher"
    } else if delta >= 1.0 {
        "slightly higher"
    } else if delta <= -8.0 {
        "cautious"
    } else if delta <= -1.0 {
        "modest"
    } else {
        "steady"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::enumerate::{walk, PatternId};
    use crate::hexagram::{HexagramTable, LinePosition};
    use crate::state::State;
    use crate::tables::BaselineEntry;

    fn state(hexes: &HexagramTable, name: &str, line: i64) -> State {
        State::new(
            hexes.by_name(name).unwrap().clone(),
            LinePosition::new(line).unwrap(),
        )
    }

    #[test]
    fn test_effect_thresholds_inclusive() {
        let t = ClassifierThresholds::default();
        assert_eq!(t.effect_level(20.0), EffectLevel::Large);
        assert_eq!(t.effect_level(19.99), EffectLevel::Medium);
        assert_eq!(t.effect_level(8.0), EffectLevel::Medium);
        assert_eq!(t.effect_level(0.0), EffectLevel::Small);
        assert_eq!(t.effect_level(-0.01), EffectLevel::Negative);
    }

    #[test]
    fn test_tier_thresholds() {
        let t = ClassifierThresholds::default();
        assert_eq!(t.load_level(1.49), Tier::Low);
        assert_eq!(t.load_level(1.5), Tier::Medium);
        assert_eq!(t.load_level(3.0), Tier::High);
        assert_eq!(t.risk_level(34.9), Tier::Low);
        assert_eq!(t.risk_level(35.0), Tier::Medium);
        assert_eq!(t.risk_level(55.0), Tier::High);
    }

    #[test]
    fn test_ordinals() {
        assert!(EffectLevel::Negative < EffectLevel::Small);
        assert!(EffectLevel::Medium < EffectLevel::Large);
        assert!(Tier::Low < Tier::High);
        assert_eq!(EffectLevel::Large.rank(), 3);
        assert_eq!(Tier::Medium.rank(), 1);
    }

    #[test]
    fn test_classify_composite_load_and_risk() {
        let hexes = HexagramTable::king_wen();
        let mut baseline = BaselineScoreTable::new();
        let start = state(&hexes, "地天泰", 5);
        baseline.insert(start.key(), BaselineEntry::with_score(50.0));
        // AAA from line 5: (泰,6), (泰,6), (否,1)
        baseline.insert(state(&hexes, "地天泰", 6).key(), BaselineEntry {
            volatility: Some(60.0),
            risk: Some(-40.0),
            ..BaselineEntry::with_score(55.0)
        });
        baseline.insert(state(&hexes, "天地否", 1).key(), BaselineEntry {
            volatility: Some(30.0),
            risk: Some(-58.0),
            ..BaselineEntry::with_score(75.0)
        });

        let p = walk(&hexes, &baseline, &start, PatternId::parse("AAA").unwrap()).unwrap();
        let m = classify(&p, &baseline, &ClassifierThresholds::default());
        assert_eq!(m.effect_delta, 25.0);
        assert_eq!(m.effect_level, EffectLevel::Large);
        // 2 * 1 structural + 0 transforms + (60 + 60 + 30) / 3 / 50
        assert!((m.load_score - 3.0).abs() < 1e-9);
        assert_eq!(m.load_level, Tier::High);
        assert_eq!(m.risk_peak, 58.0);
        assert_eq!(m.risk_level, Tier::High);
    }

    #[test]
    fn test_classify_empty_indicators() {
        let hexes = HexagramTable::king_wen();
        let baseline = BaselineScoreTable::new();
        let start = state(&hexes, "乾為天", 1);
        let p = walk(&hexes, &baseline, &start, PatternId::parse("TTA").unwrap()).unwrap();
        let m = classify(&p, &baseline, &ClassifierThresholds::default());
        assert_eq!(m.effect_delta, 0.0);
        assert_eq!(m.effect_level, EffectLevel::Small);
        assert_eq!(m.load_score, 2.0);
        assert_eq!(m.load_level, Tier::Medium);
        assert_eq!(m.risk_level, Tier::Low);
    }

    #[test]
    fn test_thresholds_are_overridable() {
        let hexes = HexagramTable::king_wen();
        let baseline = BaselineScoreTable::new();
        let start = state(&hexes, "乾為天", 1);
        let p = walk(&hexes, &baseline, &start, PatternId::parse("TTT").unwrap()).unwrap();
        let strict = ClassifierThresholds {
            load_high: 2.5,
            effect_small: 1.0,
            ..Default::default()
        };
        let m = classify(&p, &baseline, &strict);
        assert_eq!(m.load_level, Tier::High);
        assert_eq!(m.effect_level, EffectLevel::Negative);
    }

    #[test]
    fn test_delta_words() {
        assert_eq!(delta_word(15.0), "much higher");
        assert_eq!(delta_word(6.0), "higher");
        assert_eq!(delta_word(0.5), "steady");
        assert_eq!(delta_word(-1.0), "modest");
        assert_eq!(delta_word(-8.0), "cautious");
    }
}
