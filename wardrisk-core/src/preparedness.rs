//! Pre-season infrastructure preparedness score
//!
//! Static readiness only; no rainfall input. Each component is capped by its
//! own formula and the total is re-clamped to [0,100].

use crate::ward::{ResolvedStatics, Ward};
use serde::{Deserialize, Serialize};

/// Preparedness component, ordered alphabetically by name
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Component {
    Infrastructure,
    Maintenance,
    Resilience,
    Resources,
    Vulnerability,
}

impl Component {
    pub const ALL: [Component; 5] = [
        Component::Infrastructure,
        Component::Maintenance,
        Component::Resilience,
        Component::Resources,
        Component::Vulnerability,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Infrastructure => "Infrastructure",
            Component::Maintenance => "Maintenance",
            Component::Resilience => "Resilience",
            Component::Resources => "Resources",
            Component::Vulnerability => "Vulnerability",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PreparednessLevel {
    Critical,
    Poor,
    Moderate,
    Good,
    Excellent,
}

impl PreparednessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreparednessLevel::Critical => "Critical",
            PreparednessLevel::Poor => "Poor",
            PreparednessLevel::Moderate => "Moderate",
            PreparednessLevel::Good => "Good",
            PreparednessLevel::Excellent => "Excellent",
        }
    }

    pub fn recommendation(&self) -> &'static str {
        match self {
            PreparednessLevel::Excellent => "Well-prepared. Maintain current standards.",
            PreparednessLevel::Good => "Adequate preparation. Minor improvements needed.",
            PreparednessLevel::Moderate => "Significant gaps. Prioritize drainage maintenance.",
            PreparednessLevel::Poor => "Critical improvements needed before monsoon.",
            PreparednessLevel::Critical => "Emergency intervention required. High failure risk.",
        }
    }
}

/// Lower bounds of the preparedness levels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PreparednessThresholds {
    pub poor: f64,
    pub moderate: f64,
    pub good: f64,
    pub excellent: f64,
}

impl Default for PreparednessThresholds {
    fn default() -> Self {
        PreparednessThresholds {
            poor: 30.0,
            moderate: 45.0,
            good: 60.0,
            excellent: 75.0,
        }
    }
}

impl PreparednessThresholds {
    pub fn level(&self, total: f64) -> PreparednessLevel {
        if total >= self.excellent {
            PreparednessLevel::Excellent
        } else if total >= self.good {
            PreparednessLevel::Good
        } else if total >= self.moderate {
            PreparednessLevel::Moderate
        } else if total >= self.poor {
            PreparednessLevel::Poor
        } else {
            PreparednessLevel::Critical
        }
    }
}

/// Weights and caps of the preparedness formula
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PreparednessWeights {
    pub infra_max: f64,
    pub drain_multiplier: f64,
    pub drainage_complaint_divisor: f64,
    pub sewerage_complaint_divisor: f64,

    pub resilience_max: f64,
    pub resilience_per_flood: f64,
    pub monsoon_risk_multiplier: f64,

    pub resources_max: f64,
    pub road_multiplier: f64,
    pub road_cap: f64,
    pub building_multiplier: f64,
    pub building_cap: f64,
    /// Points for a missing road or building density
    pub resource_fallback: f64,

    pub vulnerability_max: f64,
    pub lowlying_span: f64,
    pub lowlying_weight: f64,
    pub elevation_reference: f64,
    pub elevation_span: f64,
    pub elevation_weight: f64,
    pub infra_offset_divisor: f64,

    pub maintenance_max: f64,
    pub pothole_divisor: f64,
    pub growth_multiplier: f64,

    pub thresholds: PreparednessThresholds,
}

impl Default for PreparednessWeights {
    fn default() -> Self {
        PreparednessWeights {
            infra_max: 30.0,
            drain_multiplier: 5.0,
            drainage_complaint_divisor: 30.0,
            sewerage_complaint_divisor: 20.0,
            resilience_max: 25.0,
            resilience_per_flood: 4.0,
            monsoon_risk_multiplier: 10.0,
            resources_max: 20.0,
            road_multiplier: 2.0,
            road_cap: 10.0,
            building_multiplier: 5.0,
            building_cap: 10.0,
            resource_fallback: 5.0,
            vulnerability_max: 15.0,
            lowlying_span: 30.0,
            lowlying_weight: 8.0,
            elevation_reference: 220.0,
            elevation_span: 20.0,
            elevation_weight: 7.0,
            infra_offset_divisor: 3.0,
            maintenance_max: 10.0,
            pothole_divisor: 4.0,
            growth_multiplier: 3.0,
            thresholds: PreparednessThresholds::default(),
        }
    }
}

impl PreparednessWeights {
    pub fn max_for(&self, component: Component) -> f64 {
        match component {
            Component::Infrastructure => self.infra_max,
            Component::Maintenance => self.maintenance_max,
            Component::Resilience => self.resilience_max,
            Component::Resources => self.resources_max,
            Component::Vulnerability => self.vulnerability_max,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparednessBreakdown {
    pub infra_capacity: f64,
    pub historical_resilience: f64,
    pub resource_readiness: f64,
    pub vulnerability_gap: f64,
    pub maintenance: f64,
    pub total: f64,
    pub preparedness_level: PreparednessLevel,
    pub weakest_component: Component,
}

impl PreparednessBreakdown {
    pub fn score_of(&self, component: Component) -> f64 {
        match component {
            Component::Infrastructure => self.infra_capacity,
            Component::Maintenance => self.maintenance,
            Component::Resilience => self.historical_resilience,
            Component::Resources => self.resource_readiness,
            Component::Vulnerability => self.vulnerability_gap,
        }
    }

    pub fn recommendation(&self) -> &'static str {
        self.preparedness_level.recommendation()
    }
}

fn bounded(value: f64, max: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, max.max(0.0))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreparednessComposer {
    pub weights: PreparednessWeights,
}

impl PreparednessComposer {
    pub fn new(weights: PreparednessWeights) -> Self {
        PreparednessComposer { weights }
    }

    /// Score a ward from its resolved statics and history
    pub fn compose(&self, ward: &Ward, statics: &ResolvedStatics) -> PreparednessBreakdown {
        let w = &self.weights;
        let civic = &ward.civic;
        let hist = &ward.historical;

        let drain_capacity = (statics.drain_density * w.drain_multiplier).min(w.infra_max);
        let complaint_penalty = civic.drainage_complaints / w.drainage_complaint_divisor
            + civic.sewerage_complaints / w.sewerage_complaint_divisor;
        let infra_capacity = bounded(drain_capacity - complaint_penalty, w.infra_max);

        // Cap applies to the sum, not to each term
        let historical_resilience = bounded(
            (w.resilience_max - hist.hist_flood_freq * w.resilience_per_flood).max(0.0)
                + (1.0 - hist.monsoon_risk_score) * w.monsoon_risk_multiplier,
            w.resilience_max,
        );

        let road = ward
            .static_attrs
            .road_density
            .filter(|v| v.is_finite())
            .map_or(w.resource_fallback, |d| {
                (d * w.road_multiplier).min(w.road_cap)
            });
        let building = ward
            .static_attrs
            .building_density
            .filter(|v| v.is_finite())
            .map_or(w.resource_fallback, |d| {
                (d * w.building_multiplier).min(w.building_cap)
            });
        let resource_readiness = bounded(road + building, w.resources_max);

        let physical_vuln = statics.low_lying_pct / w.lowlying_span * w.lowlying_weight
            + (w.elevation_reference - statics.mean_elevation).max(0.0) / w.elevation_span
                * w.elevation_weight;
        let vulnerability_gap = bounded(
            w.vulnerability_max - (physical_vuln - infra_capacity / w.infra_offset_divisor),
            w.vulnerability_max,
        );

        let maintenance = bounded(
            w.maintenance_max
                - (civic.pothole_count / w.pothole_divisor
                    + civic.sewerage_growth_rate * w.growth_multiplier),
            w.maintenance_max,
        );

        let total = bounded(
            infra_capacity + historical_resilience + resource_readiness + vulnerability_gap
                + maintenance,
            100.0,
        );

        let mut breakdown = PreparednessBreakdown {
            infra_capacity,
            historical_resilience,
            resource_readiness,
            vulnerability_gap,
            maintenance,
            total,
            preparedness_level: w.thresholds.level(total),
            weakest_component: Component::Infrastructure,
        };
        breakdown.weakest_component = self.weakest(&breakdown);
        breakdown
    }

    /// Lowest score/max ratio; ties go to the alphabetically first component
    pub fn weakest(&self, breakdown: &PreparednessBreakdown) -> Component {
        let ratio = |c: Component| {
            let max = self.weights.max_for(c);
            if max > 0.0 {
                breakdown.score_of(c) / max
            } else {
                1.0
            }
        };
        Component::ALL
            .into_iter()
            .fold(None, |best: Option<(Component, f64)>, c| {
                let r = ratio(c);
                match best {
                    Some((_, best_ratio)) if best_ratio <= r => best,
                    _ => Some((c, r)),
                }
            })
            .map_or(Component::Infrastructure, |(c, _)| c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ward::tests::complete_ward;

    fn compose(ward: &Ward) -> PreparednessBreakdown {
        let statics = ResolvedStatics::strict(ward).unwrap();
        PreparednessComposer::default().compose(ward, &statics)
    }

    #[test]
    fn test_complete_ward_components() {
        let mut ward = complete_ward("A1");
        ward.civic.drainage_complaints = 30.0;
        ward.civic.sewerage_complaints = 20.0;
        ward.civic.pothole_count = 8.0;
        ward.civic.sewerage_growth_rate = 0.5;
        ward.historical.hist_flood_freq = 2.0;
        ward.historical.monsoon_risk_score = 0.3;
        let b = compose(&ward);

        // drain 4.0 × 5 = 20, minus 1 + 1
        assert!((b.infra_capacity - 18.0).abs() < 1e-9);
        // 25 - 8 + 7
        assert!((b.historical_resilience - 24.0).abs() < 1e-9);
        // road 3 × 2 = 6, building 1.5 × 5 = 7.5
        assert!((b.resource_readiness - 13.5).abs() < 1e-9);
        // physical = 18/30×8 + 8/20×7 = 4.8 + 2.8; gap = 15 - (7.6 - 6)
        assert!((b.vulnerability_gap - 13.4).abs() < 1e-9);
        // 10 - (2 + 1.5)
        assert!((b.maintenance - 6.5).abs() < 1e-9);
        assert!((b.total - 75.4).abs() < 1e-9);
        assert_eq!(b.preparedness_level, PreparednessLevel::Excellent);
        // ratios: infra .6, maint .65, resil .96, res .675, vuln .893
        assert_eq!(b.weakest_component, Component::Infrastructure);
    }

    #[test]
    fn test_resilience_cap_applies_after_sum() {
        let mut ward = complete_ward("A1");
        ward.historical.hist_flood_freq = 0.0;
        ward.historical.monsoon_risk_score = 0.0;
        // 25 + 10 before the cap
        assert_eq!(compose(&ward).historical_resilience, 25.0);
    }

    #[test]
    fn test_missing_densities_use_fallback() {
        let mut ward = complete_ward("A1");
        ward.static_attrs.road_density = None;
        ward.static_attrs.building_density = None;
        assert_eq!(compose(&ward).resource_readiness, 10.0);
    }

    #[test]
    fn test_vulnerability_gap_is_capped_at_max() {
        let mut ward = complete_ward("A1");
        ward.static_attrs.low_lying_pct = Some(0.0);
        ward.static_attrs.mean_elevation = Some(240.0);
        ward.static_attrs.drain_density = Some(6.0);
        assert_eq!(compose(&ward).vulnerability_gap, 15.0);
    }

    #[test]
    fn test_weak_ward_is_critical() {
        let mut ward = complete_ward("A1");
        ward.static_attrs.drain_density = Some(0.2);
        ward.static_attrs.low_lying_pct = Some(60.0);
        ward.static_attrs.mean_elevation = Some(200.0);
        ward.static_attrs.road_density = Some(0.5);
        ward.static_attrs.building_density = Some(0.2);
        ward.historical.hist_flood_freq = 9.0;
        ward.historical.monsoon_risk_score = 0.9;
        ward.civic.pothole_count = 60.0;
        ward.civic.drainage_complaints = 90.0;
        let b = compose(&ward);
        assert_eq!(b.infra_capacity, 0.0);
        assert_eq!(b.maintenance, 0.0);
        assert_eq!(b.preparedness_level, PreparednessLevel::Critical);
        // several components at 0; alphabetical tie-break
        assert_eq!(b.weakest_component, Component::Infrastructure);
        assert_eq!(
            b.recommendation(),
            "Emergency intervention required. High failure risk."
        );
    }

    #[test]
    fn test_level_boundaries() {
        let t = PreparednessThresholds::default();
        assert_eq!(t.level(75.0), PreparednessLevel::Excellent);
        assert_eq!(t.level(74.99), PreparednessLevel::Good);
        assert_eq!(t.level(60.0), PreparednessLevel::Good);
        assert_eq!(t.level(45.0), PreparednessLevel::Moderate);
        assert_eq!(t.level(30.0), PreparednessLevel::Poor);
        assert_eq!(t.level(29.99), PreparednessLevel::Critical);
    }

    #[test]
    fn test_tie_breaks_alphabetically() {
        let composer = PreparednessComposer::default();
        let b = PreparednessBreakdown {
            infra_capacity: 30.0,
            historical_resilience: 12.5,
            resource_readiness: 20.0,
            vulnerability_gap: 15.0,
            maintenance: 5.0,
            total: 82.5,
            preparedness_level: PreparednessLevel::Excellent,
            weakest_component: Component::Infrastructure,
        };
        // maintenance and resilience both at 0.5
        assert_eq!(composer.weakest(&b), Component::Maintenance);
    }
}
