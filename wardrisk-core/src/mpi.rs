//! Monsoon Priority Index (MPI) - real-time 3-hour flood risk score
//!
//! Global invariants enforced:
//! - Every component is capped before summing; the total is re-clamped to [0,100]
//! - Deterministic, side-effect free composition
//! - Monotonic in rainfall total
//!
//! Components:
//! - model = probability × 40 (0 when the classifier is unavailable)
//! - rainfall = step function of rain_3h + forecast_3h (0-20)
//! - historical = min(15, hist_flood_freq × 2.5)
//! - infrastructure = drain stress + complaint and pothole terms (0-15)
//! - vulnerability = elevation + low-lying (or the ward's composite index)
//!   plus an urban flash-flood term (0-10)

use crate::features::{Feature, FeatureVector};
use crate::ward::Ward;
use serde::{Deserialize, Serialize};

/// Discrete risk level of an MPI total
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
    Critical,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 4] = [
        RiskLevel::Low,
        RiskLevel::Moderate,
        RiskLevel::High,
        RiskLevel::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "Low",
            RiskLevel::Moderate => "Moderate",
            RiskLevel::High => "High",
            RiskLevel::Critical => "Critical",
        }
    }

    /// High or Critical
    pub fn is_high_plus(&self) -> bool {
        matches!(self, RiskLevel::High | RiskLevel::Critical)
    }
}

/// Lower bounds of the risk levels (right-open intervals)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RiskThresholds {
    pub moderate: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        RiskThresholds {
            moderate: 30.0,
            high: 50.0,
            critical: 70.0,
        }
    }
}

impl RiskThresholds {
    pub fn level(&self, total: f64) -> RiskLevel {
        if total < self.moderate {
            RiskLevel::Low
        } else if total < self.high {
            RiskLevel::Moderate
        } else if total < self.critical {
            RiskLevel::High
        } else {
            RiskLevel::Critical
        }
    }
}

/// Every weight, cap and threshold of the MPI formula
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MpiWeights {
    pub model_weight: f64,

    /// Lower bounds (mm) of rainfall steps 2..=n
    pub rainfall_thresholds: Vec<f64>,
    /// Points per rainfall step; one more entry than `rainfall_thresholds`
    pub rainfall_points: Vec<f64>,

    pub historical_per_flood: f64,
    pub historical_cap: f64,

    /// Drain density at or above which drainage adds no stress
    pub drain_reference: f64,
    pub drain_stress_cap: f64,
    pub sewerage_divisor: f64,
    pub sewerage_cap: f64,
    pub drainage_divisor: f64,
    pub drainage_cap: f64,
    pub pothole_divisor: f64,
    pub large_pothole_divisor: f64,
    pub pothole_cap: f64,
    pub infrastructure_cap: f64,

    /// Elevation (m) below which a ward is exposed
    pub elevation_reference: f64,
    pub elevation_span: f64,
    pub elevation_cap: f64,
    pub lowlying_span: f64,
    pub lowlying_cap: f64,
    /// Points per unit of a ward's flood vulnerability index; replaces the
    /// elevation and low-lying terms when the index is present
    pub vulnerability_index_scale: f64,
    /// Rain intensity (mm/h) above which urbanization adds a penalty
    pub urban_intensity_threshold: f64,
    pub urban_cap: f64,
    pub vulnerability_cap: f64,

    pub thresholds: RiskThresholds,
}

impl Default for MpiWeights {
    fn default() -> Self {
        MpiWeights {
            model_weight: 40.0,
            rainfall_thresholds: vec![5.0, 15.0, 35.0, 65.0],
            rainfall_points: vec![0.0, 5.0, 10.0, 15.0, 20.0],
            historical_per_flood: 2.5,
            historical_cap: 15.0,
            drain_reference: 10.0,
            drain_stress_cap: 6.0,
            sewerage_divisor: 15.0,
            sewerage_cap: 4.0,
            drainage_divisor: 25.0,
            drainage_cap: 3.0,
            pothole_divisor: 5.0,
            large_pothole_divisor: 2.0,
            pothole_cap: 2.0,
            infrastructure_cap: 15.0,
            elevation_reference: 220.0,
            elevation_span: 15.0,
            elevation_cap: 5.0,
            lowlying_span: 30.0,
            lowlying_cap: 5.0,
            vulnerability_index_scale: 10.0,
            urban_intensity_threshold: 10.0,
            urban_cap: 2.0,
            vulnerability_cap: 10.0,
            thresholds: RiskThresholds::default(),
        }
    }
}

impl MpiWeights {
    /// Most points the rainfall step can award
    pub fn rainfall_max(&self) -> f64 {
        self.rainfall_points.iter().copied().fold(0.0, f64::max)
    }

    /// Highest attainable total without the model component
    pub fn degraded_max(&self) -> f64 {
        self.rainfall_max() + self.historical_cap + self.infrastructure_cap + self.vulnerability_cap
    }
}

/// The rule inputs of one ward, taken from its feature vector and civic record
#[derive(Debug, Clone, PartialEq)]
pub struct MpiInputs {
    pub rain_3h: f64,
    pub rain_forecast_3h: f64,
    pub rain_intensity: f64,
    pub hist_flood_freq: f64,
    pub drain_density: f64,
    pub mean_elevation: f64,
    pub low_lying_pct: f64,
    pub urbanization_index: Option<f64>,
    pub flood_vulnerability_index: Option<f64>,
    pub sewerage_complaints: f64,
    pub drainage_complaints: f64,
    pub sewerage_growth_rate: f64,
    pub pothole_count: f64,
    pub pothole_severity_ratio: f64,
}

impl MpiInputs {
    pub fn from_vector(vector: &FeatureVector, ward: &Ward) -> Self {
        MpiInputs {
            rain_3h: vector.get(Feature::Rain3h),
            rain_forecast_3h: vector.get(Feature::RainForecast3h),
            rain_intensity: vector.get(Feature::RainIntensity),
            hist_flood_freq: vector.get(Feature::HistFloodFreq),
            drain_density: vector.get(Feature::DrainDensity),
            mean_elevation: vector.get(Feature::MeanElevation),
            low_lying_pct: vector.get(Feature::LowLyingPct),
            urbanization_index: ward
                .static_attrs
                .urbanization_index
                .filter(|v| v.is_finite()),
            flood_vulnerability_index: ward
                .static_attrs
                .flood_vulnerability_index
                .filter(|v| v.is_finite()),
            sewerage_complaints: ward.civic.sewerage_complaints,
            drainage_complaints: ward.civic.drainage_complaints,
            sewerage_growth_rate: ward.civic.sewerage_growth_rate,
            pothole_count: ward.civic.pothole_count,
            pothole_severity_ratio: ward.civic.pothole_severity_ratio,
        }
    }

    pub fn rain_total(&self) -> f64 {
        self.rain_3h + self.rain_forecast_3h
    }
}

/// Component scores and total of one ward's MPI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MpiBreakdown {
    pub model: f64,
    pub rainfall: f64,
    pub historical: f64,
    pub infrastructure: f64,
    pub vulnerability: f64,
    pub total: f64,
    pub risk_level: RiskLevel,
    /// Probability used for the model component, absent in degraded mode
    pub probability: Option<f64>,
    /// Model component missing; at most the degraded maximum is attainable
    pub partial: bool,
}

/// Clamp into [0, cap], mapping NaN to 0
fn capped(value: f64, cap: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, cap.max(0.0))
    }
}

/// Scores the MPI from a probability and a ward's rule inputs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MpiComposer {
    pub weights: MpiWeights,
}

impl MpiComposer {
    pub fn new(weights: MpiWeights) -> Self {
        MpiComposer { weights }
    }

    pub fn rainfall_component(&self, rain_total: f64) -> f64 {
        let step = self
            .weights
            .rainfall_thresholds
            .iter()
            .take_while(|&&threshold| rain_total >= threshold)
            .count();
        self.weights
            .rainfall_points
            .get(step)
            .copied()
            .unwrap_or(0.0)
    }

    pub fn historical_component(&self, hist_flood_freq: f64) -> f64 {
        let w = &self.weights;
        capped(hist_flood_freq * w.historical_per_flood, w.historical_cap)
    }

    pub fn infrastructure_component(&self, inputs: &MpiInputs) -> f64 {
        let w = &self.weights;
        let drain_stress = capped(
            (w.drain_reference - inputs.drain_density).max(0.0) / w.drain_reference
                * w.drain_stress_cap,
            w.drain_stress_cap,
        );
        let sewerage = capped(
            inputs.sewerage_complaints / w.sewerage_divisor * (1.0 + inputs.sewerage_growth_rate),
            w.sewerage_cap,
        );
        let drainage = capped(
            inputs.drainage_complaints / w.drainage_divisor,
            w.drainage_cap,
        );
        let large_potholes = inputs.pothole_count * inputs.pothole_severity_ratio.clamp(0.0, 1.0);
        let potholes = capped(
            inputs.pothole_count / w.pothole_divisor + large_potholes / w.large_pothole_divisor,
            w.pothole_cap,
        );
        capped(
            drain_stress + sewerage + drainage + potholes,
            w.infrastructure_cap,
        )
    }

    pub fn vulnerability_component(&self, inputs: &MpiInputs) -> f64 {
        let w = &self.weights;
        let terrain = match inputs.flood_vulnerability_index {
            Some(index) => capped(index * w.vulnerability_index_scale, w.vulnerability_cap),
            None => {
                let elevation = capped(
                    (w.elevation_reference - inputs.mean_elevation).max(0.0) / w.elevation_span
                        * w.elevation_cap,
                    w.elevation_cap,
                );
                let lowlying = capped(
                    inputs.low_lying_pct / w.lowlying_span * w.lowlying_cap,
                    w.lowlying_cap,
                );
                elevation + lowlying
            }
        };
        let urban = match inputs.urbanization_index {
            Some(index) if inputs.rain_intensity > w.urban_intensity_threshold => capped(
                index * inputs.rain_intensity / w.urban_intensity_threshold * w.urban_cap,
                w.urban_cap,
            ),
            _ => 0.0,
        };
        capped(terrain + urban, w.vulnerability_cap)
    }

    /// Compose the breakdown; `None` probability means degraded mode
    pub fn compose_inputs(&self, probability: Option<f64>, inputs: &MpiInputs) -> MpiBreakdown {
        let w = &self.weights;
        let probability = probability.map(|p| capped(p, 1.0));
        let model = probability.map_or(0.0, |p| p * w.model_weight);
        let rainfall = self.rainfall_component(inputs.rain_total());
        let historical = self.historical_component(inputs.hist_flood_freq);
        let infrastructure = self.infrastructure_component(inputs);
        let vulnerability = self.vulnerability_component(inputs);

        let total = capped(
            model + rainfall + historical + infrastructure + vulnerability,
            100.0,
        );

        MpiBreakdown {
            model,
            rainfall,
            historical,
            infrastructure,
            vulnerability,
            total,
            risk_level: w.thresholds.level(total),
            probability,
            partial: probability.is_none(),
        }
    }

    pub fn compose(
        &self,
        probability: Option<f64>,
        vector: &FeatureVector,
        ward: &Ward,
    ) -> MpiBreakdown {
        self.compose_inputs(probability, &MpiInputs::from_vector(vector, ward))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Ward from the reference data: 8 floods, drain density 0.84
    fn reference_inputs(rain_total: f64) -> MpiInputs {
        MpiInputs {
            rain_3h: rain_total,
            rain_forecast_3h: 0.0,
            rain_intensity: 5.0,
            hist_flood_freq: 8.0,
            drain_density: 0.84,
            mean_elevation: 208.0,
            low_lying_pct: 24.0,
            urbanization_index: None,
            flood_vulnerability_index: None,
            sewerage_complaints: 40.0,
            drainage_complaints: 62.0,
            sewerage_growth_rate: 0.75,
            pothole_count: 0.0,
            pothole_severity_ratio: 0.0,
        }
    }

    fn quiet_inputs() -> MpiInputs {
        MpiInputs {
            rain_3h: 0.0,
            rain_forecast_3h: 0.0,
            rain_intensity: 0.0,
            hist_flood_freq: 0.0,
            drain_density: 9.0,
            mean_elevation: 228.0,
            low_lying_pct: 3.0,
            urbanization_index: Some(0.2),
            flood_vulnerability_index: None,
            sewerage_complaints: 0.0,
            drainage_complaints: 0.0,
            sewerage_growth_rate: 0.0,
            pothole_count: 0.0,
            pothole_severity_ratio: 0.0,
        }
    }

    #[test]
    fn test_reference_scenario_is_high() {
        let composer = MpiComposer::default();
        let b = composer.compose_inputs(Some(0.019), &reference_inputs(75.0));
        assert!((b.model - 0.76).abs() < 1e-9);
        assert_eq!(b.rainfall, 20.0);
        assert_eq!(b.historical, 15.0);
        assert!((b.infrastructure - 11.976).abs() < 1e-9);
        assert!((b.vulnerability - 8.0).abs() < 1e-9);
        assert!((b.total - 55.8).abs() < 0.1);
        assert_eq!(b.risk_level, RiskLevel::High);
        assert!(!b.partial);
    }

    #[test]
    fn test_historical_caps_at_six_floods() {
        let composer = MpiComposer::default();
        assert_eq!(composer.historical_component(6.0), 15.0);
        assert_eq!(composer.historical_component(7.0), 15.0);
        assert_eq!(composer.historical_component(2.0), 5.0);
    }

    #[test]
    fn test_rainfall_steps_are_lower_inclusive() {
        let composer = MpiComposer::default();
        assert_eq!(composer.rainfall_component(4.99), 0.0);
        assert_eq!(composer.rainfall_component(5.0), 5.0);
        assert_eq!(composer.rainfall_component(15.0), 10.0);
        assert_eq!(composer.rainfall_component(64.99), 15.0);
        assert_eq!(composer.rainfall_component(65.0), 20.0);
        assert_eq!(composer.rainfall_component(300.0), 20.0);
    }

    #[test]
    fn test_rainfall_is_monotonic() {
        let composer = MpiComposer::default();
        let mut prev_component = -1.0;
        let mut prev_total = -1.0;
        for step in 0..200 {
            let b = composer.compose_inputs(Some(0.3), &reference_inputs(step as f64 * 0.5));
            assert!(b.rainfall >= prev_component);
            assert!(b.total >= prev_total);
            prev_component = b.rainfall;
            prev_total = b.total;
        }
    }

    #[test]
    fn test_degraded_mode_is_partial_and_bounded() {
        let composer = MpiComposer::default();
        let mut worst = reference_inputs(500.0);
        worst.mean_elevation = 150.0;
        worst.low_lying_pct = 100.0;
        worst.pothole_count = 50.0;
        let b = composer.compose_inputs(None, &worst);
        assert!(b.partial);
        assert_eq!(b.model, 0.0);
        assert_eq!(b.probability, None);
        assert!(b.total <= 60.0);
        assert_eq!(composer.weights.degraded_max(), 60.0);
    }

    #[test]
    fn test_dry_well_drained_ward_is_low() {
        let composer = MpiComposer::default();
        let b = composer.compose_inputs(Some(0.01), &quiet_inputs());
        assert_eq!(b.rainfall, 0.0);
        assert_eq!(b.historical, 0.0);
        assert_eq!(b.risk_level, RiskLevel::Low);
        assert!(b.total < 5.0);
    }

    #[test]
    fn test_urban_penalty_needs_heavy_rain() {
        let composer = MpiComposer::default();
        let mut inputs = quiet_inputs();
        inputs.urbanization_index = Some(0.8);
        inputs.rain_intensity = 10.0;
        let light = composer.vulnerability_component(&inputs);
        inputs.rain_intensity = 15.0;
        let heavy = composer.vulnerability_component(&inputs);
        // 0.8 × 15 / 10 × 2 = 2.4, capped at 2
        assert!((heavy - light - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_vulnerability_index_replaces_terrain_terms() {
        let composer = MpiComposer::default();
        let mut inputs = quiet_inputs();
        // low-lying 3% alone gives 0.5
        assert!((composer.vulnerability_component(&inputs) - 0.5).abs() < 1e-9);

        inputs.flood_vulnerability_index = Some(0.6);
        assert!((composer.vulnerability_component(&inputs) - 6.0).abs() < 1e-9);

        inputs.urbanization_index = Some(0.8);
        inputs.rain_intensity = 15.0;
        assert!((composer.vulnerability_component(&inputs) - 8.0).abs() < 1e-9);

        inputs.flood_vulnerability_index = Some(1.5);
        assert_eq!(composer.vulnerability_component(&inputs), 10.0);
    }

    #[test]
    fn test_components_respect_caps() {
        let composer = MpiComposer::default();
        let mut extreme = reference_inputs(1000.0);
        extreme.hist_flood_freq = 100.0;
        extreme.drain_density = -5.0;
        extreme.sewerage_complaints = 1e6;
        extreme.drainage_complaints = 1e6;
        extreme.pothole_count = 1e6;
        extreme.pothole_severity_ratio = 1.0;
        extreme.mean_elevation = 0.0;
        extreme.low_lying_pct = 1e3;
        extreme.urbanization_index = Some(1.0);
        extreme.rain_intensity = 500.0;
        let b = composer.compose_inputs(Some(1.5), &extreme);
        assert_eq!(b.model, 40.0);
        assert!(b.infrastructure <= 15.0);
        assert!(b.vulnerability <= 10.0);
        assert!(b.total <= 100.0);
        assert_eq!(b.risk_level, RiskLevel::Critical);
    }

    #[test]
    fn test_compose_is_idempotent() {
        let composer = MpiComposer::default();
        let a = composer.compose_inputs(Some(0.42), &reference_inputs(33.0));
        let b = composer.compose_inputs(Some(0.42), &reference_inputs(33.0));
        assert_eq!(a, b);
        assert_eq!(a.total.to_bits(), b.total.to_bits());
    }

    #[test]
    fn test_level_thresholds() {
        let t = RiskThresholds::default();
        assert_eq!(t.level(29.99), RiskLevel::Low);
        assert_eq!(t.level(30.0), RiskLevel::Moderate);
        assert_eq!(t.level(50.0), RiskLevel::High);
        assert_eq!(t.level(70.0), RiskLevel::Critical);
        assert_eq!(t.level(100.0), RiskLevel::Critical);
    }
}
