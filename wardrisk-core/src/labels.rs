//! Synthetic flood labels for training
//!
//! Ground-truth hourly flood labels do not exist, so training targets are
//! derived from daily rainfall and ward vulnerability. The probability is a
//! deterministic function of its inputs; only the Bernoulli draw is random.

use crate::features::{NormalizationBounds, SeasonCalendar};
use crate::ward::{ResolvedStatics, Ward};
use chrono::NaiveDate;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Constants of the label model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LabelWeights {
    /// Lower bounds (mm/day) of buckets 2..=n; the first bucket starts at 0
    pub rain_thresholds: Vec<f64>,
    /// Base failure rate per bucket; one more entry than `rain_thresholds`
    pub rain_rates: Vec<f64>,
    pub low_lying_weight: f64,
    pub poor_drainage_weight: f64,
    pub historical_risk_weight: f64,
    pub flood_frequency_weight: f64,
    /// Floor of the vulnerability multiplier
    pub vulnerability_floor: f64,
    /// Slope of the vulnerability multiplier
    pub vulnerability_gain: f64,
    /// Maximum contribution of antecedent rainfall
    pub antecedent_weight: f64,
    /// Antecedent rainfall (mm over 3 days) at which the term saturates
    pub antecedent_saturation_mm: f64,
    pub peak_boost: f64,
}

impl Default for LabelWeights {
    fn default() -> Self {
        LabelWeights {
            rain_thresholds: vec![2.0, 8.0, 20.0, 45.0, 90.0],
            rain_rates: vec![0.0, 0.08, 0.25, 0.50, 0.75, 0.92],
            low_lying_weight: 0.30,
            poor_drainage_weight: 0.25,
            historical_risk_weight: 0.25,
            flood_frequency_weight: 0.20,
            vulnerability_floor: 0.35,
            vulnerability_gain: 1.2,
            antecedent_weight: 0.10,
            antecedent_saturation_mm: 100.0,
            peak_boost: 0.05,
        }
    }
}

/// Normalized vulnerability terms of one ward, each in [0,1]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VulnerabilityTerms {
    pub low_lying: f64,
    pub poor_drainage: f64,
    pub historical_risk: f64,
    pub flood_frequency: f64,
}

impl VulnerabilityTerms {
    pub fn from_ward(ward: &Ward, statics: &ResolvedStatics, bounds: &NormalizationBounds) -> Self {
        VulnerabilityTerms {
            low_lying: bounds.low_lying_pct.normalize(statics.low_lying_pct),
            poor_drainage: 1.0 - bounds.drain_density.normalize(statics.drain_density),
            historical_risk: ward.historical.monsoon_risk_score.clamp(0.0, 1.0),
            flood_frequency: bounds
                .hist_flood_freq
                .normalize(ward.historical.hist_flood_freq),
        }
    }
}

/// One day of rainfall context for a ward
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyConditions {
    pub date: NaiveDate,
    pub daily_total_mm: f64,
    /// Rainfall over the three preceding days
    pub antecedent_mm: f64,
}

/// Physics-informed label model
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelSynthesizer {
    pub weights: LabelWeights,
    pub season: SeasonCalendar,
}

impl LabelSynthesizer {
    pub fn new(weights: LabelWeights, season: SeasonCalendar) -> Self {
        LabelSynthesizer { weights, season }
    }

    /// Piecewise base rate; buckets are lower-inclusive, the last is open-ended
    pub fn rain_base_rate(&self, daily_total_mm: f64) -> f64 {
        let bucket = self
            .weights
            .rain_thresholds
            .iter()
            .take_while(|&&threshold| daily_total_mm >= threshold)
            .count();
        self.weights.rain_rates.get(bucket).copied().unwrap_or(0.0)
    }

    /// Weighted vulnerability in [0,1]
    pub fn vulnerability(&self, terms: &VulnerabilityTerms) -> f64 {
        let w = &self.weights;
        (w.low_lying_weight * terms.low_lying
            + w.poor_drainage_weight * terms.poor_drainage
            + w.historical_risk_weight * terms.historical_risk
            + w.flood_frequency_weight * terms.flood_frequency)
            .clamp(0.0, 1.0)
    }

    pub fn antecedent_term(&self, antecedent_mm: f64) -> f64 {
        let w = &self.weights;
        if w.antecedent_saturation_mm <= 0.0 {
            return 0.0;
        }
        w.antecedent_weight * (antecedent_mm.max(0.0) / w.antecedent_saturation_mm).min(1.0)
    }

    /// Deterministic failure probability in [0,1]
    pub fn failure_probability(&self, day: &DailyConditions, terms: &VulnerabilityTerms) -> f64 {
        let w = &self.weights;
        let base = self.rain_base_rate(day.daily_total_mm);
        let multiplier = w.vulnerability_floor + w.vulnerability_gain * self.vulnerability(terms);
        let boost = if self.season.is_peak(day.date) {
            w.peak_boost
        } else {
            0.0
        };
        let p = base * multiplier + self.antecedent_term(day.antecedent_mm) + boost;
        if p.is_nan() {
            0.0
        } else {
            p.clamp(0.0, 1.0)
        }
    }

    /// Bernoulli draw from the probability using the caller's random source
    pub fn draw_label<R: Rng + ?Sized>(&self, probability: f64, rng: &mut R) -> bool {
        let p = if probability.is_nan() {
            0.0
        } else {
            probability.clamp(0.0, 1.0)
        };
        rng.gen_bool(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn off_peak(total: f64) -> DailyConditions {
        DailyConditions {
            date: NaiveDate::from_ymd_opt(2022, 6, 10).unwrap(),
            daily_total_mm: total,
            antecedent_mm: 0.0,
        }
    }

    fn zero_terms() -> VulnerabilityTerms {
        VulnerabilityTerms {
            low_lying: 0.0,
            poor_drainage: 0.0,
            historical_risk: 0.0,
            flood_frequency: 0.0,
        }
    }

    #[test]
    fn test_bucket_boundaries_are_lower_inclusive() {
        let s = LabelSynthesizer::default();
        assert_eq!(s.rain_base_rate(0.0), 0.0);
        assert_eq!(s.rain_base_rate(1.99), 0.0);
        assert_eq!(s.rain_base_rate(2.0), 0.08);
        assert_eq!(s.rain_base_rate(8.0), 0.25);
        assert_eq!(s.rain_base_rate(19.9), 0.25);
        assert_eq!(s.rain_base_rate(20.0), 0.50);
        assert_eq!(s.rain_base_rate(45.0), 0.75);
        assert_eq!(s.rain_base_rate(89.99), 0.75);
        assert_eq!(s.rain_base_rate(90.0), 0.92);
        assert_eq!(s.rain_base_rate(90.01), 0.92);
        assert_eq!(s.rain_base_rate(400.0), 0.92);
    }

    #[test]
    fn test_vulnerability_weights() {
        let s = LabelSynthesizer::default();
        let terms = VulnerabilityTerms {
            low_lying: 1.0,
            poor_drainage: 1.0,
            historical_risk: 0.0,
            flood_frequency: 0.5,
        };
        assert!((s.vulnerability(&terms) - (0.30 + 0.25 + 0.10)).abs() < 1e-12);
    }

    #[test]
    fn test_probability_formula() {
        let s = LabelSynthesizer::default();
        // 30mm -> 0.50 base, zero vulnerability -> multiplier 0.35
        let p = s.failure_probability(&off_peak(30.0), &zero_terms());
        assert!((p - 0.175).abs() < 1e-12);

        // Peak window adds the boost, antecedent 50mm adds 0.05
        let peak = DailyConditions {
            date: NaiveDate::from_ymd_opt(2022, 8, 1).unwrap(),
            daily_total_mm: 30.0,
            antecedent_mm: 50.0,
        };
        let p = s.failure_probability(&peak, &zero_terms());
        assert!((p - (0.175 + 0.05 + 0.05)).abs() < 1e-12);
    }

    #[test]
    fn test_probability_is_clamped() {
        let s = LabelSynthesizer::default();
        let terms = VulnerabilityTerms {
            low_lying: 1.0,
            poor_drainage: 1.0,
            historical_risk: 1.0,
            flood_frequency: 1.0,
        };
        let extreme = DailyConditions {
            date: NaiveDate::from_ymd_opt(2022, 8, 1).unwrap(),
            daily_total_mm: 200.0,
            antecedent_mm: 500.0,
        };
        assert_eq!(s.failure_probability(&extreme, &terms), 1.0);
    }

    #[test]
    fn test_seeded_draws_are_reproducible() {
        let s = LabelSynthesizer::default();
        let draw = |seed| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            (0..64).map(|_| s.draw_label(0.4, &mut rng)).collect::<Vec<_>>()
        };
        assert_eq!(draw(7), draw(7));

        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert!(!s.draw_label(0.0, &mut rng));
        assert!(s.draw_label(1.0, &mut rng));
    }
}
