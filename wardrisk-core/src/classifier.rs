//! Calibrated flood classifier
//!
//! Built once from an artifact, then shared read-only across scoring threads
//! as [`SharedClassifier`].

use crate::artifact::ModelArtifact;
use crate::ensemble::sigmoid;
use crate::error::{EngineError, EngineResult};
use crate::features::{feature_names, FeatureVector, FEATURE_COUNT};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Calibrated flood probability for one ward at one timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub ward_id: String,
    pub probability: f64,
    pub timestamp: NaiveDateTime,
}

/// Tree ensemble plus isotonic map, bound to the current feature schema
#[derive(Debug, Clone)]
pub struct CalibratedClassifier {
    artifact: ModelArtifact,
}

pub type SharedClassifier = Arc<CalibratedClassifier>;

impl CalibratedClassifier {
    /// Accept an artifact only if its schema matches the feature builder exactly
    pub fn new(artifact: ModelArtifact) -> EngineResult<Self> {
        let expected = feature_names();
        if artifact.feature_names != expected {
            return Err(EngineError::SchemaMismatch {
                expected: FEATURE_COUNT,
                found: artifact.feature_names.len(),
                expected_names: expected,
                found_names: artifact.feature_names,
            });
        }
        artifact.validate()?;
        Ok(CalibratedClassifier { artifact })
    }

    /// Load, validate and wrap for sharing
    pub fn load(path: &Path) -> EngineResult<SharedClassifier> {
        let artifact = ModelArtifact::load(path)?;
        Ok(Arc::new(Self::new(artifact)?))
    }

    pub fn artifact(&self) -> &ModelArtifact {
        &self.artifact
    }

    pub fn model_version(&self) -> &str {
        &self.artifact.model_version
    }

    pub fn raw_score(&self, values: &[f64]) -> f64 {
        self.artifact.ensemble.raw_score(values)
    }

    pub fn probability(&self, values: &[f64]) -> f64 {
        let p = self.artifact.calibration.apply(sigmoid(self.raw_score(values)));
        if p.is_nan() {
            0.0
        } else {
            p.clamp(0.0, 1.0)
        }
    }

    pub fn predict(&self, vector: &FeatureVector) -> Prediction {
        Prediction {
            ward_id: vector.ward_id.clone(),
            probability: self.probability(&vector.values),
            timestamp: vector.timestamp,
        }
    }

    /// Gain-based importance, highest first
    pub fn feature_importance(&self) -> Vec<(String, f64)> {
        let gains = self.artifact.ensemble.feature_importance(FEATURE_COUNT);
        let mut ranked: Vec<(String, f64)> = self
            .artifact
            .feature_names
            .iter()
            .cloned()
            .zip(gains)
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::tests::tiny_artifact;
    use crate::features::Feature;
    use chrono::NaiveDate;

    fn vector_with_rain(rain_3h: f64) -> FeatureVector {
        let mut values = [0.0; FEATURE_COUNT];
        values[Feature::Rain3h.index()] = rain_3h;
        FeatureVector {
            ward_id: "A1".into(),
            timestamp: NaiveDate::from_ymd_opt(2024, 8, 1)
                .unwrap()
                .and_hms_opt(6, 0, 0)
                .unwrap(),
            values,
        }
    }

    #[test]
    fn test_predict_uses_ensemble_and_calibration() {
        let clf = CalibratedClassifier::new(tiny_artifact()).unwrap();
        let dry = clf.predict(&vector_with_rain(5.0));
        let wet = clf.predict(&vector_with_rain(50.0));
        assert!((dry.probability - sigmoid(-3.0)).abs() < 1e-12);
        assert!((wet.probability - sigmoid(2.0)).abs() < 1e-12);
        assert_eq!(wet.ward_id, "A1");
    }

    #[test]
    fn test_reordered_schema_is_mismatch() {
        let mut artifact = tiny_artifact();
        artifact.feature_names.swap(0, 1);
        match CalibratedClassifier::new(artifact) {
            Err(EngineError::SchemaMismatch {
                expected, found, ..
            }) => {
                assert_eq!(expected, FEATURE_COUNT);
                assert_eq!(found, FEATURE_COUNT);
            }
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_short_schema_is_mismatch() {
        let mut artifact = tiny_artifact();
        artifact.feature_names.pop();
        assert!(matches!(
            CalibratedClassifier::new(artifact),
            Err(EngineError::SchemaMismatch { found: 19, .. })
        ));
    }

    #[test]
    fn test_importance_ranks_split_feature_first() {
        let clf = CalibratedClassifier::new(tiny_artifact()).unwrap();
        let ranked = clf.feature_importance();
        assert_eq!(ranked[0].0, "rain_3h");
        assert_eq!(ranked[0].1, 1.0);
        assert_eq!(ranked.len(), FEATURE_COUNT);
    }

    #[test]
    fn test_shared_across_threads() {
        let clf: SharedClassifier = Arc::new(CalibratedClassifier::new(tiny_artifact()).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let clf = Arc::clone(&clf);
                std::thread::spawn(move || clf.probability(&vector_with_rain(i as f64 * 20.0).values))
            })
            .collect();
        for h in handles {
            let p = h.join().unwrap();
            assert!((0.0..=1.0).contains(&p));
        }
    }
}
