//! Classifier training pipeline
//!
//! Observations -> synthetic labels -> temporal split -> boosted trees ->
//! isotonic calibration -> held-out evaluation -> artifact.
//!
//! Global invariants enforced:
//! - Seasons used for calibration and evaluation are strictly later than training seasons
//! - Reproducible for a given input, label seed and boosting seed

use crate::artifact::{portable_path, ArtifactMetadata, EvaluationMetrics, ModelArtifact, FORMAT_VERSION};
use crate::calibration::IsotonicCalibration;
use crate::ensemble::{sigmoid, BoostingParams, TreeEnsemble};
use crate::error::{EngineError, EngineResult, WardIssue};
use crate::features::{feature_names, FeatureBuilder};
use crate::labels::{DailyConditions, LabelSynthesizer, VulnerabilityTerms};
use crate::ward::{ImputationPolicy, WardRegistry};
use crate::weather::WeatherSample;
use chrono::{Datelike, NaiveDateTime};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// One historical weather observation for one ward
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub ward_id: String,
    pub timestamp: NaiveDateTime,
    #[serde(default)]
    pub weather: WeatherSample,
    /// Daily rainfall total for labelling; `rain_24h` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_total_mm: Option<f64>,
    /// Rainfall over the three preceding days
    #[serde(default)]
    pub antecedent_mm: f64,
}

/// Labelled feature row
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSample {
    pub ward_id: String,
    pub season: i32,
    pub values: Vec<f64>,
    pub label: bool,
    /// Synthetic failure probability the label was drawn from
    pub probability: f64,
}

/// Seasons assigned to each stage of training
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporalSplit {
    pub training: Vec<i32>,
    pub calibration: i32,
    pub evaluation: i32,
}

impl TemporalSplit {
    /// Latest season evaluates, the one before calibrates, the rest train
    pub fn latest(seasons: &BTreeSet<i32>) -> EngineResult<Self> {
        if seasons.len() < 3 {
            return Err(EngineError::InsufficientTrainingData(format!(
                "temporal split needs at least 3 seasons, found {}",
                seasons.len()
            )));
        }
        let mut ordered: Vec<i32> = seasons.iter().copied().collect();
        let evaluation = ordered.pop().unwrap_or_default();
        let calibration = ordered.pop().unwrap_or_default();
        Ok(TemporalSplit {
            training: ordered,
            calibration,
            evaluation,
        })
    }

    pub fn explicit(seasons: &BTreeSet<i32>, calibration: i32, evaluation: i32) -> EngineResult<Self> {
        if calibration >= evaluation {
            return Err(EngineError::InsufficientTrainingData(format!(
                "calibration season {} must precede evaluation season {}",
                calibration, evaluation
            )));
        }
        for season in [calibration, evaluation] {
            if !seasons.contains(&season) {
                return Err(EngineError::InsufficientTrainingData(format!(
                    "no observations in season {}",
                    season
                )));
            }
        }
        let training: Vec<i32> = seasons.iter().copied().filter(|s| *s < calibration).collect();
        if training.is_empty() {
            return Err(EngineError::InsufficientTrainingData(format!(
                "no seasons before calibration season {}",
                calibration
            )));
        }
        Ok(TemporalSplit {
            training,
            calibration,
            evaluation,
        })
    }
}

/// Knobs of one training run
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSettings {
    pub params: BoostingParams,
    /// Positive-class weight; n_negative / n_positive of the training split when unset
    pub positive_weight: Option<f64>,
    pub label_seed: u64,
    pub calibration_season: Option<i32>,
    pub evaluation_season: Option<i32>,
    pub imputation: ImputationPolicy,
    pub model_version: String,
    pub data_dir: Option<PathBuf>,
    pub artifact_dir: Option<PathBuf>,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        TrainingSettings {
            params: BoostingParams::default(),
            positive_weight: None,
            label_seed: 7,
            calibration_season: None,
            evaluation_season: None,
            imputation: ImputationPolicy::None,
            model_version: "wardrisk-gbdt-1".to_string(),
            data_dir: None,
            artifact_dir: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub artifact: ModelArtifact,
    pub split: TemporalSplit,
    /// Observations skipped during synthesis
    pub issues: Vec<WardIssue>,
}

/// Fits and calibrates the classifier from observations
#[derive(Debug, Clone, Copy)]
pub struct Trainer<'a> {
    pub features: &'a FeatureBuilder,
    pub labels: &'a LabelSynthesizer,
}

impl<'a> Trainer<'a> {
    pub fn new(features: &'a FeatureBuilder, labels: &'a LabelSynthesizer) -> Self {
        Trainer { features, labels }
    }

    /// Turn observations into labelled rows; unusable observations are reported
    pub fn synthesize<R: Rng + ?Sized>(
        &self,
        registry: &WardRegistry,
        observations: &[Observation],
        imputation: ImputationPolicy,
        rng: &mut R,
    ) -> (Vec<TrainingSample>, Vec<WardIssue>) {
        let mut samples = Vec::with_capacity(observations.len());
        let mut issues = Vec::new();

        for obs in observations {
            let result = registry
                .get(&obs.ward_id)
                .ok_or_else(|| EngineError::UnknownWard(obs.ward_id.clone()))
                .and_then(|ward| {
                    let statics = registry.resolve_statics(ward, imputation)?;
                    let vector =
                        self.features
                            .build_with_statics(ward, &statics, &obs.weather, obs.timestamp)?;
                    let terms = VulnerabilityTerms::from_ward(ward, &statics, &self.features.bounds);
                    Ok((vector, terms))
                });

            let (vector, terms) = match result {
                Ok(built) => built,
                Err(err) => {
                    log::debug!("skipping observation for {}: {}", obs.ward_id, err);
                    issues.push(WardIssue::from_error(&obs.ward_id, &err));
                    continue;
                }
            };

            let day = DailyConditions {
                date: obs.timestamp.date(),
                daily_total_mm: obs.daily_total_mm.unwrap_or(obs.weather.rain_24h).max(0.0),
                antecedent_mm: obs.antecedent_mm,
            };
            let probability = self.labels.failure_probability(&day, &terms);
            let label = self.labels.draw_label(probability, rng);

            samples.push(TrainingSample {
                ward_id: obs.ward_id.clone(),
                season: obs.timestamp.year(),
                values: vector.values.to_vec(),
                label,
                probability,
            });
        }

        if !issues.is_empty() {
            log::warn!("{} observation(s) skipped during label synthesis", issues.len());
        }
        (samples, issues)
    }

    pub fn train(
        &self,
        registry: &WardRegistry,
        observations: &[Observation],
        settings: &TrainingSettings,
    ) -> EngineResult<TrainingOutcome> {
        let mut rng = ChaCha8Rng::seed_from_u64(settings.label_seed);
        let (samples, issues) = self.synthesize(registry, observations, settings.imputation, &mut rng);
        if samples.is_empty() {
            return Err(EngineError::InsufficientTrainingData(
                "no usable observations".into(),
            ));
        }

        let seasons: BTreeSet<i32> = samples.iter().map(|s| s.season).collect();
        let split = match (settings.calibration_season, settings.evaluation_season) {
            (Some(cal), Some(eval)) => TemporalSplit::explicit(&seasons, cal, eval)?,
            (None, None) => TemporalSplit::latest(&seasons)?,
            _ => {
                return Err(EngineError::InsufficientTrainingData(
                    "calibration and evaluation seasons must be given together".into(),
                ))
            }
        };

        let train: Vec<&TrainingSample> = samples
            .iter()
            .filter(|s| split.training.contains(&s.season))
            .collect();
        let calibrate: Vec<&TrainingSample> = samples
            .iter()
            .filter(|s| s.season == split.calibration)
            .collect();
        let holdout: Vec<&TrainingSample> = samples
            .iter()
            .filter(|s| s.season == split.evaluation)
            .collect();

        let n_pos = train.iter().filter(|s| s.label).count();
        let n_neg = train.len() - n_pos;
        if n_pos == 0 || n_neg == 0 {
            return Err(EngineError::InsufficientTrainingData(format!(
                "training seasons need both classes ({} positive, {} negative)",
                n_pos, n_neg
            )));
        }
        let positive_weight = settings
            .positive_weight
            .unwrap_or(n_neg as f64 / n_pos as f64);

        log::info!(
            "training on {} rows ({} positive, weight {:.2}) from seasons {:?}",
            train.len(),
            n_pos,
            positive_weight,
            split.training
        );

        let rows: Vec<Vec<f64>> = train.iter().map(|s| s.values.clone()).collect();
        let labels: Vec<bool> = train.iter().map(|s| s.label).collect();
        let weights: Vec<f64> = labels
            .iter()
            .map(|&y| if y { positive_weight } else { 1.0 })
            .collect();
        let ensemble = TreeEnsemble::fit(&rows, &labels, &weights, &settings.params)?;

        let cal_scores: Vec<f64> = calibrate
            .iter()
            .map(|s| sigmoid(ensemble.raw_score(&s.values)))
            .collect();
        let cal_labels: Vec<bool> = calibrate.iter().map(|s| s.label).collect();
        let calibration =
            IsotonicCalibration::fit(&cal_scores, &cal_labels, &vec![1.0; cal_scores.len()])?;

        let eval_probs: Vec<f64> = holdout
            .iter()
            .map(|s| calibration.apply(sigmoid(ensemble.raw_score(&s.values))))
            .collect();
        let eval_labels: Vec<bool> = holdout.iter().map(|s| s.label).collect();
        let metrics = evaluate(&eval_probs, &eval_labels);

        log::info!(
            "season {} hold-out: brier {:.4}, log loss {:.4}, auc {}",
            split.evaluation,
            metrics.brier_score,
            metrics.log_loss,
            metrics
                .roc_auc
                .map_or_else(|| "n/a".to_string(), |a| format!("{:.3}", a))
        );

        let artifact = ModelArtifact {
            format_version: FORMAT_VERSION,
            model_version: settings.model_version.clone(),
            feature_names: feature_names(),
            ensemble,
            calibration,
            metadata: ArtifactMetadata {
                trained_at: chrono::Utc::now().to_rfc3339(),
                data_dir: settings.data_dir.as_deref().map(portable_path),
                artifact_dir: settings.artifact_dir.as_deref().map(portable_path),
                training_seasons: split.training.clone(),
                calibration_season: split.calibration,
                evaluation_season: split.evaluation,
                n_train: train.len(),
                n_calibration: calibrate.len(),
                positive_weight,
                params: settings.params.clone(),
                metrics: Some(metrics),
            },
        };

        Ok(TrainingOutcome {
            artifact,
            split,
            issues,
        })
    }
}

/// Probability quality on labelled data
pub fn evaluate(probabilities: &[f64], labels: &[bool]) -> EvaluationMetrics {
    let n = probabilities.len().min(labels.len());
    if n == 0 {
        return EvaluationMetrics {
            n_samples: 0,
            positive_rate: 0.0,
            brier_score: 0.0,
            log_loss: 0.0,
            roc_auc: None,
        };
    }
    let pairs: Vec<(f64, f64)> = probabilities
        .iter()
        .zip(labels)
        .take(n)
        .map(|(&p, &y)| (p.clamp(0.0, 1.0), if y { 1.0 } else { 0.0 }))
        .collect();

    let positives = pairs.iter().filter(|(_, y)| *y > 0.5).count();
    let brier_score = pairs.iter().map(|(p, y)| (p - y).powi(2)).sum::<f64>() / n as f64;

    let eps = 1e-15;
    let log_loss = -pairs
        .iter()
        .map(|(p, y)| {
            let p = p.clamp(eps, 1.0 - eps);
            y * p.ln() + (1.0 - y) * (1.0 - p).ln()
        })
        .sum::<f64>()
        / n as f64;

    EvaluationMetrics {
        n_samples: n,
        positive_rate: positives as f64 / n as f64,
        brier_score,
        log_loss,
        roc_auc: roc_auc(&pairs, positives),
    }
}

/// Rank-based AUC with average ranks for ties
fn roc_auc(pairs: &[(f64, f64)], positives: usize) -> Option<f64> {
    let negatives = pairs.len() - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }
    let mut order: Vec<usize> = (0..pairs.len()).collect();
    order.sort_by(|&a, &b| pairs[a].0.total_cmp(&pairs[b].0));

    let mut rank_sum = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && pairs[order[j + 1]].0 == pairs[order[i]].0 {
            j += 1;
        }
        // Ranks are 1-based; tied block shares the mean rank
        let mean_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            if pairs[idx].1 > 0.5 {
                rank_sum += mean_rank;
            }
        }
        i = j + 1;
    }

    let p = positives as f64;
    Some((rank_sum - p * (p + 1.0) / 2.0) / (p * negatives as f64))
}
