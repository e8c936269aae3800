//! Wardrisk core library - ward-level flood risk and monsoon preparedness scoring

// Global invariants enforced in this crate:
// - Scoring is strictly per-ward; wards never see each other's results
// - No global mutable state; a loaded classifier is shared read-only
// - No I/O during scoring; callers hand in materialized wards and weather
// - Randomness only at training time, always from an explicit seed
// - Identical input yields byte-for-byte identical output

pub mod artifact;
pub mod calibration;
pub mod classifier;
pub mod config;
pub mod cycle;
pub mod ensemble;
pub mod error;
pub mod features;
pub mod labels;
pub mod mpi;
pub mod preparedness;
pub mod report;
pub mod training;
pub mod ward;
pub mod weather;
pub mod zones;

pub use artifact::ModelArtifact;
pub use classifier::{CalibratedClassifier, SharedClassifier};
pub use config::{EngineConfig, ResolvedConfig};
pub use cycle::{ModelState, PreparednessAssessment, ScoringCycle};
pub use error::{EngineError, EngineResult, WardIssue};
pub use features::{FeatureBuilder, FeatureVector};
pub use mpi::{MpiBreakdown, RiskLevel};
pub use preparedness::{PreparednessBreakdown, PreparednessLevel};
pub use report::{render_json, render_text, CycleReport};
pub use training::{Observation, Trainer, TrainingSettings};
pub use ward::{Ward, WardRegistry};
pub use weather::{WeatherSample, WeatherSnapshot};

use anyhow::{Context, Result};
use std::path::Path;

/// Read a ward registry (JSON array of wards)
pub fn load_registry(path: &Path) -> Result<WardRegistry> {
    let wards: Vec<Ward> = read_json(path)?;
    WardRegistry::from_wards(wards)
        .with_context(|| format!("invalid ward registry {}", path.display()))
}

/// Read a weather snapshot
pub fn load_weather(path: &Path) -> Result<WeatherSnapshot> {
    read_json(path)
}

/// Read training observations (JSON array)
pub fn load_observations(path: &Path) -> Result<Vec<Observation>> {
    read_json(path)
}

/// Read a previously written cycle report
pub fn load_report(path: &Path) -> Result<CycleReport> {
    read_json(path)
}

/// Load the classifier for a cycle; failure yields degraded mode, never an error
pub fn load_model(path: Option<&Path>) -> ModelState {
    match path {
        Some(path) => CalibratedClassifier::load(path).into(),
        None => ModelState::Unavailable(EngineError::ArtifactUnavailable(
            "no model artifact configured".to_string(),
        )),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}
