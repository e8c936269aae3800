//! Error taxonomy for the scoring engine
//!
//! Every public operation in this crate returns either a fully-populated result
//! or one of these named failures. Configuration loading is the exception: it
//! uses `anyhow` with file context, like the CLI.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used throughout the crate
pub type EngineResult<T> = Result<T, EngineError>;

/// Named failures surfaced by the engine
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// A required static attribute is absent and no imputation could fill it
    #[error("ward {ward_id}: missing required attribute `{field}`")]
    MissingAttribute { ward_id: String, field: String },

    /// Rainfall value is negative or not a number
    #[error("ward {ward_id}: invalid weather sample, `{field}` = {value}")]
    InvalidWeatherSample {
        ward_id: String,
        field: String,
        value: f64,
    },

    /// Feature schema of the artifact disagrees with the feature builder
    #[error("feature schema mismatch: expected {expected} features {expected_names:?}, artifact has {found} {found_names:?}")]
    SchemaMismatch {
        expected: usize,
        found: usize,
        expected_names: Vec<String>,
        found_names: Vec<String>,
    },

    /// No usable classifier artifact
    #[error("classifier artifact unavailable: {0}")]
    ArtifactUnavailable(String),

    /// Two registry records share a ward id
    #[error("duplicate ward id `{0}` in registry")]
    DuplicateWard(String),

    /// A ward id is not present in the registry
    #[error("unknown ward `{0}`")]
    UnknownWard(String),

    /// Neither a per-ward nor a city-wide weather sample exists for the ward
    #[error("ward {0}: no weather sample in snapshot")]
    MissingWeather(String),

    /// Training inputs cannot produce a model
    #[error("insufficient training data: {0}")]
    InsufficientTrainingData(String),
}

impl EngineError {
    /// Stable machine-readable kind, used in issue lists and JSON output
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::MissingAttribute { .. } => "missing_attribute",
            EngineError::InvalidWeatherSample { .. } => "invalid_weather_sample",
            EngineError::SchemaMismatch { .. } => "schema_mismatch",
            EngineError::ArtifactUnavailable(_) => "artifact_unavailable",
            EngineError::DuplicateWard(_) => "duplicate_ward",
            EngineError::UnknownWard(_) => "unknown_ward",
            EngineError::MissingWeather(_) => "missing_weather",
            EngineError::InsufficientTrainingData(_) => "insufficient_training_data",
        }
    }
}

/// A per-ward problem reported alongside a cycle or training run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WardIssue {
    pub ward_id: String,
    pub kind: String,
    pub detail: String,
}

impl WardIssue {
    pub fn new(ward_id: impl Into<String>, kind: &str, detail: impl Into<String>) -> Self {
        WardIssue {
            ward_id: ward_id.into(),
            kind: kind.to_string(),
            detail: detail.into(),
        }
    }

    pub fn from_error(ward_id: &str, err: &EngineError) -> Self {
        WardIssue::new(ward_id, err.kind(), err.to_string())
    }
}
