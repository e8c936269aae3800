//! Versioned classifier artifact
//!
//! The bundle carries the tree ensemble, the calibration curve, the ordered
//! feature schema and a metadata record. Encoded as JSON, optionally zstd
//! compressed (level 3); the decoder detects the zstd frame magic.
//!
//! Paths in the metadata are plain `/`-separated strings. They become
//! `PathBuf`s only through [`native_path`] after loading.

use crate::calibration::IsotonicCalibration;
use crate::ensemble::{BoostingParams, TreeEnsemble};
use crate::error::{EngineError, EngineResult};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// Newest bundle layout this build can read
pub const FORMAT_VERSION: u32 = 1;

const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];
const ZSTD_LEVEL: i32 = 3;

/// Held-out evaluation of a trained model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub n_samples: usize,
    pub positive_rate: f64,
    pub brier_score: f64,
    pub log_loss: f64,
    /// Undefined when the evaluation season has a single class
    pub roc_auc: Option<f64>,
}

/// Training provenance stored with the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    /// RFC 3339 timestamp
    pub trained_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_dir: Option<String>,
    pub training_seasons: Vec<i32>,
    pub calibration_season: i32,
    pub evaluation_season: i32,
    pub n_train: usize,
    pub n_calibration: usize,
    pub positive_weight: f64,
    pub params: BoostingParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<EvaluationMetrics>,
}

impl ArtifactMetadata {
    pub fn data_dir_path(&self) -> Option<PathBuf> {
        self.data_dir.as_deref().map(native_path)
    }

    pub fn artifact_dir_path(&self) -> Option<PathBuf> {
        self.artifact_dir.as_deref().map(native_path)
    }
}

/// Self-describing model bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format_version: u32,
    pub model_version: String,
    pub feature_names: Vec<String>,
    pub ensemble: TreeEnsemble,
    pub calibration: IsotonicCalibration,
    pub metadata: ArtifactMetadata,
}

#[derive(Deserialize)]
struct VersionProbe {
    format_version: u32,
}

impl ModelArtifact {
    /// Structural validation; the feature schema is checked by the classifier
    pub fn validate(&self) -> EngineResult<()> {
        if self.format_version == 0 || self.format_version > FORMAT_VERSION {
            return Err(EngineError::ArtifactUnavailable(format!(
                "unsupported format version {} (this build reads up to {})",
                self.format_version, FORMAT_VERSION
            )));
        }
        self.ensemble
            .validate(self.feature_names.len())
            .map_err(EngineError::ArtifactUnavailable)?;
        self.calibration
            .validate()
            .map_err(EngineError::ArtifactUnavailable)
    }

    pub fn encode(&self, compress: bool) -> EngineResult<Vec<u8>> {
        let json = serde_json::to_vec_pretty(self).map_err(|e| {
            EngineError::ArtifactUnavailable(format!("failed to serialize artifact: {}", e))
        })?;
        if !compress {
            return Ok(json);
        }
        zstd::encode_all(json.as_slice(), ZSTD_LEVEL).map_err(|e| {
            EngineError::ArtifactUnavailable(format!("failed to compress artifact: {}", e))
        })
    }

    pub fn decode(bytes: &[u8]) -> EngineResult<Self> {
        let owned;
        let json: &[u8] = if bytes.starts_with(&ZSTD_MAGIC) {
            owned = zstd::decode_all(bytes).map_err(|e| {
                EngineError::ArtifactUnavailable(format!("failed to decompress artifact: {}", e))
            })?;
            &owned
        } else {
            bytes
        };

        let probe: VersionProbe = serde_json::from_slice(json).map_err(|e| {
            EngineError::ArtifactUnavailable(format!("artifact is not a model bundle: {}", e))
        })?;
        if probe.format_version > FORMAT_VERSION {
            return Err(EngineError::ArtifactUnavailable(format!(
                "artifact format version {} is newer than supported version {}",
                probe.format_version, FORMAT_VERSION
            )));
        }

        let artifact: ModelArtifact = serde_json::from_slice(json).map_err(|e| {
            EngineError::ArtifactUnavailable(format!("failed to parse artifact: {}", e))
        })?;
        artifact.validate()?;
        Ok(artifact)
    }

    /// Write to disk; a `.zst` extension selects compression
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let compress = path.extension().is_some_and(|ext| ext == "zst");
        let bytes = self.encode(compress)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory: {}", parent.display()))?;
        }
        std::fs::write(path, bytes)
            .with_context(|| format!("failed to write artifact: {}", path.display()))
    }

    pub fn load(path: &Path) -> EngineResult<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            EngineError::ArtifactUnavailable(format!("{}: {}", path.display(), e))
        })?;
        Self::decode(&bytes)
    }
}

/// Render a path as a `/`-separated string for storage
pub fn portable_path(path: &Path) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut absolute = false;
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => parts.push(prefix.as_os_str().to_string_lossy().into_owned()),
            Component::RootDir => absolute = true,
            Component::CurDir => {}
            Component::ParentDir => parts.push("..".to_string()),
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
        }
    }
    let joined = parts.join("/");
    if absolute && !joined.contains(':') {
        format!("/{}", joined)
    } else {
        joined
    }
}

/// Rebuild a stored path string into the host's native representation
///
/// Accepts both `/` and `\` separators so bundles written on any platform load
/// anywhere.
pub fn native_path(stored: &str) -> PathBuf {
    let mut path = PathBuf::new();
    if stored.starts_with('/') || stored.starts_with('\\') {
        path.push(std::path::MAIN_SEPARATOR_STR);
    }
    for segment in stored.split(['/', '\\']).filter(|s| !s.is_empty()) {
        path.push(segment);
    }
    path
}
