//! Configuration file support for the scoring engine
//!
//! Loads weights, caps, thresholds and zone rules from JSON files.
//!
//! Search order:
//! 1. Explicit path (--config CLI flag)
//! 2. `.wardriskrc.json` in the working directory
//! 3. `wardrisk.config.json` in the working directory
//!
//! Every section is optional; omitted fields keep their defaults.

use crate::ensemble::BoostingParams;
use crate::features::{Bounds, FeatureBuilder, MonthDay, NormalizationBounds, SeasonCalendar};
use crate::labels::{LabelSynthesizer, LabelWeights};
use crate::mpi::{MpiComposer, MpiWeights};
use crate::preparedness::{PreparednessComposer, PreparednessWeights};
use crate::ward::ImputationPolicy;
use crate::zones::{ZoneAggregator, ZoneAssigner, ZoneConfig};
use anyhow::{Context, Result};
use globset::Glob;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};

/// Engine configuration loaded from a JSON config file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub mpi: MpiWeights,
    pub preparedness: PreparednessWeights,
    pub normalization: NormalizationBounds,
    pub season: SeasonCalendar,
    /// How missing required static attributes are filled
    pub imputation: ImputationPolicy,
    pub zones: ZoneConfig,
    pub labels: LabelWeights,
    pub training: BoostingParams,
}

/// Configuration compiled into ready-to-use components
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub features: FeatureBuilder,
    pub labels: LabelSynthesizer,
    pub mpi: MpiComposer,
    pub preparedness: PreparednessComposer,
    pub zone_assigner: ZoneAssigner,
    pub zone_aggregator: ZoneAggregator,
    pub imputation: ImputationPolicy,
    pub training: BoostingParams,
    /// Path the config was loaded from (None if defaults)
    pub config_path: Option<PathBuf>,
}

fn check_non_negative(section: &str, fields: &[(&str, f64)]) -> Result<()> {
    for (name, value) in fields {
        if !value.is_finite() || *value < 0.0 {
            anyhow::bail!("{}.{} must be non-negative (got {})", section, name, value);
        }
    }
    Ok(())
}

fn check_positive(section: &str, fields: &[(&str, f64)]) -> Result<()> {
    for (name, value) in fields {
        if !value.is_finite() || *value <= 0.0 {
            anyhow::bail!("{}.{} must be positive (got {})", section, name, value);
        }
    }
    Ok(())
}

fn check_increasing(section: &str, name: &str, values: &[f64]) -> Result<()> {
    for pair in values.windows(2) {
        if pair[0].partial_cmp(&pair[1]) != Some(Ordering::Less) {
            anyhow::bail!(
                "{}.{} must be strictly increasing ({} then {})",
                section,
                name,
                pair[0],
                pair[1]
            );
        }
    }
    Ok(())
}

/// Step table: thresholds increasing, one more step value than thresholds
fn check_steps(section: &str, thresholds: (&str, &[f64]), steps: (&str, &[f64])) -> Result<()> {
    check_increasing(section, thresholds.0, thresholds.1)?;
    if steps.1.len() != thresholds.1.len() + 1 {
        anyhow::bail!(
            "{}.{} needs {} entries (one more than {}), got {}",
            section,
            steps.0,
            thresholds.1.len() + 1,
            thresholds.0,
            steps.1.len()
        );
    }
    for pair in steps.1.windows(2) {
        if pair[1] < pair[0] {
            anyhow::bail!("{}.{} must be non-decreasing", section, steps.0);
        }
    }
    Ok(())
}

fn check_bounds(name: &str, bounds: &Bounds) -> Result<()> {
    if !bounds.min.is_finite() || !bounds.max.is_finite() || bounds.max <= bounds.min {
        anyhow::bail!(
            "normalization.{} needs min < max (got [{}, {}])",
            name,
            bounds.min,
            bounds.max
        );
    }
    Ok(())
}

fn check_date(name: &str, date: &MonthDay) -> Result<()> {
    if !date.is_valid() {
        anyhow::bail!(
            "season.{} is not a valid calendar day ({}-{})",
            name,
            date.month,
            date.day
        );
    }
    Ok(())
}

impl EngineConfig {
    /// Validate the configuration for logical errors
    pub fn validate(&self) -> Result<()> {
        let m = &self.mpi;
        check_non_negative(
            "mpi",
            &[
                ("model_weight", m.model_weight),
                ("historical_per_flood", m.historical_per_flood),
                ("historical_cap", m.historical_cap),
                ("drain_stress_cap", m.drain_stress_cap),
                ("sewerage_cap", m.sewerage_cap),
                ("drainage_cap", m.drainage_cap),
                ("pothole_cap", m.pothole_cap),
                ("infrastructure_cap", m.infrastructure_cap),
                ("elevation_cap", m.elevation_cap),
                ("lowlying_cap", m.lowlying_cap),
                ("vulnerability_index_scale", m.vulnerability_index_scale),
                ("urban_cap", m.urban_cap),
                ("vulnerability_cap", m.vulnerability_cap),
                ("elevation_reference", m.elevation_reference),
            ],
        )?;
        check_positive(
            "mpi",
            &[
                ("drain_reference", m.drain_reference),
                ("sewerage_divisor", m.sewerage_divisor),
                ("drainage_divisor", m.drainage_divisor),
                ("pothole_divisor", m.pothole_divisor),
                ("large_pothole_divisor", m.large_pothole_divisor),
                ("elevation_span", m.elevation_span),
                ("lowlying_span", m.lowlying_span),
                ("urban_intensity_threshold", m.urban_intensity_threshold),
            ],
        )?;
        if let Some(points) = m.rainfall_points.iter().find(|p| !p.is_finite() || **p < 0.0) {
            anyhow::bail!("mpi.rainfall_points must be non-negative (got {})", points);
        }
        check_steps(
            "mpi",
            ("rainfall_thresholds", &m.rainfall_thresholds),
            ("rainfall_points", &m.rainfall_points),
        )?;
        let t = &m.thresholds;
        check_increasing(
            "mpi",
            "thresholds",
            &[0.0, t.moderate, t.high, t.critical],
        )?;

        let p = &self.preparedness;
        check_non_negative(
            "preparedness",
            &[
                ("infra_max", p.infra_max),
                ("drain_multiplier", p.drain_multiplier),
                ("resilience_max", p.resilience_max),
                ("resilience_per_flood", p.resilience_per_flood),
                ("monsoon_risk_multiplier", p.monsoon_risk_multiplier),
                ("resources_max", p.resources_max),
                ("road_multiplier", p.road_multiplier),
                ("road_cap", p.road_cap),
                ("building_multiplier", p.building_multiplier),
                ("building_cap", p.building_cap),
                ("resource_fallback", p.resource_fallback),
                ("vulnerability_max", p.vulnerability_max),
                ("lowlying_weight", p.lowlying_weight),
                ("elevation_weight", p.elevation_weight),
                ("maintenance_max", p.maintenance_max),
                ("growth_multiplier", p.growth_multiplier),
            ],
        )?;
        check_positive(
            "preparedness",
            &[
                ("drainage_complaint_divisor", p.drainage_complaint_divisor),
                ("sewerage_complaint_divisor", p.sewerage_complaint_divisor),
                ("lowlying_span", p.lowlying_span),
                ("elevation_span", p.elevation_span),
                ("infra_offset_divisor", p.infra_offset_divisor),
                ("pothole_divisor", p.pothole_divisor),
            ],
        )?;
        let pt = &p.thresholds;
        check_increasing(
            "preparedness",
            "thresholds",
            &[0.0, pt.poor, pt.moderate, pt.good, pt.excellent],
        )?;

        let n = &self.normalization;
        check_bounds("drain_density", &n.drain_density)?;
        check_bounds("mean_elevation", &n.mean_elevation)?;
        check_bounds("low_lying_pct", &n.low_lying_pct)?;
        check_bounds("hist_flood_freq", &n.hist_flood_freq)?;

        let s = &self.season;
        check_date("anchor", &s.anchor)?;
        check_date("peak_start", &s.peak_start)?;
        check_date("peak_end", &s.peak_end)?;
        if (s.peak_start.month, s.peak_start.day) > (s.peak_end.month, s.peak_end.day) {
            anyhow::bail!("season.peak_start must not be after season.peak_end");
        }

        let l = &self.labels;
        check_steps(
            "labels",
            ("rain_thresholds", &l.rain_thresholds),
            ("rain_rates", &l.rain_rates),
        )?;
        if l.rain_rates.iter().any(|r| !(0.0..=1.0).contains(r)) {
            anyhow::bail!("labels.rain_rates must lie in [0, 1]");
        }
        check_non_negative(
            "labels",
            &[
                ("low_lying_weight", l.low_lying_weight),
                ("poor_drainage_weight", l.poor_drainage_weight),
                ("historical_risk_weight", l.historical_risk_weight),
                ("flood_frequency_weight", l.flood_frequency_weight),
                ("vulnerability_floor", l.vulnerability_floor),
                ("vulnerability_gain", l.vulnerability_gain),
                ("antecedent_weight", l.antecedent_weight),
                ("peak_boost", l.peak_boost),
            ],
        )?;
        check_positive(
            "labels",
            &[("antecedent_saturation_mm", l.antecedent_saturation_mm)],
        )?;

        let z = &self.zones;
        check_non_negative(
            "zones",
            &[
                ("critical_threshold", z.critical_threshold),
                ("poor_threshold", z.poor_threshold),
            ],
        )?;
        if z.critical_threshold > z.poor_threshold {
            anyhow::bail!(
                "zones.critical_threshold ({}) must not exceed zones.poor_threshold ({})",
                z.critical_threshold,
                z.poor_threshold
            );
        }
        for (zone, patterns) in &z.patterns {
            for pattern in patterns {
                Glob::new(pattern)
                    .with_context(|| format!("invalid pattern for zone {}: {}", zone, pattern))?;
            }
        }

        self.training
            .validate()
            .map_err(|e| anyhow::anyhow!("training: {}", e))?;

        Ok(())
    }

    /// Resolve config into compiled form ready for use
    pub fn resolve(&self) -> Result<ResolvedConfig> {
        self.validate()?;

        let zone_assigner =
            ZoneAssigner::from_config(&self.zones).context("failed to compile zone patterns")?;

        Ok(ResolvedConfig {
            features: FeatureBuilder::new(self.normalization, self.season),
            labels: LabelSynthesizer::new(self.labels.clone(), self.season),
            mpi: MpiComposer::new(self.mpi.clone()),
            preparedness: PreparednessComposer::new(self.preparedness.clone()),
            zone_assigner,
            zone_aggregator: ZoneAggregator::new(&self.zones),
            imputation: self.imputation,
            training: self.training.clone(),
            config_path: None,
        })
    }
}

impl ResolvedConfig {
    /// Build a ResolvedConfig with all defaults (no config file)
    pub fn defaults() -> Result<Self> {
        EngineConfig::default().resolve()
    }
}

/// Discover and load a config file from a directory
///
/// Search order:
/// 1. `.wardriskrc.json`
/// 2. `wardrisk.config.json`
///
/// Returns `None` if no config file is found (use defaults).
pub fn discover_config(root: &Path) -> Result<Option<(EngineConfig, PathBuf)>> {
    for name in [".wardriskrc.json", "wardrisk.config.json"] {
        let path = root.join(name);
        if path.exists() {
            let config = load_config_file(&path)?;
            return Ok(Some((config, path)));
        }
    }
    Ok(None)
}

/// Load config from an explicit file path
pub fn load_config_file(path: &Path) -> Result<EngineConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;

    let config: EngineConfig = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;

    config
        .validate()
        .with_context(|| format!("invalid config in: {}", path.display()))?;

    Ok(config)
}

/// Load the explicit config, or discover one under `root`, or fall back to defaults
pub fn load_config(root: &Path, config_path: Option<&Path>) -> Result<(EngineConfig, Option<PathBuf>)> {
    if let Some(path) = config_path {
        let config = load_config_file(path)?;
        return Ok((config, Some(path.to_path_buf())));
    }
    Ok(match discover_config(root)? {
        Some((config, path)) => (config, Some(path)),
        None => (EngineConfig::default(), None),
    })
}

/// Load and resolve config
pub fn load_and_resolve(root: &Path, config_path: Option<&Path>) -> Result<ResolvedConfig> {
    let (config, source_path) = load_config(root, config_path)?;
    let mut resolved = config.resolve()?;
    resolved.config_path = source_path;
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zones::Assignment;
    use std::fs;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        config.validate().expect("default config should be valid");
        let resolved = config.resolve().expect("default config should resolve");
        assert_eq!(resolved.mpi.weights.model_weight, 40.0);
        assert_eq!(resolved.preparedness.weights.infra_max, 30.0);
        assert_eq!(resolved.imputation, ImputationPolicy::None);
        assert!(resolved.config_path.is_none());
    }

    #[test]
    fn test_parse_minimal_config() {
        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        config.validate().unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_parse_partial_sections() {
        let json = r#"{
            "mpi": {"model_weight": 35.0, "thresholds": {"high": 55.0}},
            "imputation": "neighbor_mean",
            "season": {"peak_start": {"month": 7, "day": 1}},
            "zones": {"patterns": {"North": ["N*"]}, "derive_from_ward_id": true}
        }"#;
        let config: EngineConfig = serde_json::from_str(json).unwrap();
        let resolved = config.resolve().unwrap();
        assert_eq!(resolved.mpi.weights.model_weight, 35.0);
        assert_eq!(resolved.mpi.weights.thresholds.high, 55.0);
        assert_eq!(resolved.mpi.weights.thresholds.moderate, 30.0); // default
        assert_eq!(resolved.imputation, ImputationPolicy::NeighborMean);
        assert_eq!(resolved.features.season.peak_start, MonthDay::new(7, 1));
        assert_eq!(
            resolved.zone_assigner.assign("N4"),
            Assignment::Zone("North".into())
        );
    }

    #[test]
    fn test_reject_unknown_fields() {
        let result: Result<EngineConfig, _> = serde_json::from_str(r#"{"weights": {}}"#);
        assert!(result.is_err(), "unknown fields should be rejected");
        let nested: Result<EngineConfig, _> = serde_json::from_str(r#"{"mpi": {"bogus": 1}}"#);
        assert!(nested.is_err());
    }

    #[test]
    fn test_reject_negative_weight() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"mpi": {"historical_cap": -1.0}}"#).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reject_unordered_thresholds() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"preparedness": {"thresholds": {"good": 40.0}}}"#).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("preparedness.thresholds"));
    }

    #[test]
    fn test_reject_mismatched_step_table() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"mpi": {"rainfall_points": [0, 5, 10]}}"#).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reject_invalid_calendar_day() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"season": {"anchor": {"month": 2, "day": 30}}}"#).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reject_degenerate_bounds() {
        let config: EngineConfig = serde_json::from_str(
            r#"{"normalization": {"mean_elevation": {"min": 220.0, "max": 220.0}}}"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reject_invalid_glob_pattern() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"zones": {"patterns": {"X": ["[invalid"]}}}"#).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_discover_rc_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join(".wardriskrc.json");
        fs::write(&config_path, r#"{"imputation": "city_median"}"#).unwrap();

        let (config, path) = discover_config(dir.path()).unwrap().unwrap();
        assert_eq!(config.imputation, ImputationPolicy::CityMedian);
        assert_eq!(path, config_path);
    }

    #[test]
    fn test_discover_priority_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(".wardriskrc.json"),
            r#"{"imputation": "city_median"}"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("wardrisk.config.json"),
            r#"{"imputation": "neighbor_mean"}"#,
        )
        .unwrap();

        let (config, _) = discover_config(dir.path()).unwrap().unwrap();
        assert_eq!(
            config.imputation,
            ImputationPolicy::CityMedian,
            ".wardriskrc.json should take priority"
        );
    }

    #[test]
    fn test_no_config_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover_config(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_load_and_resolve_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("custom.json");
        fs::write(&config_path, r#"{"zones": {"poor_threshold": 50.0}}"#).unwrap();

        let resolved = load_and_resolve(dir.path(), Some(&config_path)).unwrap();
        assert_eq!(resolved.zone_aggregator.poor_threshold, 50.0);
        assert_eq!(resolved.config_path, Some(config_path));
    }

    #[test]
    fn test_invalid_file_names_path_in_error() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("bad.json");
        fs::write(&config_path, r#"{"labels": {"rain_rates": [0, 2]}}"#).unwrap();

        let err = load_config_file(&config_path).unwrap_err();
        assert!(format!("{:#}", err).contains("bad.json"));
    }
}
