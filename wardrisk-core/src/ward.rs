//! Ward registry - static, historical and civic attributes per ward
//!
//! Global invariants enforced:
//! - Ward ids are unique within a registry
//! - Iteration order is ascending ward id (deterministic)
//! - The registry is never mutated while a cycle is scoring

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Terrain and drainage attributes
///
/// The first five fields feed the classifier and are required (or imputed).
/// The remaining ones are enrichments with documented fallbacks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticAttributes {
    pub mean_elevation: Option<f64>,
    pub elevation_std: Option<f64>,
    /// Share of the ward area that is low-lying, in percent (0-100)
    pub low_lying_pct: Option<f64>,
    pub drain_density: Option<f64>,
    pub slope_mean: Option<f64>,
    pub road_density: Option<f64>,
    pub building_density: Option<f64>,
    /// Combined urbanization metric (0-1)
    pub urbanization_index: Option<f64>,
    /// Pre-normalized composite flood vulnerability (0-1)
    pub flood_vulnerability_index: Option<f64>,
}

/// Flood history of the ward
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoricalAttributes {
    /// Recorded flood events, 2000-2020
    pub hist_flood_freq: f64,
    /// Derived seasonal risk in [0,1]
    pub monsoon_risk_score: f64,
    pub complaint_baseline: f64,
}

impl Default for HistoricalAttributes {
    fn default() -> Self {
        HistoricalAttributes {
            hist_flood_freq: 0.0,
            monsoon_risk_score: 0.5,
            complaint_baseline: 5.0,
        }
    }
}

/// Civic complaint signals
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CivicAttributes {
    pub sewerage_complaints: f64,
    pub drainage_complaints: f64,
    /// Relative growth of sewerage complaints (0.75 = +75%)
    pub sewerage_growth_rate: f64,
    pub pothole_count: f64,
    /// Share of pothole reports classified as large (0-1)
    pub pothole_severity_ratio: f64,
}

/// One administrative ward
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ward {
    pub ward_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ward_name: Option<String>,
    /// Adjacent ward ids, used by neighbour imputation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub neighbors: Vec<String>,
    #[serde(default, rename = "static")]
    pub static_attrs: StaticAttributes,
    #[serde(default)]
    pub historical: HistoricalAttributes,
    #[serde(default)]
    pub civic: CivicAttributes,
}

/// Static fields required by the feature builder
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaticField {
    MeanElevation,
    ElevationStd,
    LowLyingPct,
    DrainDensity,
    SlopeMean,
}

impl StaticField {
    pub const ALL: [StaticField; 5] = [
        StaticField::MeanElevation,
        StaticField::ElevationStd,
        StaticField::LowLyingPct,
        StaticField::DrainDensity,
        StaticField::SlopeMean,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StaticField::MeanElevation => "mean_elevation",
            StaticField::ElevationStd => "elevation_std",
            StaticField::LowLyingPct => "low_lying_pct",
            StaticField::DrainDensity => "drain_density",
            StaticField::SlopeMean => "slope_mean",
        }
    }

    fn get(&self, attrs: &StaticAttributes) -> Option<f64> {
        let value = match self {
            StaticField::MeanElevation => attrs.mean_elevation,
            StaticField::ElevationStd => attrs.elevation_std,
            StaticField::LowLyingPct => attrs.low_lying_pct,
            StaticField::DrainDensity => attrs.drain_density,
            StaticField::SlopeMean => attrs.slope_mean,
        };
        value.filter(|v| v.is_finite())
    }
}

/// How to fill a missing required static attribute
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImputationPolicy {
    /// Missing attributes exclude the ward
    #[default]
    None,
    /// Mean over listed neighbours that have the field, else city median
    NeighborMean,
    /// City-wide median of the field
    CityMedian,
}

/// Required static attributes after imputation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedStatics {
    pub mean_elevation: f64,
    pub elevation_std: f64,
    pub low_lying_pct: f64,
    pub drain_density: f64,
    pub slope_mean: f64,
    /// Fields that were filled by imputation
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub imputed: Vec<StaticField>,
}

impl ResolvedStatics {
    /// Resolve without imputation; any gap is a `MissingAttribute`
    pub fn strict(ward: &Ward) -> EngineResult<Self> {
        let mut values = [0.0; 5];
        for (slot, field) in values.iter_mut().zip(StaticField::ALL) {
            *slot = field
                .get(&ward.static_attrs)
                .ok_or_else(|| missing(ward, field))?;
        }
        Ok(Self::from_values(values, Vec::new()))
    }

    fn from_values(values: [f64; 5], imputed: Vec<StaticField>) -> Self {
        ResolvedStatics {
            mean_elevation: values[0],
            elevation_std: values[1],
            low_lying_pct: values[2],
            drain_density: values[3],
            slope_mean: values[4],
            imputed,
        }
    }
}

fn missing(ward: &Ward, field: StaticField) -> EngineError {
    EngineError::MissingAttribute {
        ward_id: ward.ward_id.clone(),
        field: field.as_str().to_string(),
    }
}

/// Owner of all wards for a running process
#[derive(Debug, Clone, Default)]
pub struct WardRegistry {
    wards: BTreeMap<String, Ward>,
    medians: BTreeMap<StaticField, f64>,
}

impl WardRegistry {
    /// Build a registry, rejecting duplicate ids
    pub fn from_wards(wards: Vec<Ward>) -> EngineResult<Self> {
        let mut map = BTreeMap::new();
        for ward in wards {
            if map.contains_key(&ward.ward_id) {
                return Err(EngineError::DuplicateWard(ward.ward_id));
            }
            map.insert(ward.ward_id.clone(), ward);
        }

        let mut medians = BTreeMap::new();
        for field in StaticField::ALL {
            let mut values: Vec<f64> = map
                .values()
                .filter_map(|w| field.get(&w.static_attrs))
                .collect();
            if let Some(m) = median(&mut values) {
                medians.insert(field, m);
            }
        }

        Ok(WardRegistry {
            wards: map,
            medians,
        })
    }

    pub fn len(&self) -> usize {
        self.wards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wards.is_empty()
    }

    pub fn get(&self, ward_id: &str) -> Option<&Ward> {
        self.wards.get(ward_id)
    }

    /// Wards in ascending id order
    pub fn iter(&self) -> impl Iterator<Item = &Ward> {
        self.wards.values()
    }

    pub fn ward_ids(&self) -> Vec<&str> {
        self.wards.keys().map(String::as_str).collect()
    }

    /// City-wide median of a required field over wards that have it
    pub fn city_median(&self, field: StaticField) -> Option<f64> {
        self.medians.get(&field).copied()
    }

    /// Mean of a field over the ward's neighbours that have it
    pub fn neighbor_mean(&self, ward: &Ward, field: StaticField) -> Option<f64> {
        let values: Vec<f64> = ward
            .neighbors
            .iter()
            .filter_map(|id| self.wards.get(id))
            .filter_map(|n| field.get(&n.static_attrs))
            .collect();
        if values.is_empty() {
            None
        } else {
            Some(values.iter().sum::<f64>() / values.len() as f64)
        }
    }

    /// Resolve a ward's required statics under the given imputation policy
    pub fn resolve_statics(
        &self,
        ward: &Ward,
        policy: ImputationPolicy,
    ) -> EngineResult<ResolvedStatics> {
        if policy == ImputationPolicy::None {
            return ResolvedStatics::strict(ward);
        }

        let mut values = [0.0; 5];
        let mut imputed = Vec::new();
        for (slot, field) in values.iter_mut().zip(StaticField::ALL) {
            if let Some(v) = field.get(&ward.static_attrs) {
                *slot = v;
                continue;
            }
            let filled = match policy {
                ImputationPolicy::NeighborMean => self
                    .neighbor_mean(ward, field)
                    .or_else(|| self.city_median(field)),
                ImputationPolicy::CityMedian => self.city_median(field),
                ImputationPolicy::None => None,
            };
            *slot = filled.ok_or_else(|| missing(ward, field))?;
            imputed.push(field);
        }

        Ok(ResolvedStatics::from_values(values, imputed))
    }
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn complete_ward(id: &str) -> Ward {
        Ward {
            ward_id: id.to_string(),
            ward_name: None,
            neighbors: Vec::new(),
            static_attrs: StaticAttributes {
                mean_elevation: Some(212.0),
                elevation_std: Some(3.5),
                low_lying_pct: Some(18.0),
                drain_density: Some(4.0),
                slope_mean: Some(1.2),
                road_density: Some(3.0),
                building_density: Some(1.5),
                urbanization_index: Some(0.4),
                flood_vulnerability_index: None,
            },
            historical: HistoricalAttributes::default(),
            civic: CivicAttributes::default(),
        }
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let result = WardRegistry::from_wards(vec![complete_ward("A1"), complete_ward("A1")]);
        assert_eq!(result.unwrap_err(), EngineError::DuplicateWard("A1".into()));
    }

    #[test]
    fn test_iteration_is_sorted() {
        let registry = WardRegistry::from_wards(vec![
            complete_ward("C3"),
            complete_ward("A1"),
            complete_ward("B2"),
        ])
        .unwrap();
        assert_eq!(registry.ward_ids(), vec!["A1", "B2", "C3"]);
    }

    #[test]
    fn test_strict_resolution_reports_missing_field() {
        let mut ward = complete_ward("A1");
        ward.static_attrs.slope_mean = None;
        let err = ResolvedStatics::strict(&ward).unwrap_err();
        assert_eq!(
            err,
            EngineError::MissingAttribute {
                ward_id: "A1".into(),
                field: "slope_mean".into()
            }
        );
    }

    #[test]
    fn test_nan_counts_as_missing() {
        let mut ward = complete_ward("A1");
        ward.static_attrs.drain_density = Some(f64::NAN);
        assert!(ResolvedStatics::strict(&ward).is_err());
    }

    #[test]
    fn test_city_median_imputation() {
        let mut a = complete_ward("A1");
        a.static_attrs.drain_density = Some(2.0);
        let mut b = complete_ward("A2");
        b.static_attrs.drain_density = Some(6.0);
        let mut c = complete_ward("A3");
        c.static_attrs.drain_density = None;
        let registry = WardRegistry::from_wards(vec![a, b, c]).unwrap();

        let ward = registry.get("A3").unwrap();
        let resolved = registry
            .resolve_statics(ward, ImputationPolicy::CityMedian)
            .unwrap();
        assert_eq!(resolved.drain_density, 4.0);
        assert_eq!(resolved.imputed, vec![StaticField::DrainDensity]);

        assert!(registry
            .resolve_statics(ward, ImputationPolicy::None)
            .is_err());
    }

    #[test]
    fn test_neighbor_mean_falls_back_to_median() {
        let mut a = complete_ward("A1");
        a.static_attrs.mean_elevation = Some(200.0);
        a.static_attrs.elevation_std = None;
        let mut b = complete_ward("A2");
        b.static_attrs.mean_elevation = Some(210.0);
        b.static_attrs.elevation_std = None;
        let mut c = complete_ward("A3");
        c.static_attrs.mean_elevation = Some(230.0);
        let mut target = complete_ward("A4");
        target.static_attrs.mean_elevation = None;
        target.static_attrs.elevation_std = None;
        target.neighbors = vec!["A1".into(), "A2".into()];
        // Neighbours lack elevation_std -> city median (only A3 has it)
        let registry = WardRegistry::from_wards(vec![a, b, c, target]).unwrap();

        let ward = registry.get("A4").unwrap();
        let resolved = registry
            .resolve_statics(ward, ImputationPolicy::NeighborMean)
            .unwrap();
        assert_eq!(resolved.mean_elevation, 205.0);
        assert_eq!(resolved.elevation_std, 3.5);
        assert_eq!(
            resolved.imputed,
            vec![StaticField::MeanElevation, StaticField::ElevationStd]
        );
    }

    #[test]
    fn test_ward_json_defaults() {
        let json = r#"{"ward_id": "B7", "static": {"drain_density": 1.5}}"#;
        let ward: Ward = serde_json::from_str(json).unwrap();
        assert_eq!(ward.static_attrs.drain_density, Some(1.5));
        assert_eq!(ward.historical.monsoon_risk_score, 0.5);
        assert_eq!(ward.historical.complaint_baseline, 5.0);
        assert_eq!(ward.civic.pothole_count, 0.0);
    }
}
