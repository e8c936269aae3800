//! Zone roll-ups - ward scores aggregated per administrative zone
//!
//! Global invariants enforced:
//! - Each ward belongs to at most one zone; gaps are reported, never dropped silently
//! - Aggregates are strictly derived from ward breakdowns (never mutated)
//! - Deterministic ordering (ties broken by zone id)

use crate::error::WardIssue;
use crate::mpi::MpiBreakdown;
use crate::preparedness::{Component, PreparednessBreakdown};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Zone section of the engine config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ZoneConfig {
    /// Explicit ward id -> zone id map; wins over patterns
    pub assignments: BTreeMap<String, String>,
    /// Zone id -> glob patterns over ward ids
    pub patterns: BTreeMap<String, Vec<String>>,
    /// Fall back to "Zone_" + the letters of the ward id
    pub derive_from_ward_id: bool,
    /// Wards scoring below this are critical
    pub critical_threshold: f64,
    /// Wards scoring below this are poor
    pub poor_threshold: f64,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        ZoneConfig {
            assignments: BTreeMap::new(),
            patterns: BTreeMap::new(),
            derive_from_ward_id: false,
            critical_threshold: 30.0,
            poor_threshold: 45.0,
        }
    }
}

/// Outcome of looking up one ward's zone
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    Zone(String),
    Unassigned,
    /// Patterns of several zones match
    Ambiguous(Vec<String>),
}

/// Compiled zone assignment rules
#[derive(Debug, Clone, Default)]
pub struct ZoneAssigner {
    explicit: BTreeMap<String, String>,
    patterns: Vec<(String, GlobSet)>,
    derive: bool,
}

impl ZoneAssigner {
    pub fn from_config(config: &ZoneConfig) -> Result<Self, globset::Error> {
        let mut patterns = Vec::with_capacity(config.patterns.len());
        for (zone, globs) in &config.patterns {
            let mut builder = GlobSetBuilder::new();
            for pattern in globs {
                builder.add(Glob::new(pattern)?);
            }
            patterns.push((zone.clone(), builder.build()?));
        }
        Ok(ZoneAssigner {
            explicit: config.assignments.clone(),
            patterns,
            derive: config.derive_from_ward_id,
        })
    }

    pub fn assign(&self, ward_id: &str) -> Assignment {
        if let Some(zone) = self.explicit.get(ward_id) {
            return Assignment::Zone(zone.clone());
        }

        let matched: Vec<String> = self
            .patterns
            .iter()
            .filter(|(_, set)| set.is_match(ward_id))
            .map(|(zone, _)| zone.clone())
            .collect();
        match matched.len() {
            0 => {}
            1 => return Assignment::Zone(matched[0].clone()),
            _ => return Assignment::Ambiguous(matched),
        }

        if self.derive {
            if let Some(zone) = derive_zone(ward_id) {
                return Assignment::Zone(zone);
            }
        }
        Assignment::Unassigned
    }

    /// Group ward ids by zone, reporting every ward left out
    pub fn partition<'a>(&self, ward_ids: impl IntoIterator<Item = &'a str>) -> ZonePartition {
        let mut partition = ZonePartition::default();
        for ward_id in ward_ids {
            match self.assign(ward_id) {
                Assignment::Zone(zone) => partition
                    .zones
                    .entry(zone)
                    .or_default()
                    .push(ward_id.to_string()),
                Assignment::Unassigned => {
                    log::warn!("ward {} has no zone assignment; excluded from zone roll-up", ward_id);
                    partition.issues.push(WardIssue::new(
                        ward_id,
                        "unassigned_zone",
                        "no zone assignment matches this ward",
                    ));
                }
                Assignment::Ambiguous(zones) => {
                    log::warn!("ward {} matches several zones: {}", ward_id, zones.join(", "));
                    partition.issues.push(WardIssue::new(
                        ward_id,
                        "ambiguous_zone",
                        format!("zone patterns overlap: {}", zones.join(", ")),
                    ));
                }
            }
        }
        partition
    }
}

/// "Zone_" followed by the ASCII letters of the ward id
pub fn derive_zone(ward_id: &str) -> Option<String> {
    let letters: String = ward_id.chars().filter(char::is_ascii_alphabetic).collect();
    if letters.is_empty() {
        None
    } else {
        Some(format!("Zone_{}", letters))
    }
}

/// Ward ids per zone, plus wards that could not be placed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ZonePartition {
    pub zones: BTreeMap<String, Vec<String>>,
    pub issues: Vec<WardIssue>,
}

/// Preparedness roll-up of one zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneSummary {
    pub zone_id: String,
    pub ward_count: usize,
    pub avg_preparedness: f64,
    pub min_preparedness: f64,
    pub max_preparedness: f64,
    pub critical_wards: usize,
    pub poor_wards: usize,
    pub top_weakness: Component,
    pub avg_infra_capacity: f64,
    pub avg_historical_resilience: f64,
}

/// Risk roll-up of one zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneRiskSummary {
    pub zone_id: String,
    pub ward_count: usize,
    pub avg_mpi: f64,
    pub max_mpi: f64,
    pub high_plus_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ZoneAggregator {
    pub critical_threshold: f64,
    pub poor_threshold: f64,
}

impl Default for ZoneAggregator {
    fn default() -> Self {
        ZoneAggregator::new(&ZoneConfig::default())
    }
}

impl ZoneAggregator {
    pub fn new(config: &ZoneConfig) -> Self {
        ZoneAggregator {
            critical_threshold: config.critical_threshold,
            poor_threshold: config.poor_threshold,
        }
    }

    /// Summarise one zone; `None` for an empty ward set
    pub fn aggregate(&self, zone_id: &str, wards: &[&PreparednessBreakdown]) -> Option<ZoneSummary> {
        if wards.is_empty() {
            return None;
        }
        let n = wards.len() as f64;
        let totals = wards.iter().map(|b| b.total);

        let mut weakness_counts: BTreeMap<Component, usize> = BTreeMap::new();
        for b in wards {
            *weakness_counts.entry(b.weakest_component).or_insert(0) += 1;
        }
        // BTreeMap iterates alphabetically; keep the first of equal counts
        let top_weakness = weakness_counts
            .iter()
            .fold(None, |best: Option<(Component, usize)>, (&c, &count)| match best {
                Some((_, best_count)) if best_count >= count => best,
                _ => Some((c, count)),
            })
            .map_or(Component::Infrastructure, |(c, _)| c);

        Some(ZoneSummary {
            zone_id: zone_id.to_string(),
            ward_count: wards.len(),
            avg_preparedness: totals.clone().sum::<f64>() / n,
            min_preparedness: totals.clone().fold(f64::INFINITY, f64::min),
            max_preparedness: totals.fold(f64::NEG_INFINITY, f64::max),
            critical_wards: wards
                .iter()
                .filter(|b| b.total < self.critical_threshold)
                .count(),
            poor_wards: wards
                .iter()
                .filter(|b| b.total < self.poor_threshold)
                .count(),
            top_weakness,
            avg_infra_capacity: wards.iter().map(|b| b.infra_capacity).sum::<f64>() / n,
            avg_historical_resilience: wards
                .iter()
                .map(|b| b.historical_resilience)
                .sum::<f64>()
                / n,
        })
    }

    pub fn aggregate_risk(&self, zone_id: &str, wards: &[&MpiBreakdown]) -> Option<ZoneRiskSummary> {
        if wards.is_empty() {
            return None;
        }
        Some(ZoneRiskSummary {
            zone_id: zone_id.to_string(),
            ward_count: wards.len(),
            avg_mpi: wards.iter().map(|b| b.total).sum::<f64>() / wards.len() as f64,
            max_mpi: wards.iter().map(|b| b.total).fold(f64::NEG_INFINITY, f64::max),
            high_plus_count: wards.iter().filter(|b| b.risk_level.is_high_plus()).count(),
        })
    }

    /// Preparedness summaries of every zone, in intervention-priority order
    pub fn summarize(
        &self,
        partition: &ZonePartition,
        breakdowns: &BTreeMap<String, PreparednessBreakdown>,
    ) -> Vec<ZoneSummary> {
        let mut summaries: Vec<ZoneSummary> = partition
            .zones
            .iter()
            .filter_map(|(zone, ids)| {
                let members: Vec<&PreparednessBreakdown> =
                    ids.iter().filter_map(|id| breakdowns.get(id)).collect();
                self.aggregate(zone, &members)
            })
            .collect();
        rank_by_priority(&mut summaries);
        summaries
    }

    /// Risk summaries of every zone, highest average MPI first
    pub fn summarize_risk(
        &self,
        partition: &ZonePartition,
        breakdowns: &BTreeMap<String, MpiBreakdown>,
    ) -> Vec<ZoneRiskSummary> {
        let mut summaries: Vec<ZoneRiskSummary> = partition
            .zones
            .iter()
            .filter_map(|(zone, ids)| {
                let members: Vec<&MpiBreakdown> =
                    ids.iter().filter_map(|id| breakdowns.get(id)).collect();
                self.aggregate_risk(zone, &members)
            })
            .collect();
        summaries.sort_by(|a, b| {
            b.avg_mpi
                .total_cmp(&a.avg_mpi)
                .then_with(|| a.zone_id.cmp(&b.zone_id))
        });
        summaries
    }
}

/// Ascending average preparedness; ties by zone id
pub fn rank_by_priority(summaries: &mut [ZoneSummary]) {
    summaries.sort_by(|a, b| {
        a.avg_preparedness
            .total_cmp(&b.avg_preparedness)
            .then_with(|| a.zone_id.cmp(&b.zone_id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mpi::RiskLevel;
    use crate::preparedness::PreparednessLevel;

    fn prep(total: f64, weakest: Component) -> PreparednessBreakdown {
        PreparednessBreakdown {
            infra_capacity: total * 0.3,
            historical_resilience: total * 0.25,
            resource_readiness: total * 0.2,
            vulnerability_gap: total * 0.15,
            maintenance: total * 0.1,
            total,
            preparedness_level: PreparednessLevel::Moderate,
            weakest_component: weakest,
        }
    }

    fn risk(total: f64, level: RiskLevel) -> MpiBreakdown {
        MpiBreakdown {
            model: 0.0,
            rainfall: 0.0,
            historical: 0.0,
            infrastructure: 0.0,
            vulnerability: 0.0,
            total,
            risk_level: level,
            probability: None,
            partial: true,
        }
    }

    #[test]
    fn test_zone_aggregate_counts() {
        let a = prep(25.0, Component::Maintenance);
        let b = prep(40.0, Component::Infrastructure);
        let c = prep(55.0, Component::Maintenance);
        let summary = ZoneAggregator::default()
            .aggregate("Zone_A", &[&a, &b, &c])
            .unwrap();
        assert_eq!(summary.avg_preparedness, 40.0);
        assert_eq!(summary.min_preparedness, 25.0);
        assert_eq!(summary.max_preparedness, 55.0);
        assert_eq!(summary.critical_wards, 1);
        assert_eq!(summary.poor_wards, 2);
        assert_eq!(summary.top_weakness, Component::Maintenance);
        assert_eq!(summary.ward_count, 3);
    }

    #[test]
    fn test_top_weakness_tie_is_alphabetical() {
        let a = prep(50.0, Component::Vulnerability);
        let b = prep(50.0, Component::Resources);
        let summary = ZoneAggregator::default()
            .aggregate("Z", &[&a, &b])
            .unwrap();
        assert_eq!(summary.top_weakness, Component::Resources);
    }

    #[test]
    fn test_empty_zone_has_no_summary() {
        assert!(ZoneAggregator::default().aggregate("Z", &[]).is_none());
        assert!(ZoneAggregator::default().aggregate_risk("Z", &[]).is_none());
    }

    #[test]
    fn test_assignment_precedence() {
        let mut config = ZoneConfig::default();
        config.assignments.insert("A1".into(), "Central".into());
        config
            .patterns
            .insert("North".into(), vec!["A*".into(), "N*".into()]);
        config.patterns.insert("South".into(), vec!["S*".into()]);
        config.derive_from_ward_id = true;
        let assigner = ZoneAssigner::from_config(&config).unwrap();

        assert_eq!(assigner.assign("A1"), Assignment::Zone("Central".into()));
        assert_eq!(assigner.assign("A2"), Assignment::Zone("North".into()));
        assert_eq!(assigner.assign("S9"), Assignment::Zone("South".into()));
        assert_eq!(assigner.assign("KB12"), Assignment::Zone("Zone_KB".into()));
        assert_eq!(assigner.assign("123"), Assignment::Unassigned);
    }

    #[test]
    fn test_overlapping_patterns_are_reported() {
        let mut config = ZoneConfig::default();
        config.patterns.insert("East".into(), vec!["E*".into()]);
        config.patterns.insert("Edge".into(), vec!["E1*".into()]);
        let assigner = ZoneAssigner::from_config(&config).unwrap();

        let partition = assigner.partition(["E12", "E2", "X1"]);
        assert_eq!(partition.zones.get("East"), Some(&vec!["E2".to_string()]));
        let kinds: Vec<(&str, &str)> = partition
            .issues
            .iter()
            .map(|i| (i.ward_id.as_str(), i.kind.as_str()))
            .collect();
        assert_eq!(
            kinds,
            vec![("E12", "ambiguous_zone"), ("X1", "unassigned_zone")]
        );
    }

    #[test]
    fn test_invalid_glob_rejected() {
        let mut config = ZoneConfig::default();
        config.patterns.insert("Bad".into(), vec!["[".into()]);
        assert!(ZoneAssigner::from_config(&config).is_err());
    }

    #[test]
    fn test_priority_order_and_ties() {
        let mut partition = ZonePartition::default();
        partition.zones.insert("B".into(), vec!["b1".into()]);
        partition.zones.insert("A".into(), vec!["a1".into()]);
        partition.zones.insert("C".into(), vec!["c1".into()]);
        let mut breakdowns = BTreeMap::new();
        breakdowns.insert("a1".to_string(), prep(50.0, Component::Resources));
        breakdowns.insert("b1".to_string(), prep(50.0, Component::Resources));
        breakdowns.insert("c1".to_string(), prep(20.0, Component::Resources));

        let ranked = ZoneAggregator::default().summarize(&partition, &breakdowns);
        let order: Vec<&str> = ranked.iter().map(|z| z.zone_id.as_str()).collect();
        assert_eq!(order, vec!["C", "A", "B"]);
    }

    #[test]
    fn test_risk_rollup() {
        let mut partition = ZonePartition::default();
        partition
            .zones
            .insert("North".into(), vec!["n1".into(), "n2".into()]);
        partition.zones.insert("South".into(), vec!["s1".into()]);
        let mut breakdowns = BTreeMap::new();
        breakdowns.insert("n1".to_string(), risk(72.0, RiskLevel::Critical));
        breakdowns.insert("n2".to_string(), risk(20.0, RiskLevel::Low));
        breakdowns.insert("s1".to_string(), risk(55.0, RiskLevel::High));

        let ranked = ZoneAggregator::default().summarize_risk(&partition, &breakdowns);
        assert_eq!(ranked[0].zone_id, "South");
        assert_eq!(ranked[1].avg_mpi, 46.0);
        assert_eq!(ranked[1].max_mpi, 72.0);
        assert_eq!(ranked[1].high_plus_count, 1);
    }
}
