//! One scoring cycle over every ward
//!
//! Global invariants enforced:
//! - Every ward sees the same weather snapshot and the same classifier
//! - A failing ward never aborts the cycle; it is reported instead
//! - Output order is independent of thread scheduling

use crate::classifier::SharedClassifier;
use crate::config::ResolvedConfig;
use crate::error::{EngineError, EngineResult, WardIssue};
use crate::mpi::MpiBreakdown;
use crate::preparedness::PreparednessBreakdown;
use crate::report::{
    sort_risk_records, CycleReport, PreparednessRecord, RiskRecord, RiskSummary, ZoneRecord,
    ZoneRiskRecord,
};
use crate::ward::{ResolvedStatics, StaticField, Ward, WardRegistry};
use crate::weather::WeatherSnapshot;
use crate::zones::ZonePartition;
use chrono::NaiveDateTime;
use rayon::prelude::*;
use std::collections::BTreeMap;

/// Classifier availability for a cycle
#[derive(Debug, Clone)]
pub enum ModelState {
    Ready(SharedClassifier),
    /// Risk is scored in degraded mode; the error says why
    Unavailable(EngineError),
}

impl From<EngineResult<SharedClassifier>> for ModelState {
    fn from(result: EngineResult<SharedClassifier>) -> Self {
        match result {
            Ok(classifier) => ModelState::Ready(classifier),
            Err(err) => ModelState::Unavailable(err),
        }
    }
}

impl ModelState {
    pub fn classifier(&self) -> Option<&SharedClassifier> {
        match self {
            ModelState::Ready(c) => Some(c),
            ModelState::Unavailable(_) => None,
        }
    }
}

/// Preparedness of every ward that could be scored, plus zone roll-up
#[derive(Debug, Clone, PartialEq)]
pub struct PreparednessAssessment {
    pub breakdowns: BTreeMap<String, PreparednessBreakdown>,
    pub records: Vec<PreparednessRecord>,
    pub zones: Vec<ZoneRecord>,
    /// Zone membership of the assessed wards; shared by the risk roll-up
    pub partition: ZonePartition,
    pub issues: Vec<WardIssue>,
}

struct WardResult {
    ward_id: String,
    statics: Option<ResolvedStatics>,
    imputed: Vec<StaticField>,
    preparedness: Option<PreparednessBreakdown>,
    risk: Option<MpiBreakdown>,
    issues: Vec<WardIssue>,
}

/// Scores all wards of a registry under one configuration and classifier
pub struct ScoringCycle<'a> {
    registry: &'a WardRegistry,
    config: &'a ResolvedConfig,
    model: ModelState,
}

impl<'a> ScoringCycle<'a> {
    pub fn new(registry: &'a WardRegistry, config: &'a ResolvedConfig, model: ModelState) -> Self {
        ScoringCycle {
            registry,
            config,
            model,
        }
    }

    pub fn model(&self) -> &ModelState {
        &self.model
    }

    /// Static readiness only; needs no weather or classifier
    pub fn assess_preparedness(&self) -> PreparednessAssessment {
        let results: Vec<WardResult> = self
            .wards()
            .par_iter()
            .map(|ward| self.prepare_ward(ward))
            .collect();
        self.assemble_preparedness(&results)
    }

    /// Score every ward against one weather snapshot
    ///
    /// Wards with unusable weather keep their risk record from `previous`,
    /// flagged stale, when that report came from the same classifier version.
    pub fn run(
        &self,
        weather: &WeatherSnapshot,
        timestamp: NaiveDateTime,
        previous: Option<&CycleReport>,
    ) -> CycleReport {
        let mut warnings = Vec::new();
        let classifier = self.model.classifier().cloned();
        if let ModelState::Unavailable(err) = &self.model {
            let message = format!(
                "classifier unavailable, risk scores are partial (model component omitted): {}",
                err
            );
            log::warn!("{}", message);
            warnings.push(message);
        }
        let model_version = classifier.as_ref().map(|c| c.model_version().to_string());

        let results: Vec<WardResult> = self
            .wards()
            .par_iter()
            .map(|ward| {
                let mut result = self.prepare_ward(ward);
                self.score_risk(ward, weather, timestamp, classifier.as_ref(), &mut result);
                result
            })
            .collect();

        let assessment = self.assemble_preparedness(&results);

        let carry_over = previous.filter(|p| p.model_version == model_version);
        if let Some(p) = previous {
            if carry_over.is_none() {
                log::info!(
                    "previous report used model {:?}; not carrying stale records into {:?}",
                    p.model_version,
                    model_version
                );
            }
        }

        let mut breakdowns: BTreeMap<String, MpiBreakdown> = BTreeMap::new();
        let mut risk = Vec::new();
        for result in &results {
            match &result.risk {
                Some(b) => {
                    risk.push(RiskRecord::new(&result.ward_id, b, &result.imputed));
                    breakdowns.insert(result.ward_id.clone(), b.clone());
                }
                None if result.preparedness.is_some() => {
                    if let Some(prior) = carry_over.and_then(|p| p.risk_for(&result.ward_id)) {
                        let mut stale = prior.clone();
                        stale.stale = true;
                        risk.push(stale);
                    }
                }
                None => {}
            }
        }
        sort_risk_records(&mut risk);

        let risk_zones: Vec<ZoneRiskRecord> = self
            .config
            .zone_aggregator
            .summarize_risk(&assessment.partition, &breakdowns)
            .iter()
            .map(ZoneRiskRecord::from)
            .collect();

        let summary = RiskSummary::from_breakdowns(breakdowns.values());
        log::info!(
            "cycle {}: {} wards scored ({} high or critical), {} issue(s){}",
            timestamp,
            summary.total_wards,
            summary.high + summary.critical,
            assessment.issues.len(),
            if classifier.is_none() { ", degraded" } else { "" }
        );

        CycleReport {
            timestamp,
            model_version,
            degraded: classifier.is_none(),
            warnings,
            risk,
            preparedness: assessment.records,
            zones: assessment.zones,
            risk_zones,
            summary,
            issues: assessment.issues,
        }
    }

    fn wards(&self) -> Vec<&'a Ward> {
        self.registry.iter().collect()
    }

    fn prepare_ward(&self, ward: &Ward) -> WardResult {
        let mut result = WardResult {
            ward_id: ward.ward_id.clone(),
            statics: None,
            imputed: Vec::new(),
            preparedness: None,
            risk: None,
            issues: Vec::new(),
        };
        match self.registry.resolve_statics(ward, self.config.imputation) {
            Ok(statics) => {
                if !statics.imputed.is_empty() {
                    log::debug!("ward {}: imputed {:?}", ward.ward_id, statics.imputed);
                }
                result.preparedness = Some(self.config.preparedness.compose(ward, &statics));
                result.imputed = statics.imputed.clone();
                result.statics = Some(statics);
            }
            Err(err) => {
                log::warn!("{}; ward excluded from this cycle", err);
                result.issues.push(WardIssue::from_error(&ward.ward_id, &err));
            }
        }
        result
    }

    fn score_risk(
        &self,
        ward: &Ward,
        weather: &WeatherSnapshot,
        timestamp: NaiveDateTime,
        classifier: Option<&SharedClassifier>,
        result: &mut WardResult,
    ) {
        let Some(statics) = &result.statics else {
            return;
        };
        let vector = weather.sample_for(&ward.ward_id).and_then(|sample| {
            self.config
                .features
                .build_with_statics(ward, statics, sample, timestamp)
        });
        match vector {
            Ok(vector) => {
                let probability = classifier.map(|c| c.predict(&vector).probability);
                result.risk = Some(self.config.mpi.compose(probability, &vector, ward));
            }
            Err(err) => {
                log::warn!("{}; risk not rescored this cycle", err);
                result.issues.push(WardIssue::from_error(&ward.ward_id, &err));
            }
        }
    }

    fn assemble_preparedness(&self, results: &[WardResult]) -> PreparednessAssessment {
        let mut breakdowns = BTreeMap::new();
        let mut records = Vec::new();
        let mut issues = Vec::new();
        for result in results {
            if let Some(b) = &result.preparedness {
                records.push(PreparednessRecord::new(&result.ward_id, b, &result.imputed));
                breakdowns.insert(result.ward_id.clone(), b.clone());
            }
            issues.extend(result.issues.iter().cloned());
        }

        let partition = self
            .config
            .zone_assigner
            .partition(breakdowns.keys().map(String::as_str));
        let zones = self
            .config
            .zone_aggregator
            .summarize(&partition, &breakdowns)
            .iter()
            .map(ZoneRecord::from)
            .collect();
        issues.extend(partition.issues.iter().cloned());

        PreparednessAssessment {
            breakdowns,
            records,
            zones,
            partition,
            issues,
        }
    }
}
