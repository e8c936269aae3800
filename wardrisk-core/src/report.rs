//! Reporting and output generation
//!
//! Global invariants enforced:
//! - Deterministic output ordering
//! - Byte-for-byte identical output across runs with identical inputs
//!
//! Records carry values rounded the way they are published (one decimal,
//! model probability three); breakdowns keep full precision.

use crate::error::WardIssue;
use crate::mpi::{MpiBreakdown, RiskLevel};
use crate::preparedness::PreparednessBreakdown;
use crate::ward::StaticField;
use crate::zones::{ZoneRiskSummary, ZoneSummary};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn field_names(imputed: &[StaticField]) -> Vec<String> {
    imputed.iter().map(|f| f.as_str().to_string()).collect()
}

/// Per-ward risk record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskRecord {
    pub ward_id: String,
    pub mpi_score: f64,
    pub risk_level: RiskLevel,
    pub model_probability: Option<f64>,
    pub model_contribution: f64,
    pub rainfall_contribution: f64,
    pub historical_contribution: f64,
    pub infrastructure_contribution: f64,
    pub vulnerability_contribution: f64,
    /// Scored without the model component
    pub partial: bool,
    /// Carried over from the previous cycle
    #[serde(default)]
    pub stale: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub imputed: Vec<String>,
}

impl RiskRecord {
    pub fn new(ward_id: &str, breakdown: &MpiBreakdown, imputed: &[StaticField]) -> Self {
        RiskRecord {
            ward_id: ward_id.to_string(),
            mpi_score: round1(breakdown.total),
            risk_level: breakdown.risk_level,
            model_probability: breakdown.probability.map(round3),
            model_contribution: round1(breakdown.model),
            rainfall_contribution: round1(breakdown.rainfall),
            historical_contribution: round1(breakdown.historical),
            infrastructure_contribution: round1(breakdown.infrastructure),
            vulnerability_contribution: round1(breakdown.vulnerability),
            partial: breakdown.partial,
            stale: false,
            imputed: field_names(imputed),
        }
    }
}

/// Per-ward preparedness record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparednessRecord {
    pub ward_id: String,
    pub preparedness_score: f64,
    pub preparedness_level: String,
    pub infra_capacity: f64,
    pub historical_resilience: f64,
    pub resource_readiness: f64,
    pub vulnerability_gap: f64,
    pub maintenance_score: f64,
    pub weakest_component: String,
    pub recommendation: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub imputed: Vec<String>,
}

impl PreparednessRecord {
    pub fn new(ward_id: &str, b: &PreparednessBreakdown, imputed: &[StaticField]) -> Self {
        PreparednessRecord {
            ward_id: ward_id.to_string(),
            preparedness_score: round1(b.total),
            preparedness_level: b.preparedness_level.as_str().to_string(),
            infra_capacity: round1(b.infra_capacity),
            historical_resilience: round1(b.historical_resilience),
            resource_readiness: round1(b.resource_readiness),
            vulnerability_gap: round1(b.vulnerability_gap),
            maintenance_score: round1(b.maintenance),
            weakest_component: b.weakest_component.as_str().to_string(),
            recommendation: b.recommendation().to_string(),
            imputed: field_names(imputed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneRecord {
    pub zone_id: String,
    pub avg_preparedness: f64,
    pub min_preparedness: f64,
    pub max_preparedness: f64,
    pub ward_count: usize,
    pub critical_wards: usize,
    pub poor_wards: usize,
    pub top_weakness: String,
    pub avg_infra_capacity: f64,
    pub avg_historical_resilience: f64,
}

impl From<&ZoneSummary> for ZoneRecord {
    fn from(z: &ZoneSummary) -> Self {
        ZoneRecord {
            zone_id: z.zone_id.clone(),
            avg_preparedness: round1(z.avg_preparedness),
            min_preparedness: round1(z.min_preparedness),
            max_preparedness: round1(z.max_preparedness),
            ward_count: z.ward_count,
            critical_wards: z.critical_wards,
            poor_wards: z.poor_wards,
            top_weakness: z.top_weakness.as_str().to_string(),
            avg_infra_capacity: round1(z.avg_infra_capacity),
            avg_historical_resilience: round1(z.avg_historical_resilience),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneRiskRecord {
    pub zone_id: String,
    pub ward_count: usize,
    pub avg_mpi: f64,
    pub max_mpi: f64,
    pub high_plus_count: usize,
}

impl From<&ZoneRiskSummary> for ZoneRiskRecord {
    fn from(z: &ZoneRiskSummary) -> Self {
        ZoneRiskRecord {
            zone_id: z.zone_id.clone(),
            ward_count: z.ward_count,
            avg_mpi: round1(z.avg_mpi),
            max_mpi: round1(z.max_mpi),
            high_plus_count: z.high_plus_count,
        }
    }
}

/// City-wide distribution of risk levels
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskSummary {
    pub total_wards: usize,
    pub low: usize,
    pub moderate: usize,
    pub high: usize,
    pub critical: usize,
    pub mean_mpi: f64,
    pub min_mpi: f64,
    pub max_mpi: f64,
}

impl RiskSummary {
    pub fn from_breakdowns<'a>(breakdowns: impl IntoIterator<Item = &'a MpiBreakdown>) -> Self {
        let mut summary = RiskSummary::default();
        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for b in breakdowns {
            summary.total_wards += 1;
            match b.risk_level {
                RiskLevel::Low => summary.low += 1,
                RiskLevel::Moderate => summary.moderate += 1,
                RiskLevel::High => summary.high += 1,
                RiskLevel::Critical => summary.critical += 1,
            }
            sum += b.total;
            min = min.min(b.total);
            max = max.max(b.total);
        }
        if summary.total_wards > 0 {
            summary.mean_mpi = round1(sum / summary.total_wards as f64);
            summary.min_mpi = round1(min);
            summary.max_mpi = round1(max);
        }
        summary
    }

    pub fn count(&self, level: RiskLevel) -> usize {
        match level {
            RiskLevel::Low => self.low,
            RiskLevel::Moderate => self.moderate,
            RiskLevel::High => self.high,
            RiskLevel::Critical => self.critical,
        }
    }
}

/// Everything one scoring cycle produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub timestamp: NaiveDateTime,
    pub model_version: Option<String>,
    /// Classifier unavailable; risk records are partial
    pub degraded: bool,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub risk: Vec<RiskRecord>,
    pub preparedness: Vec<PreparednessRecord>,
    pub zones: Vec<ZoneRecord>,
    pub risk_zones: Vec<ZoneRiskRecord>,
    pub summary: RiskSummary,
    #[serde(default)]
    pub issues: Vec<WardIssue>,
}

impl CycleReport {
    pub fn risk_for(&self, ward_id: &str) -> Option<&RiskRecord> {
        self.risk.iter().find(|r| r.ward_id == ward_id)
    }

    pub fn preparedness_for(&self, ward_id: &str) -> Option<&PreparednessRecord> {
        self.preparedness.iter().find(|r| r.ward_id == ward_id)
    }
}

/// MPI descending, then ward id ascending
pub fn sort_risk_records(records: &mut [RiskRecord]) {
    records.sort_by(|a, b| {
        b.mpi_score
            .total_cmp(&a.mpi_score)
            .then_with(|| a.ward_id.cmp(&b.ward_id))
    });
}

/// Render a cycle report as text output
pub fn render_text(report: &CycleReport, top: Option<usize>) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "Cycle {}  model: {}{}\n",
        report.timestamp.format("%Y-%m-%d %H:%M"),
        report.model_version.as_deref().unwrap_or("none"),
        if report.degraded { "  [DEGRADED: partial scores]" } else { "" }
    ));
    for warning in &report.warnings {
        output.push_str(&format!("warning: {}\n", warning));
    }

    let s = &report.summary;
    output.push_str(&format!(
        "\n{} wards scored  Low {}  Moderate {}  High {}  Critical {}  (mean {:.1}, min {:.1}, max {:.1})\n",
        s.total_wards, s.low, s.moderate, s.high, s.critical, s.mean_mpi, s.min_mpi, s.max_mpi
    ));

    output.push_str(&format!(
        "\n{:<8} {:<10} {:<12} {:>6} {:>6} {:>6} {:>6} {:>6}  {}\n",
        "MPI", "LEVEL", "WARD", "MODEL", "RAIN", "HIST", "INFRA", "VULN", "FLAGS"
    ));
    let limit = top.unwrap_or(report.risk.len());
    for r in report.risk.iter().take(limit) {
        let mut flags = Vec::new();
        if r.partial {
            flags.push("partial");
        }
        if r.stale {
            flags.push("stale");
        }
        if !r.imputed.is_empty() {
            flags.push("imputed");
        }
        output.push_str(&format!(
            "{:<8.1} {:<10} {:<12} {:>6.1} {:>6.1} {:>6.1} {:>6.1} {:>6.1}  {}\n",
            r.mpi_score,
            r.risk_level.as_str(),
            truncate_or_pad(&r.ward_id, 12),
            r.model_contribution,
            r.rainfall_contribution,
            r.historical_contribution,
            r.infrastructure_contribution,
            r.vulnerability_contribution,
            if flags.is_empty() { "-".to_string() } else { flags.join(",") }
        ));
    }

    if !report.zones.is_empty() {
        output.push('\n');
        output.push_str(&render_zones_text(&report.zones));
    }

    if !report.issues.is_empty() {
        output.push_str(&format!("\n{} issue(s):\n", report.issues.len()));
        output.push_str(&render_issues_text(&report.issues));
    }

    output
}

/// Intervention-priority zone table
pub fn render_zones_text(zones: &[ZoneRecord]) -> String {
    let mut output = format!(
        "{:<14} {:>6} {:>6} {:>6} {:>6} {:>5} {:>5}  {}\n",
        "ZONE", "AVG", "MIN", "MAX", "WARDS", "CRIT", "POOR", "TOP WEAKNESS"
    );
    for z in zones {
        output.push_str(&format!(
            "{:<14} {:>6.1} {:>6.1} {:>6.1} {:>6} {:>5} {:>5}  {}\n",
            truncate_or_pad(&z.zone_id, 14),
            z.avg_preparedness,
            z.min_preparedness,
            z.max_preparedness,
            z.ward_count,
            z.critical_wards,
            z.poor_wards,
            z.top_weakness
        ));
    }
    output
}

/// Preparedness table, weakest wards first
pub fn render_preparedness_text(records: &[PreparednessRecord], top: Option<usize>) -> String {
    let mut sorted: Vec<&PreparednessRecord> = records.iter().collect();
    sorted.sort_by(|a, b| {
        a.preparedness_score
            .total_cmp(&b.preparedness_score)
            .then_with(|| a.ward_id.cmp(&b.ward_id))
    });

    let mut output = format!(
        "{:<8} {:<10} {:<12} {:<15} {}\n",
        "SCORE", "LEVEL", "WARD", "WEAKEST", "RECOMMENDATION"
    );
    for r in sorted.into_iter().take(top.unwrap_or(records.len())) {
        output.push_str(&format!(
            "{:<8.1} {:<10} {:<12} {:<15} {}\n",
            r.preparedness_score,
            r.preparedness_level,
            truncate_or_pad(&r.ward_id, 12),
            r.weakest_component,
            r.recommendation
        ));
    }
    output
}

pub fn render_issues_text(issues: &[WardIssue]) -> String {
    issues
        .iter()
        .map(|i| format!("  {:<12} {:<24} {}\n", i.ward_id, i.kind, i.detail))
        .collect()
}

/// Render any serializable output as pretty JSON
pub fn render_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}

/// Truncate or pad string to fixed width
fn truncate_or_pad(s: &str, width: usize) -> String {
    if s.chars().count() > width {
        let kept: String = s.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", kept)
    } else {
        format!("{:<width$}", s, width = width)
    }
}
