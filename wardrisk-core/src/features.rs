//! Feature vector construction
//!
//! Global invariants enforced:
//! - Fixed feature order and count (the artifact schema)
//! - Pure function of ward, weather and timestamp
//! - Normalization uses fixed population bounds, never per-request min/max

use crate::error::EngineResult;
use crate::ward::{ResolvedStatics, Ward};
use crate::weather::WeatherSample;
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

/// Number of features in the vector
pub const FEATURE_COUNT: usize = 20;

/// Canonical feature names, in vector order
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "rain_1h",
    "rain_3h",
    "rain_6h",
    "rain_24h",
    "rain_intensity",
    "rain_forecast_3h",
    "mean_elevation",
    "elevation_std",
    "low_lying_pct",
    "drain_density",
    "slope_mean",
    "hist_flood_freq",
    "monsoon_risk_score",
    "complaint_baseline",
    "hour_of_day",
    "day_of_monsoon",
    "is_peak_monsoon",
    "rain_x_vulnerability",
    "rain_x_lowlying",
    "antecedent_stress",
];

/// Index of each feature in the vector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    Rain1h = 0,
    Rain3h,
    Rain6h,
    Rain24h,
    RainIntensity,
    RainForecast3h,
    MeanElevation,
    ElevationStd,
    LowLyingPct,
    DrainDensity,
    SlopeMean,
    HistFloodFreq,
    MonsoonRiskScore,
    ComplaintBaseline,
    HourOfDay,
    DayOfMonsoon,
    IsPeakMonsoon,
    RainXVulnerability,
    RainXLowlying,
    AntecedentStress,
}

impl Feature {
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        FEATURE_NAMES[self.index()]
    }
}

/// The feature schema as owned strings, for artifact comparison
pub fn feature_names() -> Vec<String> {
    FEATURE_NAMES.iter().map(|s| s.to_string()).collect()
}

/// Fixed min/max used to map a raw attribute into [0,1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub const fn new(min: f64, max: f64) -> Self {
        Bounds { min, max }
    }

    /// Clamp into [0,1]; a degenerate range maps everything to 0
    pub fn normalize(&self, value: f64) -> f64 {
        if self.max <= self.min {
            return 0.0;
        }
        ((value - self.min) / (self.max - self.min)).clamp(0.0, 1.0)
    }
}

/// Population bounds calibrated on the training wards
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NormalizationBounds {
    pub drain_density: Bounds,
    pub mean_elevation: Bounds,
    pub low_lying_pct: Bounds,
    pub hist_flood_freq: Bounds,
}

impl Default for NormalizationBounds {
    fn default() -> Self {
        NormalizationBounds {
            drain_density: Bounds::new(0.0, 10.0),
            mean_elevation: Bounds::new(195.0, 235.0),
            low_lying_pct: Bounds::new(0.0, 100.0),
            hist_flood_freq: Bounds::new(0.0, 10.0),
        }
    }
}

/// Month and day within a year
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonthDay {
    pub month: u32,
    pub day: u32,
}

impl MonthDay {
    pub const fn new(month: u32, day: u32) -> Self {
        MonthDay { month, day }
    }

    fn in_year(&self, year: i32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(year, self.month, self.day)
    }

    /// Valid in every year (Feb 29 is rejected)
    pub fn is_valid(&self) -> bool {
        NaiveDate::from_ymd_opt(2023, self.month, self.day).is_some()
    }
}

/// Rainy-season calendar
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SeasonCalendar {
    /// Day the season starts counting from
    pub anchor: MonthDay,
    /// First day of the high-frequency window (inclusive)
    pub peak_start: MonthDay,
    /// Last day of the high-frequency window (inclusive)
    pub peak_end: MonthDay,
}

impl Default for SeasonCalendar {
    fn default() -> Self {
        SeasonCalendar {
            anchor: MonthDay::new(6, 1),
            peak_start: MonthDay::new(7, 15),
            peak_end: MonthDay::new(9, 15),
        }
    }
}

impl SeasonCalendar {
    /// Days since the anchor date of the same year, 0 before the season starts
    pub fn day_of_season(&self, date: NaiveDate) -> f64 {
        match self.anchor.in_year(date.year()) {
            Some(anchor) => (date - anchor).num_days().max(0) as f64,
            None => 0.0,
        }
    }

    pub fn is_peak(&self, date: NaiveDate) -> bool {
        match (
            self.peak_start.in_year(date.year()),
            self.peak_end.in_year(date.year()),
        ) {
            (Some(start), Some(end)) => date >= start && date <= end,
            _ => false,
        }
    }
}

/// Ordered features for one ward at one timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub ward_id: String,
    pub timestamp: NaiveDateTime,
    pub values: [f64; FEATURE_COUNT],
}

impl FeatureVector {
    pub fn get(&self, feature: Feature) -> f64 {
        self.values[feature.index()]
    }

    /// (name, value) pairs in schema order
    pub fn named(&self) -> Vec<(&'static str, f64)> {
        FEATURE_NAMES.iter().copied().zip(self.values).collect()
    }
}

/// Merges ward attributes, rainfall and time into a feature vector
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureBuilder {
    pub bounds: NormalizationBounds,
    pub season: SeasonCalendar,
}

impl FeatureBuilder {
    pub fn new(bounds: NormalizationBounds, season: SeasonCalendar) -> Self {
        FeatureBuilder { bounds, season }
    }

    /// Build from the ward's own attributes; missing statics are an error
    pub fn build(
        &self,
        ward: &Ward,
        weather: &WeatherSample,
        timestamp: NaiveDateTime,
    ) -> EngineResult<FeatureVector> {
        let statics = ResolvedStatics::strict(ward)?;
        self.build_with_statics(ward, &statics, weather, timestamp)
    }

    /// Build from statics already resolved (possibly imputed) by the registry
    pub fn build_with_statics(
        &self,
        ward: &Ward,
        statics: &ResolvedStatics,
        weather: &WeatherSample,
        timestamp: NaiveDateTime,
    ) -> EngineResult<FeatureVector> {
        weather.validate(&ward.ward_id)?;

        let date = timestamp.date();
        let hist = &ward.historical;

        let drain_norm = self.bounds.drain_density.normalize(statics.drain_density);
        let elevation_norm = self.bounds.mean_elevation.normalize(statics.mean_elevation);

        let values = [
            weather.rain_1h,
            weather.rain_3h,
            weather.rain_6h,
            weather.rain_24h,
            weather.intensity(),
            weather.rain_forecast_3h,
            statics.mean_elevation,
            statics.elevation_std,
            statics.low_lying_pct,
            statics.drain_density,
            statics.slope_mean,
            hist.hist_flood_freq,
            hist.monsoon_risk_score,
            hist.complaint_baseline,
            f64::from(timestamp.hour()),
            self.season.day_of_season(date),
            if self.season.is_peak(date) { 1.0 } else { 0.0 },
            weather.rain_3h * (1.0 - drain_norm),
            weather.rain_6h * (statics.low_lying_pct / 100.0),
            weather.rain_24h * (1.0 - elevation_norm),
        ];

        Ok(FeatureVector {
            ward_id: ward.ward_id.clone(),
            timestamp,
            values,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::ward::tests::complete_ward;

    fn at(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn rain() -> WeatherSample {
        WeatherSample {
            rain_1h: 8.0,
            rain_3h: 20.0,
            rain_6h: 30.0,
            rain_24h: 60.0,
            rain_intensity: None,
            rain_forecast_3h: 15.0,
        }
    }

    #[test]
    fn test_enum_matches_names() {
        assert_eq!(Feature::Rain1h.name(), "rain_1h");
        assert_eq!(Feature::AntecedentStress.index(), FEATURE_COUNT - 1);
        assert_eq!(Feature::IsPeakMonsoon.name(), "is_peak_monsoon");
        assert_eq!(feature_names().len(), FEATURE_COUNT);
    }

    #[test]
    fn test_vector_layout() {
        let builder = FeatureBuilder::default();
        let ward = complete_ward("A1");
        let v = builder.build(&ward, &rain(), at(2023, 8, 1, 14)).unwrap();

        assert_eq!(v.get(Feature::Rain3h), 20.0);
        assert_eq!(v.get(Feature::RainIntensity), 8.0);
        assert_eq!(v.get(Feature::RainForecast3h), 15.0);
        assert_eq!(v.get(Feature::DrainDensity), 4.0);
        assert_eq!(v.get(Feature::HourOfDay), 14.0);
        assert_eq!(v.get(Feature::DayOfMonsoon), 61.0);
        assert_eq!(v.get(Feature::IsPeakMonsoon), 1.0);

        // drain 4.0 over [0,10] -> 0.4
        assert!((v.get(Feature::RainXVulnerability) - 20.0 * 0.6).abs() < 1e-12);
        // 18% low-lying
        assert!((v.get(Feature::RainXLowlying) - 30.0 * 0.18).abs() < 1e-12);
        // elevation 212 over [195,235] -> 0.425
        assert!((v.get(Feature::AntecedentStress) - 60.0 * 0.575).abs() < 1e-12);
    }

    #[test]
    fn test_season_clamps_before_anchor() {
        let season = SeasonCalendar::default();
        let may = NaiveDate::from_ymd_opt(2023, 5, 20).unwrap();
        assert_eq!(season.day_of_season(may), 0.0);
        assert!(!season.is_peak(may));

        let start = NaiveDate::from_ymd_opt(2023, 7, 15).unwrap();
        let end = NaiveDate::from_ymd_opt(2023, 9, 15).unwrap();
        let after = NaiveDate::from_ymd_opt(2023, 9, 16).unwrap();
        assert!(season.is_peak(start));
        assert!(season.is_peak(end));
        assert!(!season.is_peak(after));
    }

    #[test]
    fn test_normalize_clamps_and_handles_degenerate_range() {
        let b = Bounds::new(0.0, 10.0);
        assert_eq!(b.normalize(-5.0), 0.0);
        assert_eq!(b.normalize(25.0), 1.0);
        assert_eq!(Bounds::new(3.0, 3.0).normalize(7.0), 0.0);
    }

    #[test]
    fn test_invalid_weather_is_typed_error() {
        let builder = FeatureBuilder::default();
        let ward = complete_ward("A1");
        let bad = WeatherSample {
            rain_24h: f64::NAN,
            ..rain()
        };
        match builder.build(&ward, &bad, at(2023, 8, 1, 0)) {
            Err(EngineError::InvalidWeatherSample { field, .. }) => assert_eq!(field, "rain_24h"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_missing_static_fails_without_imputation() {
        let builder = FeatureBuilder::default();
        let mut ward = complete_ward("A1");
        ward.static_attrs.low_lying_pct = None;
        assert!(matches!(
            builder.build(&ward, &rain(), at(2023, 8, 1, 0)),
            Err(EngineError::MissingAttribute { .. })
        ));
    }

    #[test]
    fn test_build_is_pure() {
        let builder = FeatureBuilder::default();
        let ward = complete_ward("A1");
        let a = builder.build(&ward, &rain(), at(2023, 7, 2, 3)).unwrap();
        let b = builder.build(&ward, &rain(), at(2023, 7, 2, 3)).unwrap();
        assert_eq!(a, b);
    }
}
