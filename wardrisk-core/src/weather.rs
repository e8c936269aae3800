//! Rainfall inputs for one scoring cycle

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Rainfall accumulations (mm) and forecast for one ward or area
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherSample {
    pub rain_1h: f64,
    pub rain_3h: f64,
    pub rain_6h: f64,
    pub rain_24h: f64,
    /// Distinct rate measurement (mm/h); `rain_1h` is used when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rain_intensity: Option<f64>,
    pub rain_forecast_3h: f64,
}

impl WeatherSample {
    /// Current intensity, by convention the last hour's accumulation
    pub fn intensity(&self) -> f64 {
        self.rain_intensity.unwrap_or(self.rain_1h)
    }

    /// Observed 3h accumulation plus the 3h forecast
    pub fn three_hour_total(&self) -> f64 {
        self.rain_3h + self.rain_forecast_3h
    }

    /// Reject negative or non-finite rainfall values
    pub fn validate(&self, ward_id: &str) -> EngineResult<()> {
        let mut fields = vec![
            ("rain_1h", self.rain_1h),
            ("rain_3h", self.rain_3h),
            ("rain_6h", self.rain_6h),
            ("rain_24h", self.rain_24h),
            ("rain_forecast_3h", self.rain_forecast_3h),
        ];
        if let Some(rate) = self.rain_intensity {
            fields.push(("rain_intensity", rate));
        }

        for (field, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(EngineError::InvalidWeatherSample {
                    ward_id: ward_id.to_string(),
                    field: field.to_string(),
                    value,
                });
            }
        }
        Ok(())
    }
}

/// Weather for every ward in one cycle
///
/// A per-ward sample wins over the city-wide default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<WeatherSample>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub wards: BTreeMap<String, WeatherSample>,
}

impl WeatherSnapshot {
    /// Snapshot where every ward shares one sample
    pub fn uniform(sample: WeatherSample) -> Self {
        WeatherSnapshot {
            default: Some(sample),
            wards: BTreeMap::new(),
        }
    }

    pub fn sample_for(&self, ward_id: &str) -> EngineResult<&WeatherSample> {
        self.wards
            .get(ward_id)
            .or(self.default.as_ref())
            .ok_or_else(|| EngineError::MissingWeather(ward_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intensity_defaults_to_rain_1h() {
        let sample = WeatherSample {
            rain_1h: 12.0,
            ..Default::default()
        };
        assert_eq!(sample.intensity(), 12.0);

        let distinct = WeatherSample {
            rain_1h: 12.0,
            rain_intensity: Some(20.0),
            ..Default::default()
        };
        assert_eq!(distinct.intensity(), 20.0);
    }

    #[test]
    fn test_negative_and_nan_rejected() {
        let negative = WeatherSample {
            rain_6h: -0.1,
            ..Default::default()
        };
        match negative.validate("W1") {
            Err(EngineError::InvalidWeatherSample { field, .. }) => assert_eq!(field, "rain_6h"),
            other => panic!("unexpected: {:?}", other),
        }

        let nan = WeatherSample {
            rain_intensity: Some(f64::NAN),
            ..Default::default()
        };
        assert!(nan.validate("W1").is_err());

        assert!(WeatherSample::default().validate("W1").is_ok());
    }

    #[test]
    fn test_snapshot_prefers_ward_sample() {
        let mut snapshot = WeatherSnapshot::uniform(WeatherSample {
            rain_3h: 1.0,
            ..Default::default()
        });
        snapshot.wards.insert(
            "B2".into(),
            WeatherSample {
                rain_3h: 9.0,
                ..Default::default()
            },
        );
        assert_eq!(snapshot.sample_for("B2").unwrap().rain_3h, 9.0);
        assert_eq!(snapshot.sample_for("Z9").unwrap().rain_3h, 1.0);

        let empty = WeatherSnapshot::default();
        assert_eq!(
            empty.sample_for("Z9").unwrap_err(),
            EngineError::MissingWeather("Z9".into())
        );
    }
}
