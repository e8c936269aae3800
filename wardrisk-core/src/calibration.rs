//! Isotonic calibration of raw classifier scores

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Monotone piecewise-linear map from uncalibrated to calibrated probability
///
/// Stored as breakpoints; inputs outside the fitted range clamp to the end
/// values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsotonicCalibration {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

#[derive(Debug, Clone, Copy)]
struct Block {
    sum_y: f64,
    weight: f64,
    x_min: f64,
    x_max: f64,
}

impl Block {
    fn mean(&self) -> f64 {
        self.sum_y / self.weight
    }
}

impl IsotonicCalibration {
    /// Weighted pool-adjacent-violators fit
    pub fn fit(scores: &[f64], labels: &[bool], weights: &[f64]) -> EngineResult<Self> {
        if scores.is_empty() || scores.len() != labels.len() || scores.len() != weights.len() {
            return Err(EngineError::InsufficientTrainingData(format!(
                "calibration needs matching non-empty inputs ({} scores, {} labels, {} weights)",
                scores.len(),
                labels.len(),
                weights.len()
            )));
        }

        let mut points: Vec<(f64, f64, f64)> = scores
            .iter()
            .zip(labels)
            .zip(weights)
            .filter(|((s, _), w)| s.is_finite() && **w > 0.0)
            .map(|((&s, &y), &w)| (s, if y { 1.0 } else { 0.0 }, w))
            .collect();
        if points.is_empty() {
            return Err(EngineError::InsufficientTrainingData(
                "no finite calibration points".into(),
            ));
        }
        points.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

        let mut blocks: Vec<Block> = Vec::with_capacity(points.len());
        for (x, y, w) in points {
            let mut block = Block {
                sum_y: y * w,
                weight: w,
                x_min: x,
                x_max: x,
            };
            // Equal scores share one block; violators are pooled backwards
            while let Some(last) = blocks.last() {
                if last.x_max == block.x_min || last.mean() >= block.mean() {
                    block = Block {
                        sum_y: last.sum_y + block.sum_y,
                        weight: last.weight + block.weight,
                        x_min: last.x_min,
                        x_max: block.x_max,
                    };
                    blocks.pop();
                } else {
                    break;
                }
            }
            blocks.push(block);
        }

        let mut x = Vec::with_capacity(blocks.len() * 2);
        let mut y = Vec::with_capacity(blocks.len() * 2);
        for block in &blocks {
            let value = block.mean().clamp(0.0, 1.0);
            x.push(block.x_min);
            y.push(value);
            if block.x_max > block.x_min {
                x.push(block.x_max);
                y.push(value);
            }
        }
        Ok(IsotonicCalibration { x, y })
    }

    pub fn apply(&self, score: f64) -> f64 {
        let (Some(&first_x), Some(&last_x), Some(&first_y), Some(&last_y)) =
            (self.x.first(), self.x.last(), self.y.first(), self.y.last())
        else {
            return score.clamp(0.0, 1.0);
        };
        if score.is_nan() || score <= first_x {
            return first_y;
        }
        if score >= last_x || self.x.len() != self.y.len() {
            return last_y;
        }

        let hi = self.x.partition_point(|&bx| bx <= score);
        let lo = hi - 1;
        let (x0, x1) = (self.x[lo], self.x[hi]);
        let (y0, y1) = (self.y[lo], self.y[hi]);
        if x1 <= x0 {
            return y1;
        }
        (y0 + (score - x0) / (x1 - x0) * (y1 - y0)).clamp(0.0, 1.0)
    }

    /// Structural check for curves read from an artifact
    pub fn validate(&self) -> Result<(), String> {
        if self.x.is_empty() || self.x.len() != self.y.len() {
            return Err(format!(
                "calibration curve needs equal non-empty breakpoints ({} x, {} y)",
                self.x.len(),
                self.y.len()
            ));
        }
        for pair in self.x.windows(2) {
            if pair[1].partial_cmp(&pair[0]) == Some(Ordering::Less) || pair[1].is_nan() {
                return Err("calibration x values must be non-decreasing".into());
            }
        }
        for pair in self.y.windows(2) {
            if pair[1] < pair[0] {
                return Err("calibration y values must be non-decreasing".into());
            }
        }
        if self.y.iter().any(|v| !(0.0..=1.0).contains(v)) {
            return Err("calibration y values must lie in [0, 1]".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pav_pools_violators() {
        let scores = [0.1, 0.2, 0.3, 0.4];
        let labels = [false, true, false, true];
        let cal = IsotonicCalibration::fit(&scores, &labels, &[1.0; 4]).unwrap();
        // 0.2 and 0.3 pool to 0.5
        assert_eq!(cal.apply(0.1), 0.0);
        assert!((cal.apply(0.25) - 0.5).abs() < 1e-12);
        assert_eq!(cal.apply(0.4), 1.0);
        assert!(cal.validate().is_ok());
    }

    #[test]
    fn test_output_is_monotone() {
        let scores: Vec<f64> = (0..50).map(|i| (i as f64) / 50.0).collect();
        let labels: Vec<bool> = (0..50).map(|i| (i * 37) % 11 < i / 5).collect();
        let cal = IsotonicCalibration::fit(&scores, &labels, &vec![1.0; 50]).unwrap();

        let mut prev = -1.0;
        for i in 0..=200 {
            let v = cal.apply(-0.5 + i as f64 / 100.0);
            assert!(v >= prev, "not monotone at {}", i);
            assert!((0.0..=1.0).contains(&v));
            prev = v;
        }
    }

    #[test]
    fn test_clamps_outside_range() {
        let cal = IsotonicCalibration {
            x: vec![0.2, 0.8],
            y: vec![0.1, 0.7],
        };
        assert_eq!(cal.apply(0.0), 0.1);
        assert_eq!(cal.apply(1.0), 0.7);
        assert!((cal.apply(0.5) - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_validate_rejects_decreasing_curve() {
        let cal = IsotonicCalibration {
            x: vec![0.1, 0.5],
            y: vec![0.6, 0.2],
        };
        assert!(cal.validate().is_err());
    }

    #[test]
    fn test_ties_share_a_value() {
        let scores = [0.5, 0.5, 0.5, 0.9];
        let labels = [true, false, false, true];
        let cal = IsotonicCalibration::fit(&scores, &labels, &[1.0; 4]).unwrap();
        assert!((cal.apply(0.5) - 1.0 / 3.0).abs() < 1e-12);
    }
}
