//! Time-complexity estimation from (input size, duration) samples.
//!
//! With fewer than three distinct input sizes there is nothing to fit, and
//! the estimate is the default notation at a fixed low confidence.
//! Otherwise every growth model is fitted by least squares as
//! `duration = c * f(n) + b` and the best coefficient of determination
//! wins. Near-flat timings are classified as constant before fitting.

use serde::{Deserialize, Serialize};

/// Notation reported when there is not enough data.
pub const DEFAULT_NOTATION: &str = "O(n)";

/// Confidence reported when there is not enough data.
pub const DEFAULT_CONFIDENCE: f64 = 0.2;

/// Distinct input sizes needed before fitting.
pub const MIN_DISTINCT_SIZES: usize = 3;

/// Below this many samples the confidence is scaled down.
const FEW_SAMPLES: usize = 5;
const FEW_SAMPLES_PENALTY: f64 = 0.9;

/// Relative spread under which timings count as constant.
const FLAT_SPREAD: f64 = 0.1;

/// A simpler model is kept unless a complex one fits this much better.
const FIT_TOLERANCE: f64 = 0.005;

/// One measured run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPoint {
    /// Input size of the run.
    pub input_size: u64,
    /// Measured duration.
    pub duration_ms: f64,
}

impl DataPoint {
    /// Create a data point.
    pub fn new(input_size: u64, duration_ms: f64) -> Self {
        Self {
            input_size,
            duration_ms,
        }
    }
}

/// A growth-rate estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplexityEstimate {
    /// Big-O notation, such as `O(n log n)`.
    pub notation: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// The samples the estimate is based on.
    pub data_points: Vec<DataPoint>,
}

impl ComplexityEstimate {
    /// Whether the estimate came from a fit rather than the default.
    pub fn is_fitted(&self) -> bool {
        self.distinct_sizes() >= MIN_DISTINCT_SIZES
    }

    fn distinct_sizes(&self) -> usize {
        let mut sizes: Vec<u64> = self.data_points.iter().map(|p| p.input_size).collect();
        sizes.sort_unstable();
        sizes.dedup();
        sizes.len()
    }
}

#[derive(Debug, Clone, Copy)]
struct Model {
    notation: &'static str,
    f: fn(f64) -> f64,
    /// Skip the model when the largest input exceeds this.
    max_input: f64,
}

const MODELS: &[Model] = &[
    Model {
        notation: "O(log n)",
        f: |n| n.max(1.0).log2(),
        max_input: f64::INFINITY,
    },
    Model {
        notation: "O(n)",
        f: |n| n,
        max_input: f64::INFINITY,
    },
    Model {
        notation: "O(n log n)",
        f: |n| n * n.max(1.0).log2(),
        max_input: f64::INFINITY,
    },
    Model {
        notation: "O(n^2)",
        f: |n| n * n,
        max_input: f64::INFINITY,
    },
    Model {
        notation: "O(n^3)",
        f: |n| n * n * n,
        max_input: f64::INFINITY,
    },
    Model {
        notation: "O(2^n)",
        f: |n| n.exp2(),
        max_input: 64.0,
    },
];

/// Estimate the growth rate of a set of samples.
pub fn estimate_complexity(samples: &[DataPoint]) -> ComplexityEstimate {
    let points: Vec<DataPoint> = samples
        .iter()
        .copied()
        .filter(|p| p.duration_ms.is_finite() && p.duration_ms >= 0.0)
        .collect();

    let mut estimate = ComplexityEstimate {
        notation: DEFAULT_NOTATION.to_string(),
        confidence: DEFAULT_CONFIDENCE,
        data_points: points,
    };
    if !estimate.is_fitted() {
        return estimate;
    }

    let xs: Vec<f64> = estimate.data_points.iter().map(|p| p.input_size as f64).collect();
    let ys: Vec<f64> = estimate.data_points.iter().map(|p| p.duration_ms).collect();
    let penalty = if ys.len() < FEW_SAMPLES {
        FEW_SAMPLES_PENALTY
    } else {
        1.0
    };

    if let Some(spread) = relative_spread(&ys) {
        if spread < FLAT_SPREAD {
            estimate.notation = "O(1)".to_string();
            estimate.confidence = ((1.0 - spread) * penalty).clamp(0.0, 1.0);
            return estimate;
        }
    }

    let largest = xs.iter().copied().fold(0.0, f64::max);
    let mut best: Option<(&'static str, f64)> = None;
    for model in MODELS {
        if largest > model.max_input {
            continue;
        }
        let fx: Vec<f64> = xs.iter().map(|&x| (model.f)(x)).collect();
        let Some(r2) = fit(&fx, &ys) else {
            continue;
        };
        if best.is_none_or(|(_, b)| r2 > b + FIT_TOLERANCE) {
            best = Some((model.notation, r2));
        }
    }

    if let Some((notation, r2)) = best {
        estimate.notation = notation.to_string();
        estimate.confidence = (r2.clamp(0.0, 1.0) * penalty).clamp(0.0, 1.0);
    }
    estimate
}

/// `(max - min) / mean`; zero when every timing is zero.
fn relative_spread(ys: &[f64]) -> Option<f64> {
    let mean = ys.iter().sum::<f64>() / ys.len() as f64;
    if mean <= 0.0 {
        return Some(0.0);
    }
    let max = ys.iter().copied().fold(f64::MIN, f64::max);
    let min = ys.iter().copied().fold(f64::MAX, f64::min);
    let spread = (max - min) / mean;
    spread.is_finite().then_some(spread)
}

/// Coefficient of determination of the least-squares line through
/// `(fx, ys)`, or `None` when the fit is degenerate or decreasing.
fn fit(fx: &[f64], ys: &[f64]) -> Option<f64> {
    let n = fx.len() as f64;
    let mean_x = fx.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for (&x, &y) in fx.iter().zip(ys) {
        sxx += (x - mean_x) * (x - mean_x);
        sxy += (x - mean_x) * (y - mean_y);
    }
    if !sxx.is_finite() || sxx <= f64::EPSILON {
        return None;
    }
    let slope = sxy / sxx;
    if slope <= 0.0 || !slope.is_finite() {
        return None;
    }
    let intercept = mean_y - slope * mean_x;

    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for (&x, &y) in fx.iter().zip(ys) {
        let predicted = slope * x + intercept;
        ss_res += (y - predicted) * (y - predicted);
        ss_tot += (y - mean_y) * (y - mean_y);
    }
    if ss_tot <= f64::EPSILON {
        return None;
    }
    let r2 = 1.0 - ss_res / ss_tot;
    r2.is_finite().then_some(r2)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points(f: impl Fn(f64) -> f64, sizes: &[u64]) -> Vec<DataPoint> {
        sizes
            .iter()
            .map(|&n| DataPoint::new(n, f(n as f64)))
            .collect()
    }

    #[test]
    fn test_single_sample_defaults() {
        let estimate = estimate_complexity(&[DataPoint::new(100, 12.0)]);
        assert_eq!(estimate.notation, "O(n)");
        assert_eq!(estimate.confidence, 0.2);
        assert_eq!(estimate.data_points.len(), 1);
        assert!(!estimate.is_fitted());
    }

    #[test]
    fn test_two_distinct_sizes_default() {
        let samples = vec![
            DataPoint::new(10, 1.0),
            DataPoint::new(10, 1.1),
            DataPoint::new(20, 4.0),
        ];
        let estimate = estimate_complexity(&samples);
        assert_eq!(estimate.notation, DEFAULT_NOTATION);
        assert_eq!(estimate.confidence, DEFAULT_CONFIDENCE);
    }

    #[test]
    fn test_linear() {
        let estimate = estimate_complexity(&points(|n| 0.5 * n + 2.0, &[100, 200, 400, 800, 1600]));
        assert_eq!(estimate.notation, "O(n)");
        assert!(estimate.confidence > 0.99);
    }

    #[test]
    fn test_quadratic() {
        let estimate = estimate_complexity(&points(|n| 0.001 * n * n, &[100, 200, 400, 800, 1600]));
        assert_eq!(estimate.notation, "O(n^2)");
        assert!(estimate.confidence > 0.99);
    }

    #[test]
    fn test_exponential() {
        let estimate = estimate_complexity(&points(|n| 0.01 * n.exp2(), &[10, 12, 14, 16, 18]));
        assert_eq!(estimate.notation, "O(2^n)");
    }

    #[test]
    fn test_flat_is_constant() {
        let samples = points(|_| 5.0, &[10, 100, 1000, 10000]);
        let estimate = estimate_complexity(&samples);
        assert_eq!(estimate.notation, "O(1)");
        // Four samples carry the small-sample penalty.
        assert!((estimate.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_few_samples_penalized() {
        let estimate = estimate_complexity(&points(|n| 3.0 * n, &[10, 20, 30]));
        assert_eq!(estimate.notation, "O(n)");
        assert!(estimate.confidence <= 0.9 + 1e-9);
    }

    #[test]
    fn test_invalid_durations_dropped() {
        let mut samples = points(|n| n, &[1, 2, 3, 4, 5]);
        samples.push(DataPoint::new(6, f64::NAN));
        let estimate = estimate_complexity(&samples);
        assert_eq!(estimate.data_points.len(), 5);
    }

    #[test]
    fn test_confidence_bounds() {
        let noisy = vec![
            DataPoint::new(1, 9.0),
            DataPoint::new(2, 1.0),
            DataPoint::new(3, 7.0),
            DataPoint::new(4, 2.0),
            DataPoint::new(5, 8.0),
        ];
        let estimate = estimate_complexity(&noisy);
        assert!((0.0..=1.0).contains(&estimate.confidence));
    }
}
