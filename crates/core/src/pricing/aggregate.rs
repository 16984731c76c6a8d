//! Price statistics.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Weight sums closer to zero than this are treated as "no weights".
const WEIGHT_SUM_EPSILON: f64 = 1e-9;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregationMode {
    #[default]
    #[serde(rename = "WGT_AVG")]
    WgtAvg,
    #[serde(rename = "MEAN")]
    Mean,
    #[serde(rename = "MEDIAN")]
    Median,
    #[serde(rename = "P40_P60")]
    P40P60,
    #[serde(rename = "TRIMMED_MEAN_P10_P90")]
    TrimmedMeanP10P90,
    #[serde(rename = "ROBUST_MEDIAN")]
    RobustMedian,
}

impl AggregationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WgtAvg => "WGT_AVG",
            Self::Mean => "MEAN",
            Self::Median => "MEDIAN",
            Self::P40P60 => "P40_P60",
            Self::TrimmedMeanP10P90 => "TRIMMED_MEAN_P10_P90",
            Self::RobustMedian => "ROBUST_MEDIAN",
        }
    }

    /// Lenient parse for configuration values: unknown names resolve to
    /// [`AggregationMode::RobustMedian`] instead of failing the run.
    pub fn from_config_str(value: &str) -> Self {
        value.parse().unwrap_or_else(|unknown: String| {
            tracing::warn!(
                event_name = "config.aggregation.fallback",
                requested = %unknown,
                fallback = Self::RobustMedian.as_str(),
                "unknown aggregation mode; using robust median"
            );
            Self::RobustMedian
        })
    }
}

impl fmt::Display for AggregationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregationMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "WGT_AVG" => Ok(Self::WgtAvg),
            "MEAN" | "AVG" => Ok(Self::Mean),
            "MEDIAN" | "P50" => Ok(Self::Median),
            "P40_P60" => Ok(Self::P40P60),
            "TRIMMED_MEAN_P10_P90" => Ok(Self::TrimmedMeanP10P90),
            "ROBUST_MEDIAN" => Ok(Self::RobustMedian),
            _ => Err(value.trim().to_string()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    /// NaN when `count == 0`.
    pub price: f64,
    pub count: usize,
}

impl AggregateResult {
    pub fn empty() -> Self {
        Self { price: f64::NAN, count: 0 }
    }
}

/// Applies `mode` to `prices`. Weights are read only by
/// [`AggregationMode::WgtAvg`] and must line up with `prices`.
pub fn aggregate(mode: AggregationMode, prices: &[f64], weights: Option<&[f64]>) -> AggregateResult {
    if prices.is_empty() {
        return AggregateResult::empty();
    }

    let price = match mode {
        AggregationMode::WgtAvg => weights
            .filter(|weights| weights.len() == prices.len())
            .and_then(|weights| weighted_mean(prices, weights))
            .unwrap_or_else(|| mean(prices)),
        AggregationMode::Mean => mean(prices),
        AggregationMode::Median | AggregationMode::RobustMedian => median(prices),
        AggregationMode::P40P60 => (percentile(prices, 0.40) + percentile(prices, 0.60)) / 2.0,
        AggregationMode::TrimmedMeanP10P90 => {
            let lower = percentile(prices, 0.10);
            let upper = percentile(prices, 0.90);
            let trimmed: Vec<f64> =
                prices.iter().copied().filter(|price| *price >= lower && *price <= upper).collect();
            if trimmed.is_empty() {
                mean(prices)
            } else {
                mean(&trimmed)
            }
        }
    };

    AggregateResult { price, count: prices.len() }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// `None` when the weights sum to (nearly) zero or are not finite.
pub fn weighted_mean(values: &[f64], weights: &[f64]) -> Option<f64> {
    if values.len() != weights.len() || values.is_empty() {
        return None;
    }
    let total: f64 = weights.iter().sum();
    if !total.is_finite() || total.abs() < WEIGHT_SUM_EPSILON {
        return None;
    }
    let weighted: f64 = values.iter().zip(weights).map(|(value, weight)| value * weight).sum();
    Some(weighted / total)
}

pub fn median(values: &[f64]) -> f64 {
    percentile(values, 0.5)
}

/// Linear interpolation between closest ranks.
pub fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

/// Population (ddof = 0) standard deviation; NaN for an empty slice.
pub fn population_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let center = mean(values);
    let variance =
        values.iter().map(|value| (value - center).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}
