//! Batch-level adjustment factors for the fallback cascade.
//!
//! Recency and region factors are medians of ratios between already-priced
//! category columns across the whole batch. The quantity step compares an
//! item's target quantity against a typical quantity from the fallback's own
//! data. All three multiply into one combined factor with a hard cap.

use serde::{Deserialize, Serialize};

use crate::pricing::aggregate::median;

pub const RECENCY_RANGE: (f64, f64) = (0.9, 1.2);
pub const REGION_RANGE: (f64, f64) = (0.85, 1.15);
pub const COMBINED_RANGE: (f64, f64) = (0.75, 1.25);

const LARGE_QUANTITY_RATIO: f64 = 2.0;
const SMALL_QUANTITY_RATIO: f64 = 0.5;
const CAP_TOLERANCE: f64 = 1e-6;

pub const CAPPED_NOTE: &str = "combined adj capped at +/-25%";

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentFactor {
    pub value: f64,
    pub clamped_range: (f64, f64),
    pub used_default: bool,
    pub sample_count: usize,
}

impl AdjustmentFactor {
    pub fn neutral(clamped_range: (f64, f64)) -> Self {
        Self { value: 1.0, clamped_range, used_default: true, sample_count: 0 }
    }

    /// Median of the finite, positive `ratios`, clamped to `range`.
    pub fn from_ratios(ratios: &[f64], range: (f64, f64)) -> Self {
        let usable: Vec<f64> =
            ratios.iter().copied().filter(|ratio| ratio.is_finite() && *ratio > 0.0).collect();
        if usable.is_empty() {
            return Self::neutral(range);
        }
        Self {
            value: median(&usable).clamp(range.0, range.1),
            clamped_range: range,
            used_default: false,
            sample_count: usable.len(),
        }
    }

    /// `recency=+4.5%`, or `recency=1.00 (insufficient data)` for a default.
    pub fn note(&self, label: &str) -> String {
        if self.used_default {
            return format!("{label}=1.00 (insufficient data)");
        }
        let delta = (self.value - 1.0) * 100.0;
        let sign = if delta >= 0.0 { "+" } else { "" };
        format!("{label}={sign}{delta:.1}%")
    }
}

/// Category prices of one primary-priced item that feed the batch factors.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FactorInputs {
    pub dist_12m: Option<f64>,
    pub state_12m: Option<f64>,
    pub state_24m: Option<f64>,
    pub state_36m: Option<f64>,
}

fn ratio(numerator: Option<f64>, denominator: Option<f64>) -> Option<f64> {
    match (numerator, denominator) {
        (Some(top), Some(bottom)) if top > 0.0 && bottom > 0.0 => Some(top / bottom),
        _ => None,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchFactors {
    pub recency: AdjustmentFactor,
    pub region: AdjustmentFactor,
}

impl Default for BatchFactors {
    fn default() -> Self {
        Self {
            recency: AdjustmentFactor::neutral(RECENCY_RANGE),
            region: AdjustmentFactor::neutral(REGION_RANGE),
        }
    }
}

impl BatchFactors {
    /// Computed from the complete primary pass, so the result does not
    /// depend on item order.
    pub fn from_inputs(inputs: &[FactorInputs]) -> Self {
        let mut recency_ratios = Vec::new();
        let mut region_ratios = Vec::new();
        for input in inputs {
            recency_ratios.extend(ratio(input.state_12m, input.state_24m));
            recency_ratios.extend(ratio(input.state_12m, input.state_36m));
            region_ratios.extend(ratio(input.dist_12m, input.state_12m));
        }

        Self {
            recency: AdjustmentFactor::from_ratios(&recency_ratios, RECENCY_RANGE),
            region: AdjustmentFactor::from_ratios(&region_ratios, REGION_RANGE),
        }
    }

    pub fn combine(&self, quantity: QuantityStep) -> CombinedFactor {
        CombinedFactor::new(self.recency.value * self.region.value * quantity.factor)
    }

    /// `recency=...` and `region=...` note parts.
    pub fn notes(&self) -> [String; 2] {
        [self.recency.note("recency"), self.region.note("region")]
    }
}

/// Discrete quantity adjustment.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuantityStep {
    pub factor: f64,
    pub ratio: Option<f64>,
}

impl QuantityStep {
    pub const NEUTRAL: QuantityStep = QuantityStep { factor: 1.0, ratio: None };

    /// Large orders get 5% off, small ones 5% on; both operands must be
    /// positive for any step to apply.
    pub fn from_quantities(target: Option<f64>, typical: Option<f64>) -> Self {
        let (Some(target), Some(typical)) = (target, typical) else {
            return Self::NEUTRAL;
        };
        if !(target > 0.0 && typical > 0.0) {
            return Self::NEUTRAL;
        }

        let ratio = target / typical;
        let factor = if ratio >= LARGE_QUANTITY_RATIO {
            0.95
        } else if ratio <= SMALL_QUANTITY_RATIO {
            1.05
        } else {
            1.0
        };
        Self { factor, ratio: Some(ratio) }
    }

    pub fn note(&self) -> Option<&'static str> {
        if self.factor < 1.0 {
            Some("quantity adj=-5%")
        } else if self.factor > 1.0 {
            Some("quantity adj=+5%")
        } else {
            None
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CombinedFactor {
    pub value: f64,
    pub raw: f64,
    pub capped: bool,
}

impl CombinedFactor {
    pub fn new(raw: f64) -> Self {
        let value = raw.clamp(COMBINED_RANGE.0, COMBINED_RANGE.1);
        Self { value, raw, capped: (value - raw).abs() > CAP_TOLERANCE }
    }
}
