use serde::{Deserialize, Serialize};

use crate::domain::bid::BidObservation;

/// Quantity window expressed as multiples of the target quantity.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuantityBand {
    pub lower: f64,
    pub upper: f64,
}

impl QuantityBand {
    pub const PRIMARY: QuantityBand = QuantityBand { lower: 0.5, upper: 1.5 };
    /// Only the upper multiplier relaxes.
    pub const EXPANDED: QuantityBand = QuantityBand { lower: 0.5, upper: 2.0 };

    pub fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }

    /// Absolute `[lower, upper]` quantities for `target`.
    pub fn bounds(&self, target: f64) -> (f64, f64) {
        (self.lower * target, self.upper * target)
    }

    /// Restricts `rows` to quantities inside the band, both ends inclusive.
    /// Returns `None` (filter not applied) when the target is missing or not
    /// positive, or when no row carries a quantity.
    pub fn apply<'a>(
        &self,
        rows: &[&'a BidObservation],
        target: Option<f64>,
    ) -> Option<Vec<&'a BidObservation>> {
        let target = target.filter(|target| target.is_finite() && *target > 0.0)?;
        if !rows.iter().any(|row| row.quantity.is_some()) {
            return None;
        }

        let (lower, upper) = self.bounds(target);
        Some(
            rows.iter()
                .copied()
                .filter(|row| row.quantity.is_some_and(|qty| qty >= lower && qty <= upper))
                .collect(),
        )
    }
}
