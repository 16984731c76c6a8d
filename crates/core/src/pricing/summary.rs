use serde::{Deserialize, Serialize};

use crate::audit::SummarySnapshot;
use crate::domain::summary::UnitPriceSummaryEntry;
use crate::pricing::factors::{BatchFactors, CombinedFactor, QuantityStep, CAPPED_NOTE};

pub const CLAMPED_NOTE: &str = "clamped to summary range";

/// Adjusted price taken from an eligible summary entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SummaryPrice {
    pub entry: UnitPriceSummaryEntry,
    pub price: f64,
    pub quantity: QuantityStep,
    pub combined: CombinedFactor,
    pub clamp_applied: bool,
}

impl SummaryPrice {
    pub fn data_points_used(&self) -> usize {
        self.entry.contracts as usize
    }

    pub fn notes(&self, factors: &BatchFactors) -> Vec<String> {
        let mut parts = vec![format!(
            "UNIT_PRICE_SUMMARY CY{} (contracts={})",
            self.entry.year, self.entry.contracts
        )];
        parts.extend(factors.notes());
        parts.extend(self.quantity.note().map(str::to_string));
        if self.combined.capped {
            parts.push(CAPPED_NOTE.to_string());
        }
        if self.clamp_applied {
            parts.push(CLAMPED_NOTE.to_string());
        }
        parts
    }

    pub fn snapshot(&self) -> SummarySnapshot {
        SummarySnapshot {
            entry: self.entry.clone(),
            combined_factor: self.combined.value,
            adjusted_price: self.price,
            clamp_applied: self.clamp_applied,
        }
    }
}

/// Prices an item from its summary entry, or `None` when the entry is not
/// eligible. The weighted average is scaled by the combined factor and then
/// held inside the entry's observed range when that range is usable.
pub fn summary_price(
    entry: &UnitPriceSummaryEntry,
    factors: &BatchFactors,
    target_quantity: Option<f64>,
) -> Option<SummaryPrice> {
    if !entry.is_eligible() {
        return None;
    }

    let quantity =
        QuantityStep::from_quantities(target_quantity, entry.typical_quantity_per_contract());
    let combined = factors.combine(quantity);
    let adjusted = entry.weighted_average * combined.value;

    let (price, clamp_applied) = match entry.clamp_range() {
        Some((lowest, highest)) => {
            let clamped = adjusted.clamp(lowest, highest);
            (clamped, clamped != adjusted)
        }
        None => (adjusted, false),
    };

    Some(SummaryPrice { entry: entry.clone(), price, quantity, combined, clamp_applied })
}
