use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::bid::normalize_item_code;

/// Entries below this many contracts are not trusted.
pub const MIN_SUMMARY_CONTRACTS: u32 = 3;

/// One year of the agency's published unit-price summary for an item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnitPriceSummaryEntry {
    #[serde(alias = "ITEM_CODE")]
    pub item_code: String,
    #[serde(alias = "YEAR")]
    pub year: i32,
    #[serde(default, alias = "WEIGHTED_AVERAGE")]
    pub weighted_average: f64,
    #[serde(default, alias = "CONTRACTS")]
    pub contracts: u32,
    #[serde(default, alias = "TOTAL_VALUE")]
    pub total_value: f64,
    #[serde(default, alias = "LOWEST")]
    pub lowest: f64,
    #[serde(default, alias = "HIGHEST")]
    pub highest: f64,
}

impl UnitPriceSummaryEntry {
    pub fn is_eligible(&self) -> bool {
        self.weighted_average.is_finite()
            && self.weighted_average > 0.0
            && self.contracts >= MIN_SUMMARY_CONTRACTS
    }

    /// Reasons the entry cannot be used, in a stable order. Empty when
    /// [`is_eligible`](Self::is_eligible) holds.
    pub fn insufficiency_reasons(&self) -> Vec<String> {
        let mut reasons = Vec::new();
        if !(self.weighted_average.is_finite() && self.weighted_average > 0.0) {
            reasons.push("weighted average unavailable".to_string());
        }
        if self.contracts < MIN_SUMMARY_CONTRACTS {
            reasons.push(format!("contracts={}", self.contracts));
        }
        reasons
    }

    /// Average quantity per contract implied by the summary, when every
    /// operand is positive.
    pub fn typical_quantity_per_contract(&self) -> Option<f64> {
        if self.total_value > 0.0 && self.weighted_average > 0.0 && self.contracts > 0 {
            let typical = (self.total_value / self.weighted_average) / f64::from(self.contracts);
            return (typical.is_finite() && typical > 0.0).then_some(typical);
        }
        None
    }

    /// `(lowest, highest)` when the range is usable as a clamp.
    pub fn clamp_range(&self) -> Option<(f64, f64)> {
        (self.lowest > 0.0 && self.highest > 0.0 && self.highest >= self.lowest)
            .then_some((self.lowest, self.highest))
    }
}

/// Latest summary entry per normalized item code.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UnitPriceSummaryTable {
    entries: BTreeMap<String, UnitPriceSummaryEntry>,
}

impl UnitPriceSummaryTable {
    pub fn new(entries: Vec<UnitPriceSummaryEntry>) -> Self {
        let mut table: BTreeMap<String, UnitPriceSummaryEntry> = BTreeMap::new();
        for mut entry in entries {
            entry.item_code = normalize_item_code(&entry.item_code);
            if entry.item_code.is_empty() {
                continue;
            }
            match table.get(&entry.item_code) {
                Some(existing) if existing.year >= entry.year => {}
                _ => {
                    table.insert(entry.item_code.clone(), entry);
                }
            }
        }
        Self { entries: table }
    }

    pub fn get(&self, item_code: &str) -> Option<&UnitPriceSummaryEntry> {
        self.entries.get(&normalize_item_code(item_code))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
