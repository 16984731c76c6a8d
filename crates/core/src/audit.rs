use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::bid::{BidObservation, RowId};
use crate::domain::memo::MemoPriceGuidance;
use crate::domain::summary::UnitPriceSummaryEntry;

/// A bid row that contributed to a price, tagged with the category or
/// branch that admitted it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetailRow {
    pub category: String,
    pub row_id: RowId,
    pub item_code: String,
    pub unit_price: f64,
    pub quantity: Option<f64>,
    pub weight: Option<f64>,
    pub job_size: Option<f64>,
    pub region: Option<u32>,
    pub letting_date: Option<NaiveDate>,
    pub used_for_pricing: bool,
}

impl DetailRow {
    pub fn from_observation(category: impl Into<String>, row: &BidObservation) -> Self {
        Self {
            category: category.into(),
            row_id: row.row_id,
            item_code: row.item_code.clone(),
            unit_price: row.unit_price,
            quantity: row.quantity,
            weight: row.weight,
            job_size: row.job_size,
            region: row.region,
            letting_date: row.letting_date,
            used_for_pricing: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemoSnapshot {
    pub memo_id: String,
    pub effective_date: Option<String>,
    pub recommended_price: f64,
    pub recommended_unit: Option<String>,
    pub context: String,
    pub confidence: f64,
}

impl From<&MemoPriceGuidance> for MemoSnapshot {
    fn from(guidance: &MemoPriceGuidance) -> Self {
        Self {
            memo_id: guidance.memo_id.clone(),
            effective_date: guidance.effective_date.clone(),
            recommended_price: guidance.price,
            recommended_unit: guidance.unit.clone(),
            context: guidance.context.clone(),
            confidence: guidance.confidence,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SummarySnapshot {
    pub entry: UnitPriceSummaryEntry,
    pub combined_factor: f64,
    pub adjusted_price: f64,
    pub clamp_applied: bool,
}

/// Evidence behind one item's price.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetailRecord {
    /// Source tag of the branch that priced the item.
    pub category: String,
    pub rows: Vec<DetailRow>,
    pub memo: Option<MemoSnapshot>,
    pub summary: Option<SummarySnapshot>,
    pub metadata: BTreeMap<String, String>,
}

impl DetailRecord {
    pub fn with_rows(category: impl Into<String>, rows: Vec<DetailRow>) -> Self {
        Self {
            category: category.into(),
            rows,
            memo: None,
            summary: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn for_memo(category: impl Into<String>, memo: MemoSnapshot) -> Self {
        Self { memo: Some(memo), ..Self::with_rows(category, Vec::new()) }
    }

    pub fn for_summary(category: impl Into<String>, summary: SummarySnapshot) -> Self {
        Self { summary: Some(summary), ..Self::with_rows(category, Vec::new()) }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Item code -> detail record for every priced item in a batch.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditTrail {
    records: BTreeMap<String, DetailRecord>,
}

impl AuditTrail {
    /// Replaces any earlier record for the item; the last branch to price
    /// an item owns its evidence.
    pub fn record(&mut self, item_code: impl Into<String>, record: DetailRecord) {
        self.records.insert(item_code.into(), record);
    }

    pub fn get(&self, item_code: &str) -> Option<&DetailRecord> {
        self.records.get(item_code)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &DetailRecord)> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
