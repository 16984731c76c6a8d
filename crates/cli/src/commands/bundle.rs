//! JSON estimate bundle: everything one run needs, already assembled.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::Context;
use bidprice_core::domain::crosswalk::{CrosswalkTable, RawCrosswalkRow};
use bidprice_core::domain::memo::{
    DesignMemoMappingRow, DesignMemoTable, MemoGuidanceTable, MemoPriceGuidance,
};
use bidprice_core::domain::summary::{UnitPriceSummaryEntry, UnitPriceSummaryTable};
use bidprice_core::{ApplicationError, BidPool, DomainError, PayItem, RawBidRow, ReferenceTables};
use chrono::NaiveDate;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct EstimateBundle {
    #[serde(default)]
    pub as_of: Option<NaiveDate>,
    #[serde(default)]
    pub items: Vec<PayItem>,
    #[serde(default)]
    pub bids: Vec<RawBidRow>,
    #[serde(default)]
    pub memo_mappings: Vec<DesignMemoMappingRow>,
    /// Parsed memo guidance keyed by item code.
    #[serde(default)]
    pub memo_guidance: BTreeMap<String, MemoPriceGuidance>,
    /// Manual guidance that shadows the parsed entries.
    #[serde(default)]
    pub memo_overrides: BTreeMap<String, MemoPriceGuidance>,
    /// Catalog unit per item code, used to discount mismatched guidance.
    #[serde(default)]
    pub catalog_units: BTreeMap<String, String>,
    #[serde(default)]
    pub summaries: Vec<UnitPriceSummaryEntry>,
    #[serde(default)]
    pub crosswalk: Vec<RawCrosswalkRow>,
}

impl EstimateBundle {
    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("could not read bundle `{}`", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("could not parse bundle `{}`", path.display()))
    }

    /// Like [`EstimateBundle::read`], classified for the command envelope.
    pub fn load(path: &Path) -> Result<Self, ApplicationError> {
        Self::read(path).map_err(|error| ApplicationError::Input(format!("{error:#}")))
    }

    /// Built-in tables merged with the bundle's own. Built-in design-memo
    /// mappings win over bundle rows for the same replacement code.
    pub fn reference_tables(&self) -> Result<ReferenceTables, DomainError> {
        let mut memo_mappings = DesignMemoTable::builtin();
        memo_mappings.merge_rows(self.memo_mappings.clone())?;

        let mut memo_guidance = MemoGuidanceTable::new(self.memo_guidance.clone())
            .with_catalog_units(self.catalog_units.clone())
            .with_builtin_overrides();
        for (code, guidance) in &self.memo_overrides {
            memo_guidance = memo_guidance.with_override(code, guidance.clone());
        }

        Ok(ReferenceTables {
            memo_mappings,
            memo_guidance,
            summaries: UnitPriceSummaryTable::new(self.summaries.clone()),
            crosswalk: CrosswalkTable::new(self.crosswalk.clone())?,
        })
    }

    pub fn bid_pool(&self) -> BidPool {
        BidPool::ingest(self.bids.iter().cloned())
    }
}
