use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::bid::normalize_item_code;

/// A project line to be priced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PayItem {
    #[serde(alias = "ITEM_CODE")]
    pub item_code: String,
    #[serde(default, alias = "DESCRIPTION")]
    pub description: String,
    #[serde(default, alias = "UNIT")]
    pub unit: String,
    #[serde(default, alias = "QUANTITY")]
    pub quantity: f64,
}

impl PayItem {
    pub fn new(item_code: impl AsRef<str>, quantity: f64) -> Self {
        Self {
            item_code: normalize_item_code(item_code.as_ref()),
            description: String::new(),
            unit: String::new(),
            quantity,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn normalized_code(&self) -> String {
        normalize_item_code(&self.item_code)
    }

    /// Quantity usable as a band target; `None` unless strictly positive.
    pub fn target_quantity(&self) -> Option<f64> {
        (self.quantity.is_finite() && self.quantity > 0.0).then_some(self.quantity)
    }
}

/// Project-wide inputs shared by every item in a batch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProjectContext {
    pub project_region: Option<u32>,
    /// Reference date for the recency windows.
    pub as_of: NaiveDate,
}

impl ProjectContext {
    pub fn new(project_region: Option<u32>, as_of: NaiveDate) -> Self {
        Self { project_region, as_of }
    }
}
