//! Design-memo rollup: price a replacement item from the pooled history of
//! the obsolete codes it retired.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::PricingConfig;
use crate::domain::bid::{BidObservation, BidPool};
use crate::domain::item::ProjectContext;
use crate::domain::memo::DesignMemoMapping;
use crate::pricing::aggregate::{mean, median, population_std, weighted_mean};
use crate::pricing::band::QuantityBand;
use crate::pricing::window::sigma_trim;

/// Pools smaller than this are never sigma-trimmed.
pub const ROLLUP_TRIM_MIN_ROWS: usize = 5;

const POOL_LOWER_SLACK: f64 = 0.9;
const POOL_UPPER_SLACK: f64 = 1.1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WeightColumn {
    Weight,
    Quantity,
    JobSize,
}

impl WeightColumn {
    /// Tried in this order.
    pub const PREFERENCE: [WeightColumn; 3] =
        [WeightColumn::Weight, WeightColumn::Quantity, WeightColumn::JobSize];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Weight => "WEIGHT",
            Self::Quantity => "QUANTITY",
            Self::JobSize => "JOB_SIZE",
        }
    }

    fn value(&self, row: &BidObservation) -> f64 {
        let value = match self {
            Self::Weight => row.weight,
            Self::Quantity => row.quantity,
            Self::JobSize => row.job_size,
        };
        value.unwrap_or(0.0)
    }
}

impl fmt::Display for WeightColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Filtered rows behind a rollup price.
#[derive(Clone, Debug, PartialEq)]
pub struct RollupPool<'a> {
    pub rows: Vec<&'a BidObservation>,
    /// Absolute quantity bounds the band tried.
    pub band_bounds: Option<(f64, f64)>,
    /// The band emptied the pool, so the unbanded rows were kept.
    pub relaxed: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RollupResult {
    pub replacement_code: String,
    /// NaN when `count == 0`.
    pub price: f64,
    pub count: usize,
    pub label: String,
    pub weight_column: Option<WeightColumn>,
    pub relaxed: bool,
    pub rows: Vec<BidObservation>,
}

impl RollupResult {
    pub fn is_usable(&self) -> bool {
        self.count > 0 && self.price.is_finite() && self.price > 0.0
    }

    /// Median quantity across pooled rows that carry one.
    pub fn median_quantity(&self) -> Option<f64> {
        let quantities: Vec<f64> = self.rows.iter().filter_map(|row| row.quantity).collect();
        if quantities.is_empty() {
            return None;
        }
        Some(median(&quantities))
    }

    /// `[0.9 × min, 1.1 × max]` of the pooled prices.
    pub fn price_bounds(&self) -> Option<(f64, f64)> {
        let prices = self.prices();
        let min = prices.iter().copied().reduce(f64::min)?;
        let max = prices.iter().copied().reduce(f64::max)?;
        Some((min * POOL_LOWER_SLACK, max * POOL_UPPER_SLACK))
    }

    /// Population std over the pooled prices; zero for a single row.
    pub fn std_dev(&self) -> f64 {
        if self.rows.len() > 1 {
            population_std(&self.prices())
        } else {
            0.0
        }
    }

    fn prices(&self) -> Vec<f64> {
        self.rows.iter().map(|row| row.unit_price).collect()
    }
}

pub struct DesignMemoRollup<'a> {
    config: &'a PricingConfig,
}

impl<'a> DesignMemoRollup<'a> {
    pub fn new(config: &'a PricingConfig) -> Self {
        Self { config }
    }

    fn band(&self) -> QuantityBand {
        QuantityBand::new(self.config.rollup_quantity_lower, self.config.rollup_quantity_upper)
    }

    /// Region filter, quantity band with relaxation, then sigma trim.
    pub fn pool<'p>(
        &self,
        pool: &'p BidPool,
        mapping: &DesignMemoMapping,
        context: &ProjectContext,
        target_quantity: Option<f64>,
    ) -> RollupPool<'p> {
        let mut rows = pool.for_codes(&mapping.obsolete_codes());

        if let Some(project_region) = context.project_region {
            if rows.iter().any(|row| row.region.is_some()) {
                rows.retain(|row| row.region == Some(project_region));
            }
        }

        let band = self.band();
        let mut band_bounds = None;
        let mut relaxed = false;
        if let Some(target) = target_quantity.filter(|target| target.is_finite() && *target > 0.0) {
            if let Some(banded) = band.apply(&rows, Some(target)) {
                band_bounds = Some(band.bounds(target));
                if !banded.is_empty() {
                    rows = banded;
                } else if !rows.is_empty() {
                    relaxed = true;
                }
            }
        }

        let rows = sigma_trim(rows, self.config.rollup_sigma_threshold, ROLLUP_TRIM_MIN_ROWS);
        RollupPool { rows, band_bounds, relaxed }
    }

    pub fn price(
        &self,
        pool: &BidPool,
        mapping: &DesignMemoMapping,
        context: &ProjectContext,
        target_quantity: Option<f64>,
    ) -> RollupResult {
        let pooled = self.pool(pool, mapping, context, target_quantity);
        let replacement_code = mapping.replacement_code.clone();

        if pooled.rows.is_empty() {
            return RollupResult {
                label: format!("DESIGN_MEMO_ROLLUP:{replacement_code}"),
                replacement_code,
                price: f64::NAN,
                count: 0,
                weight_column: None,
                relaxed: pooled.relaxed,
                rows: Vec::new(),
            };
        }

        let prices: Vec<f64> = pooled.rows.iter().map(|row| row.unit_price).collect();
        let weight_column = WeightColumn::PREFERENCE
            .into_iter()
            .find(|column| pooled.rows.iter().any(|row| column.value(row) != 0.0));
        let price = weight_column
            .and_then(|column| {
                let weights: Vec<f64> = pooled.rows.iter().map(|row| column.value(row)).collect();
                weighted_mean(&prices, &weights)
            })
            .unwrap_or_else(|| mean(&prices));

        let weight_tag =
            weight_column.map(|column| format!("[w={}]", column.as_str())).unwrap_or_default();
        let suffix = if pooled.relaxed { "|qty_relaxed" } else { "" };
        let label = format!(
            "DESIGN_MEMO_ROLLUP:{replacement_code}{weight_tag}<-{}{suffix}",
            mapping.joined_codes()
        );

        RollupResult {
            replacement_code,
            price,
            count: prices.len(),
            label,
            weight_column,
            relaxed: pooled.relaxed,
            rows: pooled.rows.into_iter().cloned().collect(),
        }
    }
}
