//! Category walk: windowed aggregation with adaptive quantity banding.
//!
//! Every category is priced on its own for diagnostics, and a combined pool
//! is built by walking the categories from most local and recent outward,
//! admitting each row once, until the minimum sample target is reached. When
//! a target quantity narrows the pool below the configured minimum, the walk
//! is repeated with the expanded band.

use serde::{Deserialize, Serialize};

use crate::audit::{DetailRecord, DetailRow};
use crate::config::{ElasticityConfig, PricingConfig};
use crate::domain::bid::{BidObservation, BidPool};
use crate::domain::item::ProjectContext;
use crate::domain::outcome::{Notes, PricingOutcome, PricingSource};
use crate::pricing::aggregate::{aggregate, median, population_std, AggregateResult};
use crate::pricing::band::QuantityBand;
use crate::pricing::window::{category_rows, Category, SeenRows};

pub const NO_DATA_NOTE: &str = "NO DATA IN ANY CATEGORY; REVIEW.";

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CategoryStat {
    pub category: Category,
    /// NaN when `count == 0`.
    pub price: f64,
    pub count: usize,
}

/// A combined-pool row and the category that admitted it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdmittedRow {
    pub category: Category,
    pub row: BidObservation,
}

/// How the quantity band behaved for an item priced with a target quantity.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuantityFilterAudit {
    /// Band behind the final walk; `None` when the band could not apply.
    pub band: Option<QuantityBand>,
    /// Combined count under the primary band.
    pub base_count: usize,
    pub was_expanded: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ElasticityAdjustment {
    pub slope: f64,
    pub median_quantity: f64,
    pub factor: f64,
    pub pairs: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CategoryBreakdown {
    pub item_code: String,
    /// NaN when nothing was admitted.
    pub price: f64,
    pub source: PricingSource,
    pub per_category: Vec<CategoryStat>,
    pub used_categories: Vec<Category>,
    pub combined: Vec<AdmittedRow>,
    pub quantity_filter: Option<QuantityFilterAudit>,
    pub elasticity: Option<ElasticityAdjustment>,
}

impl CategoryBreakdown {
    pub fn data_points_used(&self) -> usize {
        self.combined.len()
    }

    pub fn has_price(&self) -> bool {
        self.price.is_finite() && !self.combined.is_empty()
    }

    pub fn stat(&self, category: Category) -> Option<&CategoryStat> {
        self.per_category.iter().find(|stat| stat.category == category)
    }

    /// Per-category price, `None` when the category had no rows.
    pub fn category_price(&self, category: Category) -> Option<f64> {
        self.stat(category).map(|stat| stat.price).filter(|price| price.is_finite())
    }

    /// Outcome of the primary pass, with sampling notes.
    pub fn outcome(&self, min_sample_target: usize) -> PricingOutcome {
        let mut notes = Notes::default();
        if !self.has_price() {
            notes.push(NO_DATA_NOTE);
            return PricingOutcome::no_data(notes);
        }

        let count = self.data_points_used();
        if count < min_sample_target {
            notes.push(format!("Only {count} data points found (target {min_sample_target})."));
        }

        let prices: Vec<f64> = self.combined.iter().map(|admitted| admitted.row.unit_price).collect();
        let std_dev = population_std(&prices);
        let coef_var = if self.price > 0.0 { std_dev / self.price } else { f64::NAN };

        PricingOutcome {
            price: self.price,
            source: self.source,
            data_points_used: count,
            std_dev,
            coef_var,
            notes,
        }
    }

    pub fn detail_record(&self) -> DetailRecord {
        let rows = self
            .combined
            .iter()
            .map(|admitted| DetailRow::from_observation(admitted.category.as_str(), &admitted.row))
            .collect();
        DetailRecord::with_rows(self.source.as_str(), rows)
    }
}

struct Walk {
    band_applied: Option<QuantityBand>,
    per_category: Vec<CategoryStat>,
    used_categories: Vec<Category>,
    combined: Vec<AdmittedRow>,
    result: AggregateResult,
}

pub struct CategoryAggregator<'a> {
    config: &'a PricingConfig,
}

impl<'a> CategoryAggregator<'a> {
    pub fn new(config: &'a PricingConfig) -> Self {
        Self { config }
    }

    pub fn breakdown(
        &self,
        pool: &BidPool,
        item_code: &str,
        context: &ProjectContext,
        target_quantity: Option<f64>,
    ) -> CategoryBreakdown {
        let rows = pool.for_item(item_code);
        let target = target_quantity.filter(|target| target.is_finite() && *target > 0.0);

        let mut walk = self.walk(&rows, context, target, QuantityBand::PRIMARY);
        let mut quantity_filter = None;

        if target.is_some() {
            let base_count = walk.combined.len();
            let needs_expansion = walk.band_applied.is_some()
                && base_count < self.config.quantity_filter_min_points;
            if needs_expansion {
                walk = self.walk(&rows, context, target, QuantityBand::EXPANDED);
                tracing::debug!(
                    event_name = "pricing.category.expanded",
                    item_code,
                    base_count,
                    expanded_count = walk.combined.len(),
                    "quantity band widened"
                );
            }
            quantity_filter = Some(QuantityFilterAudit {
                band: walk.band_applied,
                base_count,
                was_expanded: needs_expansion,
            });
        }

        let mut price = walk.result.price;
        let mut elasticity = None;
        if let Some(target) = target {
            if let Some(adjustment) =
                elasticity_adjustment(&self.config.quantity_elasticity, &walk.combined, target)
            {
                price *= adjustment.factor;
                elasticity = Some(adjustment);
            }
        }

        let source = match walk.used_categories.last() {
            Some(category) if walk.result.count > 0 => PricingSource::Category(*category),
            _ => PricingSource::NoData,
        };

        CategoryBreakdown {
            item_code: item_code.to_string(),
            price,
            source,
            per_category: walk.per_category,
            used_categories: walk.used_categories,
            combined: walk.combined,
            quantity_filter,
            elasticity,
        }
    }

    fn walk(
        &self,
        rows: &[&BidObservation],
        context: &ProjectContext,
        target: Option<f64>,
        band: QuantityBand,
    ) -> Walk {
        let banded = band.apply(rows, target);
        let band_applied = banded.as_ref().map(|_| band);
        let candidates: Vec<&BidObservation> = banded.unwrap_or_else(|| rows.to_vec());

        let mut per_category = Vec::with_capacity(Category::ALL.len());
        let mut windows = Vec::with_capacity(Category::ALL.len());
        for category in Category::ALL {
            let window =
                category_rows(&candidates, category, context, self.config.category_sigma_threshold);
            let result = self.aggregate_rows(&window);
            per_category.push(CategoryStat { category, price: result.price, count: result.count });
            windows.push((category, window));
        }

        let mut seen = SeenRows::default();
        let mut used_categories = Vec::new();
        let mut combined_rows: Vec<&BidObservation> = Vec::new();
        let mut combined = Vec::new();
        for (category, window) in &windows {
            let fresh = seen.admit(window);
            if fresh.is_empty() {
                continue;
            }
            used_categories.push(*category);
            combined.extend(
                fresh.iter().map(|row| AdmittedRow { category: *category, row: (*row).clone() }),
            );
            combined_rows.extend(fresh);
            if seen.len() >= self.config.min_sample_target {
                break;
            }
        }

        let result = self.aggregate_rows(&combined_rows);
        Walk { band_applied, per_category, used_categories, combined, result }
    }

    /// Weights come from the WEIGHT column when any row carries one; rows
    /// without a weight count as 1.
    fn aggregate_rows(&self, rows: &[&BidObservation]) -> AggregateResult {
        let prices: Vec<f64> = rows.iter().map(|row| row.unit_price).collect();
        let weights: Option<Vec<f64>> = rows
            .iter()
            .any(|row| row.weight.is_some())
            .then(|| rows.iter().map(|row| row.weight.unwrap_or(1.0)).collect());
        aggregate(self.config.aggregation, &prices, weights.as_deref())
    }
}

/// `(target / median_quantity)^slope` where `slope` is the clamped log-log
/// regression slope of price on quantity over the combined pool.
fn elasticity_adjustment(
    config: &ElasticityConfig,
    combined: &[AdmittedRow],
    target: f64,
) -> Option<ElasticityAdjustment> {
    if !config.enabled || combined.is_empty() {
        return None;
    }

    let pairs: Vec<(f64, f64)> = combined
        .iter()
        .filter_map(|admitted| admitted.row.quantity.map(|qty| (qty, admitted.row.unit_price)))
        .collect();
    if pairs.len() < config.min_points || pairs.iter().any(|(qty, price)| *qty <= 0.0 || *price <= 0.0)
    {
        return None;
    }

    let xs: Vec<f64> = pairs.iter().map(|(qty, _)| qty.ln()).collect();
    let ys: Vec<f64> = pairs.iter().map(|(_, price)| price.ln()).collect();
    let slope = least_squares_slope(&xs, &ys)?.clamp(-config.slope_bound, config.slope_bound);

    let quantities: Vec<f64> = pairs.iter().map(|(qty, _)| *qty).collect();
    let median_quantity = median(&quantities);
    if !(median_quantity > 0.0) {
        return None;
    }

    let factor = (target / median_quantity).powf(slope).clamp(config.factor_lower, config.factor_upper);
    factor.is_finite().then_some(ElasticityAdjustment {
        slope,
        median_quantity,
        factor,
        pairs: pairs.len(),
    })
}

fn least_squares_slope(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let n = xs.len() as f64;
    let x_mean = xs.iter().sum::<f64>() / n;
    let y_mean = ys.iter().sum::<f64>() / n;
    let covariance: f64 = xs.iter().zip(ys).map(|(x, y)| (x - x_mean) * (y - y_mean)).sum();
    let variance: f64 = xs.iter().map(|x| (x - x_mean).powi(2)).sum();
    let slope = covariance / variance;
    slope.is_finite().then_some(slope)
}
