//! Batch runtime: turns a project's pay-item list into priced estimate lines.
//!
//! The batch runs in three passes. The primary category walk prices every
//! item first, the batch adjustment factors are then derived from that
//! complete pass, and only after that does the fallback cascade run for the
//! items the walk left without data.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use crate::audit::AuditTrail;
use crate::config::{PricingConfig, ProjectConfig};
use crate::domain::bid::{BidPool, ContractSizeBounds};
use crate::domain::item::{PayItem, ProjectContext};
use crate::domain::outcome::{Notes, PricingOutcome, PricingSource};
use crate::pricing::cascade::FallbackCascade;
use crate::pricing::category::{CategoryAggregator, CategoryBreakdown, QuantityFilterAudit};
use crate::pricing::factors::{BatchFactors, FactorInputs};
use crate::pricing::remap::{
    maybe_apply_dm2321_adder, remap_item, RemapMetadata, DM_23_21_RULE,
};
use crate::pricing::window::Category;
use crate::pricing::ReferenceTables;

/// Price reported by the geometry matcher for an item the walk missed.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AlternateMatch {
    pub price: f64,
    pub data_points_used: usize,
    pub note: Option<String>,
}

/// Opaque geometry-based matcher consulted for items with no primary data.
pub trait AlternateSeek: Send + Sync {
    fn seek(&self, item: &PayItem, pool: &BidPool, context: &ProjectContext)
        -> Option<AlternateMatch>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoAlternateSeek;

impl AlternateSeek for NoAlternateSeek {
    fn seek(&self, _: &PayItem, _: &BidPool, _: &ProjectContext) -> Option<AlternateMatch> {
        None
    }
}

#[derive(Clone, Debug)]
pub struct EstimateInput<'a> {
    pub items: &'a [PayItem],
    pub pool: &'a BidPool,
    pub project: &'a ProjectConfig,
    pub as_of: NaiveDate,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EstimateLine {
    pub item_code: String,
    pub description: String,
    pub unit: String,
    pub quantity: f64,
    /// Stand-alone price of every category that had rows.
    pub category_prices: BTreeMap<Category, f64>,
    pub unit_price_est: Option<Decimal>,
    pub extended_amount: Option<Decimal>,
    pub source: PricingSource,
    pub data_points_used: usize,
    pub std_dev: f64,
    pub coef_var: f64,
    pub notes: String,
    pub quantity_filter: Option<QuantityFilterAudit>,
    pub remap: Option<RemapMetadata>,
    pub adder_applied: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BatchEstimate {
    pub lines: Vec<EstimateLine>,
    pub audit: AuditTrail,
    pub factors: BatchFactors,
    pub dropped: Vec<RemapMetadata>,
    pub source_counts: BTreeMap<String, usize>,
    pub subtotal: Decimal,
    pub contract_filter: Option<ContractSizeBounds>,
    pub rejected_rows: usize,
}

impl BatchEstimate {
    pub fn line(&self, item_code: &str) -> Option<&EstimateLine> {
        self.lines.iter().find(|line| line.item_code == item_code)
    }
}

pub trait EstimateRuntime: Send + Sync {
    fn estimate(&self, input: EstimateInput<'_>) -> BatchEstimate;
}

pub struct DeterministicEstimateRuntime<A> {
    config: PricingConfig,
    tables: ReferenceTables,
    alternate: A,
}

impl<A> DeterministicEstimateRuntime<A> {
    pub fn new(config: PricingConfig, tables: ReferenceTables, alternate: A) -> Self {
        Self { config, tables, alternate }
    }

    pub fn config(&self) -> &PricingConfig {
        &self.config
    }
}

impl Default for DeterministicEstimateRuntime<NoAlternateSeek> {
    fn default() -> Self {
        Self::new(PricingConfig::default(), ReferenceTables::builtin(), NoAlternateSeek)
    }
}

/// One item between the passes.
struct PendingLine<'i> {
    item: &'i PayItem,
    code: String,
    target: Option<f64>,
    remap: Option<RemapMetadata>,
    breakdown: CategoryBreakdown,
    outcome: PricingOutcome,
    adder_applied: bool,
}

impl<A: AlternateSeek> EstimateRuntime for DeterministicEstimateRuntime<A> {
    fn estimate(&self, input: EstimateInput<'_>) -> BatchEstimate {
        let context = ProjectContext::new(input.project.region, input.as_of);

        let (pool, contract_filter) = match input.project.expected_contract_cost {
            Some(cost) => input.pool.filter_contract_size(cost, input.project.contract_filter_pct),
            None => (input.pool.clone(), None),
        };
        if let Some(bounds) = &contract_filter {
            tracing::info!(
                event_name = "pricing.contract_filter.applied",
                lower = bounds.lower,
                upper = bounds.upper,
                rows_before = bounds.rows_before,
                rows_after = bounds.rows_after,
                "bid pool restricted to similar contract sizes"
            );
        }

        let pool = if self.config.apply_dm23_21 {
            let (remapped, deleted_rows) = pool.remap(&self.tables.crosswalk);
            tracing::info!(
                event_name = "pricing.remap.pool",
                rows = remapped.len(),
                deleted_rows,
                "bid history re-keyed through the legacy crosswalk"
            );
            remapped
        } else {
            pool
        };

        let aggregator = CategoryAggregator::new(&self.config);
        let mut dropped = Vec::new();
        let mut pending = Vec::with_capacity(input.items.len());

        for item in input.items {
            let Some((code, target, remap)) = self.resolve_code(item) else {
                continue;
            };
            if let Some(metadata) = remap.as_ref().filter(|metadata| metadata.deleted) {
                dropped.push(metadata.clone());
                continue;
            }

            let breakdown = aggregator.breakdown(&pool, &code, &context, target);
            let mut outcome = breakdown.outcome(self.config.min_sample_target);
            let adder_applied = self.apply_adder(remap.as_ref(), &mut outcome);

            if self.config.alternate_seek && outcome.data_points_used == 0 {
                if let Some(found) = self.alternate.seek(item, &pool, &context) {
                    if found.price.is_finite() && found.price > 0.0 {
                        outcome = alternate_outcome(found);
                    }
                }
            }

            pending.push(PendingLine { item, code, target, remap, breakdown, outcome, adder_applied });
        }

        let inputs: Vec<FactorInputs> =
            pending.iter().map(|line| factor_inputs(&line.breakdown)).collect();
        let factors = BatchFactors::from_inputs(&inputs);
        tracing::info!(
            event_name = "pricing.factors.computed",
            recency = factors.recency.value,
            recency_samples = factors.recency.sample_count,
            region = factors.region.value,
            region_samples = factors.region.sample_count,
            "batch adjustment factors computed"
        );

        let cascade = FallbackCascade::new(&self.config, &self.tables, &factors, &pool, &context);
        let mut audit = AuditTrail::default();
        let mut lines = Vec::with_capacity(pending.len());

        for mut line in pending {
            let needs_fallback = line.outcome.data_points_used == 0
                && line.outcome.source != PricingSource::GeometryAlternate;
            if needs_fallback {
                let resolution = cascade.resolve(&line.code, line.target, &line.outcome);
                if let Some(detail) = resolution.detail {
                    audit.record(line.code.clone(), detail);
                }
                line.outcome = resolution.outcome;
            } else if line.breakdown.has_price() {
                audit.record(line.code.clone(), line.breakdown.detail_record());
            }
            lines.push(estimate_line(line));
        }

        let mut source_counts = BTreeMap::new();
        for line in &lines {
            *source_counts.entry(line.source.as_str().to_string()).or_insert(0) += 1;
        }
        let subtotal = lines.iter().filter_map(|line| line.extended_amount).sum::<Decimal>();

        tracing::info!(
            event_name = "pricing.batch.completed",
            items = lines.len(),
            dropped = dropped.len(),
            subtotal = %subtotal,
            "estimate batch priced"
        );

        BatchEstimate {
            lines,
            audit,
            factors,
            dropped,
            source_counts,
            subtotal,
            contract_filter,
            rejected_rows: pool.rejected_count(),
        }
    }
}

impl<A> DeterministicEstimateRuntime<A> {
    /// Code to price under, its quantity target, and any legacy remap.
    /// Deleted items come back with `deleted` metadata for the caller to drop.
    fn resolve_code(&self, item: &PayItem) -> Option<(String, Option<f64>, Option<RemapMetadata>)> {
        let code = item.normalized_code();
        if code.is_empty() {
            return None;
        }
        if !self.config.apply_dm23_21 {
            return Some((code, item.target_quantity(), None));
        }

        let (mapped, metadata) = remap_item(&code, &self.tables.crosswalk);
        match mapped {
            None => {
                tracing::info!(
                    event_name = "pricing.remap.deleted",
                    item_code = %code,
                    "legacy item deleted by crosswalk"
                );
                Some((code, None, Some(metadata)))
            }
            Some(new_code) if metadata.is_remapped() => {
                tracing::debug!(
                    event_name = "pricing.remap.mapped",
                    item_code = %code,
                    mapped_item = %new_code,
                    "legacy item priced under its replacement"
                );
                Some((new_code, None, Some(metadata)))
            }
            Some(new_code) => {
                // Items already on a successor code share the remapped
                // items' course metadata and skip the quantity band like them.
                match self.tables.crosswalk.find_by_new(&new_code) {
                    Some(row) => {
                        let inherited = RemapMetadata {
                            mapping_rule: Some(DM_23_21_RULE.to_string()),
                            course: row.course.clone(),
                            esal_cat: row.esal_cat.clone(),
                            binder_class: row.binder_class.clone(),
                            ..RemapMetadata::default()
                        };
                        Some((new_code, None, Some(inherited)))
                    }
                    None => Some((new_code, item.target_quantity(), None)),
                }
            }
        }
    }

    fn apply_adder(&self, remap: Option<&RemapMetadata>, outcome: &mut PricingOutcome) -> bool {
        if !outcome.has_price() {
            return false;
        }
        let Some(course) = remap.and_then(|metadata| metadata.course.as_deref()) else {
            return false;
        };
        let sufficient_history = outcome.data_points_used >= self.config.min_sample_target;
        let (price, applied) = maybe_apply_dm2321_adder(
            Some(course),
            outcome.price,
            self.config.apply_dm23_21,
            sufficient_history,
        );
        if applied {
            outcome.notes.push(format!(
                "DM 23-21 {course} adder applied (+{:.2}/ton)",
                price - outcome.price
            ));
            outcome.price = price;
        }
        applied
    }
}

fn alternate_outcome(found: AlternateMatch) -> PricingOutcome {
    let mut notes = Notes::default();
    if let Some(note) = found.note {
        notes.push(note);
    }
    PricingOutcome {
        price: found.price,
        source: PricingSource::GeometryAlternate,
        data_points_used: found.data_points_used,
        std_dev: f64::NAN,
        coef_var: f64::NAN,
        notes,
    }
}

fn factor_inputs(breakdown: &CategoryBreakdown) -> FactorInputs {
    FactorInputs {
        dist_12m: breakdown.category_price(Category::Dist12M),
        state_12m: breakdown.category_price(Category::State12M),
        state_24m: breakdown.category_price(Category::State24M),
        state_36m: breakdown.category_price(Category::State36M),
    }
}

fn estimate_line(line: PendingLine<'_>) -> EstimateLine {
    let PendingLine { item, code, remap, breakdown, outcome, adder_applied, .. } = line;

    let unit_price_est = if !outcome.has_price() {
        None
    } else if outcome.source == PricingSource::DesignMemoPrice {
        round_cents(outcome.price)
    } else {
        round_unit_price(outcome.price)
    };
    let extended_amount = unit_price_est.and_then(|price| {
        let quantity = Decimal::from_f64_retain(item.quantity)?;
        Some((quantity * price).round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven))
    });

    let category_prices = breakdown
        .per_category
        .iter()
        .filter(|stat| stat.count > 0 && stat.price.is_finite())
        .map(|stat| (stat.category, stat.price))
        .collect();

    EstimateLine {
        item_code: code,
        description: item.description.clone(),
        unit: item.unit.clone(),
        quantity: item.quantity,
        category_prices,
        unit_price_est,
        extended_amount,
        source: outcome.source,
        data_points_used: outcome.data_points_used,
        std_dev: outcome.std_dev,
        coef_var: outcome.coef_var,
        notes: outcome.notes.render(),
        quantity_filter: breakdown.quantity_filter,
        remap,
        adder_applied,
    }
}

/// Rounds to two significant steps: values under 1 to cents, otherwise to
/// `10^max(floor(log10 v) - 1, -1)`, ties to even.
pub fn round_unit_price(value: f64) -> Option<Decimal> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    let decimal = Decimal::from_f64_retain(value)?;
    if value < 1.0 {
        return Some(decimal.round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven));
    }

    let exponent = (value.log10().floor() as i32 - 1).max(-1);
    let stepped = if exponent < 0 {
        decimal.round_dp_with_strategy(1, RoundingStrategy::MidpointNearestEven)
    } else {
        let step = (0..exponent).fold(Decimal::ONE, |step, _| step * Decimal::TEN);
        (decimal / step).round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven) * step
    };
    Some(stepped.round_dp(2).normalize())
}

pub fn round_cents(value: f64) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    Decimal::from_f64_retain(value)
        .map(|decimal| decimal.round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven))
}
