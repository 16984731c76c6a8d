//! Non-geometry fallbacks for items the category walk could not price.
//!
//! Tiers run in a fixed order and the first success wins: design-memo price
//! guidance, design-memo rollup, unit-price summary. Every tier that falls
//! through leaves a note so the final outcome explains itself.

use crate::audit::{DetailRecord, DetailRow, MemoSnapshot};
use crate::config::PricingConfig;
use crate::domain::bid::{normalize_item_code, BidPool};
use crate::domain::item::ProjectContext;
use crate::domain::memo::{DesignMemoMapping, MemoPriceGuidance};
use crate::domain::outcome::{Notes, PricingOutcome, PricingSource};
use crate::pricing::category::NO_DATA_NOTE;
use crate::pricing::factors::{BatchFactors, QuantityStep, CAPPED_NOTE};
use crate::pricing::rollup::{DesignMemoRollup, RollupResult};
use crate::pricing::summary::summary_price;
use crate::pricing::ReferenceTables;

const MEMO_CONTEXT_LIMIT: usize = 180;
const MEMO_CONTEXT_KEEP: usize = 177;
pub const BOUNDED_NOTE: &str = "bounded to pooled range";

/// Outcome of the cascade for one item plus the evidence for the audit
/// trail. `detail` is `None` only in the no-data terminal state.
#[derive(Clone, Debug, PartialEq)]
pub struct CascadeResolution {
    pub outcome: PricingOutcome,
    pub detail: Option<DetailRecord>,
}

impl CascadeResolution {
    pub fn is_resolved(&self) -> bool {
        self.outcome.source != PricingSource::NoData
    }
}

pub struct FallbackCascade<'a> {
    config: &'a PricingConfig,
    tables: &'a ReferenceTables,
    factors: &'a BatchFactors,
    pool: &'a BidPool,
    context: &'a ProjectContext,
}

impl<'a> FallbackCascade<'a> {
    pub fn new(
        config: &'a PricingConfig,
        tables: &'a ReferenceTables,
        factors: &'a BatchFactors,
        pool: &'a BidPool,
        context: &'a ProjectContext,
    ) -> Self {
        Self { config, tables, factors, pool, context }
    }

    /// Runs the tiers for an item whose primary pass produced `primary`.
    pub fn resolve(
        &self,
        item_code: &str,
        target_quantity: Option<f64>,
        primary: &PricingOutcome,
    ) -> CascadeResolution {
        let code = normalize_item_code(item_code);
        let target = target_quantity.filter(|target| target.is_finite() && *target > 0.0);

        let mut notes = Notes::default();
        for part in primary.notes.parts() {
            if !part.to_ascii_uppercase().starts_with("NO DATA") {
                notes.push(part.clone());
            }
        }

        if let Some(guidance) = self.tables.memo_guidance.lookup(&code) {
            if guidance.confidence >= self.config.memo_price_min_confidence && guidance.price > 0.0 {
                return self.finish(&code, memo_resolution(guidance, notes));
            }
            notes.push(format!(
                "Memo guidance found (DM {}) at low confidence={:.2}; not applied.",
                guidance.memo_id, guidance.confidence
            ));
        }

        let summary_entry = self.tables.summaries.get(&code);
        let summary_reason = summary_entry
            .map(|entry| entry.insufficiency_reasons().join(", "))
            .filter(|reason| !reason.is_empty());

        let mut rollup_failure = None;
        if let Some(mapping) = self.tables.memo_mappings.get(&code) {
            let result = DesignMemoRollup::new(self.config).price(
                self.pool,
                mapping,
                self.context,
                target,
            );
            if result.is_usable() {
                let resolution =
                    self.rollup_resolution(&code, mapping, &result, target, summary_reason, notes);
                return self.finish(&code, resolution);
            }
            rollup_failure = Some(format!(
                "Design memo {} pooling insufficient ({}); review manually.",
                mapping.memo_id,
                mapping.joined_codes()
            ));
        }

        if let Some(priced) = summary_entry.and_then(|entry| summary_price(entry, self.factors, target))
        {
            let mut parts: Vec<String> = rollup_failure.into_iter().collect();
            parts.extend(priced.notes(self.factors));
            notes.push(parts.join("; "));

            let outcome = PricingOutcome {
                price: priced.price,
                source: PricingSource::UnitPriceSummary,
                data_points_used: priced.data_points_used(),
                std_dev: f64::NAN,
                coef_var: f64::NAN,
                notes,
            };
            let detail = DetailRecord::for_summary(
                PricingSource::UnitPriceSummary.as_str(),
                priced.snapshot(),
            );
            return self.finish(&code, CascadeResolution { outcome, detail: Some(detail) });
        }

        let mut terminal = Notes::default();
        for part in primary.notes.parts() {
            if part.eq_ignore_ascii_case(NO_DATA_NOTE) {
                terminal.push(part.clone());
            }
        }
        for part in notes.parts() {
            terminal.push(part.clone());
        }

        let summary_detail = match (&summary_reason, summary_entry) {
            (Some(reason), _) => Some(format!("Unit Price Summary insufficient ({reason})")),
            (None, None) => Some("Unit Price Summary unavailable".to_string()),
            (None, Some(_)) => None,
        };
        let failure: Vec<String> = summary_detail.into_iter().chain(rollup_failure).collect();
        if !failure.is_empty() {
            let mut joined = failure.join("; ");
            if !joined.ends_with('.') {
                joined.push('.');
            }
            terminal.push(joined);
        }

        tracing::debug!(
            event_name = "pricing.cascade.exhausted",
            item_code = %code,
            "no fallback tier could price the item"
        );
        CascadeResolution { outcome: PricingOutcome::no_data(terminal), detail: None }
    }

    fn rollup_resolution(
        &self,
        code: &str,
        mapping: &DesignMemoMapping,
        result: &RollupResult,
        target: Option<f64>,
        summary_reason: Option<String>,
        mut notes: Notes,
    ) -> CascadeResolution {
        let base = result.price;
        let quantity = QuantityStep::from_quantities(target, result.median_quantity());
        let combined = self.factors.combine(quantity);

        let mut price = base * combined.value;
        let mut bounded = false;
        if let Some((lower, upper)) = result.price_bounds() {
            if lower > 0.0 && price < lower {
                price = lower;
                bounded = true;
            }
            if upper > 0.0 && price > upper {
                price = upper;
                bounded = true;
            }
        }

        let std_dev = result.std_dev();
        let coef_var = std_dev / base;

        let mut parts = vec![
            format!(
                "DESIGN_MEMO_ROLLUP DM {} ({}): {} -> {code}",
                mapping.memo_id,
                mapping.effective_date,
                mapping.joined_codes()
            ),
            format!("pooled obs={}", result.count),
            result.label.clone(),
        ];
        parts.extend(self.factors.notes());
        parts.extend(quantity.note().map(str::to_string));
        if combined.capped {
            parts.push(CAPPED_NOTE.to_string());
        }
        if bounded {
            parts.push(BOUNDED_NOTE.to_string());
        }
        if let Some(reason) = summary_reason {
            parts.push(format!("summary insufficient ({reason})"));
        }
        notes.push(parts.join("; "));

        let rows = result
            .rows
            .iter()
            .map(|row| DetailRow::from_observation(PricingSource::DesignMemoRollup.as_str(), row))
            .collect();
        let detail = DetailRecord::with_rows(PricingSource::DesignMemoRollup.as_str(), rows)
            .with_metadata("memo_id", mapping.memo_id.clone())
            .with_metadata("source_label", result.label.clone())
            .with_metadata("quantity_relaxed", result.relaxed.to_string());

        CascadeResolution {
            outcome: PricingOutcome {
                price,
                source: PricingSource::DesignMemoRollup,
                data_points_used: result.count,
                std_dev,
                coef_var,
                notes,
            },
            detail: Some(detail),
        }
    }

    fn finish(&self, code: &str, resolution: CascadeResolution) -> CascadeResolution {
        tracing::info!(
            event_name = "pricing.cascade.resolved",
            item_code = %code,
            source = %resolution.outcome.source,
            data_points_used = resolution.outcome.data_points_used,
            "fallback priced item"
        );
        resolution
    }
}

fn memo_resolution(guidance: MemoPriceGuidance, mut notes: Notes) -> CascadeResolution {
    let mut label = format!("DESIGN_MEMO_PRICE DM {}", guidance.memo_id);
    if let Some(effective) = guidance.effective_date.as_deref().filter(|date| !date.is_empty()) {
        label.push_str(&format!(" (effective {effective})"));
    }
    let mut price_label = format!("recommended ${}", format_thousands(guidance.price));
    if let Some(unit) = guidance.unit.as_deref().filter(|unit| !unit.is_empty()) {
        price_label.push_str(&format!(" per {unit}"));
    }

    let mut parts = vec![label, price_label];
    let context = truncate_context(guidance.context.trim());
    if !context.is_empty() {
        parts.push(context);
    }
    notes.push(parts.join("; "));

    let detail =
        DetailRecord::for_memo(PricingSource::DesignMemoPrice.as_str(), MemoSnapshot::from(&guidance));
    CascadeResolution {
        outcome: PricingOutcome {
            price: guidance.price,
            source: PricingSource::DesignMemoPrice,
            data_points_used: 0,
            std_dev: f64::NAN,
            coef_var: f64::NAN,
            notes,
        },
        detail: Some(detail),
    }
}

fn truncate_context(context: &str) -> String {
    if context.chars().count() <= MEMO_CONTEXT_LIMIT {
        return context.to_string();
    }
    let kept: String = context.chars().take(MEMO_CONTEXT_KEEP).collect();
    format!("{}...", kept.trim_end())
}

/// `1234.5` -> `1,234.50`.
fn format_thousands(value: f64) -> String {
    let fixed = format!("{:.2}", value.abs());
    let (whole, cents) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (index, digit) in whole.chars().enumerate() {
        if index > 0 && (whole.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    let sign = if value < 0.0 { "-" } else { "" };
    format!("{sign}{grouped}.{cents}")
}
