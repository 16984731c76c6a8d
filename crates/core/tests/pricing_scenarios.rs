use std::collections::BTreeSet;

use chrono::NaiveDate;

use bidprice_core::config::PricingConfig;
use bidprice_core::domain::bid::{BidObservation, BidPool};
use bidprice_core::domain::crosswalk::{CrosswalkTable, RawCrosswalkRow};
use bidprice_core::domain::item::{PayItem, ProjectContext};
use bidprice_core::domain::memo::{
    DesignMemoMapping, DesignMemoTable, MemoGuidanceTable, MemoPriceGuidance,
};
use bidprice_core::domain::outcome::{Notes, PricingOutcome, PricingSource};
use bidprice_core::domain::summary::{UnitPriceSummaryEntry, UnitPriceSummaryTable};
use bidprice_core::pricing::aggregate::AggregationMode;
use bidprice_core::pricing::band::QuantityBand;
use bidprice_core::pricing::cascade::FallbackCascade;
use bidprice_core::pricing::category::{CategoryAggregator, NO_DATA_NOTE};
use bidprice_core::pricing::factors::{
    BatchFactors, FactorInputs, QuantityStep, COMBINED_RANGE, RECENCY_RANGE, REGION_RANGE,
};
use bidprice_core::pricing::summary::summary_price;
use bidprice_core::pricing::window::{sigma_trim, Category};
use bidprice_core::pricing::ReferenceTables;
use bidprice_core::{
    maybe_apply_dm2321_adder, remap_item, DeterministicEstimateRuntime, EstimateInput,
    EstimateRuntime, NoAlternateSeek, ProjectConfig,
};

const REPLACEMENT: &str = "401-11526";

fn as_of() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 30).expect("valid date")
}

fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
}

fn dm_25_10() -> DesignMemoMapping {
    DesignMemoMapping::new("25-10", "2025-04-16", REPLACEMENT, ["401-10258", "401-10259"])
        .expect("valid mapping")
}

#[test]
fn scenario_a_unweighted_pool_falls_back_to_the_mean() {
    let pool = BidPool::from_observations(vec![
        BidObservation::new("203-20000", 90.0),
        BidObservation::new("203-20000", 95.0),
        BidObservation::new("203-20000", 110.0),
    ]);
    let config = PricingConfig {
        aggregation: AggregationMode::WgtAvg,
        category_sigma_threshold: 2.0,
        ..PricingConfig::default()
    };
    let context = ProjectContext::new(None, as_of());

    let breakdown = CategoryAggregator::new(&config).breakdown(&pool, "203-20000", &context, None);

    assert_eq!(breakdown.data_points_used(), 3);
    assert!((breakdown.price - 295.0 / 3.0).abs() < 1e-9);
    assert_eq!(breakdown.source, PricingSource::Category(Category::State12M));
    assert!(breakdown.quantity_filter.is_none());
}

#[test]
fn default_configuration_prices_by_weighted_average() {
    let pool = BidPool::from_observations(vec![
        BidObservation::new("203-20000", 90.0),
        BidObservation::new("203-20000", 95.0),
        BidObservation::new("203-20000", 110.0),
    ]);
    let config = PricingConfig::default();
    assert_eq!(config.aggregation, AggregationMode::WgtAvg);

    let breakdown = CategoryAggregator::new(&config).breakdown(
        &pool,
        "203-20000",
        &ProjectContext::new(None, as_of()),
        None,
    );

    assert!((breakdown.price - 295.0 / 3.0).abs() < 1e-9);
}

#[test]
fn scenario_b_summary_fallback_with_neutral_factors() {
    let entry = UnitPriceSummaryEntry {
        item_code: "203-20000".to_string(),
        year: 2024,
        weighted_average: 150.0,
        contracts: 12,
        total_value: 0.0,
        lowest: 120.0,
        highest: 210.0,
    };

    let priced = summary_price(&entry, &BatchFactors::default(), None).expect("eligible entry");

    assert_eq!(priced.price, 150.0);
    assert_eq!(priced.data_points_used(), 12);
    assert!(!priced.clamp_applied);
}

#[test]
fn scenario_c_rollup_applies_the_quantity_step() {
    let pool = BidPool::from_observations(vec![
        BidObservation::new("401-10258", 90.0).with_quantity(100.0),
        BidObservation::new("401-10258", 95.0).with_quantity(100.0),
        BidObservation::new("401-10259", 110.0).with_quantity(100.0),
    ]);
    let tables = ReferenceTables {
        memo_mappings: DesignMemoTable::new(vec![dm_25_10()]).expect("valid table"),
        ..ReferenceTables::default()
    };
    let config = PricingConfig::default();
    let factors = BatchFactors::default();
    let context = ProjectContext::new(None, as_of());
    let primary = PricingOutcome::no_data(Notes::default().with(NO_DATA_NOTE));

    let resolution = FallbackCascade::new(&config, &tables, &factors, &pool, &context).resolve(
        REPLACEMENT,
        Some(200.0),
        &primary,
    );

    let outcome = resolution.outcome;
    assert_eq!(outcome.source, PricingSource::DesignMemoRollup);
    assert_eq!(outcome.data_points_used, 3);
    assert!((outcome.price - 295.0 / 3.0 * 0.95).abs() < 1e-9);
    assert!(outcome.notes.contains("quantity adj=-5%"));
    assert!(outcome
        .notes
        .contains("DESIGN_MEMO_ROLLUP:401-11526[w=QUANTITY]<-401-10258+401-10259"));
}

#[test]
fn scenario_d_deleted_crosswalk_rows_drop_the_item() {
    let crosswalk = CrosswalkTable::new(vec![RawCrosswalkRow {
        old_pay_item: "X".to_string(),
        new_pay_item: None,
        status: "DELETED".to_string(),
        ..RawCrosswalkRow::default()
    }])
    .expect("valid crosswalk");

    let (code, metadata) = remap_item("X", &crosswalk);

    assert_eq!(code, None);
    assert!(metadata.deleted);
}

#[test]
fn scenario_e_adder_requires_missing_history() {
    assert_eq!(maybe_apply_dm2321_adder(Some("Surface"), 95.0, true, false), (98.0, true));
    assert_eq!(maybe_apply_dm2321_adder(Some("Surface"), 95.0, true, true), (95.0, false));
}

#[test]
fn expanded_band_never_admits_fewer_rows() {
    let observations: Vec<BidObservation> = (1..=40)
        .map(|step| BidObservation::new("203-20000", 50.0).with_quantity(f64::from(step) * 12.5))
        .collect();
    let pool = BidPool::from_observations(observations);
    let rows = pool.for_item("203-20000");

    for target in [10.0, 50.0, 120.0, 200.0, 333.0, 500.0, 1_000.0] {
        let primary = QuantityBand::PRIMARY.apply(&rows, Some(target)).expect("band applies");
        let expanded = QuantityBand::EXPANDED.apply(&rows, Some(target)).expect("band applies");
        assert!(expanded.len() >= primary.len(), "target {target}");
    }
}

#[test]
fn sigma_trim_reaches_a_fixed_point() {
    let mut observations: Vec<BidObservation> =
        (0..12).map(|i| BidObservation::new("203-20000", 100.0 + f64::from(i))).collect();
    observations.push(BidObservation::new("203-20000", 400.0));
    observations.push(BidObservation::new("203-20000", 2_000.0));
    let pool = BidPool::from_observations(observations);

    let once = sigma_trim(pool.for_item("203-20000"), 2.0, 3);
    let twice = sigma_trim(once.clone(), 2.0, 3);

    assert_eq!(once.len(), 12);
    assert_eq!(once, twice);
}

#[test]
fn overlapping_windows_never_admit_a_row_twice() {
    let observations: Vec<BidObservation> = (0..30)
        .map(|i| {
            let month = 1 + (i % 12) as u32;
            let year = if i < 15 { 2025 } else { 2023 };
            let row = BidObservation::new("203-20000", 80.0 + f64::from(i))
                .with_letting_date(date(year, month.min(6), 1));
            if i % 2 == 0 {
                row.with_region(3)
            } else {
                row.with_region(5)
            }
        })
        .collect();
    let pool = BidPool::from_observations(observations);
    let config = PricingConfig::default();
    let context = ProjectContext::new(Some(3), as_of());

    let breakdown = CategoryAggregator::new(&config).breakdown(&pool, "203-20000", &context, None);

    let ids: BTreeSet<_> = breakdown.combined.iter().map(|admitted| admitted.row.row_id).collect();
    assert_eq!(ids.len(), breakdown.combined.len());
    assert_eq!(breakdown.used_categories.first(), Some(&Category::Dist12M));
    let dist = breakdown.stat(Category::Dist12M).map(|stat| stat.count).unwrap_or_default();
    let state = breakdown.stat(Category::State12M).map(|stat| stat.count).unwrap_or_default();
    assert!(state > dist);
}

#[test]
fn adjustment_factors_stay_clamped_for_extreme_batches() {
    let extremes = [0.01, 0.5, 1.0, 3.0, 1_000.0];
    for low in extremes {
        for high in extremes {
            let inputs = vec![FactorInputs {
                dist_12m: Some(low),
                state_12m: Some(high),
                state_24m: Some(low),
                state_36m: Some(high * 2.0),
            }];
            let factors = BatchFactors::from_inputs(&inputs);
            let recency = factors.recency.value;
            let region = factors.region.value;
            assert!((RECENCY_RANGE.0..=RECENCY_RANGE.1).contains(&recency));
            assert!((REGION_RANGE.0..=REGION_RANGE.1).contains(&region));

            let steps =
                [QuantityStep::from_quantities(Some(500.0), Some(10.0)), QuantityStep::NEUTRAL];
            for step in steps {
                let combined = factors.combine(step).value;
                assert!((COMBINED_RANGE.0..=COMBINED_RANGE.1).contains(&combined));
            }
        }
    }
}

#[test]
fn confident_memo_price_outranks_a_usable_rollup() {
    let guidance = MemoPriceGuidance {
        memo_id: "25-10".to_string(),
        price: 120.0,
        unit: Some("TON".to_string()),
        context: String::new(),
        effective_date: None,
        confidence: 0.7,
    };
    let tables = ReferenceTables {
        memo_mappings: DesignMemoTable::new(vec![dm_25_10()]).expect("valid table"),
        memo_guidance: MemoGuidanceTable::default().with_override(REPLACEMENT, guidance),
        ..ReferenceTables::default()
    };
    let pool = BidPool::from_observations(vec![
        BidObservation::new("401-10258", 90.0),
        BidObservation::new("401-10259", 110.0),
    ]);
    let items = vec![PayItem::new(REPLACEMENT, 10.0)];
    let runtime =
        DeterministicEstimateRuntime::new(PricingConfig::default(), tables, NoAlternateSeek);

    let batch = runtime.estimate(EstimateInput {
        items: &items,
        pool: &pool,
        project: &ProjectConfig::default(),
        as_of: as_of(),
    });

    let line = batch.line(REPLACEMENT).expect("line present");
    assert_eq!(line.source, PricingSource::DesignMemoPrice);
    assert_eq!(line.data_points_used, 0);
    assert!(batch.audit.get(REPLACEMENT).and_then(|detail| detail.memo.as_ref()).is_some());
}

#[test]
fn batch_factors_come_from_the_complete_primary_pass() {
    let mut observations = Vec::new();
    for code in ["A-1", "B-2"] {
        observations.push(BidObservation::new(code, 110.0).with_letting_date(date(2025, 3, 1)));
        observations.push(BidObservation::new(code, 100.0).with_letting_date(date(2024, 3, 1)));
    }
    let pool = BidPool::from_observations(observations);
    let tables = ReferenceTables {
        summaries: UnitPriceSummaryTable::new(vec![
            UnitPriceSummaryEntry {
                item_code: "C-3".to_string(),
                year: 2024,
                weighted_average: 100.0,
                contracts: 5,
                total_value: 0.0,
                lowest: 0.0,
                highest: 0.0,
            },
        ]),
        ..ReferenceTables::default()
    };
    let runtime =
        DeterministicEstimateRuntime::new(PricingConfig::default(), tables, NoAlternateSeek);
    let project = ProjectConfig::default();

    let forward =
        vec![PayItem::new("C-3", 1.0), PayItem::new("A-1", 1.0), PayItem::new("B-2", 1.0)];
    let reversed: Vec<PayItem> = forward.iter().rev().cloned().collect();
    let run = |items: &[PayItem]| {
        runtime.estimate(EstimateInput { items, pool: &pool, project: &project, as_of: as_of() })
    };
    let first = run(&forward);
    let second = run(&reversed);

    assert!((first.factors.recency.value - 1.1).abs() < 1e-9);
    assert_eq!(first.factors, second.factors);
    let summary_line = first.line("C-3").expect("summary line");
    assert_eq!(summary_line.source, PricingSource::UnitPriceSummary);
    assert_eq!(
        summary_line.unit_price_est,
        second.line("C-3").and_then(|line| line.unit_price_est)
    );
    assert!(summary_line.notes.contains("recency=+10.0%"));
}
