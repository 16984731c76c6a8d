use std::path::PathBuf;

use bidprice_core::config::AppConfig;
use bidprice_core::{
    ApplicationError, BatchEstimate, DeterministicEstimateRuntime, EstimateInput, EstimateRuntime,
    NoAlternateSeek,
};
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::commands::bundle::EstimateBundle;
use crate::commands::CommandResult;

#[derive(Clone, Debug)]
pub struct EstimateArgs {
    pub input: PathBuf,
    /// Overrides the bundle's `as_of`; today when neither is set.
    pub as_of: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
struct EstimateReport<'a> {
    run_id: Uuid,
    as_of: NaiveDate,
    aggregation: &'static str,
    batch: &'a BatchEstimate,
}

pub fn run(config: &AppConfig, args: &EstimateArgs) -> CommandResult {
    match price_bundle(config, args) {
        Ok(result) => result,
        Err(error) => CommandResult::from_error("estimate", &error),
    }
}

fn price_bundle(config: &AppConfig, args: &EstimateArgs) -> Result<CommandResult, ApplicationError> {
    let bundle = EstimateBundle::load(&args.input)?;
    let tables = bundle.reference_tables()?;
    let pool = bundle.bid_pool();
    let as_of = args.as_of.or(bundle.as_of).unwrap_or_else(|| Utc::now().date_naive());
    let run_id = Uuid::new_v4();

    tracing::info!(
        event_name = "cli.estimate.started",
        run_id = %run_id,
        items = bundle.items.len(),
        bid_rows = pool.len(),
        as_of = %as_of,
        "pricing estimate bundle"
    );

    let runtime =
        DeterministicEstimateRuntime::new(config.pricing.clone(), tables, NoAlternateSeek);
    let batch = runtime.estimate(EstimateInput {
        items: &bundle.items,
        pool: &pool,
        project: &config.project,
        as_of,
    });

    let no_data = batch.source_counts.get("NO_DATA").copied().unwrap_or_default();
    let report = EstimateReport {
        run_id,
        as_of,
        aggregation: config.pricing.aggregation.as_str(),
        batch: &batch,
    };
    let data = serde_json::to_value(&report)
        .map_err(|error| ApplicationError::Input(format!("could not render report: {error}")))?;

    Ok(CommandResult::success(
        "estimate",
        format!(
            "priced {} items ({} without data), subtotal {}",
            batch.lines.len(),
            no_data,
            batch.subtotal
        ),
        Some(data),
    ))
}
