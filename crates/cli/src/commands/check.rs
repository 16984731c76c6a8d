use std::path::Path;

use serde_json::json;

use crate::commands::bundle::EstimateBundle;
use crate::commands::CommandResult;

pub fn run(input: &Path) -> CommandResult {
    let bundle = match EstimateBundle::load(input) {
        Ok(bundle) => bundle,
        Err(error) => return CommandResult::from_error("check", &error),
    };

    let tables = match bundle.reference_tables() {
        Ok(tables) => tables,
        Err(error) => return CommandResult::from_error("check", &error.into()),
    };
    let pool = bundle.bid_pool();

    let data = json!({
        "items": bundle.items.len(),
        "bid_rows_accepted": pool.len(),
        "bid_rows_rejected": pool.rejected_count(),
        "memo_mappings": tables.memo_mappings.len(),
        "summaries": tables.summaries.len(),
        "crosswalk_rows": tables.crosswalk.len(),
    });
    CommandResult::success(
        "check",
        format!("bundle is valid: {} items, {} usable bid rows", bundle.items.len(), pool.len()),
        Some(data),
    )
}
