use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use bidprice_cli::commands::estimate::EstimateArgs;
use bidprice_cli::commands::{check, config, estimate};
use bidprice_core::config::AppConfig;
use serde_json::Value;
use tempfile::TempDir;

const BUNDLE: &str = r#"{
  "as_of": "2025-06-30",
  "items": [
    {"item_code": "203-20000", "quantity": 10, "unit": "CYS"},
    {"ITEM_CODE": "401-11526", "QUANTITY": 200},
    {"item_code": "629-000149", "quantity": 1000},
    {"item_code": "999-99999", "quantity": 1}
  ],
  "bids": [
    {"ITEM_CODE": "203-20000", "UNIT_PRICE": "$90.00", "LETTING_DATE": "03/01/2025"},
    {"item_code": "203-20000", "unit_price": 95, "letting_date": "2025-02-01"},
    {"item_code": "203-20000", "unit_price": 110, "letting_date": "2025-01-15"},
    {"item_code": "401-10258", "unit_price": 90, "quantity": 100},
    {"item_code": "401-10259", "unit_price": 110, "quantity": 100},
    {"item_code": "401-10259", "unit_price": "n/a"}
  ]
}"#;

#[test]
fn estimate_prices_every_tier_from_a_bundle() {
    let (_dir, path) = write_bundle(BUNDLE);

    let result = estimate::run(&AppConfig::default(), &EstimateArgs { input: path, as_of: None });
    assert_eq!(result.exit_code, 0, "expected successful estimate: {}", result.output);

    let payload = parse_payload(&result.output);
    assert_eq!(payload["command"], "estimate");
    assert_eq!(payload["status"], "ok");
    assert_eq!(payload["data"]["as_of"], "2025-06-30");
    assert_eq!(payload["data"]["aggregation"], "WGT_AVG");

    let batch = &payload["data"]["batch"];
    assert_eq!(batch["rejected_rows"], 1);
    assert_eq!(line(batch, "203-20000")["source"], "STATE_12M");
    assert_eq!(line(batch, "203-20000")["data_points_used"], 3);
    assert_eq!(line(batch, "401-11526")["source"], "DESIGN_MEMO_ROLLUP");
    assert_eq!(line(batch, "629-000149")["source"], "DESIGN_MEMO_PRICE");
    assert_eq!(line(batch, "629-000149")["unit_price_est"], "2.22");
    assert_eq!(line(batch, "999-99999")["source"], "NO_DATA");
    assert!(line(batch, "999-99999")["unit_price_est"].is_null());
    assert_eq!(batch["source_counts"]["NO_DATA"], 1);
    assert!(batch["audit"]["401-11526"]["rows"].as_array().is_some_and(|rows| rows.len() == 2));
}

#[test]
fn estimate_reports_missing_bundle_as_input_error() {
    let args = EstimateArgs { input: PathBuf::from("/nonexistent/bundle.json"), as_of: None };

    let result = estimate::run(&AppConfig::default(), &args);
    assert_eq!(result.exit_code, 3, "expected input failure code");

    let payload = parse_payload(&result.output);
    assert_eq!(payload["status"], "error");
    assert_eq!(payload["error_class"], "input");
    assert!(payload["message"].as_str().unwrap_or_default().contains("could not read bundle"));
}

#[test]
fn estimate_rejects_unknown_crosswalk_status() {
    let (_dir, path) = write_bundle(
        r#"{"items": [], "crosswalk": [{"old_pay_item": "401-07321", "status": "RETIRED"}]}"#,
    );

    let result = estimate::run(&AppConfig::default(), &EstimateArgs { input: path, as_of: None });
    assert_eq!(result.exit_code, 4, "expected reference data failure code");

    let payload = parse_payload(&result.output);
    assert_eq!(payload["error_class"], "reference_data");
    assert!(payload["message"].as_str().unwrap_or_default().contains("RETIRED"));
}

#[test]
fn check_summarizes_a_valid_bundle() {
    let (_dir, path) = write_bundle(BUNDLE);

    let result = check::run(&path);
    assert_eq!(result.exit_code, 0, "expected valid bundle");

    let payload = parse_payload(&result.output);
    assert_eq!(payload["command"], "check");
    assert_eq!(payload["data"]["items"], 4);
    assert_eq!(payload["data"]["bid_rows_accepted"], 5);
    assert_eq!(payload["data"]["bid_rows_rejected"], 1);
    assert_eq!(payload["data"]["memo_mappings"], 1);
}

#[test]
fn check_reports_malformed_json() {
    let (_dir, path) = write_bundle("{not json");

    let result = check::run(&path);
    assert_eq!(result.exit_code, 3);
    assert_eq!(parse_payload(&result.output)["error_class"], "input");
}

#[test]
fn config_attributes_env_sources() {
    with_env(&[("BIDPRICE_MIN_SAMPLE_TARGET", "30"), ("BIDPRICE_LOG_LEVEL", "debug")], || {
        let output = config::run(None);

        assert!(output.contains(
            "- pricing.min_sample_target = 30 (source: env (BIDPRICE_MIN_SAMPLE_TARGET))"
        ));
        assert!(output.contains("- logging.level = debug (source: env (BIDPRICE_LOG_LEVEL))"));
        assert!(output.contains("- pricing.aggregation = WGT_AVG (source: default)"));
    });
}

#[test]
fn config_reports_validation_failures() {
    with_env(&[("BIDPRICE_CONTRACT_FILTER_PCT", "900")], || {
        let output = config::run(None);
        assert!(output.starts_with("config validation failed:"));
        assert!(output.contains("contract_filter_pct"));
    });
}

fn write_bundle(contents: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("temp dir should be created");
    let path = dir.path().join("bundle.json");
    fs::write(&path, contents).expect("bundle should be written");
    (dir, path)
}

fn line<'a>(batch: &'a Value, item_code: &str) -> &'a Value {
    batch["lines"]
        .as_array()
        .and_then(|lines| lines.iter().find(|line| line["item_code"] == item_code))
        .unwrap_or_else(|| panic!("missing line for {item_code}"))
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "BIDPRICE_AGGREGATION",
        "BIDPRICE_CATEGORY_SIGMA_THRESHOLD",
        "BIDPRICE_ROLLUP_SIGMA_THRESHOLD",
        "BIDPRICE_ROLLUP_QUANTITY_LOWER",
        "BIDPRICE_ROLLUP_QUANTITY_UPPER",
        "BIDPRICE_MIN_SAMPLE_TARGET",
        "BIDPRICE_QUANTITY_FILTER_MIN_POINTS",
        "BIDPRICE_MEMO_PRICE_MIN_CONFIDENCE",
        "BIDPRICE_QUANTITY_ELASTICITY",
        "BIDPRICE_APPLY_DM23_21",
        "BIDPRICE_ALTERNATE_SEEK",
        "BIDPRICE_PROJECT_REGION",
        "BIDPRICE_EXPECTED_CONTRACT_COST",
        "BIDPRICE_CONTRACT_FILTER_PCT",
        "BIDPRICE_LOGGING_LEVEL",
        "BIDPRICE_LOGGING_FORMAT",
        "BIDPRICE_LOG_LEVEL",
        "BIDPRICE_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
