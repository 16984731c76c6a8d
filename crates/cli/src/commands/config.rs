use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use bidprice_core::config::{AppConfig, LoadOptions};
use toml::Value;

struct Field {
    key_path: &'static str,
    env_keys: &'static [&'static str],
    value: String,
}

pub fn run(explicit_path: Option<&Path>) -> String {
    let options = LoadOptions {
        config_path: explicit_path.map(Path::to_path_buf),
        require_file: explicit_path.is_some(),
        ..LoadOptions::default()
    };
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path(explicit_path);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines =
        vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(
            field.key_path,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key_path, &field.value, source));
    }

    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let pricing = &config.pricing;
    let elasticity = &pricing.quantity_elasticity;
    let project = &config.project;
    let optional = |value: Option<String>| value.unwrap_or_else(|| "<unset>".to_string());

    vec![
        Field {
            key_path: "pricing.aggregation",
            env_keys: &["BIDPRICE_AGGREGATION"],
            value: pricing.aggregation.to_string(),
        },
        Field {
            key_path: "pricing.category_sigma_threshold",
            env_keys: &["BIDPRICE_CATEGORY_SIGMA_THRESHOLD"],
            value: pricing.category_sigma_threshold.to_string(),
        },
        Field {
            key_path: "pricing.rollup_sigma_threshold",
            env_keys: &["BIDPRICE_ROLLUP_SIGMA_THRESHOLD"],
            value: pricing.rollup_sigma_threshold.to_string(),
        },
        Field {
            key_path: "pricing.rollup_quantity_lower",
            env_keys: &["BIDPRICE_ROLLUP_QUANTITY_LOWER"],
            value: pricing.rollup_quantity_lower.to_string(),
        },
        Field {
            key_path: "pricing.rollup_quantity_upper",
            env_keys: &["BIDPRICE_ROLLUP_QUANTITY_UPPER"],
            value: pricing.rollup_quantity_upper.to_string(),
        },
        Field {
            key_path: "pricing.min_sample_target",
            env_keys: &["BIDPRICE_MIN_SAMPLE_TARGET"],
            value: pricing.min_sample_target.to_string(),
        },
        Field {
            key_path: "pricing.quantity_filter_min_points",
            env_keys: &["BIDPRICE_QUANTITY_FILTER_MIN_POINTS"],
            value: pricing.quantity_filter_min_points.to_string(),
        },
        Field {
            key_path: "pricing.memo_price_min_confidence",
            env_keys: &["BIDPRICE_MEMO_PRICE_MIN_CONFIDENCE"],
            value: pricing.memo_price_min_confidence.to_string(),
        },
        Field {
            key_path: "pricing.quantity_elasticity.enabled",
            env_keys: &["BIDPRICE_QUANTITY_ELASTICITY"],
            value: elasticity.enabled.to_string(),
        },
        Field {
            key_path: "pricing.quantity_elasticity.slope_bound",
            env_keys: &[],
            value: elasticity.slope_bound.to_string(),
        },
        Field {
            key_path: "pricing.quantity_elasticity.factor_lower",
            env_keys: &[],
            value: elasticity.factor_lower.to_string(),
        },
        Field {
            key_path: "pricing.quantity_elasticity.factor_upper",
            env_keys: &[],
            value: elasticity.factor_upper.to_string(),
        },
        Field {
            key_path: "pricing.quantity_elasticity.min_points",
            env_keys: &[],
            value: elasticity.min_points.to_string(),
        },
        Field {
            key_path: "pricing.apply_dm23_21",
            env_keys: &["BIDPRICE_APPLY_DM23_21"],
            value: pricing.apply_dm23_21.to_string(),
        },
        Field {
            key_path: "pricing.alternate_seek",
            env_keys: &["BIDPRICE_ALTERNATE_SEEK"],
            value: pricing.alternate_seek.to_string(),
        },
        Field {
            key_path: "project.region",
            env_keys: &["BIDPRICE_PROJECT_REGION"],
            value: optional(project.region.map(|region| region.to_string())),
        },
        Field {
            key_path: "project.expected_contract_cost",
            env_keys: &["BIDPRICE_EXPECTED_CONTRACT_COST"],
            value: optional(project.expected_contract_cost.map(|cost| cost.to_string())),
        },
        Field {
            key_path: "project.contract_filter_pct",
            env_keys: &["BIDPRICE_CONTRACT_FILTER_PCT"],
            value: project.contract_filter_pct.to_string(),
        },
        Field {
            key_path: "logging.level",
            env_keys: &["BIDPRICE_LOGGING_LEVEL", "BIDPRICE_LOG_LEVEL"],
            value: config.logging.level.clone(),
        },
        Field {
            key_path: "logging.format",
            env_keys: &["BIDPRICE_LOGGING_FORMAT", "BIDPRICE_LOG_FORMAT"],
            value: format!("{:?}", config.logging.format),
        },
    ]
}

fn detect_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then(|| path.to_path_buf());
    }

    [PathBuf::from("bidprice.toml"), PathBuf::from("config/bidprice.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
