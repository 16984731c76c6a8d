use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pricing::aggregate::AggregationMode;

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AppConfig {
    pub pricing: PricingConfig,
    pub project: ProjectConfig,
    pub logging: LoggingConfig,
}

/// Engine tunables.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PricingConfig {
    pub aggregation: AggregationMode,
    pub category_sigma_threshold: f64,
    pub rollup_sigma_threshold: f64,
    pub rollup_quantity_lower: f64,
    pub rollup_quantity_upper: f64,
    pub min_sample_target: usize,
    pub quantity_filter_min_points: usize,
    pub memo_price_min_confidence: f64,
    pub quantity_elasticity: ElasticityConfig,
    /// Remap legacy HMA items through the DM 23-21 crosswalk.
    pub apply_dm23_21: bool,
    /// Consult the geometry alternate-seek collaborator.
    pub alternate_seek: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ElasticityConfig {
    pub enabled: bool,
    pub slope_bound: f64,
    pub factor_lower: f64,
    pub factor_upper: f64,
    pub min_points: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProjectConfig {
    pub region: Option<u32>,
    pub expected_contract_cost: Option<f64>,
    /// Contract-size tolerance, percent either side of the expected cost.
    pub contract_filter_pct: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub aggregation: Option<AggregationMode>,
    pub min_sample_target: Option<usize>,
    pub apply_dm23_21: Option<bool>,
    pub project_region: Option<u32>,
    pub expected_contract_cost: Option<f64>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("bidprice config `{path}` could not be read: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("bidprice config `{path}` is not valid TOML: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("bidprice config `{0}` does not exist")]
    MissingConfigFile(PathBuf),
    #[error("`${{{var}}}` in bidprice config names an unset environment variable")]
    MissingEnvInterpolation { var: String },
    #[error("`${{` in bidprice config has no closing `}}`")]
    UnterminatedInterpolation,
    #[error("`{key}` has unusable value `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            aggregation: AggregationMode::WgtAvg,
            category_sigma_threshold: 2.0,
            rollup_sigma_threshold: 2.0,
            rollup_quantity_lower: 0.5,
            rollup_quantity_upper: 1.5,
            min_sample_target: 50,
            quantity_filter_min_points: 10,
            memo_price_min_confidence: 0.7,
            quantity_elasticity: ElasticityConfig::default(),
            apply_dm23_21: false,
            alternate_seek: true,
        }
    }
}

impl Default for ElasticityConfig {
    fn default() -> Self {
        Self { enabled: false, slope_bound: 0.2, factor_lower: 0.8, factor_upper: 1.2, min_points: 15 }
    }
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self { region: None, expected_contract_cost: None, contract_filter_pct: 50.0 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: LogFormat::Compact }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("bidprice.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(pricing) = patch.pricing {
            if let Some(aggregation) = pricing.aggregation {
                self.pricing.aggregation = AggregationMode::from_config_str(&aggregation);
            }
            if let Some(threshold) = pricing.category_sigma_threshold {
                self.pricing.category_sigma_threshold = threshold;
            }
            if let Some(threshold) = pricing.rollup_sigma_threshold {
                self.pricing.rollup_sigma_threshold = threshold;
            }
            if let Some(lower) = pricing.rollup_quantity_lower {
                self.pricing.rollup_quantity_lower = lower;
            }
            if let Some(upper) = pricing.rollup_quantity_upper {
                self.pricing.rollup_quantity_upper = upper;
            }
            if let Some(target) = pricing.min_sample_target {
                self.pricing.min_sample_target = target;
            }
            if let Some(points) = pricing.quantity_filter_min_points {
                self.pricing.quantity_filter_min_points = points;
            }
            if let Some(confidence) = pricing.memo_price_min_confidence {
                self.pricing.memo_price_min_confidence = confidence;
            }
            if let Some(apply) = pricing.apply_dm23_21 {
                self.pricing.apply_dm23_21 = apply;
            }
            if let Some(alternate_seek) = pricing.alternate_seek {
                self.pricing.alternate_seek = alternate_seek;
            }

            if let Some(elasticity) = pricing.quantity_elasticity {
                let target = &mut self.pricing.quantity_elasticity;
                if let Some(enabled) = elasticity.enabled {
                    target.enabled = enabled;
                }
                if let Some(slope_bound) = elasticity.slope_bound {
                    target.slope_bound = slope_bound;
                }
                if let Some(factor_lower) = elasticity.factor_lower {
                    target.factor_lower = factor_lower;
                }
                if let Some(factor_upper) = elasticity.factor_upper {
                    target.factor_upper = factor_upper;
                }
                if let Some(min_points) = elasticity.min_points {
                    target.min_points = min_points;
                }
            }
        }

        if let Some(project) = patch.project {
            if let Some(region) = project.region {
                self.project.region = Some(region);
            }
            if let Some(cost) = project.expected_contract_cost {
                self.project.expected_contract_cost = Some(cost);
            }
            if let Some(pct) = project.contract_filter_pct {
                self.project.contract_filter_pct = pct;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("BIDPRICE_AGGREGATION") {
            self.pricing.aggregation = AggregationMode::from_config_str(&value);
        }
        if let Some(value) = read_env("BIDPRICE_CATEGORY_SIGMA_THRESHOLD") {
            self.pricing.category_sigma_threshold =
                parse_f64("BIDPRICE_CATEGORY_SIGMA_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("BIDPRICE_ROLLUP_SIGMA_THRESHOLD") {
            self.pricing.rollup_sigma_threshold =
                parse_f64("BIDPRICE_ROLLUP_SIGMA_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("BIDPRICE_ROLLUP_QUANTITY_LOWER") {
            self.pricing.rollup_quantity_lower =
                parse_f64("BIDPRICE_ROLLUP_QUANTITY_LOWER", &value)?;
        }
        if let Some(value) = read_env("BIDPRICE_ROLLUP_QUANTITY_UPPER") {
            self.pricing.rollup_quantity_upper =
                parse_f64("BIDPRICE_ROLLUP_QUANTITY_UPPER", &value)?;
        }
        if let Some(value) = read_env("BIDPRICE_MIN_SAMPLE_TARGET") {
            self.pricing.min_sample_target = parse_usize("BIDPRICE_MIN_SAMPLE_TARGET", &value)?;
        }
        if let Some(value) = read_env("BIDPRICE_QUANTITY_FILTER_MIN_POINTS") {
            self.pricing.quantity_filter_min_points =
                parse_usize("BIDPRICE_QUANTITY_FILTER_MIN_POINTS", &value)?;
        }
        if let Some(value) = read_env("BIDPRICE_MEMO_PRICE_MIN_CONFIDENCE") {
            self.pricing.memo_price_min_confidence =
                parse_f64("BIDPRICE_MEMO_PRICE_MIN_CONFIDENCE", &value)?;
        }
        if let Some(value) = read_env("BIDPRICE_QUANTITY_ELASTICITY") {
            self.pricing.quantity_elasticity.enabled =
                parse_bool("BIDPRICE_QUANTITY_ELASTICITY", &value)?;
        }
        if let Some(value) = read_env("BIDPRICE_APPLY_DM23_21") {
            self.pricing.apply_dm23_21 = parse_bool("BIDPRICE_APPLY_DM23_21", &value)?;
        }
        if let Some(value) = read_env("BIDPRICE_ALTERNATE_SEEK") {
            self.pricing.alternate_seek = parse_bool("BIDPRICE_ALTERNATE_SEEK", &value)?;
        }

        if let Some(value) = read_env("BIDPRICE_PROJECT_REGION") {
            self.project.region = Some(parse_u32("BIDPRICE_PROJECT_REGION", &value)?);
        }
        if let Some(value) = read_env("BIDPRICE_EXPECTED_CONTRACT_COST") {
            self.project.expected_contract_cost =
                Some(parse_f64("BIDPRICE_EXPECTED_CONTRACT_COST", &value)?);
        }
        if let Some(value) = read_env("BIDPRICE_CONTRACT_FILTER_PCT") {
            self.project.contract_filter_pct = parse_f64("BIDPRICE_CONTRACT_FILTER_PCT", &value)?;
        }

        let log_level =
            read_env("BIDPRICE_LOGGING_LEVEL").or_else(|| read_env("BIDPRICE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("BIDPRICE_LOGGING_FORMAT").or_else(|| read_env("BIDPRICE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(aggregation) = overrides.aggregation {
            self.pricing.aggregation = aggregation;
        }
        if let Some(target) = overrides.min_sample_target {
            self.pricing.min_sample_target = target;
        }
        if let Some(apply) = overrides.apply_dm23_21 {
            self.pricing.apply_dm23_21 = apply;
        }
        if let Some(region) = overrides.project_region {
            self.project.region = Some(region);
        }
        if let Some(cost) = overrides.expected_contract_cost {
            self.project.expected_contract_cost = Some(cost);
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_pricing(&self.pricing)?;
        validate_project(&self.project)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

const CONFIG_FILE_CANDIDATES: [&str; 2] = ["bidprice.toml", "config/bidprice.toml"];

/// An explicit path wins and is never substituted by a candidate.
fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    match explicit_path {
        Some(path) => path.exists().then(|| path.to_path_buf()),
        None => CONFIG_FILE_CANDIDATES.into_iter().map(PathBuf::from).find(|path| path.exists()),
    }
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;
    let expanded = expand_env_references(&raw)?;
    toml::from_str(&expanded)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

/// Replaces every `${NAME}` with the value of environment variable `NAME`.
fn expand_env_references(input: &str) -> Result<String, ConfigError> {
    let mut expanded = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        expanded.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let close = after_open.find('}').ok_or(ConfigError::UnterminatedInterpolation)?;
        let name = &after_open[..close];
        let value = env::var(name)
            .map_err(|_| ConfigError::MissingEnvInterpolation { var: name.to_string() })?;
        expanded.push_str(&value);
        rest = &after_open[close + 1..];
    }
    expanded.push_str(rest);

    Ok(expanded)
}

fn validate_pricing(pricing: &PricingConfig) -> Result<(), ConfigError> {
    for (name, value) in [
        ("pricing.category_sigma_threshold", pricing.category_sigma_threshold),
        ("pricing.rollup_sigma_threshold", pricing.rollup_sigma_threshold),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(ConfigError::Validation(format!(
                "{name} must be a finite, non-negative number (0 disables trimming)"
            )));
        }
    }

    let lower = pricing.rollup_quantity_lower;
    let upper = pricing.rollup_quantity_upper;
    if !(lower > 0.0 && upper.is_finite() && upper >= lower) {
        return Err(ConfigError::Validation(
            "pricing.rollup_quantity_lower/upper must be positive with lower <= upper".to_string(),
        ));
    }

    if pricing.min_sample_target == 0 {
        return Err(ConfigError::Validation(
            "pricing.min_sample_target must be greater than zero".to_string(),
        ));
    }

    if !(0.0..=1.0).contains(&pricing.memo_price_min_confidence) {
        return Err(ConfigError::Validation(
            "pricing.memo_price_min_confidence must be in range 0..=1".to_string(),
        ));
    }

    let elasticity = &pricing.quantity_elasticity;
    if !(elasticity.slope_bound.is_finite() && elasticity.slope_bound >= 0.0) {
        return Err(ConfigError::Validation(
            "pricing.quantity_elasticity.slope_bound must be a finite, non-negative number"
                .to_string(),
        ));
    }
    if !(elasticity.factor_lower > 0.0
        && elasticity.factor_lower <= 1.0
        && elasticity.factor_upper >= 1.0
        && elasticity.factor_upper.is_finite())
    {
        return Err(ConfigError::Validation(
            "pricing.quantity_elasticity factor bounds must satisfy 0 < lower <= 1 <= upper"
                .to_string(),
        ));
    }
    if elasticity.min_points < 2 {
        return Err(ConfigError::Validation(
            "pricing.quantity_elasticity.min_points must be at least 2".to_string(),
        ));
    }

    Ok(())
}

fn validate_project(project: &ProjectConfig) -> Result<(), ConfigError> {
    if !(0.0..=500.0).contains(&project.contract_filter_pct) {
        return Err(ConfigError::Validation(
            "project.contract_filter_pct must be in range 0..=500".to_string(),
        ));
    }

    if let Some(cost) = project.expected_contract_cost {
        if !cost.is_finite() || cost < 0.0 {
            return Err(ConfigError::Validation(
                "project.expected_contract_cost must be a finite, non-negative amount".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse::<u32>().map_err(|_| invalid_override(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.trim().parse::<usize>().map_err(|_| invalid_override(key, value))
}

fn parse_f64(key: &str, value: &str) -> Result<f64, ConfigError> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|parsed| parsed.is_finite())
        .ok_or_else(|| invalid_override(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid_override(key, value)),
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    pricing: Option<PricingPatch>,
    project: Option<ProjectPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct PricingPatch {
    aggregation: Option<String>,
    category_sigma_threshold: Option<f64>,
    rollup_sigma_threshold: Option<f64>,
    rollup_quantity_lower: Option<f64>,
    rollup_quantity_upper: Option<f64>,
    min_sample_target: Option<usize>,
    quantity_filter_min_points: Option<usize>,
    memo_price_min_confidence: Option<f64>,
    apply_dm23_21: Option<bool>,
    alternate_seek: Option<bool>,
    quantity_elasticity: Option<ElasticityPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct ElasticityPatch {
    enabled: Option<bool>,
    slope_bound: Option<f64>,
    factor_lower: Option<f64>,
    factor_upper: Option<f64>,
    min_points: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ProjectPatch {
    region: Option<u32>,
    expected_contract_cost: Option<f64>,
    contract_filter_pct: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
