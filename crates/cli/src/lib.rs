pub mod commands;
pub mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use bidprice_core::config::{AppConfig, ConfigOverrides, LoadOptions};
use bidprice_core::AggregationMode;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "bidprice",
    about = "BidTabs pricing operator CLI",
    long_about = "Price a pay-item list from historical bid tabulations and inspect the effective configuration.",
    after_help = "Examples:\n  bidprice estimate --input bundle.json\n  bidprice check --input bundle.json\n  bidprice config"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Path to a bidprice.toml config file")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Price every pay item in a JSON estimate bundle and print the report")]
    Estimate {
        #[arg(long, help = "JSON bundle with items, bids and reference tables")]
        input: PathBuf,
        #[arg(long, help = "Reference date for the recency windows (YYYY-MM-DD)")]
        as_of: Option<NaiveDate>,
        #[arg(long, help = "Project district/region number")]
        region: Option<u32>,
        #[arg(long, help = "Aggregation mode, e.g. ROBUST_MEDIAN or WGT_AVG")]
        aggregation: Option<String>,
        #[arg(long, help = "Expected contract cost for the contract-size pre-filter")]
        expected_contract_cost: Option<f64>,
        #[arg(long, help = "Remap legacy HMA items and apply the DM 23-21 adders")]
        apply_dm23_21: bool,
    },
    #[command(about = "Validate a JSON estimate bundle without pricing it")]
    Check {
        #[arg(long, help = "JSON bundle with items, bids and reference tables")]
        input: PathBuf,
    },
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Config => commands::CommandResult {
            exit_code: 0,
            output: commands::config::run(cli.config.as_deref()),
        },
        Command::Check { input } => commands::check::run(&input),
        Command::Estimate {
            input,
            as_of,
            region,
            aggregation,
            expected_contract_cost,
            apply_dm23_21,
        } => {
            let overrides = ConfigOverrides {
                aggregation: aggregation.as_deref().map(AggregationMode::from_config_str),
                apply_dm23_21: apply_dm23_21.then_some(true),
                project_region: region,
                expected_contract_cost,
                ..ConfigOverrides::default()
            };
            let options = LoadOptions {
                require_file: cli.config.is_some(),
                config_path: cli.config,
                overrides,
            };
            match AppConfig::load(options) {
                Ok(config) => {
                    logging::init(&config.logging);
                    let args = commands::estimate::EstimateArgs { input, as_of };
                    commands::estimate::run(&config, &args)
                }
                Err(error) => commands::CommandResult::failure(
                    "estimate",
                    "config_validation",
                    format!("configuration issue: {error}"),
                    2,
                ),
            }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
