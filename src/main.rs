use anyhow::Result;
use clap::{Parser, Subcommand};
use hierarchy_forecast::{
    commands::{items, model_info, predict, train},
    config::DEFAULT_CONFIG_PATH,
    context::{AppContext, TrainingOverrides},
};
use log::info;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "hierarchy-forecast")]
#[command(about = "Hierarchical multi-horizon sales forecasting with LightGBM")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true, value_name = "PATH", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train one model per horizon, evaluate WRMSSE and write forecast artifacts
    Train {
        /// Number of boosting iterations
        #[arg(long)]
        num_boost_round: Option<u32>,
        /// Learning rate
        #[arg(long)]
        learning_rate: Option<f64>,
        /// Number of leaves in one tree
        #[arg(long)]
        num_leaves: Option<u32>,
        /// Days of history kept before the test window
        #[arg(long)]
        history_days: Option<u32>,
        /// Horizons trained concurrently
        #[arg(long)]
        parallel_horizons: Option<usize>,
    },
    /// Print stored forecasts for the given item ids
    Predict {
        /// Series ids, e.g. FOODS_1_001_CA_1_evaluation
        #[arg(required = true, num_args = 1..)]
        ids: Vec<String>,
    },
    /// List forecasted item ids
    Items {
        #[arg(long, default_value_t = 100)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Show the evaluation summary of the stored forecasts
    ModelInfo,
}

fn main() -> Result<()> {
    let Cli { config, command } = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let app_context = AppContext::initialize(&config)?;
    info!("Starting hierarchy-forecast");

    match command {
        Commands::Train {
            num_boost_round,
            learning_rate,
            num_leaves,
            history_days,
            parallel_horizons,
        } => {
            let overrides = TrainingOverrides {
                num_boost_round,
                learning_rate,
                num_leaves,
                history_days,
                parallel_horizons,
            };
            train::run(&app_context, overrides)?;
        }
        Commands::Predict { ids } => {
            predict::run(&app_context, &ids)?;
        }
        Commands::Items { limit, offset } => {
            items::run(&app_context, limit, offset)?;
        }
        Commands::ModelInfo => {
            model_info::run(&app_context)?;
        }
    }

    Ok(())
}
