use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use trialflow_sync::{PgWarehouse, Pipeline, PipelineConfig, PipelineError, Warehouse};

#[derive(Debug, Parser)]
#[command(name = "trialflow")]
#[command(about = "Unified clinical-trial registry pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Extract from all registries, stage, and merge into the warehouse.
    Run,
    /// Create the staging and analytics tables if they do not exist.
    Migrate,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,trialflow_sync=debug,trialflow_extract=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    let config = PipelineConfig::from_env();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_pipeline(config).await,
        Commands::Migrate => migrate(config).await,
    }
}

async fn run_pipeline(config: PipelineConfig) -> ExitCode {
    let warehouse = match PgWarehouse::connect(&config.database_url).await {
        Ok(warehouse) => Arc::new(warehouse),
        Err(err) => {
            error!(error = %format!("{err:#}"), "warehouse connection failed");
            return ExitCode::FAILURE;
        }
    };

    let pipeline = match Pipeline::new(config, warehouse) {
        Ok(pipeline) => pipeline,
        Err(err) => {
            error!(error = %format!("{err:#}"), "pipeline construction failed");
            return ExitCode::FAILURE;
        }
    };

    match pipeline.run_once().await {
        Ok(summary) => {
            info!(
                run_id = %summary.run_id,
                combined_rows = summary.combined_rows,
                staged_key = %summary.staged_key,
                merged_rows = summary.merged_rows,
                "pipeline run complete"
            );
            ExitCode::SUCCESS
        }
        Err(PipelineError::Validation(err)) => {
            error!(error = %err, "unified table failed validation; nothing persisted");
            ExitCode::from(2)
        }
        Err(err) => {
            error!(error = %format!("{err:#}"), "pipeline run failed");
            ExitCode::FAILURE
        }
    }
}

async fn migrate(config: PipelineConfig) -> ExitCode {
    let warehouse = match PgWarehouse::connect(&config.database_url).await {
        Ok(warehouse) => warehouse,
        Err(err) => {
            error!(error = %format!("{err:#}"), "warehouse connection failed");
            return ExitCode::FAILURE;
        }
    };

    match warehouse.ensure_schema().await {
        Ok(()) => {
            info!("schema is up to date");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %format!("{err:#}"), "migration failed");
            ExitCode::FAILURE
        }
    }
}
