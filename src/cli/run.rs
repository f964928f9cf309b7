use crate::config::parse::load_config;
use crate::pipeline;
use std::path::PathBuf;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] crate::config::parse::ConfigError),

    #[error("run error: {0}")]
    Pipeline(#[from] pipeline::RunError),
}

pub async fn run(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = match config_path {
        Some(path) => path,
        None => {
            eprintln!("Error: config not found");
            eprintln!("Searched locations:");
            eprintln!("  ~/.config/logfold/config.yml");
            eprintln!("  /etc/logfold/config.yml");
            eprintln!("\nUse --config <path> to specify a config file, or run 'logfold config init' to generate one.");
            std::process::exit(1);
        }
    };

    run_aggregation(&config_path).await.map_err(|e| e.into())
}

async fn run_aggregation(config_path: &PathBuf) -> Result<(), RunError> {
    info!(config_path = %config_path.display(), "Loading configuration");

    // Configuration problems surface here, before any storage is touched.
    let config = load_config(config_path)?;

    let summary = pipeline::run_once(&config).await?;
    info!(
        retrieved = summary.retrieved,
        aggregated = summary.aggregated,
        stored = summary.stored,
        failed = summary.failed,
        "aggregation run finished"
    );

    Ok(())
}
