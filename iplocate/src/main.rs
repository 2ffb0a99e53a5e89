use anyhow::{Context, Result};
use clap::Parser;
use iplocate::cli::{dispatch, Cli};
use iplocate::config::AppConfig;
use iplocate::tracing_setup::init_tracing;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(data_dir) = cli.data_dir {
        config.engine.data_dir = data_dir;
    }
    config.validate()?;

    init_tracing(&config.logging.filter, cli.verbose);
    tracing::debug!(?config, "configuration loaded");

    dispatch(config, cli.command).await
}
