//! Command line interface.

pub mod args;
pub mod commands;
pub mod runtime;

pub use args::{Cli, Command};
pub use runtime::Runtime;

use crate::config::AppConfig;
use anyhow::Result;
use std::process::ExitCode;

/// Run `command`, starting the embedded runtime when it needs one
pub async fn dispatch(config: AppConfig, command: Command) -> Result<ExitCode> {
    match command {
        // replay only needs the workflow code, not a worker
        Command::Replay(args) => commands::replay(&config, args),
        command => {
            let runtime = Runtime::start(config).await?;
            run(&runtime, command).await
        }
    }
}

async fn run(runtime: &Runtime, command: Command) -> Result<ExitCode> {
    match command {
        Command::Worker => commands::worker(runtime).await?,
        Command::Lookup(args) => commands::lookup(runtime, args).await?,
        Command::Monitor(args) => commands::monitor(runtime, args).await?,
        Command::Observe(args) => commands::observe(runtime, args).await?,
        Command::Signal(args) => commands::signal_workflow(runtime, args).await?,
        Command::Query(args) => commands::query_workflow(runtime, args).await?,
        Command::Cancel(args) => commands::cancel_workflow(runtime, args).await?,
        Command::History(args) => commands::history(runtime, args).await?,
        Command::Replay(args) => return commands::replay(runtime.config(), args),
    }
    Ok(ExitCode::SUCCESS)
}
