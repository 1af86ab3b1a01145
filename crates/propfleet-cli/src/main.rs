mod cli;
mod commands;
mod config;
mod error;
mod logging;
mod ui;
mod utils;

use crate::cli::{Cli, Commands};
use crate::error::{CliError, Result};
use crate::ui::UiManager;
use clap::Parser;
use propfleet::workflows::estimate::WorkerStatus;
use tokio::task;
use tracing::{debug, error, info, warn};

fn exit_code(status: WorkerStatus) -> i32 {
    match status {
        WorkerStatus::Success => 0,
        WorkerStatus::PartialSuccess => 2,
        WorkerStatus::Failure => 1,
    }
}

#[tokio::main]
async fn main() {
    match run_app().await {
        Ok(status) => std::process::exit(exit_code(status)),
        Err(e) => {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            eprintln!("\n❌ Error: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run_app() -> Result<WorkerStatus> {
    let (ui_manager, ui_sender, shutdown_sender) = UiManager::new();
    let ui_handle = task::spawn(ui_manager.run());

    let cli = Cli::parse();
    logging::setup_logging(cli.verbose, cli.quiet, cli.log_file.clone())?;

    let (panic_hook, eyre_hook) = color_eyre::config::HookBuilder::default().into_hooks();
    eyre_hook.install().map_err(|e| CliError::Other(e.into()))?;
    std::panic::set_hook(Box::new(move |pi| {
        error!("{}", panic_hook.panic_report(pi));
    }));

    info!("propfleet v{} starting up.", env!("CARGO_PKG_VERSION"));
    debug!("Full CLI arguments parsed: {:?}", &cli);

    let command_result = match cli.command {
        Commands::Run(args) => {
            info!(worker = args.worker_id, "Dispatching to 'run' command.");
            commands::run::run(args, ui_sender.clone()).await
        }
        Commands::Merge(args) => {
            info!("Dispatching to 'merge' command.");
            commands::merge::run(args, ui_sender.clone()).map(|()| WorkerStatus::Success)
        }
    };

    if shutdown_sender.send(true).is_err() {
        warn!("UI manager exited before the shutdown signal.");
    }
    ui_handle
        .await
        .map_err(|e| CliError::Other(anyhow::anyhow!("UI manager task failed: {}", e)))?;

    match &command_result {
        Ok(WorkerStatus::Success) => println!("✅ Command completed successfully."),
        Ok(WorkerStatus::PartialSuccess) => {
            println!("⚠️  Command completed with some properties not estimated.")
        }
        Ok(WorkerStatus::Failure) => eprintln!("❌ No property could be estimated."),
        Err(e) => error!("❌ Command failed: {}", e),
    }

    command_result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_status_maps_to_process_exit_codes() {
        assert_eq!(exit_code(WorkerStatus::Success), 0);
        assert_eq!(exit_code(WorkerStatus::PartialSuccess), 2);
        assert_eq!(exit_code(WorkerStatus::Failure), 1);
    }
}
