use crate::cli::RunArgs;
use crate::config::{BackendChoice, build_run_config};
use crate::error::Result;
use crate::ui::{CliProgressHandler, UiEvent};
use propfleet::{
    engine::{
        backend::{local::LocalBackend, slurm::SlurmBackend},
        estimator::{CommandEstimator, EngineCommand},
        progress::ProgressReporter,
    },
    workflows::estimate::{self, WorkerOutcome, WorkerStatus},
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

pub async fn run(args: RunArgs, ui_sender: mpsc::Sender<UiEvent>) -> Result<WorkerStatus> {
    info!("Merging configuration from file and CLI arguments...");
    let app_config = build_run_config(&args)?;

    let reporter =
        ProgressReporter::with_callback(CliProgressHandler::new(ui_sender).get_callback());

    println!(
        "Worker {} of {}: estimating properties from {}",
        app_config.run.worker_id,
        app_config.run.num_workers,
        app_config.run.input_path.display()
    );

    let outcome = match app_config.backend {
        BackendChoice::Slurm(backend_config) => {
            info!(queue = %backend_config.resources.queue_name, "Using the SLURM backend.");
            let backend = Arc::new(SlurmBackend::new(backend_config)?);
            estimate::run(&app_config.run, backend, &reporter).await?
        }
        BackendChoice::Local {
            pool,
            binding,
            engine_command,
        } => {
            info!(
                workers = pool.maximum_number_of_workers,
                "Using the local backend."
            );
            let estimator = CommandEstimator::new(EngineCommand::from_parts(&engine_command)?);
            let backend = Arc::new(LocalBackend::new(pool, binding, Arc::new(estimator)));
            estimate::run(&app_config.run, backend, &reporter).await?
        }
    };

    print_outcome(&outcome);
    Ok(outcome.status())
}

fn print_outcome(outcome: &WorkerOutcome) {
    match outcome {
        WorkerOutcome::AlreadyComplete { results_path } => {
            println!("Results already exist, exiting early.");
            println!("  {}", results_path.display());
        }
        WorkerOutcome::Finished(summary) => {
            println!(
                "Estimated {} of {} assigned properties (items {}..{}).",
                summary.estimated,
                summary.partition.len(),
                summary.partition.start,
                summary.partition.end
            );
            if !summary.failures.is_empty() {
                println!(
                    "{} propert{} could not be estimated:",
                    summary.failures.len(),
                    if summary.failures.len() == 1 { "y" } else { "ies" }
                );
                for (id, reason) in &summary.failures {
                    println!("  - {}: {}", id, reason);
                }
            }
            println!("Results written to {}", summary.results_path.display());
        }
    }
}
