use crate::core::forcefield::{force_field_directory_name, prepare_force_field_directory};
use crate::core::io::resume::{ResumeDecision, ResumeGuard};
use crate::core::io::snapshot::{WorkerOutputPaths, write_worker_results};
use crate::core::models::dataset::PhysicalPropertyDataSet;
use crate::core::models::property::PropertyId;
use crate::core::models::result::EstimationResult;
use crate::core::options::RequestOptions;
use crate::core::partition::Partition;
use crate::engine::backend::{CalculationBackend, with_backend};
use crate::engine::client::{ConnectionOptions, EvaluatorClient};
use crate::engine::config::WorkerRunConfig;
use crate::engine::error::EngineError;
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::server::with_server;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    /// Every assigned property was estimated, or a previous run already was.
    Success,
    /// Some properties were estimated and some failed.
    PartialSuccess,
    /// No assigned property could be estimated.
    Failure,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSummary {
    pub partition: Partition,
    pub estimated: usize,
    pub failures: BTreeMap<PropertyId, String>,
    pub results_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerOutcome {
    AlreadyComplete { results_path: PathBuf },
    Finished(WorkerSummary),
}

impl WorkerOutcome {
    pub fn status(&self) -> WorkerStatus {
        match self {
            Self::AlreadyComplete { .. } => WorkerStatus::Success,
            Self::Finished(summary) if summary.failures.is_empty() => WorkerStatus::Success,
            Self::Finished(summary) if summary.estimated > 0 => WorkerStatus::PartialSuccess,
            Self::Finished(_) => WorkerStatus::Failure,
        }
    }
}

/// Estimates one worker's share of a data set and writes its result files.
///
/// The worker's slice is fixed by `worker_id` and `num_workers`; the backend is
/// started for the duration of the request and stopped on every exit path.
#[instrument(skip_all, name = "estimate_workflow", fields(worker = config.worker_id))]
pub async fn run<B>(
    config: &WorkerRunConfig,
    backend: Arc<B>,
    reporter: &ProgressReporter<'_>,
) -> Result<WorkerOutcome, EngineError>
where
    B: CalculationBackend + ?Sized + 'static,
{
    // === Phase 0: Resume check ===
    let force_field_directory = config.base_directory.join(force_field_directory_name(
        &config.forcefield_path,
        &config.water_forcefield_path,
    ));
    let paths = WorkerOutputPaths::for_replicate(
        &force_field_directory,
        &config.output_directory,
        config.replicate,
        config.worker_id,
    );
    if ResumeGuard::new(paths.clone()).check()? == ResumeDecision::AlreadyComplete {
        info!("Results already exist, exiting early.");
        return Ok(WorkerOutcome::AlreadyComplete {
            results_path: paths.json_path(),
        });
    }

    // === Phase 1: Preparation ===
    reporter.report(Progress::PhaseStart {
        name: "Preparation",
    });
    for path in [
        &config.input_path,
        &config.forcefield_path,
        &config.water_forcefield_path,
        &config.options_path,
    ] {
        if !path.is_file() {
            return Err(EngineError::MissingInput { path: path.clone() });
        }
    }

    let full_set = PhysicalPropertyDataSet::from_json(&config.input_path)?;
    let partition = Partition::for_worker(full_set.len(), config.num_workers, config.worker_id)?;
    let mut data_set = full_set.subset(&partition);
    data_set.apply_uncertainty_policy(config.uncertainty_policy);
    info!(
        total = full_set.len(),
        assigned = data_set.len(),
        start = partition.start,
        end = partition.end,
        "Loaded data set partition."
    );

    let (_, force_field) = prepare_force_field_directory(
        &config.base_directory,
        &config.forcefield_path,
        &config.water_forcefield_path,
    )?;
    let options = RequestOptions::from_json(&config.options_path)?;
    reporter.report(Progress::PhaseFinish);

    // === Phase 2: Estimation ===
    let result = if data_set.is_empty() {
        info!("Partition is empty; nothing to estimate.");
        EstimationResult::new()
    } else {
        reporter.report(Progress::PhaseStart { name: "Estimating" });
        let server_config = config.server.clone();
        let polling_interval = config.polling_interval;
        let result = with_backend(backend, |backend| {
            with_server(server_config, backend, |address| async move {
                let client = EvaluatorClient::new(connection_for(address));
                let request = client
                    .request_estimate(&data_set, &force_field, &options)
                    .await?;
                request
                    .results_with_progress(polling_interval, reporter)
                    .await
            })
        })
        .await;
        reporter.report(Progress::PhaseFinish);
        result?
    };

    // === Phase 3: Persist ===
    reporter.report(Progress::PhaseStart {
        name: "Writing results",
    });
    write_worker_results(&paths, &result)?;
    reporter.report(Progress::PhaseFinish);

    let failures = result.failures();
    for (id, reason) in &failures {
        warn!(property = %id, reason = %reason, "Property was not estimated.");
    }
    let summary = WorkerSummary {
        partition,
        estimated: result.estimated.len(),
        failures,
        results_path: paths.json_path(),
    };
    info!(
        estimated = summary.estimated,
        failed = summary.failures.len(),
        path = %summary.results_path.display(),
        "Worker finished."
    );
    Ok(WorkerOutcome::Finished(summary))
}

fn connection_for(address: SocketAddr) -> ConnectionOptions {
    let host = if address.ip().is_unspecified() {
        "127.0.0.1".to_string()
    } else {
        address.ip().to_string()
    };
    ConnectionOptions::new(host, address.port())
}
