use super::{BackendState, CalculationBackend, WorkerPool};
use crate::core::models::request::EstimationTask;
use crate::core::models::result::EstimationResult;
use crate::core::resources::ResourceDescriptor;
use crate::engine::config::BackendConfig;
use crate::engine::error::EngineError;
use crate::engine::estimator::{
    EngineCommand, RESULT_FILE_NAME, read_result_file, reconcile, write_task_file,
};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Scheduler state of a queue job, as reported by `squeue -o %T`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueJobState {
    Pending,
    Running,
    Completing,
    Completed,
    Failed(String),
}

impl QueueJobState {
    pub fn parse(state: &str) -> Self {
        match state.trim() {
            "PENDING" | "CONFIGURING" | "REQUEUED" | "RESV_DEL_HOLD" => Self::Pending,
            "RUNNING" | "SUSPENDED" | "STOPPED" => Self::Running,
            "COMPLETING" | "STAGE_OUT" => Self::Completing,
            "COMPLETED" => Self::Completed,
            other => Self::Failed(other.to_string()),
        }
    }
}

/// Access to the batch scheduler's command-line interface.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Submits `script` and returns the scheduler's job id.
    async fn submit(&self, script: &Path) -> Result<String, EngineError>;

    /// Current state of `job_id`, or `None` once the job has left the queue.
    async fn query(&self, job_id: &str) -> Result<Option<QueueJobState>, EngineError>;

    async fn cancel(&self, job_id: &str) -> Result<(), EngineError>;
}

/// [`QueueClient`] backed by the `sbatch`, `squeue` and `scancel` executables.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlurmCli;

async fn run_tool(program: &str, args: &[&str]) -> Result<std::process::Output, EngineError> {
    Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| EngineError::Backend(format!("failed to run '{}': {}", program, e)))
}

#[async_trait]
impl QueueClient for SlurmCli {
    async fn submit(&self, script: &Path) -> Result<String, EngineError> {
        let script = script.display().to_string();
        let output = run_tool("sbatch", &["--parsable", &script]).await?;
        if !output.status.success() {
            return Err(EngineError::ResourceProvisioning(format!(
                "sbatch rejected '{}': {}",
                script,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        // `--parsable` prints `<job id>[;<cluster>]`.
        let stdout = String::from_utf8_lossy(&output.stdout);
        let job_id = stdout.trim().split(';').next().unwrap_or_default().to_string();
        if job_id.is_empty() {
            return Err(EngineError::ResourceProvisioning(
                "sbatch did not report a job id".to_string(),
            ));
        }
        Ok(job_id)
    }

    async fn query(&self, job_id: &str) -> Result<Option<QueueJobState>, EngineError> {
        let output = run_tool("squeue", &["-h", "-j", job_id, "-o", "%T"]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("Invalid job id") {
                return Ok(None);
            }
            return Err(EngineError::Backend(format!(
                "squeue failed for job {}: {}",
                job_id,
                stderr.trim()
            )));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .find(|l| !l.trim().is_empty())
            .map(QueueJobState::parse))
    }

    async fn cancel(&self, job_id: &str) -> Result<(), EngineError> {
        let output = run_tool("scancel", &[job_id]).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(EngineError::Backend(format!(
                "scancel failed for job {}: {}",
                job_id,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Renders the batch script for one task.
pub fn render_script(
    resources: &ResourceDescriptor,
    job_name: &str,
    working_directory: &Path,
    invocation: &[String],
) -> String {
    let mut script = String::from("#!/bin/bash\n");
    let directives = [
        format!("--job-name={}", job_name),
        format!("--partition={}", resources.queue_name),
        "--ntasks=1".to_string(),
        format!("--cpus-per-task={}", resources.thread_count),
        format!("--mem-per-cpu={}", resources.memory_limit),
        format!("--time={}", resources.wallclock_limit),
        format!("--output={}", working_directory.join("slurm-%j.out").display()),
    ];
    for directive in directives.iter().chain(&resources.extra_script_options) {
        let _ = writeln!(script, "#SBATCH {}", directive);
    }
    script.push('\n');

    for command in &resources.setup_commands {
        let _ = writeln!(script, "{}", command);
    }
    for (name, value) in &resources.env_overrides {
        let _ = writeln!(script, "export {}={}", name, shell_quote(value));
    }

    let _ = writeln!(
        script,
        "cd {}",
        shell_quote(&working_directory.display().to_string())
    );
    let line: Vec<String> = invocation.iter().map(|w| shell_quote(w)).collect();
    let _ = writeln!(script, "{}", line.join(" "));
    script
}

/// Submits every task as its own SLURM job on behalf of one worker.
pub struct SlurmBackend<Q: QueueClient = SlurmCli> {
    config: BackendConfig,
    command: EngineCommand,
    pool: WorkerPool,
    queue: Q,
    live_jobs: Mutex<BTreeSet<String>>,
}

impl SlurmBackend<SlurmCli> {
    pub fn new(config: BackendConfig) -> Result<Self, EngineError> {
        Self::with_queue(config, SlurmCli)
    }
}

impl<Q: QueueClient> SlurmBackend<Q> {
    pub fn with_queue(config: BackendConfig, queue: Q) -> Result<Self, EngineError> {
        let command = EngineCommand::from_parts(&config.engine_command)?;
        Ok(Self {
            pool: WorkerPool::new(config.pool.clone()),
            config,
            command,
            queue,
            live_jobs: Mutex::new(BTreeSet::new()),
        })
    }

    fn live_jobs(&self) -> std::sync::MutexGuard<'_, BTreeSet<String>> {
        self.live_jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Polls until the job leaves the queue. A job that is still pending once
    /// the wallclock limit has elapsed is cancelled and reported as a
    /// provisioning failure.
    async fn wait_for(&self, job_id: &str) -> Result<(), EngineError> {
        let provisioning_deadline =
            Instant::now().checked_add(self.config.resources.wallclock_limit.as_duration());
        let mut started = false;

        loop {
            match self.queue.query(job_id).await? {
                None | Some(QueueJobState::Completed) => return Ok(()),
                Some(QueueJobState::Running | QueueJobState::Completing) => {
                    if !started {
                        info!(job = %job_id, "Queue job started.");
                    }
                    started = true;
                }
                Some(QueueJobState::Pending) => {
                    if !started
                        && provisioning_deadline.is_some_and(|deadline| Instant::now() >= deadline)
                    {
                        if let Err(e) = self.queue.cancel(job_id).await {
                            warn!(job = %job_id, error = %e, "Failed to cancel unprovisioned job.");
                        }
                        return Err(EngineError::ResourceProvisioning(format!(
                            "job {} was still pending after {} on queue '{}'",
                            job_id,
                            self.config.resources.wallclock_limit,
                            self.config.resources.queue_name
                        )));
                    }
                }
                Some(QueueJobState::Failed(state)) => {
                    return Err(EngineError::Backend(format!(
                        "job {} ended in state {}",
                        job_id, state
                    )));
                }
            }
            tokio::time::sleep(self.config.pool.adaptive_interval).await;
        }
    }
}

#[async_trait]
impl<Q: QueueClient> CalculationBackend for SlurmBackend<Q> {
    fn state(&self) -> BackendState {
        self.pool.state()
    }

    async fn start(&self) -> Result<(), EngineError> {
        self.pool.start()?;
        let script_directory = &self.config.script_directory;
        std::fs::create_dir_all(script_directory)
            .map_err(|e| EngineError::io(script_directory, e))?;
        info!(
            queue = %self.config.resources.queue_name,
            max_jobs = self.config.pool.maximum_number_of_workers,
            device = self.config.resources.device_binding.visible_device,
            "SLURM backend ready."
        );
        Ok(())
    }

    async fn submit_task(
        &self,
        task: EstimationTask,
        working_directory: PathBuf,
    ) -> Result<EstimationResult, EngineError> {
        let _permit = self.pool.acquire().await?;

        let task_path = write_task_file(&working_directory, &task)?;
        let result_path = working_directory.join(RESULT_FILE_NAME);
        let job_name = format!(
            "propfleet-w{}-{}",
            self.config.resources.worker_index, task.task_id
        );
        let script = render_script(
            &self.config.resources,
            &job_name,
            &working_directory,
            &self.command.invocation(&task_path, &result_path),
        );
        let script_path = self
            .config
            .script_directory
            .join(format!("{}.sh", task.task_id));
        std::fs::write(&script_path, script).map_err(|e| EngineError::io(&script_path, e))?;

        let job_id = self.queue.submit(&script_path).await?;
        debug!(job = %job_id, task = %task.task_id, "Submitted queue job.");
        self.live_jobs().insert(job_id.clone());

        let waited = self.wait_for(&job_id).await;
        self.live_jobs().remove(&job_id);
        waited?;

        if !result_path.exists() {
            return Err(EngineError::Backend(format!(
                "job {} finished without writing '{}'",
                job_id,
                result_path.display()
            )));
        }
        let result = read_result_file(&result_path)?;
        Ok(reconcile(&task, result))
    }

    async fn stop(&self) -> Result<(), EngineError> {
        if !self.pool.stop() {
            return Ok(());
        }
        let jobs: Vec<String> = std::mem::take(&mut *self.live_jobs()).into_iter().collect();
        let mut failed = Vec::new();
        for job_id in &jobs {
            if let Err(e) = self.queue.cancel(job_id).await {
                warn!(job = %job_id, error = %e, "Failed to cancel queue job.");
                failed.push(job_id.clone());
            }
        }
        info!(cancelled = jobs.len() - failed.len(), "SLURM backend stopped.");
        if failed.is_empty() {
            Ok(())
        } else {
            Err(EngineError::Backend(format!(
                "could not cancel queue jobs: {}",
                failed.join(", ")
            )))
        }
    }
}
