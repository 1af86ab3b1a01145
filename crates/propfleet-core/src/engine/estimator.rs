use super::error::EngineError;
use crate::core::models::property::PropertyId;
use crate::core::models::request::EstimationTask;
use crate::core::models::result::{EstimationException, EstimationResult};
use crate::core::resources::DeviceBinding;
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::{debug, warn};

pub const TASK_FILE_NAME: &str = "task.json";
pub const RESULT_FILE_NAME: &str = "result.json";

/// Computes estimates for the properties of one task.
///
/// Implementations receive the accelerator binding explicitly and must not rely
/// on the environment of the calling process.
#[async_trait]
pub trait PropertyEstimator: Send + Sync {
    async fn estimate(
        &self,
        task: &EstimationTask,
        binding: &DeviceBinding,
        working_directory: &Path,
    ) -> Result<EstimationResult, EngineError>;
}

/// An external engine executable and its fixed leading arguments.
///
/// The engine is invoked as `<program> <args..> <task.json> <result.json>`; it
/// reads the task file and writes an [`EstimationResult`] as JSON to the result path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCommand {
    program: String,
    args: Vec<String>,
}

impl EngineCommand {
    pub fn from_parts(parts: &[String]) -> Result<Self, EngineError> {
        let (program, args) = parts.split_first().ok_or_else(|| {
            EngineError::Configuration("engine command must name an executable".to_string())
        })?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn invocation(&self, task_path: &Path, result_path: &Path) -> Vec<String> {
        let mut line = Vec::with_capacity(self.args.len() + 3);
        line.push(self.program.clone());
        line.extend(self.args.iter().cloned());
        line.push(task_path.display().to_string());
        line.push(result_path.display().to_string());
        line
    }
}

pub fn write_task_file(directory: &Path, task: &EstimationTask) -> Result<PathBuf, EngineError> {
    std::fs::create_dir_all(directory).map_err(|e| EngineError::io(directory, e))?;
    let path = directory.join(TASK_FILE_NAME);
    let content = serde_json::to_vec(task)
        .map_err(|e| EngineError::serialization(format!("task '{}'", task.task_id), e))?;
    std::fs::write(&path, content).map_err(|e| EngineError::io(&path, e))?;
    Ok(path)
}

pub fn read_result_file(path: &Path) -> Result<EstimationResult, EngineError> {
    let content = std::fs::read_to_string(path).map_err(|e| EngineError::io(path, e))?;
    serde_json::from_str(&content)
        .map_err(|e| EngineError::serialization(format!("engine result '{}'", path.display()), e))
}

/// Restricts `result` to the properties of `task` and records every property
/// the engine did not report as an exception, so each submitted property has
/// exactly one outcome.
pub(crate) fn reconcile(task: &EstimationTask, result: EstimationResult) -> EstimationResult {
    let submitted: HashSet<&PropertyId> = task.properties.iter().map(|p| &p.id).collect();
    let mut seen: HashSet<PropertyId> = HashSet::new();
    let mut reconciled = EstimationResult::new();

    let mut accept = |id: &PropertyId| -> bool {
        if !submitted.contains(id) {
            warn!(task = %task.task_id, property = %id, "Engine reported a property that was not submitted; ignoring it.");
            return false;
        }
        if !seen.insert(id.clone()) {
            warn!(task = %task.task_id, property = %id, "Engine reported a property twice; keeping the first outcome.");
            return false;
        }
        true
    };

    for property in result.estimated {
        if accept(&property.id) {
            reconciled.estimated.push(property);
        }
    }
    for property in result.unsuccessful {
        if accept(&property.id) {
            reconciled.unsuccessful.push(property);
        }
    }
    for exception in result.exceptions {
        if accept(&exception.property_id) {
            reconciled.exceptions.push(exception);
        }
    }

    for property in &task.properties {
        if !seen.contains(&property.id) {
            reconciled.exceptions.push(EstimationException {
                property_id: property.id.clone(),
                message: "engine returned no outcome for this property".to_string(),
            });
        }
    }
    reconciled
}

/// Runs an external engine executable once per task.
#[derive(Debug, Clone)]
pub struct CommandEstimator {
    command: EngineCommand,
}

impl CommandEstimator {
    pub fn new(command: EngineCommand) -> Self {
        Self { command }
    }
}

#[async_trait]
impl PropertyEstimator for CommandEstimator {
    async fn estimate(
        &self,
        task: &EstimationTask,
        binding: &DeviceBinding,
        working_directory: &Path,
    ) -> Result<EstimationResult, EngineError> {
        let task_path = write_task_file(working_directory, task)?;
        let result_path = working_directory.join(RESULT_FILE_NAME);
        let invocation = self.command.invocation(&task_path, &result_path);
        let (variable, value) = binding.env_pair();

        debug!(task = %task.task_id, command = ?invocation, device = %value, "Launching engine.");
        let output = tokio::process::Command::new(&invocation[0])
            .args(&invocation[1..])
            .current_dir(working_directory)
            .env(variable, value)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                EngineError::Backend(format!(
                    "failed to launch engine '{}': {}",
                    self.command.program(),
                    e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::Backend(format!(
                "engine exited with {} for task '{}': {}",
                output.status,
                task.task_id,
                stderr.trim()
            )));
        }

        let result = read_result_file(&result_path)?;
        Ok(reconcile(task, result))
    }
}
