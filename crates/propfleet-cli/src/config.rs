mod defaults;
mod models;

use defaults::DefaultsConfig;
pub use models::{AppConfig, BackendChoice};

use crate::cli::{BackendKind, RunArgs};
use crate::error::{CliError, Result};
use crate::utils::parser;
use clap::ValueEnum;
use propfleet::core::resources::{GpuToolkit, MemoryLimit, WallclockLimit, WorkerResourceTemplateBuilder};
use propfleet::engine::config::{
    BackendConfigBuilder, ConfigError, PoolConfig, ServerConfigBuilder, WorkerRunConfigBuilder,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct PartialBackendConfig {
    kind: Option<BackendKind>,
    engine_command: Option<Vec<String>>,
    minimum_workers: Option<usize>,
    maximum_workers: Option<usize>,
    adaptive_interval_ms: Option<u64>,
    script_directory: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct PartialResourcesConfig {
    queue: Option<String>,
    threads: Option<u32>,
    gpus: Option<u32>,
    gpu_toolkit: Option<String>,
    memory_limit: Option<String>,
    wallclock_limit: Option<String>,
    #[serde(default)]
    setup_commands: Vec<String>,
    #[serde(default)]
    extra_options: Vec<String>,
    #[serde(default)]
    environment: BTreeMap<String, String>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct PartialServerConfig {
    working_directory: Option<PathBuf>,
    cache_objects_in_memory: Option<bool>,
    enable_data_caching: Option<bool>,
    delete_working_files: Option<bool>,
    batch_size: Option<usize>,
}

/// The TOML layer of a `run` invocation. Every field is optional; command-line
/// arguments take precedence, then this file (including `--set` overrides),
/// then [`DefaultsConfig`].
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PartialRunConfig {
    input_path: Option<PathBuf>,
    options_path: Option<PathBuf>,
    base_directory: Option<PathBuf>,
    output_directory: Option<PathBuf>,
    replicate: Option<u32>,
    num_workers: Option<usize>,
    port: Option<u16>,
    polling_interval: Option<u64>,
    uncertainty: Option<String>,
    backend: Option<PartialBackendConfig>,
    resources: Option<PartialResourcesConfig>,
    server: Option<PartialServerConfig>,
}

fn config_error(e: ConfigError) -> CliError {
    CliError::Config(e.to_string())
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| CliError::Config(format!("Invalid value for {}: {}", key, value)))
}

impl PartialRunConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from file: {:?}", path);
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })
    }

    pub fn merge_with_cli(mut self, args: &RunArgs) -> Result<AppConfig> {
        self.apply_set_values(&args.set_values)?;
        let defaults = DefaultsConfig::default();

        let backend_file = self.backend.take().unwrap_or_default();
        let resources_file = self.resources.take().unwrap_or_default();
        let server_file = self.server.take().unwrap_or_default();

        let num_workers = args
            .num_workers
            .or(self.num_workers)
            .unwrap_or(defaults.num_workers);

        let uncertainty_policy = args
            .uncertainty
            .as_deref()
            .or(self.uncertainty.as_deref())
            .map(parser::parse_uncertainty_policy)
            .transpose()
            .map_err(|e| CliError::Argument(e.to_string()))?
            .unwrap_or_default();

        let engine_command = match args.engine_command.as_deref() {
            Some(command) => Some(
                parser::parse_engine_command(command)
                    .map_err(|e| CliError::Argument(e.to_string()))?,
            ),
            None => backend_file.engine_command,
        }
        .filter(|parts| !parts.is_empty())
        .ok_or_else(|| {
            CliError::Config(
                "An engine command is required either in the config file ([backend] engine-command) or via --engine-command."
                    .to_string(),
            )
        })?;

        // --- Resources ---
        let toolkit: GpuToolkit = resources_file
            .gpu_toolkit
            .as_deref()
            .unwrap_or(defaults.gpu_toolkit)
            .parse()
            .map_err(config_error)?;
        let memory_limit: MemoryLimit = resources_file
            .memory_limit
            .as_deref()
            .unwrap_or(defaults.memory_limit)
            .parse()
            .map_err(config_error)?;
        let wallclock_limit: WallclockLimit = resources_file
            .wallclock_limit
            .as_deref()
            .unwrap_or(defaults.wallclock_limit)
            .parse()
            .map_err(config_error)?;
        let template = WorkerResourceTemplateBuilder::new()
            .number_of_threads(resources_file.threads.unwrap_or(defaults.number_of_threads))
            .number_of_gpus(resources_file.gpus.unwrap_or(defaults.number_of_gpus))
            .gpu_toolkit(toolkit)
            .per_thread_memory_limit(memory_limit)
            .wallclock_time_limit(wallclock_limit)
            .queue_name(
                args.queue
                    .clone()
                    .or(resources_file.queue)
                    .unwrap_or_else(|| defaults.queue_name.to_string()),
            )
            .setup_script_commands(resources_file.setup_commands)
            .extra_script_options(resources_file.extra_options)
            .environment(resources_file.environment)
            .build()
            .map_err(config_error)?;
        let descriptor = template.descriptor_for(args.worker_id, num_workers)?;

        // --- Server ---
        let working_directory = server_file
            .working_directory
            .unwrap_or_else(|| PathBuf::from(defaults.working_directory));
        let server = ServerConfigBuilder::new()
            .port(args.port.or(self.port).unwrap_or(defaults.port))
            .working_directory(working_directory.clone())
            .storage_directory(args.storage_directory.clone())
            .cache_objects_in_memory(server_file.cache_objects_in_memory.unwrap_or(true))
            .enable_data_caching(
                args.enable_data_caching
                    .or(server_file.enable_data_caching)
                    .unwrap_or(false),
            )
            .delete_working_files(
                args.delete_working_files
                    .or(server_file.delete_working_files)
                    .unwrap_or(false),
            )
            .batch_size(server_file.batch_size)
            .build()
            .map_err(config_error)?;

        // --- Backend ---
        let pool = PoolConfig {
            minimum_number_of_workers: backend_file
                .minimum_workers
                .unwrap_or(defaults.minimum_number_of_workers),
            maximum_number_of_workers: backend_file
                .maximum_workers
                .unwrap_or(defaults.maximum_number_of_workers),
            adaptive_interval: backend_file
                .adaptive_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.adaptive_interval),
        };
        pool.validate().map_err(config_error)?;

        let backend = match args.backend.or(backend_file.kind).unwrap_or(BackendKind::Slurm) {
            BackendKind::Slurm => BackendChoice::Slurm(
                BackendConfigBuilder::new()
                    .minimum_number_of_workers(pool.minimum_number_of_workers)
                    .maximum_number_of_workers(pool.maximum_number_of_workers)
                    .adaptive_interval(pool.adaptive_interval)
                    .resources(descriptor)
                    .engine_command(engine_command)
                    .script_directory(
                        backend_file
                            .script_directory
                            .unwrap_or_else(|| working_directory.join(defaults.script_directory_name)),
                    )
                    .build()
                    .map_err(config_error)?,
            ),
            BackendKind::Local => BackendChoice::Local {
                pool,
                binding: descriptor.device_binding,
                engine_command,
            },
        };

        // --- Worker run ---
        let mut run = WorkerRunConfigBuilder::new()
            .input_path(
                args.input_path
                    .clone()
                    .or(self.input_path)
                    .unwrap_or_else(|| PathBuf::from(defaults.input_path)),
            )
            .forcefield_path(args.forcefield.clone())
            .water_forcefield_path(args.water_forcefield.clone())
            .options_path(
                args.options_file
                    .clone()
                    .or(self.options_path)
                    .unwrap_or_else(|| PathBuf::from(defaults.options_path)),
            )
            .output_directory(
                args.output_directory
                    .clone()
                    .or(self.output_directory)
                    .unwrap_or_else(|| PathBuf::from(defaults.output_directory)),
            )
            .replicate(args.replicate.or(self.replicate).unwrap_or(defaults.replicate))
            .worker_id(args.worker_id)
            .num_workers(num_workers)
            .uncertainty_policy(uncertainty_policy)
            .polling_interval(
                args.polling_interval
                    .or(self.polling_interval)
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.polling_interval),
            )
            .server(server);
        if let Some(base_directory) = self.base_directory {
            run = run.base_directory(base_directory);
        }
        let run = run.build().map_err(config_error)?;

        Ok(AppConfig { run, backend })
    }

    fn apply_set_values(&mut self, set_values: &[String]) -> Result<()> {
        for kv_pair in set_values {
            let Some((key, value)) = kv_pair.split_once('=') else {
                return Err(CliError::Config(format!(
                    "Invalid --set format: '{}'. Expected KEY=VALUE.",
                    kv_pair
                )));
            };

            match key {
                "replicate" => self.replicate = Some(parse_value(key, value)?),
                "num-workers" => self.num_workers = Some(parse_value(key, value)?),
                "port" => self.port = Some(parse_value(key, value)?),
                "polling-interval" => self.polling_interval = Some(parse_value(key, value)?),
                "uncertainty" => self.uncertainty = Some(value.to_string()),
                "backend.kind" => {
                    self.backend.get_or_insert_with(Default::default).kind =
                        Some(<BackendKind as ValueEnum>::from_str(value, true).map_err(CliError::Config)?);
                }
                "backend.engine-command" => {
                    self.backend.get_or_insert_with(Default::default).engine_command = Some(
                        parser::parse_engine_command(value)
                            .map_err(|e| CliError::Config(e.to_string()))?,
                    );
                }
                "backend.minimum-workers" => {
                    self.backend.get_or_insert_with(Default::default).minimum_workers =
                        Some(parse_value(key, value)?);
                }
                "backend.maximum-workers" => {
                    self.backend.get_or_insert_with(Default::default).maximum_workers =
                        Some(parse_value(key, value)?);
                }
                "backend.adaptive-interval-ms" => {
                    self.backend
                        .get_or_insert_with(Default::default)
                        .adaptive_interval_ms = Some(parse_value(key, value)?);
                }
                "resources.queue" => {
                    self.resources.get_or_insert_with(Default::default).queue =
                        Some(value.to_string());
                }
                "resources.threads" => {
                    self.resources.get_or_insert_with(Default::default).threads =
                        Some(parse_value(key, value)?);
                }
                "resources.gpus" => {
                    self.resources.get_or_insert_with(Default::default).gpus =
                        Some(parse_value(key, value)?);
                }
                "resources.gpu-toolkit" => {
                    self.resources.get_or_insert_with(Default::default).gpu_toolkit =
                        Some(value.to_string());
                }
                "resources.memory-limit" => {
                    self.resources.get_or_insert_with(Default::default).memory_limit =
                        Some(value.to_string());
                }
                "resources.wallclock-limit" => {
                    self.resources
                        .get_or_insert_with(Default::default)
                        .wallclock_limit = Some(value.to_string());
                }
                "server.enable-data-caching" => {
                    self.server
                        .get_or_insert_with(Default::default)
                        .enable_data_caching = Some(parse_value(key, value)?);
                }
                "server.delete-working-files" => {
                    self.server
                        .get_or_insert_with(Default::default)
                        .delete_working_files = Some(parse_value(key, value)?);
                }
                "server.batch-size" => {
                    self.server.get_or_insert_with(Default::default).batch_size =
                        Some(parse_value(key, value)?);
                }
                _ => {
                    return Err(CliError::Config(format!(
                        "Unsupported configuration key for --set: '{}'",
                        key
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Loads the optional TOML file and layers the `run` arguments on top of it.
pub fn build_run_config(args: &RunArgs) -> Result<AppConfig> {
    let partial = match &args.config {
        Some(path) => PartialRunConfig::from_file(path)?,
        None => PartialRunConfig::default(),
    };
    partial.merge_with_cli(args)
}
