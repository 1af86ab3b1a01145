use crate::core::models::property::UncertaintyPolicy;
use crate::core::resources::ResourceDescriptor;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Invalid value for '{parameter}': {reason}")]
    InvalidValue {
        parameter: &'static str,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub minimum_number_of_workers: usize,
    pub maximum_number_of_workers: usize,
    pub adaptive_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            minimum_number_of_workers: 1,
            maximum_number_of_workers: 1,
            adaptive_interval: Duration::from_millis(1000),
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.minimum_number_of_workers == 0 {
            return Err(ConfigError::InvalidValue {
                parameter: "minimum_number_of_workers",
                reason: "at least one worker is required".to_string(),
            });
        }
        if self.minimum_number_of_workers > self.maximum_number_of_workers {
            return Err(ConfigError::InvalidValue {
                parameter: "maximum_number_of_workers",
                reason: format!(
                    "maximum ({}) is smaller than minimum ({})",
                    self.maximum_number_of_workers, self.minimum_number_of_workers
                ),
            });
        }
        if self.adaptive_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                parameter: "adaptive_interval",
                reason: "polling interval must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Settings of a queue-backed calculation backend for one worker process.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendConfig {
    pub pool: PoolConfig,
    pub resources: ResourceDescriptor,
    /// Engine executable followed by its fixed arguments. The task file and the
    /// result file paths are appended on invocation.
    pub engine_command: Vec<String>,
    /// Directory holding rendered queue scripts and queue logs.
    pub script_directory: PathBuf,
}

#[derive(Default)]
pub struct BackendConfigBuilder {
    pool: PoolConfig,
    resources: Option<ResourceDescriptor>,
    engine_command: Vec<String>,
    script_directory: Option<PathBuf>,
}

impl BackendConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn minimum_number_of_workers(mut self, n: usize) -> Self {
        self.pool.minimum_number_of_workers = n;
        self
    }
    pub fn maximum_number_of_workers(mut self, n: usize) -> Self {
        self.pool.maximum_number_of_workers = n;
        self
    }
    pub fn adaptive_interval(mut self, interval: Duration) -> Self {
        self.pool.adaptive_interval = interval;
        self
    }
    pub fn resources(mut self, resources: ResourceDescriptor) -> Self {
        self.resources = Some(resources);
        self
    }
    pub fn engine_command(mut self, command: Vec<String>) -> Self {
        self.engine_command = command;
        self
    }
    pub fn script_directory(mut self, path: PathBuf) -> Self {
        self.script_directory = Some(path);
        self
    }

    pub fn build(self) -> Result<BackendConfig, ConfigError> {
        self.pool.validate()?;
        if self.engine_command.is_empty() {
            return Err(ConfigError::MissingParameter("engine_command"));
        }
        Ok(BackendConfig {
            pool: self.pool,
            resources: self
                .resources
                .ok_or(ConfigError::MissingParameter("resources"))?,
            engine_command: self.engine_command,
            script_directory: self
                .script_directory
                .ok_or(ConfigError::MissingParameter("script_directory"))?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub bind_address: IpAddr,
    /// Port to listen on; `0` asks the OS for an ephemeral port.
    pub port: u16,
    pub working_directory: PathBuf,
    pub storage_directory: PathBuf,
    pub cache_objects_in_memory: bool,
    pub enable_data_caching: bool,
    pub delete_working_files: bool,
    /// Maximum properties per backend task; `None` sends a request as one task.
    pub batch_size: Option<usize>,
}

#[derive(Default)]
pub struct ServerConfigBuilder {
    bind_address: Option<IpAddr>,
    port: Option<u16>,
    working_directory: Option<PathBuf>,
    storage_directory: Option<PathBuf>,
    cache_objects_in_memory: Option<bool>,
    enable_data_caching: Option<bool>,
    delete_working_files: Option<bool>,
    batch_size: Option<usize>,
}

impl ServerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind_address(mut self, address: IpAddr) -> Self {
        self.bind_address = Some(address);
        self
    }
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }
    pub fn working_directory(mut self, path: PathBuf) -> Self {
        self.working_directory = Some(path);
        self
    }
    pub fn storage_directory(mut self, path: PathBuf) -> Self {
        self.storage_directory = Some(path);
        self
    }
    pub fn cache_objects_in_memory(mut self, enabled: bool) -> Self {
        self.cache_objects_in_memory = Some(enabled);
        self
    }
    pub fn enable_data_caching(mut self, enabled: bool) -> Self {
        self.enable_data_caching = Some(enabled);
        self
    }
    pub fn delete_working_files(mut self, enabled: bool) -> Self {
        self.delete_working_files = Some(enabled);
        self
    }
    pub fn batch_size(mut self, size: Option<usize>) -> Self {
        self.batch_size = size;
        self
    }

    pub fn build(self) -> Result<ServerConfig, ConfigError> {
        if self.batch_size == Some(0) {
            return Err(ConfigError::InvalidValue {
                parameter: "batch_size",
                reason: "batches must hold at least one property".to_string(),
            });
        }
        Ok(ServerConfig {
            bind_address: self
                .bind_address
                .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            port: self.port.ok_or(ConfigError::MissingParameter("port"))?,
            working_directory: self
                .working_directory
                .ok_or(ConfigError::MissingParameter("working_directory"))?,
            storage_directory: self
                .storage_directory
                .ok_or(ConfigError::MissingParameter("storage_directory"))?,
            cache_objects_in_memory: self.cache_objects_in_memory.unwrap_or(true),
            enable_data_caching: self.enable_data_caching.unwrap_or(false),
            delete_working_files: self.delete_working_files.unwrap_or(false),
            batch_size: self.batch_size,
        })
    }
}

/// Everything one worker process needs to estimate its share of a data set.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerRunConfig {
    pub input_path: PathBuf,
    pub forcefield_path: PathBuf,
    pub water_forcefield_path: PathBuf,
    pub options_path: PathBuf,
    /// Directory under which the force-field directory is created.
    pub base_directory: PathBuf,
    pub output_directory: PathBuf,
    pub replicate: u32,
    pub worker_id: usize,
    pub num_workers: usize,
    pub uncertainty_policy: UncertaintyPolicy,
    pub polling_interval: Duration,
    pub server: ServerConfig,
}

#[derive(Default)]
pub struct WorkerRunConfigBuilder {
    input_path: Option<PathBuf>,
    forcefield_path: Option<PathBuf>,
    water_forcefield_path: Option<PathBuf>,
    options_path: Option<PathBuf>,
    base_directory: Option<PathBuf>,
    output_directory: Option<PathBuf>,
    replicate: Option<u32>,
    worker_id: Option<usize>,
    num_workers: Option<usize>,
    uncertainty_policy: Option<UncertaintyPolicy>,
    polling_interval: Option<Duration>,
    server: Option<ServerConfig>,
}

impl WorkerRunConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input_path(mut self, path: PathBuf) -> Self {
        self.input_path = Some(path);
        self
    }
    pub fn forcefield_path(mut self, path: PathBuf) -> Self {
        self.forcefield_path = Some(path);
        self
    }
    pub fn water_forcefield_path(mut self, path: PathBuf) -> Self {
        self.water_forcefield_path = Some(path);
        self
    }
    pub fn options_path(mut self, path: PathBuf) -> Self {
        self.options_path = Some(path);
        self
    }
    pub fn base_directory(mut self, path: PathBuf) -> Self {
        self.base_directory = Some(path);
        self
    }
    pub fn output_directory(mut self, path: PathBuf) -> Self {
        self.output_directory = Some(path);
        self
    }
    pub fn replicate(mut self, replicate: u32) -> Self {
        self.replicate = Some(replicate);
        self
    }
    pub fn worker_id(mut self, id: usize) -> Self {
        self.worker_id = Some(id);
        self
    }
    pub fn num_workers(mut self, n: usize) -> Self {
        self.num_workers = Some(n);
        self
    }
    pub fn uncertainty_policy(mut self, policy: UncertaintyPolicy) -> Self {
        self.uncertainty_policy = Some(policy);
        self
    }
    pub fn polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = Some(interval);
        self
    }
    pub fn server(mut self, server: ServerConfig) -> Self {
        self.server = Some(server);
        self
    }

    pub fn build(self) -> Result<WorkerRunConfig, ConfigError> {
        let worker_id = self
            .worker_id
            .ok_or(ConfigError::MissingParameter("worker_id"))?;
        let num_workers = self
            .num_workers
            .ok_or(ConfigError::MissingParameter("num_workers"))?;
        if num_workers == 0 {
            return Err(ConfigError::InvalidValue {
                parameter: "num_workers",
                reason: "at least one worker is required".to_string(),
            });
        }
        if worker_id >= num_workers {
            return Err(ConfigError::InvalidValue {
                parameter: "worker_id",
                reason: format!(
                    "worker id {} must be below the number of workers ({})",
                    worker_id, num_workers
                ),
            });
        }
        let polling_interval = self
            .polling_interval
            .unwrap_or(Duration::from_secs(30));
        if polling_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                parameter: "polling_interval",
                reason: "polling interval must be positive".to_string(),
            });
        }

        Ok(WorkerRunConfig {
            input_path: self
                .input_path
                .ok_or(ConfigError::MissingParameter("input_path"))?,
            forcefield_path: self
                .forcefield_path
                .ok_or(ConfigError::MissingParameter("forcefield_path"))?,
            water_forcefield_path: self
                .water_forcefield_path
                .ok_or(ConfigError::MissingParameter("water_forcefield_path"))?,
            options_path: self
                .options_path
                .ok_or(ConfigError::MissingParameter("options_path"))?,
            base_directory: self.base_directory.unwrap_or_else(|| PathBuf::from(".")),
            output_directory: self
                .output_directory
                .unwrap_or_else(|| PathBuf::from("output")),
            replicate: self.replicate.unwrap_or(1),
            worker_id,
            num_workers,
            uncertainty_policy: self.uncertainty_policy.unwrap_or_default(),
            polling_interval,
            server: self.server.ok_or(ConfigError::MissingParameter("server"))?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeInputs {
    /// Files merged in the given order unless canonical ordering is requested.
    Files(Vec<PathBuf>),
    /// Every `results-worker*.json` file in a directory, always in worker order.
    Directory(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeConfig {
    pub inputs: MergeInputs,
    pub output_path: PathBuf,
    pub canonical_order: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> ServerConfig {
        ServerConfigBuilder::new()
            .port(8100)
            .working_directory(PathBuf::from("working-directory"))
            .storage_directory(PathBuf::from("stored_data"))
            .build()
            .unwrap()
    }

    #[test]
    fn server_defaults_disable_caching_and_keep_working_files() {
        let config = server();
        assert!(!config.enable_data_caching);
        assert!(!config.delete_working_files);
        assert!(config.cache_objects_in_memory);
        assert_eq!(config.bind_address, IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let result = ServerConfigBuilder::new()
            .port(1)
            .working_directory(PathBuf::from("w"))
            .storage_directory(PathBuf::from("s"))
            .batch_size(Some(0))
            .build();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue {
                parameter: "batch_size",
                ..
            })
        ));
    }

    #[test]
    fn pool_rejects_inverted_bounds() {
        let pool = PoolConfig {
            minimum_number_of_workers: 3,
            maximum_number_of_workers: 2,
            ..PoolConfig::default()
        };
        assert!(pool.validate().is_err());
        assert!(PoolConfig::default().validate().is_ok());
    }

    #[test]
    fn worker_config_rejects_out_of_range_worker_id() {
        let result = WorkerRunConfigBuilder::new()
            .input_path(PathBuf::from("in.json"))
            .forcefield_path(PathBuf::from("openff-2.2.1.offxml"))
            .water_forcefield_path(PathBuf::from("tip3p.offxml"))
            .options_path(PathBuf::from("request-options.json"))
            .worker_id(3)
            .num_workers(3)
            .server(server())
            .build();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue {
                parameter: "worker_id",
                ..
            })
        ));
    }

    #[test]
    fn worker_config_fills_defaults() {
        let config = WorkerRunConfigBuilder::new()
            .input_path(PathBuf::from("in.json"))
            .forcefield_path(PathBuf::from("openff-2.2.1.offxml"))
            .water_forcefield_path(PathBuf::from("tip3p.offxml"))
            .options_path(PathBuf::from("request-options.json"))
            .worker_id(0)
            .num_workers(3)
            .server(server())
            .build()
            .unwrap();
        assert_eq!(config.replicate, 1);
        assert_eq!(config.output_directory, PathBuf::from("output"));
        assert_eq!(config.polling_interval, Duration::from_secs(30));
        assert_eq!(config.uncertainty_policy, UncertaintyPolicy::FixedMagnitude(0.001));
    }
}
