use propfleet::core::resources::DeviceBinding;
use propfleet::engine::config::{BackendConfig, PoolConfig, WorkerRunConfig};

/// Which calculation backend the worker process drives.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendChoice {
    Slurm(BackendConfig),
    Local {
        pool: PoolConfig,
        binding: DeviceBinding,
        engine_command: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub run: WorkerRunConfig,
    pub backend: BackendChoice,
}
