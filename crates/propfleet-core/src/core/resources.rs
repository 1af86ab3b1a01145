//! Queue resource requests for accelerator-bound workers.
//!
//! A [`WorkerResourceTemplate`] captures the static part of a queue submission
//! (threads, accelerators, memory, wallclock, queue name, setup commands). Calling
//! [`WorkerResourceTemplate::descriptor_for`] specializes it for one worker index,
//! binding exactly one accelerator device to that worker.

use crate::engine::config::ConfigError;
use crate::engine::error::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GpuToolkit {
    Cuda,
    OpenCl,
}

impl GpuToolkit {
    /// Environment variable that restricts which devices the toolkit can see.
    pub fn visibility_variable(&self) -> &'static str {
        match self {
            Self::Cuda => "CUDA_VISIBLE_DEVICES",
            Self::OpenCl => "GPU_DEVICE_ORDINAL",
        }
    }
}

impl FromStr for GpuToolkit {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cuda" => Ok(Self::Cuda),
            "opencl" | "open-cl" => Ok(Self::OpenCl),
            other => Err(ConfigError::InvalidValue {
                parameter: "gpu_toolkit",
                reason: format!("unknown toolkit '{}', expected 'cuda' or 'opencl'", other),
            }),
        }
    }
}

/// The single accelerator device a worker is allowed to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceBinding {
    pub toolkit: GpuToolkit,
    pub visible_device: usize,
}

impl DeviceBinding {
    pub fn new(toolkit: GpuToolkit, visible_device: usize) -> Self {
        Self {
            toolkit,
            visible_device,
        }
    }

    /// The `(variable, value)` pair that exposes only the bound device.
    pub fn env_pair(&self) -> (String, String) {
        (
            self.toolkit.visibility_variable().to_string(),
            self.visible_device.to_string(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryLimit {
    megabytes: u64,
}

impl MemoryLimit {
    pub fn from_megabytes(megabytes: u64) -> Self {
        Self { megabytes }
    }

    pub fn from_gigabytes(gigabytes: u64) -> Self {
        Self {
            megabytes: gigabytes.saturating_mul(1024),
        }
    }

    pub fn megabytes(&self) -> u64 {
        self.megabytes
    }
}

impl fmt::Display for MemoryLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}M", self.megabytes)
    }
}

impl FromStr for MemoryLimit {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::InvalidValue {
            parameter: "memory_limit",
            reason: format!("'{}': {}", s, reason),
        };

        let trimmed = s.trim();
        let split = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(trimmed.len());
        let (digits, unit) = trimmed.split_at(split);
        let amount: u64 = digits
            .parse()
            .map_err(|_| invalid("expected a whole number followed by a unit"))?;

        let scale: u64 = match unit.trim().to_ascii_uppercase().as_str() {
            "" | "M" | "MB" | "MIB" => 1,
            "G" | "GB" | "GIB" => 1024,
            "T" | "TB" | "TIB" => 1024 * 1024,
            _ => return Err(invalid("unit must be one of M, MB, G, GB, T, TB")),
        };
        let megabytes = amount
            .checked_mul(scale)
            .ok_or_else(|| invalid("memory limit is too large"))?;
        if megabytes == 0 {
            return Err(invalid("memory limit must be positive"));
        }
        Ok(Self { megabytes })
    }
}

/// Wallclock limit in the queue manager's `[D-]HH:MM:SS` notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WallclockLimit {
    seconds: u64,
}

impl WallclockLimit {
    pub fn from_duration(duration: Duration) -> Self {
        Self {
            seconds: duration.as_secs(),
        }
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.seconds)
    }
}

impl fmt::Display for WallclockLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let days = self.seconds / 86_400;
        let hours = (self.seconds % 86_400) / 3_600;
        let minutes = (self.seconds % 3_600) / 60;
        let seconds = self.seconds % 60;
        if days > 0 {
            write!(f, "{}-{:02}:{:02}:{:02}", days, hours, minutes, seconds)
        } else {
            write!(f, "{:02}:{:02}:{:02}", hours, minutes, seconds)
        }
    }
}

impl FromStr for WallclockLimit {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidValue {
            parameter: "wallclock_limit",
            reason: format!("'{}' is not in [D-]HH:MM:SS format", s),
        };

        let (days, clock) = match s.trim().split_once('-') {
            Some((days, clock)) => (days.parse::<u64>().map_err(|_| invalid())?, clock),
            None => (0, s.trim()),
        };

        let parts: Vec<u64> = clock
            .split(':')
            .map(|p| p.parse::<u64>().map_err(|_| invalid()))
            .collect::<Result<_, _>>()?;
        let &[hours, minutes, seconds] = parts.as_slice() else {
            return Err(invalid());
        };
        if minutes >= 60 || seconds >= 60 {
            return Err(invalid());
        }

        let total = days
            .checked_mul(86_400)
            .zip(hours.checked_mul(3_600))
            .and_then(|(days, hours)| days.checked_add(hours))
            .and_then(|total| total.checked_add(minutes * 60 + seconds))
            .ok_or_else(|| ConfigError::InvalidValue {
                parameter: "wallclock_limit",
                reason: format!("'{}' is too long", s),
            })?;
        if total == 0 {
            return Err(ConfigError::InvalidValue {
                parameter: "wallclock_limit",
                reason: "wallclock limit must be positive".to_string(),
            });
        }
        Ok(Self { seconds: total })
    }
}

/// Static queue-submission parameters shared by every worker of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResourceTemplate {
    pub number_of_threads: u32,
    pub number_of_gpus: u32,
    pub gpu_toolkit: GpuToolkit,
    pub per_thread_memory_limit: MemoryLimit,
    pub wallclock_time_limit: WallclockLimit,
    pub queue_name: String,
    pub setup_script_commands: Vec<String>,
    pub extra_script_options: Vec<String>,
    pub environment: BTreeMap<String, String>,
}

/// Fully specified resource request for one worker's queue job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub worker_index: usize,
    pub thread_count: u32,
    pub accelerator_count: u32,
    pub accelerator_toolkit: GpuToolkit,
    pub memory_limit: MemoryLimit,
    pub wallclock_limit: WallclockLimit,
    pub queue_name: String,
    pub device_binding: DeviceBinding,
    pub env_overrides: BTreeMap<String, String>,
    pub setup_commands: Vec<String>,
    pub extra_script_options: Vec<String>,
}

impl WorkerResourceTemplate {
    /// Specializes the template for `worker_index`, binding accelerator device
    /// `worker_index` to it.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Configuration`] when `worker_index >= worker_count`.
    pub fn descriptor_for(
        &self,
        worker_index: usize,
        worker_count: usize,
    ) -> Result<ResourceDescriptor, EngineError> {
        if worker_index >= worker_count {
            return Err(EngineError::Configuration(format!(
                "worker index {} must be below the declared worker count {}",
                worker_index, worker_count
            )));
        }

        let device_binding = DeviceBinding::new(self.gpu_toolkit, worker_index);
        let (variable, device) = device_binding.env_pair();

        let mut env_overrides = self.environment.clone();
        env_overrides.insert(variable.clone(), device.clone());

        let mut extra_script_options = self.extra_script_options.clone();
        if self.number_of_gpus > 0 {
            extra_script_options.push(format!("--gres=gpu:{}", self.number_of_gpus));
        }
        extra_script_options.push(format!("--export=ALL,{}={}", variable, device));

        Ok(ResourceDescriptor {
            worker_index,
            thread_count: self.number_of_threads,
            accelerator_count: self.number_of_gpus,
            accelerator_toolkit: self.gpu_toolkit,
            memory_limit: self.per_thread_memory_limit,
            wallclock_limit: self.wallclock_time_limit,
            queue_name: self.queue_name.clone(),
            device_binding,
            env_overrides,
            setup_commands: self.setup_script_commands.clone(),
            extra_script_options,
        })
    }
}

#[derive(Default)]
pub struct WorkerResourceTemplateBuilder {
    number_of_threads: Option<u32>,
    number_of_gpus: Option<u32>,
    gpu_toolkit: Option<GpuToolkit>,
    per_thread_memory_limit: Option<MemoryLimit>,
    wallclock_time_limit: Option<WallclockLimit>,
    queue_name: Option<String>,
    setup_script_commands: Vec<String>,
    extra_script_options: Vec<String>,
    environment: BTreeMap<String, String>,
}

impl WorkerResourceTemplateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn number_of_threads(mut self, threads: u32) -> Self {
        self.number_of_threads = Some(threads);
        self
    }
    pub fn number_of_gpus(mut self, gpus: u32) -> Self {
        self.number_of_gpus = Some(gpus);
        self
    }
    pub fn gpu_toolkit(mut self, toolkit: GpuToolkit) -> Self {
        self.gpu_toolkit = Some(toolkit);
        self
    }
    pub fn per_thread_memory_limit(mut self, limit: MemoryLimit) -> Self {
        self.per_thread_memory_limit = Some(limit);
        self
    }
    pub fn wallclock_time_limit(mut self, limit: WallclockLimit) -> Self {
        self.wallclock_time_limit = Some(limit);
        self
    }
    pub fn queue_name(mut self, name: impl Into<String>) -> Self {
        self.queue_name = Some(name.into());
        self
    }
    pub fn setup_script_commands(mut self, commands: Vec<String>) -> Self {
        self.setup_script_commands = commands;
        self
    }
    pub fn extra_script_options(mut self, options: Vec<String>) -> Self {
        self.extra_script_options = options;
        self
    }
    pub fn environment(mut self, environment: BTreeMap<String, String>) -> Self {
        self.environment = environment;
        self
    }

    pub fn build(self) -> Result<WorkerResourceTemplate, ConfigError> {
        let number_of_threads = self
            .number_of_threads
            .ok_or(ConfigError::MissingParameter("number_of_threads"))?;
        if number_of_threads == 0 {
            return Err(ConfigError::InvalidValue {
                parameter: "number_of_threads",
                reason: "at least one thread is required".to_string(),
            });
        }
        let queue_name = self
            .queue_name
            .ok_or(ConfigError::MissingParameter("queue_name"))?;
        if queue_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                parameter: "queue_name",
                reason: "queue name cannot be empty".to_string(),
            });
        }

        Ok(WorkerResourceTemplate {
            number_of_threads,
            number_of_gpus: self
                .number_of_gpus
                .ok_or(ConfigError::MissingParameter("number_of_gpus"))?,
            gpu_toolkit: self
                .gpu_toolkit
                .ok_or(ConfigError::MissingParameter("gpu_toolkit"))?,
            per_thread_memory_limit: self
                .per_thread_memory_limit
                .ok_or(ConfigError::MissingParameter("per_thread_memory_limit"))?,
            wallclock_time_limit: self
                .wallclock_time_limit
                .ok_or(ConfigError::MissingParameter("wallclock_time_limit"))?,
            queue_name,
            setup_script_commands: self.setup_script_commands,
            extra_script_options: self.extra_script_options,
            environment: self.environment,
        })
    }
}
