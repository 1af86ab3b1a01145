use super::{BackendState, CalculationBackend, WorkerPool};
use crate::core::models::request::EstimationTask;
use crate::core::models::result::EstimationResult;
use crate::core::resources::DeviceBinding;
use crate::engine::config::PoolConfig;
use crate::engine::error::EngineError;
use crate::engine::estimator::{PropertyEstimator, reconcile};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Runs tasks in this process through a [`PropertyEstimator`], at most
/// `maximum_number_of_workers` at a time.
pub struct LocalBackend {
    pool: WorkerPool,
    binding: DeviceBinding,
    estimator: Arc<dyn PropertyEstimator>,
}

impl LocalBackend {
    pub fn new(
        pool: PoolConfig,
        binding: DeviceBinding,
        estimator: Arc<dyn PropertyEstimator>,
    ) -> Self {
        Self {
            pool: WorkerPool::new(pool),
            binding,
            estimator,
        }
    }
}

#[async_trait]
impl CalculationBackend for LocalBackend {
    fn state(&self) -> BackendState {
        self.pool.state()
    }

    async fn start(&self) -> Result<(), EngineError> {
        self.pool.start()?;
        info!(
            workers = self.pool.config().maximum_number_of_workers,
            device = self.binding.visible_device,
            "Local backend ready."
        );
        Ok(())
    }

    async fn submit_task(
        &self,
        task: EstimationTask,
        working_directory: PathBuf,
    ) -> Result<EstimationResult, EngineError> {
        let _permit = self.pool.acquire().await?;
        std::fs::create_dir_all(&working_directory)
            .map_err(|e| EngineError::io(&working_directory, e))?;

        debug!(task = %task.task_id, properties = task.properties.len(), "Running task locally.");
        let result = self
            .estimator
            .estimate(&task, &self.binding, &working_directory)
            .await?;
        Ok(reconcile(&task, result))
    }

    async fn stop(&self) -> Result<(), EngineError> {
        if self.pool.stop() {
            info!("Local backend stopped.");
        }
        Ok(())
    }
}
