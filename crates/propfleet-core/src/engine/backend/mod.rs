//! Calculation backends execute estimation tasks on compute resources.
//!
//! A backend moves through [`BackendState::Uninitialized`] → `Started` →
//! `Running` → `Stopped`. [`with_backend`] brackets a unit of work so that
//! `stop` runs on every exit path, releasing queue jobs and accelerators.

pub mod local;
pub mod slurm;

use super::config::PoolConfig;
use super::error::EngineError;
use crate::core::models::request::EstimationTask;
use crate::core::models::result::EstimationResult;
use async_trait::async_trait;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    Uninitialized,
    Started,
    Running,
    Stopped,
}

#[async_trait]
pub trait CalculationBackend: Send + Sync {
    fn state(&self) -> BackendState;

    async fn start(&self) -> Result<(), EngineError>;

    /// Runs one task to completion inside `working_directory`.
    async fn submit_task(
        &self,
        task: EstimationTask,
        working_directory: PathBuf,
    ) -> Result<EstimationResult, EngineError>;

    async fn stop(&self) -> Result<(), EngineError>;
}

/// Starts `backend`, runs `body`, and stops the backend whether or not the body
/// succeeded. A failed start is also followed by a stop. An error from `start`
/// or `body` takes precedence over one from `stop`.
pub async fn with_backend<B, F, Fut, T>(backend: Arc<B>, body: F) -> Result<T, EngineError>
where
    B: CalculationBackend + ?Sized,
    F: FnOnce(Arc<B>) -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    if let Err(e) = backend.start().await {
        if let Err(stop_error) = backend.stop().await {
            error!(error = %stop_error, "Backend failed to stop cleanly after a failed start.");
        }
        return Err(e);
    }
    let outcome = body(backend.clone()).await;
    let stopped = backend.stop().await;

    match (outcome, stopped) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(stop_error)) => Err(stop_error),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(stop_error)) => {
            error!(error = %stop_error, "Backend failed to stop cleanly after an earlier error.");
            Err(e)
        }
    }
}

/// Lifecycle bookkeeping and the worker pool bound shared by backends.
#[derive(Debug)]
pub(crate) struct WorkerPool {
    config: PoolConfig,
    state: Mutex<BackendState>,
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    pub(crate) fn new(config: PoolConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.maximum_number_of_workers.max(1)));
        Self {
            config,
            state: Mutex::new(BackendState::Uninitialized),
            permits,
        }
    }

    pub(crate) fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub(crate) fn state(&self) -> BackendState {
        *self.lock()
    }

    pub(crate) fn start(&self) -> Result<(), EngineError> {
        self.config.validate()?;
        let mut state = self.lock();
        match *state {
            BackendState::Uninitialized => {
                *state = BackendState::Started;
                debug!(
                    min = self.config.minimum_number_of_workers,
                    max = self.config.maximum_number_of_workers,
                    "Backend started."
                );
                Ok(())
            }
            other => Err(EngineError::Backend(format!(
                "backend cannot be started from state {:?}",
                other
            ))),
        }
    }

    /// Waits for a free worker slot; the slot is released when the permit drops.
    pub(crate) async fn acquire(&self) -> Result<OwnedSemaphorePermit, EngineError> {
        {
            let mut state = self.lock();
            match *state {
                BackendState::Started | BackendState::Running => *state = BackendState::Running,
                other => {
                    return Err(EngineError::Backend(format!(
                        "backend is not accepting tasks in state {:?}",
                        other
                    )));
                }
            }
        }
        self.permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| EngineError::Backend("backend was stopped".to_string()))
    }

    /// Marks the pool stopped and refuses further tasks. Returns `false` if it
    /// was already stopped.
    pub(crate) fn stop(&self) -> bool {
        let mut state = self.lock();
        if *state == BackendState::Stopped {
            return false;
        }
        *state = BackendState::Stopped;
        self.permits.close();
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BackendState> {
        // The state is a plain enum; a poisoned lock still holds a valid value.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct RecordingBackend {
        pool_stopped: AtomicBool,
        started: AtomicBool,
        fail_start: bool,
    }

    #[async_trait]
    impl CalculationBackend for RecordingBackend {
        fn state(&self) -> BackendState {
            if self.pool_stopped.load(Ordering::SeqCst) {
                BackendState::Stopped
            } else if self.started.load(Ordering::SeqCst) {
                BackendState::Started
            } else {
                BackendState::Uninitialized
            }
        }

        async fn start(&self) -> Result<(), EngineError> {
            if self.fail_start {
                return Err(EngineError::ResourceProvisioning(
                    "queue unreachable".to_string(),
                ));
            }
            self.started.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn submit_task(
            &self,
            _task: EstimationTask,
            _working_directory: PathBuf,
        ) -> Result<EstimationResult, EngineError> {
            Err(EngineError::Backend("unused".to_string()))
        }

        async fn stop(&self) -> Result<(), EngineError> {
            self.pool_stopped.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn with_backend_stops_after_body_error() {
        let backend = Arc::new(RecordingBackend::default());

        let result: Result<(), _> = with_backend(backend.clone(), |_| async {
            Err(EngineError::Submission("connection refused".to_string()))
        })
        .await;

        assert!(matches!(result, Err(EngineError::Submission(_))));
        assert_eq!(backend.state(), BackendState::Stopped);
    }

    #[tokio::test]
    async fn with_backend_stops_after_failed_start_without_running_body() {
        let backend = Arc::new(RecordingBackend {
            fail_start: true,
            ..RecordingBackend::default()
        });
        let body_ran = AtomicBool::new(false);

        let result: Result<(), _> = with_backend(backend.clone(), |_| async {
            body_ran.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(EngineError::ResourceProvisioning(_))));
        assert!(!body_ran.load(Ordering::SeqCst));
        assert_eq!(backend.state(), BackendState::Stopped);
    }

    #[tokio::test]
    async fn with_backend_returns_body_value() {
        let backend = Arc::new(RecordingBackend::default());
        let value = with_backend(backend.clone(), |_| async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
        assert_eq!(backend.state(), BackendState::Stopped);
    }

    #[tokio::test]
    async fn pool_follows_lifecycle() {
        let pool = WorkerPool::new(PoolConfig::default());
        assert_eq!(pool.state(), BackendState::Uninitialized);
        assert!(pool.acquire().await.is_err());

        pool.start().unwrap();
        assert_eq!(pool.state(), BackendState::Started);
        let permit = pool.acquire().await.unwrap();
        assert_eq!(pool.state(), BackendState::Running);
        drop(permit);

        assert!(pool.stop());
        assert!(!pool.stop());
        assert!(pool.acquire().await.is_err());
        assert!(pool.start().is_err());
    }

    #[test]
    fn invalid_pool_bounds_fail_to_start() {
        let pool = WorkerPool::new(PoolConfig {
            minimum_number_of_workers: 0,
            ..PoolConfig::default()
        });
        assert!(matches!(pool.start(), Err(EngineError::Configuration(_))));
    }
}
