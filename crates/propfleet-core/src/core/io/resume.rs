use super::snapshot::{WorkerOutputPaths, sha256_hex};
use crate::engine::error::EngineError;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeDecision {
    /// A verified result from a previous run exists; nothing needs computing.
    AlreadyComplete,
    /// No usable result exists; the worker must compute.
    Compute,
}

/// Decides whether a worker can skip its run because a previous invocation
/// already produced a verified result.
#[derive(Debug, Clone)]
pub struct ResumeGuard {
    paths: WorkerOutputPaths,
}

impl ResumeGuard {
    pub fn new(paths: WorkerOutputPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &WorkerOutputPaths {
        &self.paths
    }

    pub fn check(&self) -> Result<ResumeDecision, EngineError> {
        let json_path = self.paths.json_path();
        let marker_path = self.paths.marker_path();

        if !json_path.exists() {
            debug!(path = %json_path.display(), "No previous result found.");
            return Ok(ResumeDecision::Compute);
        }
        if !marker_path.exists() {
            warn!(
                path = %json_path.display(),
                "Result file has no completion marker; the previous run was interrupted or incomplete, recomputing."
            );
            return Ok(ResumeDecision::Compute);
        }

        let json = std::fs::read(&json_path).map_err(|e| EngineError::io(&json_path, e))?;
        let marker =
            std::fs::read_to_string(&marker_path).map_err(|e| EngineError::io(&marker_path, e))?;

        if marker.trim() == sha256_hex(&json) {
            Ok(ResumeDecision::AlreadyComplete)
        } else {
            warn!(
                path = %json_path.display(),
                "Completion marker does not match the result file; recomputing."
            );
            Ok(ResumeDecision::Compute)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::snapshot::write_worker_results;
    use crate::core::models::result::EstimationResult;
    use tempfile::tempdir;

    fn guard(dir: &std::path::Path) -> ResumeGuard {
        ResumeGuard::new(WorkerOutputPaths::new(dir.join("rep-1"), 2))
    }

    #[test]
    fn fresh_directory_requires_computation() {
        let dir = tempdir().unwrap();
        assert_eq!(guard(dir.path()).check().unwrap(), ResumeDecision::Compute);
    }

    #[test]
    fn completed_run_is_detected() {
        let dir = tempdir().unwrap();
        let guard = guard(dir.path());
        write_worker_results(guard.paths(), &EstimationResult::new()).unwrap();

        assert_eq!(guard.check().unwrap(), ResumeDecision::AlreadyComplete);
    }

    #[test]
    fn result_without_marker_is_recomputed() {
        let dir = tempdir().unwrap();
        let guard = guard(dir.path());
        write_worker_results(guard.paths(), &EstimationResult::new()).unwrap();
        std::fs::remove_file(guard.paths().marker_path()).unwrap();

        assert_eq!(guard.check().unwrap(), ResumeDecision::Compute);
    }

    #[test]
    fn tampered_result_is_recomputed() {
        let dir = tempdir().unwrap();
        let guard = guard(dir.path());
        write_worker_results(guard.paths(), &EstimationResult::new()).unwrap();
        std::fs::write(guard.paths().json_path(), "{\"trunc").unwrap();

        assert_eq!(guard.check().unwrap(), ResumeDecision::Compute);
    }
}
