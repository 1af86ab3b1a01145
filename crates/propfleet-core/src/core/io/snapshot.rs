use super::fs::write_atomically;
use crate::core::models::result::{EstimationResult, KeyedOutcomes};
use crate::engine::error::EngineError;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Locations of one worker's result files inside a replicate directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerOutputPaths {
    directory: PathBuf,
    worker_index: usize,
}

impl WorkerOutputPaths {
    pub fn new(directory: impl Into<PathBuf>, worker_index: usize) -> Self {
        Self {
            directory: directory.into(),
            worker_index,
        }
    }

    /// `<force-field dir>/<output dir>/rep-<replicate>` for a worker.
    pub fn for_replicate(
        force_field_directory: &Path,
        output_directory: &Path,
        replicate: u32,
        worker_index: usize,
    ) -> Self {
        Self::new(
            force_field_directory
                .join(output_directory)
                .join(format!("rep-{}", replicate)),
            worker_index,
        )
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn worker_index(&self) -> usize {
        self.worker_index
    }

    pub fn json_path(&self) -> PathBuf {
        self.file("json")
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.file("bin")
    }

    pub fn marker_path(&self) -> PathBuf {
        self.file("done")
    }

    fn file(&self, extension: &str) -> PathBuf {
        self.directory
            .join(format!("results-worker{}.{}", self.worker_index, extension))
    }
}

pub(crate) fn sha256_hex(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// Writes the binary snapshot and the keyed JSON mapping. When every property
/// was estimated the completion marker holding the digest of the JSON file is
/// written last; otherwise any stale marker is removed so a re-run recomputes.
///
/// Returns whether the completion marker was written.
pub fn write_worker_results(
    paths: &WorkerOutputPaths,
    result: &EstimationResult,
) -> Result<bool, EngineError> {
    let directory = paths.directory();
    std::fs::create_dir_all(directory).map_err(|e| EngineError::io(directory, e))?;

    let snapshot = bincode::serialize(result)
        .map_err(|e| EngineError::serialization("result snapshot", e))?;
    write_atomically(&paths.snapshot_path(), &snapshot)?;

    let json = serde_json::to_vec_pretty(&result.to_keyed())
        .map_err(|e| EngineError::serialization("keyed results", e))?;
    write_atomically(&paths.json_path(), &json)?;

    let complete = result.is_complete_success();
    let marker = paths.marker_path();
    if complete {
        write_atomically(&marker, sha256_hex(&json).as_bytes())?;
    } else if marker.exists() {
        std::fs::remove_file(&marker).map_err(|e| EngineError::io(&marker, e))?;
    }

    debug!(
        directory = %directory.display(),
        worker = paths.worker_index(),
        complete,
        "Wrote worker result files."
    );
    Ok(complete)
}

pub fn read_snapshot(path: &Path) -> Result<EstimationResult, EngineError> {
    let bytes = std::fs::read(path).map_err(|e| EngineError::io(path, e))?;
    bincode::deserialize(&bytes).map_err(|e| {
        EngineError::serialization(format!("result snapshot '{}'", path.display()), e)
    })
}

pub fn read_keyed(path: &Path) -> Result<KeyedOutcomes, EngineError> {
    let content = std::fs::read_to_string(path).map_err(|e| EngineError::io(path, e))?;
    serde_json::from_str(&content)
        .map_err(|e| EngineError::serialization(format!("keyed results '{}'", path.display()), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::property::{PhysicalProperty, Quantity};
    use crate::core::models::result::EstimationException;
    use tempfile::tempdir;

    fn result() -> EstimationResult {
        let mut estimated = PhysicalProperty::new("a", "Density", Quantity::new(0.99, "g / ml"));
        estimated.uncertainty = Some(Quantity::new(0.001, "g / ml"));
        EstimationResult {
            estimated: vec![estimated],
            unsuccessful: Vec::new(),
            exceptions: vec![EstimationException {
                property_id: "b".into(),
                message: "no schema".to_string(),
            }],
        }
    }

    #[test]
    fn replicate_layout_matches_naming_scheme() {
        let paths = WorkerOutputPaths::for_replicate(Path::new("tip3p_2.2.1"), Path::new("output"), 2, 1);
        assert_eq!(
            paths.json_path(),
            PathBuf::from("tip3p_2.2.1/output/rep-2/results-worker1.json")
        );
        assert_eq!(
            paths.snapshot_path(),
            PathBuf::from("tip3p_2.2.1/output/rep-2/results-worker1.bin")
        );
        assert_eq!(
            paths.marker_path(),
            PathBuf::from("tip3p_2.2.1/output/rep-2/results-worker1.done")
        );
    }

    #[test]
    fn partial_results_are_written_without_marker() {
        let dir = tempdir().unwrap();
        let paths = WorkerOutputPaths::new(dir.path().join("rep-1"), 0);

        let complete = write_worker_results(&paths, &result()).unwrap();

        assert!(!complete);
        assert_eq!(read_snapshot(&paths.snapshot_path()).unwrap(), result());
        let keyed = read_keyed(&paths.json_path()).unwrap();
        assert_eq!(keyed.len(), 2);
        assert!(!paths.marker_path().exists());
    }

    #[test]
    fn complete_results_get_a_digest_marker() {
        let dir = tempdir().unwrap();
        let paths = WorkerOutputPaths::new(dir.path().join("rep-1"), 0);
        let mut all_estimated = result();
        all_estimated.exceptions.clear();

        assert!(write_worker_results(&paths, &all_estimated).unwrap());

        let json = std::fs::read(paths.json_path()).unwrap();
        let marker = std::fs::read_to_string(paths.marker_path()).unwrap();
        assert_eq!(marker, sha256_hex(&json));

        // A later partial run invalidates the marker.
        write_worker_results(&paths, &result()).unwrap();
        assert!(!paths.marker_path().exists());
    }
}
