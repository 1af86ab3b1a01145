use crate::core::io::merge::{MergeOptions, ResultCollector, discover_result_files};
use crate::engine::config::{MergeConfig, MergeInputs};
use crate::engine::error::EngineError;
use crate::engine::progress::{Progress, ProgressReporter};
use std::path::PathBuf;
use tracing::{info, instrument};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeSummary {
    pub files: usize,
    pub entries: usize,
    pub overwritten: usize,
    pub output_path: PathBuf,
}

/// Merges per-worker result files into one mapping and writes it atomically.
/// Nothing is written unless every input exists and parses.
#[instrument(skip_all, name = "merge_workflow")]
pub fn run(config: &MergeConfig, reporter: &ProgressReporter) -> Result<MergeSummary, EngineError> {
    reporter.report(Progress::PhaseStart {
        name: "Merging results",
    });

    let (paths, canonical_order) = match &config.inputs {
        MergeInputs::Files(paths) => (paths.clone(), config.canonical_order),
        MergeInputs::Directory(directory) => (discover_result_files(directory)?, true),
    };
    if paths.is_empty() {
        return Err(EngineError::Configuration(
            "no result files to merge".to_string(),
        ));
    }

    let merged = ResultCollector::new(MergeOptions { canonical_order }).merge(&paths)?;
    merged.write(&config.output_path)?;
    reporter.report(Progress::PhaseFinish);

    info!(
        files = merged.sources().len(),
        entries = merged.len(),
        output = %config.output_path.display(),
        "Wrote merged results."
    );
    Ok(MergeSummary {
        files: merged.sources().len(),
        entries: merged.len(),
        overwritten: merged.overwritten(),
        output_path: config.output_path.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn directory_mode_merges_every_worker_file() {
        let dir = tempdir().unwrap();
        for (k, ids) in [(0, ["a", "b"]), (1, ["c", "d"]), (2, ["e", "a"])] {
            let map: serde_json::Map<String, serde_json::Value> = ids
                .iter()
                .map(|id| (id.to_string(), serde_json::json!({ "worker": k })))
                .collect();
            std::fs::write(
                dir.path().join(format!("results-worker{}.json", k)),
                serde_json::to_string(&map).unwrap(),
            )
            .unwrap();
        }
        let output = dir.path().join("merged_results.json");

        let summary = run(
            &MergeConfig {
                inputs: MergeInputs::Directory(dir.path().to_path_buf()),
                output_path: output.clone(),
                canonical_order: false,
            },
            &ProgressReporter::new(),
        )
        .unwrap();

        assert_eq!(summary.files, 3);
        assert_eq!(summary.entries, 5);
        assert_eq!(summary.overwritten, 1);
        let merged: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(merged["a"]["worker"], 2);
    }

    #[test]
    fn missing_file_produces_no_output() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("merged_results.json");

        let err = run(
            &MergeConfig {
                inputs: MergeInputs::Files(vec![dir.path().join("results-worker0.json")]),
                output_path: output.clone(),
                canonical_order: false,
            },
            &ProgressReporter::new(),
        )
        .unwrap_err();

        assert!(matches!(err, EngineError::MissingInput { .. }));
        assert!(!output.exists());
    }

    #[test]
    fn empty_directory_is_a_configuration_error() {
        let dir = tempdir().unwrap();
        let err = run(
            &MergeConfig {
                inputs: MergeInputs::Directory(dir.path().to_path_buf()),
                output_path: dir.path().join("merged_results.json"),
                canonical_order: true,
            },
            &ProgressReporter::new(),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }
}
