use super::fs::write_atomically;
use crate::engine::error::EngineError;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const RESULT_FILE_PREFIX: &str = "results-worker";
const RESULT_FILE_EXTENSION: &str = "json";

/// The union of several keyed result files.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedResultSet {
    entries: Map<String, Value>,
    sources: Vec<PathBuf>,
    overwritten: usize,
}

impl MergedResultSet {
    pub fn entries(&self) -> &Map<String, Value> {
        &self.entries
    }

    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of keys replaced by a later file.
    pub fn overwritten(&self) -> usize {
        self.overwritten
    }

    pub fn write(&self, path: &Path) -> Result<(), EngineError> {
        let json = serde_json::to_vec_pretty(&self.entries)
            .map_err(|e| EngineError::serialization("merged results", e))?;
        write_atomically(path, &json)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOptions {
    pub canonical_order: bool,
}

/// Folds per-worker keyed result files into one mapping; later files win on
/// key collisions.
#[derive(Debug, Clone, Default)]
pub struct ResultCollector {
    options: MergeOptions,
}

impl ResultCollector {
    pub fn new(options: MergeOptions) -> Self {
        Self { options }
    }

    pub fn merge(&self, paths: &[PathBuf]) -> Result<MergedResultSet, EngineError> {
        if let Some(missing) = paths.iter().find(|p| !p.is_file()) {
            return Err(EngineError::MissingInput {
                path: missing.clone(),
            });
        }

        let mut ordered = paths.to_vec();
        if self.options.canonical_order {
            sort_canonically(&mut ordered);
        }

        let mut merged = MergedResultSet::default();
        for path in ordered {
            let mapping = read_mapping(&path)?;
            debug!(path = %path.display(), entries = mapping.len(), "Merging result file.");
            for (key, value) in mapping {
                if merged.entries.insert(key.clone(), value).is_some() {
                    warn!(key = %key, path = %path.display(), "Identifier already merged; the later file wins.");
                    merged.overwritten += 1;
                }
            }
            merged.sources.push(path);
        }

        info!(
            files = merged.sources.len(),
            entries = merged.len(),
            "Merged result files."
        );
        Ok(merged)
    }
}

/// Every `results-worker*.json` file directly inside `directory`, in canonical order.
pub fn discover_result_files(directory: &Path) -> Result<Vec<PathBuf>, EngineError> {
    if !directory.is_dir() {
        return Err(EngineError::MissingInput {
            path: directory.to_path_buf(),
        });
    }
    let entries = std::fs::read_dir(directory).map_err(|e| EngineError::io(directory, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| EngineError::io(directory, e))?.path();
        let is_result = path.is_file()
            && path.extension().is_some_and(|ext| ext == RESULT_FILE_EXTENSION)
            && path
                .file_stem()
                .and_then(|s| s.to_str())
                .is_some_and(|s| s.starts_with(RESULT_FILE_PREFIX));
        if is_result {
            files.push(path);
        }
    }
    sort_canonically(&mut files);
    Ok(files)
}

/// Worker index encoded in a `results-worker{k}` file name.
pub fn worker_index_of(path: &Path) -> Option<usize> {
    path.file_stem()?
        .to_str()?
        .strip_prefix(RESULT_FILE_PREFIX)?
        .parse()
        .ok()
}

fn sort_canonically(paths: &mut [PathBuf]) {
    // Indexed files first by index, the rest by path.
    paths.sort_by(|a, b| match (worker_index_of(a), worker_index_of(b)) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.cmp(b),
    });
}

fn read_mapping(path: &Path) -> Result<Map<String, Value>, EngineError> {
    let content = std::fs::read_to_string(path).map_err(|e| EngineError::io(path, e))?;
    match serde_json::from_str(&content) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(EngineError::serialization(
            format!("result file '{}'", path.display()),
            "expected a JSON object keyed by property identifier",
        )),
        Err(e) => Err(EngineError::serialization(
            format!("result file '{}'", path.display()),
            e,
        )),
    }
}
